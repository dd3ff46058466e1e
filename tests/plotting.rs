//! Figures rendered by scripts come back as PNG artifacts.

use pretty_assertions::assert_eq;
use sandpit::{
    ContentBlock, ExecutionResult, FailureKind, ImageArtifact, Limits, PolicySet, Sandbox,
    SandboxConfig,
};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

fn run(source: &str) -> ExecutionResult {
    Sandbox::new(
        PolicySet::standard(),
        Limits::default().with_max_operations(1_000_000),
    )
    .execute(source)
}

fn images(source: &str) -> Vec<ImageArtifact> {
    match run(source) {
        ExecutionResult::Success { images, .. } => images,
        failure => panic!("script failed: {:?}", failure),
    }
}

/// Width and height from the IHDR chunk.
fn dimensions(png: &[u8]) -> (u32, u32) {
    assert_eq!(&png[..8], &PNG_SIGNATURE);
    assert_eq!(&png[12..16], b"IHDR");
    let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
    let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
    (width, height)
}

#[test]
fn test_show_produces_png() {
    let images = images(
        "\
import matplotlib.pyplot as plt
plt.plot([1, 2, 3], [4, 1, 9], 'r--', label='series')
plt.title('demo')
plt.legend()
plt.show()
",
    );
    assert_eq!(images.len(), 1);
    let png = &images[0].payload;
    assert_eq!(dimensions(png), (640, 480));
    assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
}

#[test]
fn test_figsize_sets_dimensions() {
    let images = images(
        "\
import matplotlib.pyplot as plt
fig = plt.figure(figsize=(4, 3))
plt.bar(['a', 'b'], [3, 5])
plt.show()
",
    );
    assert_eq!(dimensions(&images[0].payload), (400, 300));
}

#[test]
fn test_send_image_to_client_renders_each_call() {
    let images = images(
        "\
import matplotlib.pyplot as plt
fig, ax = plt.subplots()
ax.scatter([1, 2, 3], [3, 2, 1])
send_image_to_client(fig)
ax.hist([1, 1, 2, 3, 3, 3], bins=3)
send_image_to_client(fig)
",
    );
    assert_eq!(images.len(), 2);
    assert_ne!(images[0].payload, images[1].payload);
}

#[test]
fn test_show_closes_figures() {
    let images = images(
        "\
import matplotlib.pyplot as plt
plt.plot([1, 2])
plt.show()
plt.show()
",
    );
    assert_eq!(images.len(), 1);
}

#[test]
fn test_images_follow_text_in_content_blocks() {
    let result = run(
        "\
import matplotlib.pyplot as plt
print('plotting')
plt.plot([0, 1])
plt.show()
",
    );
    let blocks = result.to_content_blocks();
    assert_eq!(blocks.len(), 2);
    assert_eq!(
        blocks[0],
        ContentBlock::Text {
            text: "plotting\n".to_string()
        }
    );
    let ContentBlock::Image { mime_type, data } = &blocks[1] else {
        panic!("expected an image block");
    };
    assert_eq!(mime_type, "image/png");
    assert!(data.starts_with("iVBORw0KGgo"));
}

#[test]
fn test_plotting_can_be_disabled() {
    let config = SandboxConfig {
        enable_plotting: false,
        ..SandboxConfig::default()
    };
    let result = Sandbox::from_config(&config).execute("send_image_to_client()");
    assert_eq!(result.failure_kind(), Some(FailureKind::PolicyViolation));
}

#[test]
fn test_bad_plot_arguments_are_catchable() {
    let source = "\
import matplotlib.pyplot as plt
try:
    plt.plot([1, 2, 3], [1, 2])
except ValueError:
    print('mismatch')
";
    let result = run(source);
    assert_eq!(result.text(), "mismatch\n");
    assert!(result.images().is_empty());
}
