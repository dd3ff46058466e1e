//! Human-readable output formatting

use crate::output::result::ExecutionResult;

pub fn format_human(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Success { text, images, .. } => {
            let mut output = text.clone();
            for (i, image) in images.iter().enumerate() {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(&format!(
                    "[image {}: {}, {} bytes]\n",
                    i + 1,
                    image.mime_type(),
                    image.payload.len()
                ));
            }
            output
        }
        ExecutionResult::Failure {
            kind,
            message,
            output,
        } => {
            let mut text = output.clone();
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("{}: {}", kind, message));
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::collector::ImageArtifact;
    use crate::output::result::FailureKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_success_lists_images() {
        let result = ExecutionResult::success("hi".to_string(), vec![ImageArtifact::png(vec![1, 2])], false);
        assert_eq!(format_human(&result), "hi\n[image 1: image/png, 2 bytes]\n");
    }

    #[test]
    fn test_failure_follows_output() {
        let result = ExecutionResult::failure(
            FailureKind::PolicyViolation,
            "import of module 'os' is not permitted",
            String::new(),
        );
        assert_eq!(
            format_human(&result),
            "PolicyViolation: import of module 'os' is not permitted"
        );
    }
}
