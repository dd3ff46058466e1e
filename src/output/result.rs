//! Execution results
//!
//! The outcome of one execution, plus the content-block rendering used by
//! tool servers (`{"type": "text"}` / `{"type": "image"}` items).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::output::collector::ImageArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    PolicyViolation,
    OperationLimitExceeded,
    IterationLimitExceeded,
    RuntimeError,
}

impl FailureKind {
    pub fn name(self) -> &'static str {
        match self {
            FailureKind::PolicyViolation => "PolicyViolation",
            FailureKind::OperationLimitExceeded => "OperationLimitExceeded",
            FailureKind::IterationLimitExceeded => "IterationLimitExceeded",
            FailureKind::RuntimeError => "RuntimeError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&SandboxError> for FailureKind {
    fn from(err: &SandboxError) -> Self {
        match err {
            SandboxError::Syntax { .. } | SandboxError::Runtime(_) | SandboxError::Config(_) => {
                FailureKind::RuntimeError
            }
            SandboxError::Policy(_) => FailureKind::PolicyViolation,
            SandboxError::OperationLimit { .. } | SandboxError::Cancelled => {
                FailureKind::OperationLimitExceeded
            }
            SandboxError::IterationLimit { .. } => FailureKind::IterationLimitExceeded,
        }
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success {
        text: String,
        images: Vec<ImageArtifact>,
        truncated: bool,
    },
    Failure {
        kind: FailureKind,
        message: String,
        /// Text printed before the abort
        output: String,
    },
}

/// Marker placed between the kept head and tail of an over-long message.
fn truncation_notice(max_length: usize) -> String {
    format!(
        "\n..._This content has been truncated to stay below {} characters_...\n",
        max_length
    )
}

/// Keep the head and tail of `message` when it exceeds `max_length`
/// characters.
pub fn truncate_message(message: &str, max_length: usize) -> String {
    let total = message.chars().count();
    if total <= max_length {
        return message.to_string();
    }
    let half = max_length / 2;
    let head: String = message.chars().take(half).collect();
    let tail: String = message.chars().skip(total - half).collect();
    format!("{}{}{}", head, truncation_notice(max_length), tail)
}

impl ExecutionResult {
    pub fn success(text: String, images: Vec<ImageArtifact>, truncated: bool) -> Self {
        ExecutionResult::Success {
            text,
            images,
            truncated,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>, output: String) -> Self {
        ExecutionResult::Failure {
            kind,
            message: message.into(),
            output,
        }
    }

    /// Map an aborting error to its failure, keeping the prior output.
    pub fn from_error(err: &SandboxError, output: String, max_message_length: usize) -> Self {
        let kind = FailureKind::from(err);
        let output = match kind {
            FailureKind::PolicyViolation => String::new(),
            _ => output,
        };
        let message = truncate_message(&err.to_string(), max_message_length);
        ExecutionResult::Failure {
            kind,
            message,
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionResult::Failure { kind, .. } => Some(*kind),
            ExecutionResult::Success { .. } => None,
        }
    }

    /// Printed text, whether or not the execution completed.
    pub fn text(&self) -> &str {
        match self {
            ExecutionResult::Success { text, .. } => text,
            ExecutionResult::Failure { output, .. } => output,
        }
    }

    pub fn images(&self) -> &[ImageArtifact] {
        match self {
            ExecutionResult::Success { images, .. } => images,
            ExecutionResult::Failure { .. } => &[],
        }
    }

    pub fn to_content_blocks(&self) -> Vec<ContentBlock> {
        match self {
            ExecutionResult::Success { text, images, .. } => {
                let mut blocks = Vec::with_capacity(images.len() + 1);
                blocks.push(ContentBlock::Text { text: text.clone() });
                blocks.extend(images.iter().map(ContentBlock::image));
                blocks
            }
            ExecutionResult::Failure {
                kind,
                message,
                output,
            } => {
                let mut text = String::new();
                if !output.is_empty() {
                    text.push_str(output);
                    if !output.ends_with('\n') {
                        text.push('\n');
                    }
                }
                text.push_str(&format!("{}: {}", kind, message));
                vec![ContentBlock::Text { text }]
            }
        }
    }
}

/// A tool-result content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64 payload
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentBlock {
    pub fn image(image: &ImageArtifact) -> Self {
        ContentBlock::Image {
            data: image.to_base64(),
            mime_type: image.mime_type().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(SandboxError::policy("os.system is not permitted"), FailureKind::PolicyViolation)]
    #[case(SandboxError::OperationLimit { limit: 10 }, FailureKind::OperationLimitExceeded)]
    #[case(SandboxError::Cancelled, FailureKind::OperationLimitExceeded)]
    #[case(SandboxError::IterationLimit { limit: 10, line: Some(2) }, FailureKind::IterationLimitExceeded)]
    #[case(SandboxError::syntax("invalid syntax", Some(1)), FailureKind::RuntimeError)]
    #[case(SandboxError::runtime(ExceptionKind::KeyError, "'a'"), FailureKind::RuntimeError)]
    #[case(SandboxError::Config("missing field".to_string()), FailureKind::RuntimeError)]
    fn test_failure_kind_mapping(#[case] err: SandboxError, #[case] expected: FailureKind) {
        assert_eq!(FailureKind::from(&err), expected);
    }

    #[test]
    fn test_policy_failure_drops_output() {
        let err = SandboxError::policy("os.system is not permitted");
        let result = ExecutionResult::from_error(&err, "partial".to_string(), 100);
        assert_eq!(
            result,
            ExecutionResult::failure(
                FailureKind::PolicyViolation,
                "os.system is not permitted",
                String::new()
            )
        );
    }

    #[test]
    fn test_runtime_failure_keeps_output() {
        let err = SandboxError::runtime(ExceptionKind::ZeroDivisionError, "division by zero").at_line(2);
        let result = ExecutionResult::from_error(&err, "1\n".to_string(), 100);
        assert_eq!(result.text(), "1\n");
        let blocks = result.to_content_blocks();
        assert_eq!(
            blocks,
            vec![ContentBlock::Text {
                text: "1\nRuntimeError: ZeroDivisionError: division by zero (line 2)".to_string()
            }]
        );
    }

    #[test]
    fn test_truncate_message_keeps_head_and_tail() {
        let message = "a".repeat(10) + &"b".repeat(10);
        let truncated = truncate_message(&message, 10);
        assert!(truncated.starts_with("aaaaa\n..._This content has been truncated"));
        assert!(truncated.ends_with("_...\nbbbbb"));
        assert_eq!(truncate_message("short", 10), "short");
    }

    #[test]
    fn test_image_block_serializes_mime_type() {
        let block = ContentBlock::image(&ImageArtifact::png(vec![1, 2, 3]));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "image", "data": "AQID", "mimeType": "image/png"})
        );
    }
}
