//! JSON output formatting

use serde_json::{json, Value};

use crate::output::result::ExecutionResult;

pub fn to_json_value(result: &ExecutionResult) -> Value {
    match result {
        ExecutionResult::Success {
            text,
            images,
            truncated,
        } => {
            let images: Vec<Value> = images
                .iter()
                .map(|image| json!({ "mimeType": image.mime_type(), "data": image.to_base64() }))
                .collect();
            json!({
                "status": "success",
                "text": text,
                "images": images,
                "truncated": truncated,
            })
        }
        ExecutionResult::Failure {
            kind,
            message,
            output,
        } => json!({
            "status": "failure",
            "kind": kind.name(),
            "message": message,
            "output": output,
        }),
    }
}

pub fn format_json(result: &ExecutionResult) -> String {
    serde_json::to_string_pretty(&to_json_value(result)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::collector::ImageArtifact;
    use crate::output::result::FailureKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_success_json() {
        let result = ExecutionResult::success("2\n".to_string(), vec![ImageArtifact::png(vec![0])], false);
        assert_eq!(
            to_json_value(&result),
            json!({
                "status": "success",
                "text": "2\n",
                "images": [{"mimeType": "image/png", "data": "AA=="}],
                "truncated": false,
            })
        );
    }

    #[test]
    fn test_failure_json_round_trips_through_text() {
        let result = ExecutionResult::failure(
            FailureKind::IterationLimitExceeded,
            "loop iteration limit of 5 exceeded (line 2)",
            "a\n".to_string(),
        );
        let parsed: Value = serde_json::from_str(&format_json(&result)).unwrap();
        assert_eq!(parsed["kind"], "IterationLimitExceeded");
        assert_eq!(parsed["output"], "a\n");
    }
}
