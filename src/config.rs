//! Sandbox configuration
//!
//! `Limits` holds the hard ceilings applied to every execution and
//! `SandboxConfig` is the serde-facing bundle callers hand to
//! [`crate::Sandbox::from_config`]. Every field has a default, so a partial
//! JSON document (or `{}`) is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Resource ceilings for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum characters of collected text output.
    pub max_output_length: usize,
    /// Maximum evaluated statements plus calls.
    pub max_operations: u64,
    /// Maximum iterations of any single loop site.
    pub max_loop_iterations: u64,
    /// Maximum characters of a failure message.
    pub max_message_length: usize,
    /// Maximum nested function calls.
    pub max_call_depth: usize,
    /// Maximum elements (or characters) of a single created container or string.
    pub max_sequence_length: usize,
    /// Maximum length of an attribute chain such as `a.b.c`.
    pub max_attribute_depth: usize,
    /// Maximum bracket and syntax tree nesting.
    pub max_nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_output_length: 50_000,
            max_operations: 10_000,
            max_loop_iterations: 10_000,
            max_message_length: 20_000,
            max_call_depth: 200,
            max_sequence_length: 1_000_000,
            max_attribute_depth: 8,
            max_nesting_depth: 100,
        }
    }
}

impl Limits {
    pub fn with_max_operations(mut self, max: u64) -> Self {
        self.max_operations = max;
        self
    }

    pub fn with_max_loop_iterations(mut self, max: u64) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_max_output_length(mut self, max: usize) -> Self {
        self.max_output_length = max;
        self
    }

    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    pub fn with_max_sequence_length(mut self, max: usize) -> Self {
        self.max_sequence_length = max;
        self
    }
}

/// Full sandbox configuration, deserialisable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(flatten)]
    pub limits: Limits,
    /// Expose `matplotlib` and `send_image_to_client`.
    pub enable_plotting: bool,
    /// Wall-clock budget in milliseconds; `None` runs without a deadline.
    pub timeout_ms: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            enable_plotting: true,
            timeout_ms: None,
        }
    }
}

impl SandboxConfig {
    /// Parse a configuration document.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| SandboxError::Config(e.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_output_length, 50_000);
        assert_eq!(limits.max_operations, 10_000);
        assert_eq!(limits.max_loop_iterations, 10_000);
        assert_eq!(limits.max_message_length, 20_000);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = SandboxConfig::from_json("{}").unwrap();
        assert_eq!(config, SandboxConfig::default());
        assert!(config.enable_plotting);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_partial_json() {
        let config =
            SandboxConfig::from_json(r#"{"max_operations": 500, "enable_plotting": false, "timeout_ms": 250}"#)
                .unwrap();
        assert_eq!(config.limits.max_operations, 500);
        assert_eq!(config.limits.max_loop_iterations, 10_000);
        assert!(!config.enable_plotting);
        assert_eq!(config.timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_json() {
        let err = SandboxConfig::from_json("{\"max_operations\": \"lots\"}").unwrap_err();
        assert!(matches!(err, SandboxError::Config(_)));
        assert!(err.to_string().starts_with("invalid sandbox configuration: "));
    }
}
