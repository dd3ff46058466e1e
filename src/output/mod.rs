//! Output collection and result formatting

pub mod collector;
pub mod formatter;
pub mod human;
pub mod json;
pub mod result;

pub use collector::{ImageArtifact, ImageEncoding, OutputCollector, TRUNCATION_MARKER};
pub use formatter::{format_output, OutputFormat};
pub use result::{ContentBlock, ExecutionResult, FailureKind};
