//! Sandpit - a policy-enforced, resource-bounded script sandbox
//!
//! Sandpit runs untrusted, Python-flavoured script text with a narrowed
//! capability surface. A script is parsed, checked by a static guard against
//! a [`PolicySet`], then interpreted under hard operation, loop-iteration,
//! output and memory ceilings. Printed text and rendered figures come back
//! as an [`ExecutionResult`].
//!
//! # Example
//!
//! ```
//! use sandpit::{ExecutionResult, Sandbox};
//!
//! let sandbox = Sandbox::default();
//! let result = sandbox.execute("print(1 + 1)");
//! assert_eq!(result, ExecutionResult::success("2\n".to_string(), Vec::new(), false));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod parser;
pub mod plot;
pub mod script;
pub mod security;

pub use config::{Limits, SandboxConfig};
pub use error::{ExceptionKind, Result, SandboxError, ScriptException};
pub use output::{
    format_output, ContentBlock, ExecutionResult, FailureKind, ImageArtifact, ImageEncoding,
    OutputFormat,
};
pub use parser::{parse_program, Program};
pub use script::Sandbox;
pub use security::{check_program, PolicySet, QualifiedName};
