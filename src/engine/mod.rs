//! Resource-bounded interpreter
//!
//! Walks a guarded [`Program`](crate::parser::ast::Program) against a
//! [`PolicySet`](crate::security::policy::PolicySet), charging every step to
//! the [`ExecutionState`] of the run.

pub mod args;
pub mod builtins;
pub mod format;
pub mod interpreter;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod scope;
pub mod state;
pub mod value;

pub use args::Args;
pub use interpreter::Interpreter;
pub use state::ExecutionState;
pub use value::Value;
