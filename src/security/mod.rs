//! Security module for Sandpit
//!
//! The policy registry and the static guard that enforces it before a
//! script runs.

pub mod guard;
pub mod policy;

pub use guard::{check_program, collect_violations, Violation, ViolationKind};
pub use policy::{Binding, PolicyBuilder, PolicySet, QualifiedName};
