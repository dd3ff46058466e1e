//! Script execution
//!
//! The [`Sandbox`] ties parsing, guarding, interpretation and result
//! formatting together.

pub mod runner;

pub use runner::Sandbox;
