//! Parser module for Sandpit scripts

pub mod ast;
pub mod fstring;
pub mod grammar;
pub mod layout;

pub use ast::*;
pub use grammar::{parse_program, parse_program_with_depth};
