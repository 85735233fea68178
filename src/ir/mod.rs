//! The in-memory IR (C3) and its validation pass.

pub mod graph;
pub mod types;
pub mod validate;

pub use validate::{validate_asl, ValidationError};
