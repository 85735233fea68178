//! Parse phase: JSON → Rust AST, followed by the one normalizing pre-pass
//! (C5) that rewrites the AST into the canonical form the lowering passes
//! expect.

pub mod ast;
pub mod normalize;

use crate::error::CompilerError;
use ast::Function;

/// Deserializes a function AST JSON document into `Function`. The
/// surface-language parser, type-checker, and scope resolution happen
/// upstream (§1) — this just decodes the already-resolved tree.
pub fn parse(json: &str) -> Result<Function, Vec<CompilerError>> {
    serde_json::from_str::<Function>(json).map_err(|e| vec![CompilerError::parse(format!("failed to parse function AST: {e}"))])
}

/// Parses and immediately normalizes, the usual entry point for callers
/// that only need the canonical AST.
pub fn parse_and_normalize(json: &str) -> Result<Function, Vec<CompilerError>> {
    let function = parse(json)?;
    normalize::normalize_function(function).map_err(|e| vec![e])
}
