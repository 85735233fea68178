//! Shared helpers for building small `Function` ASTs by hand and running
//! them through the lowering pipeline, used by every test file under
//! `tests/`.

use asl_lower::config::CompileOptions;
use asl_lower::lower;
use asl_lower::parse::ast::*;

pub fn span() -> Span {
    Span { line: 1, column: 1 }
}

pub fn ident_param(name: &str) -> Param {
    Param { pattern: Pattern::Identifier { decl: DeclId(0), name: name.to_string() }, is_context_param: false, span: span() }
}

pub fn num(n: f64) -> Expr {
    Expr::Literal { value: Literal::Number(n), span: span() }
}

pub fn ident(decl: u32, name: &str) -> Expr {
    Expr::Identifier { decl: DeclId(decl), name: name.to_string(), span: span() }
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right), span: span() }
}

/// Compiles a function body directly from its AST (bypassing JSON parsing),
/// returning the flattened ASL document. Mirrors what `compile` does once
/// `parse_and_normalize` has handed back a `Function`.
pub fn lower_and_flatten(function: &Function) -> serde_json::Value {
    let options = CompileOptions::default();
    let body = lower::lower_function(function, options.clone(), &lower::integration::NullIntegrationResolver).expect("lowering should succeed");
    let mut names = lower::names::StateNameAllocator::new(&options);
    asl_lower::ir::graph::to_asl_json(&body, &mut names, &options.null_context_path)
}
