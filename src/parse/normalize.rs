//! AST Normalizer (C5): the single pre-pass that rewrites a parsed
//! `Function` into the canonical form the lowering passes assume.
//!
//! - Appends `return null` to a function body whose last statement is not
//!   terminal, so the statement lowerer always has a terminal statement to
//!   close a sub-state graph with (§4.5).
//! - Rejects `for-await-of`, rest parameters, `with`, and `switch` with a
//!   stable error code (§4.5).

use crate::error::{CompilerError, CompilerErrorKind};
use crate::parse::ast::{Function, Pattern, Span, Stmt};

pub fn normalize_function(mut function: Function) -> Result<Function, CompilerError> {
    for param in &function.params {
        reject_rest_pattern(&param.pattern, param.span)?;
    }
    for stmt in &function.body {
        reject_unsupported(stmt)?;
    }
    if !ends_in_terminal(&function.body) {
        function.body.push(Stmt::Return { argument: None, span: function.span });
    }
    Ok(function)
}

fn reject_rest_pattern(pattern: &Pattern, span: Span) -> Result<(), CompilerError> {
    match pattern {
        Pattern::Array { rest: Some(_), .. } => Err(unsupported("rest parameters are not supported", span)),
        Pattern::Object { rest: Some(_), .. } => Err(unsupported("object rest patterns are not supported", span)),
        Pattern::Object { properties, .. } => {
            for p in properties {
                reject_rest_pattern(&p.value, span)?;
            }
            Ok(())
        }
        Pattern::Array { elements, .. } => {
            for el in elements.iter().flatten() {
                reject_rest_pattern(&el.pattern, span)?;
            }
            Ok(())
        }
        Pattern::Identifier { .. } => Ok(()),
    }
}

fn reject_unsupported(stmt: &Stmt) -> Result<(), CompilerError> {
    match stmt {
        Stmt::ForAwaitOf { span } => Err(unsupported("for-await-of is not supported", *span)),
        Stmt::With { span } => Err(unsupported("`with` is not supported", *span)),
        Stmt::Switch { span } => Err(unsupported("`switch` is not supported", *span)),
        Stmt::Block { body, .. } => body.iter().try_for_each(reject_unsupported),
        Stmt::If { consequent, alternate, .. } => {
            reject_unsupported(consequent)?;
            if let Some(alt) = alternate {
                reject_unsupported(alt)?;
            }
            Ok(())
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                reject_unsupported(init)?;
            }
            reject_unsupported(body)
        }
        Stmt::ForOf { body, .. } | Stmt::ForIn { body, .. } | Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
            reject_unsupported(body)
        }
        Stmt::Try { block, handler, finalizer, .. } => {
            block.iter().try_for_each(reject_unsupported)?;
            if let Some(h) = handler {
                h.body.iter().try_for_each(reject_unsupported)?;
            }
            if let Some(f) = finalizer {
                f.iter().try_for_each(reject_unsupported)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn unsupported(message: impl Into<String>, span: Span) -> CompilerError {
    CompilerError::new(CompilerErrorKind::UnsupportedFeature(message.into()), crate::error::Phase::Normalize, Some(span))
}

fn ends_in_terminal(body: &[Stmt]) -> bool {
    match body.last() {
        Some(stmt) => is_terminal(stmt),
        None => false,
    }
}

/// A statement is terminal if control can never fall through it — i.e. it
/// always returns or throws. Used only to decide whether to append a
/// synthetic `return null`; conservative by design (loops are never
/// considered terminal even when a body always returns, since a zero-
/// iteration loop falls through).
fn is_terminal(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Return { .. } | Stmt::Throw { .. } => true,
        Stmt::Block { body, .. } => ends_in_terminal(body),
        Stmt::If { consequent, alternate, .. } => match alternate {
            Some(alt) => is_terminal(consequent) && is_terminal(alt),
            None => false,
        },
        Stmt::Try { block, handler, finalizer, .. } => {
            if let Some(finalizer) = finalizer {
                if ends_in_terminal(finalizer) {
                    return true;
                }
            }
            let try_terminal = ends_in_terminal(block);
            let catch_terminal = handler.as_ref().map(|h| ends_in_terminal(&h.body)).unwrap_or(false);
            try_terminal && (handler.is_none() || catch_terminal)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ast::{DeclId, Literal};

    fn span() -> Span {
        Span { line: 1, column: 1 }
    }

    fn ident_param(name: &str) -> crate::parse::ast::Param {
        crate::parse::ast::Param {
            pattern: Pattern::Identifier { decl: DeclId(0), name: name.to_string() },
            is_context_param: false,
            span: span(),
        }
    }

    #[test]
    fn appends_return_null_when_not_terminal() {
        let f = Function {
            params: vec![ident_param("x")],
            body: vec![Stmt::Expression {
                expr: crate::parse::ast::Expr::Literal { value: Literal::Number(1.0), span: span() },
                span: span(),
            }],
            span: span(),
        };
        let normalized = normalize_function(f).unwrap();
        assert!(matches!(normalized.body.last(), Some(Stmt::Return { argument: None, .. })));
    }

    #[test]
    fn leaves_terminal_body_alone() {
        let f = Function {
            params: vec![ident_param("x")],
            body: vec![Stmt::Return { argument: None, span: span() }],
            span: span(),
        };
        let normalized = normalize_function(f).unwrap();
        assert_eq!(normalized.body.len(), 1);
    }

    #[test]
    fn rejects_for_await_of() {
        let f = Function {
            params: vec![],
            body: vec![Stmt::ForAwaitOf { span: span() }],
            span: span(),
        };
        assert!(normalize_function(f).is_err());
    }

    #[test]
    fn rejects_rest_param() {
        let f = Function {
            params: vec![crate::parse::ast::Param {
                pattern: Pattern::Array { elements: vec![], rest: Some(Box::new(Pattern::Identifier { decl: DeclId(0), name: "r".into() })) },
                is_context_param: false,
                span: span(),
            }],
            body: vec![Stmt::Return { argument: None, span: span() }],
            span: span(),
        };
        assert!(normalize_function(f).is_err());
    }
}
