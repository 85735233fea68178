//! Lowering phase: `Function` AST → ASL `SubState` graph (§4.6-§4.11).
//!
//! Owns only the top-level wiring a single compilation needs: binding the
//! function's parameters (context param via `LowerCtx::set_context_param`,
//! the input param against the root `$`), then handing the body to the
//! Statement Lowerer with a terminal `ReturnTemplate` that writes straight
//! to `$` (§8 scenario 1). Everything else lives in the named submodules.

pub mod array_methods;
pub mod binding;
pub mod condition;
pub mod context;
pub mod error_router;
pub mod expr;
pub mod integration;
pub mod intrinsic;
pub mod names;
pub mod stmt;

use crate::config::CompileOptions;
use crate::error::CompilerError;
use crate::ir::types::SubState;
use crate::lower::binding::bind_pattern;
use crate::lower::context::LowerCtx;
use crate::lower::integration::IntegrationResolver;
use crate::lower::stmt::{lower_block, ReturnTemplate};
use crate::parse::ast::{DeclId, Function, Pattern};

/// Lowers a normalized function body into one ASL sub-state graph rooted at
/// its `StartAt` label. The caller is responsible for flattening the result
/// (`ir::graph::to_asl_json`) and prefixing the "Initialize Functionless
/// Context" state.
#[tracing::instrument(level = "debug", skip_all)]
pub fn lower_function(
    function: &Function,
    options: CompileOptions,
    integrations: &dyn IntegrationResolver,
) -> Result<SubState, Vec<CompilerError>> {
    let mut ctx = LowerCtx::new(options, integrations);

    let mut parts = Vec::new();
    let mut bound_input = false;
    for param in &function.params {
        if param.is_context_param {
            match context_decl(&param.pattern) {
                Some(decl) => ctx.set_context_param(decl),
                None => ctx.errors.push(CompilerError::unsupported(
                    "the ASL context parameter must be a plain identifier",
                    Some(param.span),
                )),
            }
            continue;
        }
        if bound_input {
            ctx.errors.push(CompilerError::unsupported(
                "only one non-context parameter is supported",
                Some(param.span),
            ));
            continue;
        }
        bound_input = true;
        let input = crate::ir::types::Output::JsonPath("$".to_string());
        parts.push(bind_pattern(&mut ctx, &param.pattern, &input, param.span));
    }

    let template = ReturnTemplate { result_path: "$".to_string(), next: None };
    parts.push(lower_block(&mut ctx, &function.body, &template));

    if !ctx.errors.is_empty() {
        return Err(ctx.errors);
    }

    Ok(crate::ir::graph::join_sub_states(parts).expect("normalizer guarantees a non-empty body"))
}

fn context_decl(pattern: &Pattern) -> Option<DeclId> {
    match pattern {
        Pattern::Identifier { decl, .. } => Some(*decl),
        _ => None,
    }
}
