//! ASL lowering engine: compiles a normalized, JS-like function AST into an
//! Amazon States Language state machine (§1, §6).
//!
//! [`compile`] is the single public entry point: parse + normalize → lower
//! the body → flatten to `{StartAt, States}` → validate the result's shape.
//! Everything upstream of the AST (the surface-language parser, type
//! checker, and scope resolver) and everything downstream of the ASL JSON
//! (deployment, infra) is out of scope (§1).

pub mod config;
pub mod error;
pub mod ir;
pub mod lower;
pub mod parse;
pub mod wasm;

use serde_json::Value as Json;

use config::CompileOptions;
use error::CompilerError;
use lower::integration::{IntegrationResolver, NullIntegrationResolver};
use lower::names::StateNameAllocator;

/// Compiles one function AST (as JSON text, §6 input contract) into its ASL
/// JSON document, using the supplied integration resolver for any call
/// expressions that reference external integrations (§4.10). Fails fast on
/// the first phase that reports an error (§7).
#[tracing::instrument(level = "debug", skip_all)]
pub fn compile(function_json: &str, options: CompileOptions, integrations: &dyn IntegrationResolver) -> Result<Json, Vec<CompilerError>> {
    let function = parse::parse_and_normalize(function_json)?;
    let body = lower::lower_function(&function, options.clone(), integrations)?;

    let mut names = StateNameAllocator::new(&options);
    let asl = ir::graph::to_asl_json(&body, &mut names, &options.null_context_path);

    let shape_errors = ir::validate_asl(&asl);
    if !shape_errors.is_empty() {
        return Err(shape_errors.into_iter().map(CompilerError::from).collect());
    }

    Ok(asl)
}

/// Same as [`compile`], using [`NullIntegrationResolver`] — the usual entry
/// point when the source program makes no integration calls.
pub fn compile_standalone(function_json: &str, options: CompileOptions) -> Result<Json, Vec<CompilerError>> {
    compile(function_json, options, &NullIntegrationResolver)
}
