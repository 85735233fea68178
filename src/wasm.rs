//! WASM entry point for browser/Node embedders (§6 external interfaces).

use wasm_bindgen::prelude::*;

use crate::config::CompileOptions;
use crate::error::CompilerError;
use crate::lower::integration::NullIntegrationResolver;

/// Compiles a function AST (JSON text) into its ASL JSON document using
/// default [`CompileOptions`] and no integration resolver. Returns either
/// the ASL document or a JSON array of [`ErrorDto`] on failure.
#[wasm_bindgen]
pub fn compile(function_json: &str) -> JsValue {
    let result = compile_inner(function_json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn compile_inner(function_json: &str) -> CompileResult {
    match crate::compile(function_json, CompileOptions::default(), &NullIntegrationResolver) {
        Ok(asl) => CompileResult::Success(asl),
        Err(errors) => CompileResult::Errors(errors.into_iter().map(ErrorDto::from).collect()),
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ErrorDto {
    code: String,
    phase: String,
    message: String,
}

impl From<CompilerError> for ErrorDto {
    fn from(e: CompilerError) -> Self {
        ErrorDto { code: e.kind.code().to_string(), phase: e.phase.to_string(), message: e.kind.to_string() }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "status")]
enum CompileResult {
    #[serde(rename = "success")]
    Success(serde_json::Value),
    #[serde(rename = "errors")]
    Errors(Vec<ErrorDto>),
}
