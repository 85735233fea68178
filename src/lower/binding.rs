//! Binding Resolver (C8): lowers an identifier/object/array binding pattern
//! plus the output being bound into an assignment sub-graph (§4.8).
//!
//! Keys and indices inside a pattern are always statically known (a bare
//! identifier, a string literal, or a computed key expression folded to a
//! constant string; a positional array slot) — unlike general member
//! access (§4.6), binding never needs the array/object disambiguation
//! preamble.

use crate::error::{CompilerError, CompilerErrorKind, Phase};
use crate::ir::graph::{join_sub_states, pass_with_input};
use crate::ir::types::{ComparisonCheck, Condition, NodeState, Output, PassState, StateEntry, SubState, DEFERRED_NEXT};
use crate::lower::context::LowerCtx;
use crate::lower::expr::lower_expr;
use crate::parse::ast::{ArrayPatternElement, Expr, Pattern, PropertyKey, Span};

/// Binds `output` to `pattern`, returning the sub-state that performs every
/// write (possibly a single no-op `Pass` when the pattern contains nothing
/// to bind, e.g. an all-holes array pattern).
///
/// When every leaf of `pattern` is a plain identifier with no default and no
/// rest, and `output` is path-valued, this batches the whole destructuring
/// into one `Pass` state's `Parameters` object instead of one `Pass` per
/// binding (§4.8 "batch Parameters builder") — see `build_batch_bind`.
pub fn bind_pattern(ctx: &mut LowerCtx, pattern: &Pattern, output: &Output, span: Span) -> SubState {
    if let Output::JsonPath(root) = output {
        let mut leaves = Vec::new();
        if flatten_batchable(pattern, "", &mut leaves) && leaves.len() > 1 {
            return build_batch_bind(ctx, root, &leaves);
        }
    }
    let mut parts = Vec::new();
    bind_pattern_into(ctx, pattern, output, span, &mut parts);
    join_sub_states(parts).unwrap_or_else(noop_substate)
}

/// Collects `(decl, name, path suffix from the binding root)` for every leaf
/// of `pattern`, failing (returning `false`) as soon as something needs a
/// runtime guard a single `Parameters` object can't express directly: a
/// default value, a rest element, or a computed property key that doesn't
/// fold to a constant string.
fn flatten_batchable(pattern: &Pattern, prefix: &str, out: &mut Vec<(crate::parse::ast::DeclId, String, String)>) -> bool {
    match pattern {
        Pattern::Identifier { decl, name } => {
            out.push((*decl, name.clone(), prefix.to_string()));
            true
        }
        Pattern::Object { properties, rest } => {
            if rest.is_some() {
                return false;
            }
            properties.iter().all(|prop| {
                if prop.default.is_some() {
                    return false;
                }
                let key = match &prop.key {
                    PropertyKey::Identifier(k) => k.clone(),
                    PropertyKey::String(k) => k.clone(),
                    PropertyKey::Computed(_) => return false,
                };
                flatten_batchable(&prop.value, &format!("{prefix}.{key}"), out)
            })
        }
        Pattern::Array { elements, rest } => {
            if rest.is_some() {
                return false;
            }
            elements.iter().enumerate().all(|(i, el)| match el {
                None => true,
                Some(ArrayPatternElement { pattern, default }) => {
                    if default.is_some() {
                        return false;
                    }
                    flatten_batchable(pattern, &format!("{prefix}[{i}]"), out)
                }
            })
        }
    }
}

/// One `Pass` state whose `Parameters` object writes every flattened binding
/// at once, into a fresh heap slot; each declaration's canonical path then
/// points inside that slot (`VariableNameAllocator::set_custom_root`) so
/// every later read resolves there instead of a top-level `$.<name>`.
fn build_batch_bind(ctx: &mut LowerCtx, root: &str, leaves: &[(crate::parse::ast::DeclId, String, String)]) -> SubState {
    let slot = ctx.heap.alloc();
    let mut params = serde_json::Map::new();
    for (decl, name, suffix) in leaves {
        let var_name = ctx.vars.name_for(*decl, name);
        params.insert(format!("{var_name}.$"), serde_json::Value::String(format!("{root}{suffix}")));
        ctx.vars.set_custom_root(*decl, slot.clone());
    }
    let pass = PassState {
        parameters: Some(serde_json::Value::Object(params)),
        result_path: Some(slot),
        next: Some(DEFERRED_NEXT.to_string()),
        ..Default::default()
    };
    SubState::single("batch bind", NodeState::Pass(pass))
}

fn bind_pattern_into(ctx: &mut LowerCtx, pattern: &Pattern, output: &Output, span: Span, parts: &mut Vec<SubState>) {
    match pattern {
        Pattern::Identifier { decl, name } => parts.push(bind_identifier(ctx, *decl, name, output)),
        Pattern::Object { properties, rest } => {
            if rest.is_some() {
                ctx.errors.push(CompilerError::new(
                    CompilerErrorKind::UnsupportedFeature("object rest patterns are not supported".into()),
                    Phase::Lower,
                    Some(span),
                ));
            }
            for prop in properties {
                let key = resolve_property_key(ctx, &prop.key, span);
                let member_output = path_append(output, &key);
                let (prelude, value) = apply_default(ctx, &prop.default, member_output, span);
                if let Some(prelude) = prelude {
                    parts.push(prelude);
                }
                bind_pattern_into(ctx, &prop.value, &value, span, parts);
            }
        }
        Pattern::Array { elements, rest } => {
            for (i, el) in elements.iter().enumerate() {
                if let Some(ArrayPatternElement { pattern, default }) = el {
                    let member_output = index_append(output, i as i64);
                    let (prelude, value) = apply_default(ctx, default, member_output, span);
                    if let Some(prelude) = prelude {
                        parts.push(prelude);
                    }
                    bind_pattern_into(ctx, pattern, &value, span, parts);
                }
            }
            if let Some(rest_pattern) = rest {
                let rest_output = slice_from(output, elements.len() as i64);
                bind_pattern_into(ctx, rest_pattern, &rest_output, span, parts);
            }
        }
    }
}

fn noop_substate() -> SubState {
    SubState::single(
        "noop",
        NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }),
    )
}

fn bind_identifier(ctx: &mut LowerCtx, decl: crate::parse::ast::DeclId, name: &str, output: &Output) -> SubState {
    let target = ctx.vars.path_for(decl, name);
    let mut state = PassState { result_path: Some(target), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass_with_input(&mut state, output);
    SubState::single(format!("bind {name}"), NodeState::Pass(state))
}

fn resolve_property_key(ctx: &mut LowerCtx, key: &PropertyKey, span: Span) -> String {
    match key {
        PropertyKey::Identifier(name) => name.clone(),
        PropertyKey::String(s) => s.clone(),
        PropertyKey::Computed(expr) => constant_string_key(ctx, expr, span),
    }
}

fn constant_string_key(ctx: &mut LowerCtx, expr: &Expr, span: Span) -> String {
    if let Expr::Literal { value, .. } = expr {
        if let crate::parse::ast::Literal::String(s) = value {
            return s.clone();
        }
        if let crate::parse::ast::Literal::Number(n) = value {
            return n.to_string();
        }
    }
    ctx.errors.push(CompilerError::new(
        CompilerErrorKind::StepFunctionsPropertyNamesMustBeConstant,
        Phase::Lower,
        Some(span),
    ));
    String::new()
}

fn path_append(output: &Output, key: &str) -> Output {
    match output {
        Output::JsonPath(p) => Output::JsonPath(format!("{p}.{key}")),
        Output::Literal { value, contains_json_path } => {
            let member = value.get(key).cloned().unwrap_or(serde_json::Value::Null);
            Output::Literal { value: member, contains_json_path: *contains_json_path }
        }
        Output::Condition(_) => unreachable!("a Condition cannot be a destructuring source"),
    }
}

fn index_append(output: &Output, index: i64) -> Output {
    match output {
        Output::JsonPath(p) => Output::JsonPath(format!("{p}[{index}]")),
        Output::Literal { value, contains_json_path } => {
            let member = value.get(index as usize).cloned().unwrap_or(serde_json::Value::Null);
            Output::Literal { value: member, contains_json_path: *contains_json_path }
        }
        Output::Condition(_) => unreachable!("a Condition cannot be a destructuring source"),
    }
}

fn slice_from(output: &Output, start: i64) -> Output {
    match output {
        Output::JsonPath(p) => Output::JsonPath(format!("{p}[{start}:]")),
        Output::Literal { value, contains_json_path } => {
            let sliced = value.as_array().map(|a| a.iter().skip(start as usize).cloned().collect()).unwrap_or_default();
            Output::Literal { value: serde_json::Value::Array(sliced), contains_json_path: *contains_json_path }
        }
        Output::Condition(_) => unreachable!("a Condition cannot be a destructuring source"),
    }
}

/// A default (`= expr`) checks `IsPresent(value)` and, on miss, lowers
/// `expr` and binds its output instead (§4.8). Returns an optional prelude
/// sub-state that must run before the returned `Output` (always a heap
/// path) is read.
fn apply_default(ctx: &mut LowerCtx, default: &Option<Expr>, value: Output, span: Span) -> (Option<SubState>, Output) {
    let Some(default_expr) = default else {
        return (None, value);
    };
    let Output::JsonPath(path) = &value else {
        // A statically-known literal source is either present or absent at
        // compile time; only the path case needs a runtime guard.
        return (None, value);
    };

    let slot = ctx.heap.alloc();
    let default_lowered = lower_expr(ctx, default_expr);
    let mut write_default = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass_with_input(&mut write_default, &default_lowered.output);
    let write_default_sub = SubState::single("apply default", NodeState::Pass(write_default));
    let default_chain = match default_lowered.states {
        Some(pre) => join_sub_states(vec![pre, write_default_sub]).unwrap_or_else(noop_substate),
        None => write_default_sub,
    };

    let take_value = PassState {
        input_path: Some(path.clone()),
        result_path: Some(slot.clone()),
        next: Some(DEFERRED_NEXT.to_string()),
        ..Default::default()
    };
    let take_value_sub = SubState::single("use provided", NodeState::Pass(take_value));

    let check = Condition::Compare { variable: path.clone(), check: ComparisonCheck::IsPresent(true) };
    let choice = crate::ir::types::ChoiceState {
        choices: vec![crate::ir::types::ChoiceRule { condition: check, next: "use provided".to_string() }],
        default: Some("apply default".to_string()),
        naming_hint: Some("has default?".to_string()),
    };
    let mut sub = SubState {
        start_state: "has default?".to_string(),
        states: vec![("has default?".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))],
    };
    sub.insert("use provided", StateEntry::Nested(take_value_sub));
    sub.insert("apply default", StateEntry::Nested(default_chain));
    let _ = span;

    (Some(sub), Output::JsonPath(slot))
}
