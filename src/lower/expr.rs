//! Expression Lowerer (C6): the central recursive routine. Every node kind
//! returns a `Lowered { states, output }` — a bare output for pure
//! constants/paths, or a sub-state whose final output carries the
//! expression's value (§4.6).

use serde_json::{json, Value as Json};

use crate::error::{CompilerError, CompilerErrorKind, Phase};
use crate::ir::graph::{join_sub_states, pass_with_input};
use crate::ir::types::*;
use crate::lower::binding::bind_pattern;
use crate::lower::condition::{self, CompareOp};
use crate::lower::context::LowerCtx;
use crate::lower::intrinsic::{Intrinsic, IntrinsicArg};
use crate::parse::ast::*;

/// Lowers one expression. This is the routine every other lowering pass
/// (statements, bindings, the array-method skeleton) calls back into.
pub fn lower_expr(ctx: &mut LowerCtx, expr: &Expr) -> Lowered {
    match expr {
        Expr::Literal { value, span } => lower_literal(ctx, value, *span),
        Expr::Identifier { decl, name, .. } => lower_identifier(ctx, *decl, name),
        Expr::Member { .. } => lower_member(ctx, expr),
        Expr::Object { properties, span } => lower_object(ctx, properties, *span),
        Expr::Array { elements, span } => lower_array(ctx, elements, *span),
        Expr::Template { quasis, expressions, span } => lower_template(ctx, quasis, expressions, *span),
        Expr::Unary { op, argument, span } => lower_unary(ctx, *op, argument, *span),
        Expr::Update { op, prefix, argument, span } => lower_update(ctx, *op, *prefix, argument, *span),
        Expr::Binary { op, left, right, span } => lower_binary(ctx, *op, left, right, *span),
        Expr::Logical { op, left, right, span } => lower_logical(ctx, *op, left, right, *span),
        Expr::Assignment { op, target, value, span } => lower_assignment(ctx, *op, target, value, *span),
        Expr::Conditional { test, consequent, alternate, span } => lower_conditional(ctx, test, consequent, alternate, *span),
        Expr::Call { callee, arguments, span } => lower_call(ctx, callee, arguments, *span),
        Expr::New { callee, arguments, span } => lower_call(ctx, callee, arguments, *span),
        Expr::Await { argument, .. } => lower_expr(ctx, argument),
        Expr::Spread { argument, .. } => lower_expr(ctx, argument),
        Expr::Arrow { span, .. } => {
            ctx.errors.push(unsupported("a bare function value has no ASL representation", *span));
            Lowered::bare(null_output(ctx))
        }
        Expr::Class { span } => {
            ctx.errors.push(CompilerError::new(CompilerErrorKind::ClassesAreNotSupported, Phase::Lower, Some(*span)));
            Lowered::bare(null_output(ctx))
        }
    }
}

fn unsupported(message: impl Into<String>, span: Span) -> CompilerError {
    CompilerError::new(CompilerErrorKind::UnsupportedFeature(message.into()), Phase::Lower, Some(span))
}

fn null_output(ctx: &LowerCtx) -> Output {
    Output::JsonPath(ctx.options.null_context_path.clone())
}

// ---------------------------------------------------------------------
// Literals & identifiers
// ---------------------------------------------------------------------

fn lower_literal(ctx: &mut LowerCtx, value: &Literal, span: Span) -> Lowered {
    match value {
        Literal::Null => Lowered::bare(null_output(ctx)),
        Literal::Undefined => {
            ctx.errors.push(CompilerError::new(CompilerErrorKind::StepFunctionsDoesNotSupportUndefined, Phase::Lower, Some(span)));
            Lowered::bare(null_output(ctx))
        }
        Literal::Bool(b) => Lowered::bare(Output::literal(json!(b))),
        Literal::Number(n) => {
            let v = if n.is_nan() { Json::Null } else { json!(n) };
            Lowered::bare(Output::literal(v))
        }
        Literal::String(s) => Lowered::bare(Output::literal(json!(s))),
    }
}

fn lower_identifier(ctx: &mut LowerCtx, decl: DeclId, name: &str) -> Lowered {
    // The context (second) parameter lowers to the bare `$$` path (§4.6,
    // §8 "identity on identifier access").
    if ctx.is_context_param(decl) {
        return Lowered::bare(Output::JsonPath("$$".to_string()));
    }
    let path = ctx.vars.path_for(decl, name);
    Lowered::bare(Output::JsonPath(path))
}

// ---------------------------------------------------------------------
// Member / element access (§4.6, §9 disambiguation note)
// ---------------------------------------------------------------------

fn lower_member(ctx: &mut LowerCtx, expr: &Expr) -> Lowered {
    let Expr::Member { object, property, span, .. } = expr else { unreachable!() };
    let base = lower_expr(ctx, object);
    let mut prelude = base.states;
    let base_output = base.output;

    match property {
        MemberProperty::Identifier(name) if name == "length" => lower_length(ctx, base_output, prelude, *span),
        MemberProperty::Identifier(name) => {
            let out = static_member_access(&base_output, name);
            Lowered { states: prelude.take(), output: out }
        }
        MemberProperty::Computed(index_expr) => {
            if let Expr::Literal { value, .. } = index_expr.as_ref() {
                let key = constant_index_string(value);
                let out = static_member_access(&base_output, &key);
                return Lowered { states: prelude.take(), output: out };
            }
            if let (Expr::Identifier { decl: obj_decl, .. }, Expr::Identifier { decl: idx_decl, .. }) = (object.as_ref(), index_expr.as_ref()) {
                if let Some(stash) = ctx.for_in_stash(*obj_decl, *idx_decl) {
                    return Lowered { states: prelude.take(), output: Output::JsonPath(stash.to_string()) };
                }
            }
            lower_dynamic_element(ctx, base_output, prelude, index_expr, *span)
        }
    }
}

fn constant_index_string(value: &Literal) -> String {
    match value {
        Literal::String(s) => s.clone(),
        Literal::Number(n) => {
            if n.fract() == 0.0 {
                format!("{}", *n as i64)
            } else {
                n.to_string()
            }
        }
        _ => String::new(),
    }
}

fn static_member_access(base: &Output, key: &str) -> Output {
    match base {
        Output::JsonPath(p) => {
            if key.chars().all(|c| c.is_ascii_digit()) {
                Output::JsonPath(format!("{p}[{key}]"))
            } else {
                Output::JsonPath(format!("{p}.{key}"))
            }
        }
        Output::Literal { value, contains_json_path } => {
            let member = if let Ok(idx) = key.parse::<usize>() {
                value.get(idx).cloned()
            } else {
                value.get(key).cloned()
            }
            .unwrap_or(Json::Null);
            Output::Literal { value: member, contains_json_path: *contains_json_path }
        }
        Output::Condition(_) => unreachable!("member access on a Condition output"),
    }
}

/// A dynamic index (`base[i]`) can't be statically resolved to `$.a[0]` vs
/// `$.a.propName`, because JSON Path gives no way to inspect runtime shape.
/// Per the disambiguation design note (§9): emit `States.ArrayGetItem`, then
/// a three-way `Choice` preamble that picks between the array result, an
/// object's hinted property, or a stringify-and-compare fallback.
fn lower_dynamic_element(ctx: &mut LowerCtx, base: Output, prelude: Option<SubState>, index_expr: &Expr, span: Span) -> Lowered {
    let index = lower_expr(ctx, index_expr);
    let mut parts = Vec::new();
    if let Some(p) = prelude {
        parts.push(p);
    }
    if let Some(s) = index.states {
        parts.push(s);
    }

    let base_path = match &base {
        Output::JsonPath(p) => p.clone(),
        _ => {
            // A literal base indexed dynamically: fold if the index is also
            // a literal, otherwise this needs materializing to a path first.
            let slot = ctx.heap.alloc();
            let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            pass_with_input(&mut pass, &base);
            parts.push(SubState::single("materialize base", NodeState::Pass(pass)));
            slot
        }
    };
    let array_get_path = ctx.heap.alloc();
    let mut array_get = PassState {
        result_path: Some(array_get_path.clone()),
        next: Some(DEFERRED_NEXT.to_string()),
        ..Default::default()
    };
    array_get.parameters = Some(parameters_with_intrinsic(
        "value",
        Intrinsic::array_get_item(IntrinsicArg::path(base_path.clone()), intrinsic_arg_for(&index.output)),
    ));
    parts.push(SubState::single("index base", NodeState::Pass(array_get)));

    // Three-way disambiguation: `base[0]` present -> array; a synthetic
    // hint property present -> object; else stringify and compare `"[]"`.
    let result_slot = ctx.heap.alloc();
    let is_array = condition::is_present(format!("{base_path}[0]"), true);
    let is_object_hint = condition::is_present(format!("{base_path}.__fnl_hint"), true);

    let array_branch = {
        let mut pass = PassState { input_path: Some(format!("{array_get_path}.value")), result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass.input_path = Some(format!("{array_get_path}.value"));
        SubState::single("as array", NodeState::Pass(pass))
    };
    let object_branch = {
        let pass = PassState {
            input_path: Some(format!("{base_path}[?(@)]")),
            result_path: Some(result_slot.clone()),
            next: Some(DEFERRED_NEXT.to_string()),
            ..Default::default()
        };
        SubState::single("as object", NodeState::Pass(pass))
    };
    let fallback_branch = {
        let pass = PassState { input_path: Some(format!("{array_get_path}.value")), result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        SubState::single("as fallback", NodeState::Pass(pass))
    };

    let choice = ChoiceState {
        choices: vec![
            ChoiceRule { condition: is_array, next: "as array".to_string() },
            ChoiceRule { condition: is_object_hint, next: "as object".to_string() },
        ],
        default: Some("as fallback".to_string()),
        naming_hint: Some("disambiguate element access".to_string()),
    };
    let mut disambiguation = SubState {
        start_state: "disambiguate element access".to_string(),
        states: vec![("disambiguate element access".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))],
    };
    disambiguation.insert("as array", StateEntry::Nested(array_branch));
    disambiguation.insert("as object", StateEntry::Nested(object_branch));
    disambiguation.insert("as fallback", StateEntry::Nested(fallback_branch));
    parts.push(disambiguation);

    let _ = span;
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(result_slot))
}

/// `.length` follows the same disambiguation as dynamic element access:
/// array-first, then property-present, matching source order exactly per
/// the open question in §9 (not guessed — reproduced as documented).
fn lower_length(ctx: &mut LowerCtx, base: Output, prelude: Option<SubState>, span: Span) -> Lowered {
    let mut parts = Vec::new();
    if let Some(p) = prelude {
        parts.push(p);
    }
    let base_path = match &base {
        Output::JsonPath(p) => p.clone(),
        Output::Literal { value: Json::Array(items), .. } => {
            return Lowered { states: join_sub_states(parts), output: Output::literal(json!(items.len())) };
        }
        Output::Literal { value: Json::String(s), .. } => {
            return Lowered { states: join_sub_states(parts), output: Output::literal(json!(s.len())) };
        }
        _ => {
            ctx.errors.push(CompilerError::new(CompilerErrorKind::StepFunctionsInvalidCollectionAccess, Phase::Lower, Some(span)));
            return Lowered::bare(null_output(ctx));
        }
    };
    let result_slot = ctx.heap.alloc();
    let is_array = condition::is_present(format!("{base_path}[0]"), true);
    let array_len = {
        let mut pass = PassState { result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::array_length(IntrinsicArg::path(base_path.clone()))));
        SubState::single("array length", NodeState::Pass(pass))
    };
    let other_len = {
        let pass = PassState { input_path: Some(format!("{base_path}.length")), result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        SubState::single("other length", NodeState::Pass(pass))
    };
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: is_array, next: "array length".to_string() }],
        default: Some("other length".to_string()),
        naming_hint: Some("disambiguate length".to_string()),
    };
    let mut sub = SubState {
        start_state: "disambiguate length".to_string(),
        states: vec![("disambiguate length".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))],
    };
    sub.insert("array length", StateEntry::Nested(array_len));
    sub.insert("other length", StateEntry::Nested(other_len));
    parts.push(sub);
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{result_slot}.value")))
}

fn parameters_with_intrinsic(key: &str, intrinsic: Intrinsic) -> Json {
    json!({ format!("{key}.$"): intrinsic.render() })
}

fn intrinsic_arg_for(output: &Output) -> IntrinsicArg {
    match output {
        Output::JsonPath(p) => IntrinsicArg::path(p.clone()),
        Output::Literal { value, .. } => IntrinsicArg::literal(value.clone()),
        Output::Condition(_) => unreachable!("a Condition cannot be an intrinsic argument directly"),
    }
}

// ---------------------------------------------------------------------
// Object / array / template literals
// ---------------------------------------------------------------------

fn lower_object(ctx: &mut LowerCtx, properties: &[ObjectProp], span: Span) -> Lowered {
    let mut parts: Vec<SubState> = Vec::new();
    let mut accumulator = Json::Object(serde_json::Map::new());
    let mut needs_merge = false;

    for prop in properties {
        match prop {
            ObjectProp::KeyValue { key, value } => {
                let key_name = match key {
                    PropertyKey::Identifier(n) => n.clone(),
                    PropertyKey::String(s) => s.clone(),
                    PropertyKey::Computed(e) => {
                        let lowered = lower_expr(ctx, e);
                        match lowered.output.as_literal_value().and_then(|v| v.as_str()) {
                            Some(s) => s.to_string(),
                            None => {
                                ctx.errors.push(CompilerError::new(CompilerErrorKind::StepFunctionsPropertyNamesMustBeConstant, Phase::Lower, Some(span)));
                                String::new()
                            }
                        }
                    }
                };
                let lowered = lower_expr(ctx, value);
                if let Some(s) = lowered.states {
                    parts.push(s);
                }
                match lowered.output {
                    Output::Literal { value, .. } => {
                        accumulator.as_object_mut().unwrap().insert(key_name, value);
                    }
                    Output::JsonPath(p) => {
                        accumulator.as_object_mut().unwrap().insert(key_name, json!(format!("$path:{p}")));
                        needs_merge = true;
                    }
                    Output::Condition(_) => unreachable!("a bare Condition cannot be an object property value"),
                }
            }
            ObjectProp::Spread { argument } => {
                // Late mutations of the spread source are guarded by
                // hoisting the spread value to a fresh heap slot before the
                // final object is assembled (§4.6).
                let lowered = lower_expr(ctx, argument);
                if let Some(s) = lowered.states {
                    parts.push(s);
                }
                let slot = ctx.heap.alloc();
                let mut hoist = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                pass_with_input(&mut hoist, &lowered.output);
                parts.push(SubState::single("hoist spread", NodeState::Pass(hoist)));
                needs_merge = true;

                let merge_slot = ctx.heap.alloc();
                let mut merge = PassState { result_path: Some(merge_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                merge.parameters = Some(parameters_with_intrinsic(
                    "value",
                    Intrinsic::json_merge(
                        IntrinsicArg::literal(accumulator.clone()),
                        IntrinsicArg::path(slot.clone()),
                    ),
                ));
                parts.push(SubState::single("merge spread", NodeState::Pass(merge)));
                accumulator = json!({});
                accumulator = Json::String(format!("$path:{merge_slot}.value"));
            }
        }
    }

    if !needs_merge {
        return Lowered { states: join_sub_states(parts), output: Output::Literal { value: accumulator, contains_json_path: false } };
    }

    // A literal accumulator with embedded path markers still present must
    // be serialized and merged via `States.JsonMerge` rather than emitted
    // directly as `Result`.
    if let Json::String(path_marker) = &accumulator {
        if let Some(path) = path_marker.strip_prefix("$path:") {
            return Lowered { states: join_sub_states(parts), output: Output::JsonPath(path.to_string()) };
        }
    }
    Lowered { states: join_sub_states(parts), output: Output::Literal { value: accumulator, contains_json_path: true } }
}

fn lower_array(ctx: &mut LowerCtx, elements: &[Option<Expr>], span: Span) -> Lowered {
    let mut parts: Vec<SubState> = Vec::new();
    let mut args = Vec::new();
    let mut all_literal = true;
    for el in elements {
        let Some(el) = el else {
            ctx.errors.push(unsupported("elided array elements are not supported", span));
            continue;
        };
        let lowered = lower_expr(ctx, el);
        if let Some(s) = lowered.states {
            parts.push(s);
        }
        match &lowered.output {
            Output::Literal { value, contains_json_path: false } if is_scalar(value) => {
                args.push(IntrinsicArg::literal(value.clone()));
            }
            _ => {
                all_literal = false;
                // Hoist non-scalar elements to a fresh heap slot before
                // assembly, matching the object-literal spread guard.
                let slot = ctx.heap.alloc();
                let mut hoist = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                pass_with_input(&mut hoist, &lowered.output);
                parts.push(SubState::single("hoist element", NodeState::Pass(hoist)));
                args.push(IntrinsicArg::path(slot));
            }
        }
    }

    if all_literal {
        let values: Vec<Json> = args
            .into_iter()
            .map(|a| match a {
                IntrinsicArg::Literal(v) => v,
                _ => unreachable!(),
            })
            .collect();
        return Lowered { states: join_sub_states(parts), output: Output::literal(Json::Array(values)) };
    }

    let slot = ctx.heap.alloc();
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::array(args)));
    parts.push(SubState::single("build array", NodeState::Pass(pass)));
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
}

fn is_scalar(v: &Json) -> bool {
    !matches!(v, Json::Object(_) | Json::Array(_))
}

/// Paths whose first identifier character is non-alphabetic (e.g. the
/// for-in hidden item slot `$.0__name`) must be rewritten through a heap
/// slot first — `States.Format` has a documented bug with such paths
/// (§4.6).
fn needs_format_bug_workaround(path: &str) -> bool {
    let name_part = path.trim_start_matches("$.").trim_start_matches("$$.");
    name_part.chars().next().map(|c| !c.is_alphabetic()).unwrap_or(false)
}

fn lower_template(ctx: &mut LowerCtx, quasis: &[String], expressions: &[Expr], span: Span) -> Lowered {
    let mut parts: Vec<SubState> = Vec::new();
    let mut format_parts = String::new();
    let mut args = Vec::new();

    for (i, quasi) in quasis.iter().enumerate() {
        format_parts.push_str(&quasi.replace('{', "{{").replace('}', "}}"));
        if let Some(expr) = expressions.get(i) {
            let lowered = to_string_coerced(ctx, expr);
            if let Some(s) = lowered.states {
                parts.push(s);
            }
            format_parts.push_str("{}");
            match &lowered.output {
                Output::JsonPath(p) if needs_format_bug_workaround(p) => {
                    let slot = ctx.heap.alloc();
                    let hoist = PassState { input_path: Some(p.clone()), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                    parts.push(SubState::single("hoist format arg", NodeState::Pass(hoist)));
                    args.push(IntrinsicArg::path(slot));
                }
                other => args.push(intrinsic_arg_for(other)),
            }
        }
    }

    let slot = ctx.heap.alloc();
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::format(format_parts, args)));
    parts.push(SubState::single("template", NodeState::Pass(pass)));
    let _ = span;
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
}

// ---------------------------------------------------------------------
// Unary / update
// ---------------------------------------------------------------------

fn lower_unary(ctx: &mut LowerCtx, op: UnaryOp, argument: &Expr, span: Span) -> Lowered {
    match op {
        UnaryOp::Not => {
            let lowered = lower_expr(ctx, argument);
            if let Output::Literal { value, .. } = &lowered.output {
                return Lowered { states: lowered.states, output: Output::literal(json!(!is_truthy_literal(value))) };
            }
            let truthy = to_condition(ctx, &lowered.output);
            Lowered { states: lowered.states, output: Output::Condition(condition::not(truthy)) }
        }
        UnaryOp::Plus => to_number(ctx, argument),
        UnaryOp::Minus => {
            let num = to_number(ctx, argument);
            negate(ctx, num)
        }
        UnaryOp::Typeof => lower_typeof(ctx, argument, span),
    }
}

fn is_truthy_literal(v: &Json) -> bool {
    match v {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Json::String(s) => !s.is_empty(),
        Json::Array(_) | Json::Object(_) => true,
    }
}

fn lower_update(ctx: &mut LowerCtx, op: UpdateOp, prefix: bool, argument: &Expr, span: Span) -> Lowered {
    let lvalue = lower_expr(ctx, argument);
    let Output::JsonPath(path) = lvalue.output.clone() else {
        ctx.errors.push(unsupported("++/-- require an assignable reference", span));
        return Lowered::bare(null_output(ctx));
    };
    let mut parts = Vec::new();
    if let Some(s) = lvalue.states {
        parts.push(s);
    }

    let delta = match op {
        UpdateOp::Increment => 1.0,
        UpdateOp::Decrement => -1.0,
    };

    let pre_slot = ctx.heap.alloc();
    let save_pre = PassState { input_path: Some(path.clone()), result_path: Some(pre_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    parts.push(SubState::single("save pre value", NodeState::Pass(save_pre)));

    let mut write_back = PassState { result_path: Some(path.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    write_back.parameters = Some(parameters_with_intrinsic(
        "value",
        Intrinsic::math_add(IntrinsicArg::path(path.clone()), IntrinsicArg::literal(json!(delta))),
    ));
    parts.push(SubState::single("apply update", NodeState::Pass(write_back)));

    let output = if prefix { Output::JsonPath(path) } else { Output::JsonPath(pre_slot) };
    Lowered::with_states(join_sub_states(parts).unwrap(), output)
}

// ---------------------------------------------------------------------
// Binary arithmetic & comparisons
// ---------------------------------------------------------------------

fn lower_binary(ctx: &mut LowerCtx, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> Lowered {
    match op {
        BinaryOp::Add => lower_add(ctx, left, right, span),
        BinaryOp::Sub => lower_numeric_binop(ctx, left, right, -1.0),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
            ctx.errors.push(CompilerError::new(
                CompilerErrorKind::CannotPerformAllArithmeticOrBitwiseComputationsOnVariablesInStepFunction(format!("{op:?}")),
                Phase::Lower,
                Some(span),
            ));
            Lowered::bare(null_output(ctx))
        }
        BinaryOp::InstanceOf => {
            ctx.errors.push(unsupported("`instanceof` is not supported", span));
            Lowered::bare(null_output(ctx))
        }
        BinaryOp::Eq | BinaryOp::StrictEq | BinaryOp::NotEq | BinaryOp::StrictNotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            lower_comparison(ctx, op, left, right, span)
        }
    }
}

fn lower_add(ctx: &mut LowerCtx, left: &Expr, right: &Expr, span: Span) -> Lowered {
    let l = lower_expr(ctx, left);
    let r = lower_expr(ctx, right);
    let mut parts = Vec::new();
    if let Some(s) = l.states {
        parts.push(s);
    }
    if let Some(s) = r.states {
        parts.push(s);
    }

    if let (Output::Literal { value: lv, contains_json_path: false }, Output::Literal { value: rv, contains_json_path: false }) = (&l.output, &r.output) {
        let folded = if lv.is_string() || rv.is_string() {
            json!(format!("{}{}", json_to_display(lv), json_to_display(rv)))
        } else {
            json!(lv.as_f64().unwrap_or(0.0) + rv.as_f64().unwrap_or(0.0))
        };
        return Lowered { states: join_sub_states(parts), output: Output::literal(folded) };
    }

    // Runtime dispatch: if either operand is typed-string, string concat;
    // else numeric add (§4.6).
    let left_is_string = matches!(&l.output, Output::Literal { value: Json::String(_), .. });
    let right_is_string = matches!(&r.output, Output::Literal { value: Json::String(_), .. });
    let slot = ctx.heap.alloc();

    if left_is_string || right_is_string {
        let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass.parameters = Some(parameters_with_intrinsic(
            "value",
            Intrinsic::format("{}{}", vec![intrinsic_arg_for(&l.output), intrinsic_arg_for(&r.output)]),
        ));
        parts.push(SubState::single("string concat", NodeState::Pass(pass)));
        let _ = span;
        return Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")));
    }

    if let Output::JsonPath(p) = &l.output {
        let is_string_cond = condition::is_string(p.clone());
        let concat = {
            let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::format("{}{}", vec![intrinsic_arg_for(&l.output), intrinsic_arg_for(&r.output)])));
            SubState::single("string concat", NodeState::Pass(pass))
        };
        let numeric = {
            let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::math_add(intrinsic_arg_for(&l.output), intrinsic_arg_for(&r.output))));
            SubState::single("numeric add", NodeState::Pass(pass))
        };
        let choice = ChoiceState {
            choices: vec![ChoiceRule { condition: is_string_cond, next: "string concat".to_string() }],
            default: Some("numeric add".to_string()),
            naming_hint: Some("dispatch +".to_string()),
        };
        let mut sub = SubState { start_state: "dispatch +".to_string(), states: vec![("dispatch +".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
        sub.insert("string concat", StateEntry::Nested(concat));
        sub.insert("numeric add", StateEntry::Nested(numeric));
        parts.push(sub);
        return Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")));
    }

    // Non-string literal left with a path right: numeric add.
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::math_add(intrinsic_arg_for(&l.output), intrinsic_arg_for(&r.output))));
    parts.push(SubState::single("numeric add", NodeState::Pass(pass)));
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
}

fn json_to_display(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// `-`: force both sides through `toNumber`, propagate `NaN`/`null`
/// absorptively, emit `MathAdd(left, -right)` (§4.6). `sign` is -1.0 for
/// subtraction (the only caller today).
fn lower_numeric_binop(ctx: &mut LowerCtx, left: &Expr, right: &Expr, sign: f64) -> Lowered {
    let l = to_number(ctx, left);
    let r = to_number(ctx, right);
    let mut parts = Vec::new();
    if let Some(s) = l.states {
        parts.push(s);
    }
    if let Some(s) = r.states {
        parts.push(s);
    }

    if let (Some(lv), Some(rv)) = (l.output.as_literal_value().and_then(|v| v.as_f64()), r.output.as_literal_value().and_then(|v| v.as_f64())) {
        return Lowered { states: join_sub_states(parts), output: Output::literal(json!(lv + sign * rv)) };
    }

    let negated_right = if sign < 0.0 {
        match &r.output {
            Output::Literal { value, .. } => IntrinsicArg::literal(json!(-value.as_f64().unwrap_or(0.0))),
            Output::JsonPath(_) => {
                let neg = negate(ctx, Lowered::bare(r.output.clone()));
                if let Some(s) = neg.states {
                    parts.push(s);
                }
                intrinsic_arg_for(&neg.output)
            }
            Output::Condition(_) => unreachable!(),
        }
    } else {
        intrinsic_arg_for(&r.output)
    };

    let slot = ctx.heap.alloc();
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::math_add(intrinsic_arg_for(&l.output), negated_right)));
    parts.push(SubState::single("numeric subtract", NodeState::Pass(pass)));
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
}

fn lower_comparison(ctx: &mut LowerCtx, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> Lowered {
    let l = lower_expr(ctx, left);
    let r = lower_expr(ctx, right);
    let mut parts = Vec::new();
    if let Some(s) = l.states {
        parts.push(s);
    }
    if let Some(s) = r.states {
        parts.push(s);
    }

    let negate_result = matches!(op, BinaryOp::NotEq | BinaryOp::StrictNotEq);
    // `===`/`==` are folded together, likewise `!==`/`!=` (§4.6).
    let base_op = match op {
        BinaryOp::Eq | BinaryOp::StrictEq | BinaryOp::NotEq | BinaryOp::StrictNotEq => CompareOp::Eq,
        BinaryOp::Lt => CompareOp::Lt,
        BinaryOp::LtEq => CompareOp::LtEq,
        BinaryOp::Gt => CompareOp::Gt,
        BinaryOp::GtEq => CompareOp::GtEq,
        _ => unreachable!(),
    };

    if let (Some(lv), Some(rv)) = (l.output.as_literal_value(), r.output.as_literal_value()) {
        let folded = fold_compare(base_op, lv, rv);
        let folded = if negate_result { !folded } else { folded };
        return Lowered { states: join_sub_states(parts), output: Output::literal(json!(folded)) };
    }

    let (path, literal) = match (&l.output, &r.output) {
        (Output::JsonPath(p), Output::Literal { value, .. }) => (p.clone(), value.clone()),
        (Output::Literal { value, .. }, Output::JsonPath(p)) => (p.clone(), value.clone()),
        (Output::JsonPath(p), Output::JsonPath(_)) => {
            ctx.errors.push(unsupported("path-to-path comparisons require a literal operand in this subset", span));
            return Lowered { states: join_sub_states(parts), output: Output::JsonPath(p.clone()) };
        }
        _ => {
            ctx.errors.push(unsupported("unsupported comparison operand shape", span));
            return Lowered::bare(null_output(ctx));
        }
    };

    let cond = condition::compare_literal(path, base_op, &literal).unwrap_or_else(condition::trivially_false);
    let cond = if negate_result { condition::not(cond) } else { cond };
    Lowered { states: join_sub_states(parts), output: Output::Condition(cond) }
}

fn fold_compare(op: CompareOp, lv: &Json, rv: &Json) -> bool {
    let (lf, rf) = (lv.as_f64(), rv.as_f64());
    match op {
        CompareOp::Eq => lv == rv,
        CompareOp::Lt => lf.zip(rf).map(|(a, b)| a < b).unwrap_or(false),
        CompareOp::LtEq => lf.zip(rf).map(|(a, b)| a <= b).unwrap_or(false),
        CompareOp::Gt => lf.zip(rf).map(|(a, b)| a > b).unwrap_or(false),
        CompareOp::GtEq => lf.zip(rf).map(|(a, b)| a >= b).unwrap_or(false),
    }
}

// ---------------------------------------------------------------------
// Logical operators (§4.6, §8 short-circuit law)
// ---------------------------------------------------------------------

fn lower_logical(ctx: &mut LowerCtx, op: LogicalOp, left: &Expr, right: &Expr, span: Span) -> Lowered {
    let l = lower_expr(ctx, left);

    // When both sides are pure conditions (no side-effecting states),
    // return a compound Condition instead of materializing a Choice.
    if l.states.is_none() && matches!(op, LogicalOp::And | LogicalOp::Or) {
        let r = lower_expr(ctx, right);
        if r.states.is_none() {
            if let (Output::Condition(lc), Output::Condition(rc)) = (&l.output, &r.output) {
                let combined = match op {
                    LogicalOp::And => condition::and(vec![lc.clone(), rc.clone()]),
                    LogicalOp::Or => condition::or(vec![lc.clone(), rc.clone()]),
                    LogicalOp::NullishCoalesce => unreachable!(),
                };
                return Lowered::bare(Output::Condition(combined));
            }
        }
    }

    let mut parts = Vec::new();
    if let Some(s) = l.states.clone() {
        parts.push(s);
    }
    let slot = ctx.heap.alloc();
    let test = match op {
        LogicalOp::NullishCoalesce => condition::is_present(path_or_slot(ctx, &l.output, &mut parts, &slot), true),
        _ => to_condition(ctx, &l.output),
    };

    let take_left = {
        let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass_with_input(&mut pass, &materialize_for_value(&l.output));
        SubState::single("take left", NodeState::Pass(pass))
    };
    let r = lower_expr(ctx, right);
    let take_right = {
        let mut inner = Vec::new();
        if let Some(s) = r.states {
            inner.push(s);
        }
        let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass_with_input(&mut pass, &materialize_for_value(&r.output));
        inner.push(SubState::single("take right", NodeState::Pass(pass)));
        join_sub_states(inner).unwrap()
    };

    let (true_label, false_label) = match op {
        LogicalOp::And => ("eval right".to_string(), "take left".to_string()),
        LogicalOp::Or | LogicalOp::NullishCoalesce => ("take left".to_string(), "eval right".to_string()),
    };
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: test, next: true_label.clone() }],
        default: Some(false_label.clone()),
        naming_hint: Some("short circuit".to_string()),
    };
    let mut sub = SubState { start_state: "short circuit".to_string(), states: vec![("short circuit".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert("take left", StateEntry::Nested(take_left));
    sub.insert("eval right", StateEntry::Nested(take_right));
    parts.push(sub);
    let _ = span;
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
}

fn path_or_slot(ctx: &mut LowerCtx, output: &Output, parts: &mut Vec<SubState>, _slot: &str) -> String {
    match output {
        Output::JsonPath(p) => p.clone(),
        _ => {
            let slot = ctx.heap.alloc();
            let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            pass_with_input(&mut pass, output);
            parts.push(SubState::single("materialize", NodeState::Pass(pass)));
            slot
        }
    }
}

fn materialize_for_value(output: &Output) -> Output {
    match output {
        Output::Condition(_) => Output::literal(json!(true)),
        other => other.clone(),
    }
}

fn to_condition(_ctx: &mut LowerCtx, output: &Output) -> Condition {
    match output {
        Output::Condition(c) => c.clone(),
        Output::JsonPath(p) => condition::is_truthy(p),
        Output::Literal { value, .. } => {
            if is_truthy_literal(value) {
                condition::trivially_true()
            } else {
                condition::trivially_false()
            }
        }
    }
}

// ---------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------

fn lower_assignment(ctx: &mut LowerCtx, op: AssignOp, target: &Expr, value: &Expr, span: Span) -> Lowered {
    let lhs = lower_expr(ctx, target);
    let Output::JsonPath(target_path) = lhs.output else {
        ctx.errors.push(unsupported("assignment target must be a variable reference", span));
        return Lowered::bare(null_output(ctx));
    };
    let mut parts = Vec::new();
    if let Some(s) = lhs.states {
        parts.push(s);
    }

    let rhs = lower_expr(ctx, value);
    if let Some(s) = rhs.states {
        parts.push(s);
    }

    let computed_slot = ctx.heap.alloc();
    let final_value = match op {
        AssignOp::Assign => rhs.output,
        AssignOp::AddAssign => {
            let added = lower_add_outputs(ctx, Output::JsonPath(target_path.clone()), rhs.output, &mut parts);
            added
        }
        AssignOp::SubAssign => {
            let slot = ctx.heap.alloc();
            let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            let neg = negate(ctx, Lowered::bare(rhs.output));
            if let Some(s) = neg.states {
                parts.push(s);
            }
            pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::math_add(IntrinsicArg::path(target_path.clone()), intrinsic_arg_for(&neg.output))));
            parts.push(SubState::single("sub assign", NodeState::Pass(pass)));
            Output::JsonPath(format!("{slot}.value"))
        }
        AssignOp::NullishAssign | AssignOp::OrAssign | AssignOp::AndAssign => {
            let test = match op {
                AssignOp::NullishAssign => condition::is_present(target_path.clone(), false),
                AssignOp::OrAssign => condition::not(condition::is_truthy(&target_path)),
                AssignOp::AndAssign => condition::is_truthy(&target_path),
                _ => unreachable!(),
            };
            let slot = ctx.heap.alloc();
            let assign_new = {
                let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                pass_with_input(&mut pass, &rhs.output);
                SubState::single("assign compound", NodeState::Pass(pass))
            };
            let keep_existing = {
                let pass = PassState { input_path: Some(target_path.clone()), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                SubState::single("keep existing", NodeState::Pass(pass))
            };
            let choice = ChoiceState {
                choices: vec![ChoiceRule { condition: test, next: "assign compound".to_string() }],
                default: Some("keep existing".to_string()),
                naming_hint: Some("compound assign".to_string()),
            };
            let mut sub = SubState { start_state: "compound assign".to_string(), states: vec![("compound assign".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("assign compound", StateEntry::Nested(assign_new));
            sub.insert("keep existing", StateEntry::Nested(keep_existing));
            parts.push(sub);
            Output::JsonPath(slot)
        }
    };

    // Write back, then capture the computed value into a fresh slot so
    // later mutations of the l-value don't alias the expression's value
    // (§4.6).
    let mut write_back = PassState { result_path: Some(target_path), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass_with_input(&mut write_back, &final_value);
    parts.push(SubState::single("write back", NodeState::Pass(write_back)));

    let mut capture = PassState { result_path: Some(computed_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass_with_input(&mut capture, &final_value);
    parts.push(SubState::single("capture assigned value", NodeState::Pass(capture)));

    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(computed_slot))
}

fn lower_add_outputs(ctx: &mut LowerCtx, left: Output, right: Output, parts: &mut Vec<SubState>) -> Output {
    let slot = ctx.heap.alloc();
    let left_is_string = matches!(&left, Output::Literal { value: Json::String(_), .. });
    let right_is_string = matches!(&right, Output::Literal { value: Json::String(_), .. });
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    if left_is_string || right_is_string {
        pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::format("{}{}", vec![intrinsic_arg_for(&left), intrinsic_arg_for(&right)])));
    } else {
        pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::math_add(intrinsic_arg_for(&left), intrinsic_arg_for(&right))));
    }
    parts.push(SubState::single("add assign", NodeState::Pass(pass)));
    let _ = ctx;
    Output::JsonPath(format!("{slot}.value"))
}

// ---------------------------------------------------------------------
// Conditional (ternary)
// ---------------------------------------------------------------------

fn lower_conditional(ctx: &mut LowerCtx, test: &Expr, consequent: &Expr, alternate: &Expr, span: Span) -> Lowered {
    let t = lower_expr(ctx, test);
    let mut parts = Vec::new();
    if let Some(s) = t.states {
        parts.push(s);
    }
    let cond = to_condition(ctx, &t.output);

    let slot = ctx.heap.alloc();
    let c = lower_expr(ctx, consequent);
    let consequent_sub = {
        let mut inner = Vec::new();
        if let Some(s) = c.states {
            inner.push(s);
        }
        let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass_with_input(&mut pass, &materialize_for_value(&c.output));
        inner.push(SubState::single("then", NodeState::Pass(pass)));
        join_sub_states(inner).unwrap()
    };
    let a = lower_expr(ctx, alternate);
    let alternate_sub = {
        let mut inner = Vec::new();
        if let Some(s) = a.states {
            inner.push(s);
        }
        let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass_with_input(&mut pass, &materialize_for_value(&a.output));
        inner.push(SubState::single("else", NodeState::Pass(pass)));
        join_sub_states(inner).unwrap()
    };

    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: cond, next: "then".to_string() }],
        default: Some("else".to_string()),
        naming_hint: Some("ternary".to_string()),
    };
    let mut sub = SubState { start_state: "ternary".to_string(), states: vec![("ternary".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert("then", StateEntry::Nested(consequent_sub));
    sub.insert("else", StateEntry::Nested(alternate_sub));
    parts.push(sub);
    let _ = span;
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
}

// ---------------------------------------------------------------------
// typeof
// ---------------------------------------------------------------------

fn lower_typeof(ctx: &mut LowerCtx, argument: &Expr, span: Span) -> Lowered {
    let lowered = lower_expr(ctx, argument);
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }
    let Output::JsonPath(path) = &lowered.output else {
        let ty = match &lowered.output {
            Output::Literal { value, .. } => json_type_name(value),
            _ => "undefined",
        };
        return Lowered { states: join_sub_states(parts), output: Output::literal(json!(ty)) };
    };

    let slot = ctx.heap.alloc();
    let branches: [(&str, Condition); 4] = [
        ("string", condition::is_string(path.clone())),
        ("boolean", condition::is_boolean(path.clone())),
        ("number", condition::is_numeric(path.clone())),
        ("missing", condition::not(condition::is_present(path.clone(), true))),
    ];
    let mut choices = Vec::new();
    let mut sub = SubState { start_state: "typeof".to_string(), states: vec![] };
    let mut leaf = Vec::new();
    for (label, cond) in branches.iter() {
        choices.push(ChoiceRule { condition: cond.clone(), next: label.to_string() });
        let type_str = if *label == "missing" { "undefined" } else { label };
        let pass = PassState { result_path: Some(slot.clone()), result: Some(json!(type_str)), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        leaf.push((label.to_string(), SubState::single(label.to_string(), NodeState::Pass(pass))));
    }
    let object_pass = PassState { result_path: Some(slot.clone()), result: Some(json!("object")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    let object_sub = SubState::single("object", NodeState::Pass(object_pass));

    let choice_state = ChoiceState { choices, default: Some("object".to_string()), naming_hint: Some("typeof".to_string()) };
    sub.states.push(("typeof".to_string(), StateEntry::Leaf(NodeState::Choice(choice_state))));
    for (label, s) in leaf {
        sub.insert(label, StateEntry::Nested(s));
    }
    sub.insert("object", StateEntry::Nested(object_sub));
    parts.push(sub);
    let _ = span;
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
}

fn json_type_name(v: &Json) -> &'static str {
    match v {
        Json::Null => "undefined",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) | Json::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------
// Calls: Promise.all, JSON.stringify/parse, Boolean/Number/String,
// array methods, string split, integrations.
// ---------------------------------------------------------------------

fn lower_call(ctx: &mut LowerCtx, callee: &Expr, arguments: &[Expr], span: Span) -> Lowered {
    if let Some(name) = simple_callee_name(callee) {
        match name.as_str() {
            "Promise.all" => {
                return match arguments.first() {
                    Some(arg) => lower_expr(ctx, arg),
                    None => Lowered::bare(null_output(ctx)),
                };
            }
            "JSON.stringify" => {
                return match arguments.first() {
                    Some(arg) => {
                        let lowered = lower_expr(ctx, arg);
                        wrap_intrinsic(ctx, lowered, |a| Intrinsic::json_to_string(a))
                    }
                    None => Lowered::bare(null_output(ctx)),
                };
            }
            "JSON.parse" => {
                return match arguments.first() {
                    Some(arg) => {
                        let lowered = lower_expr(ctx, arg);
                        wrap_intrinsic(ctx, lowered, |a| Intrinsic::string_to_json(a))
                    }
                    None => {
                        ctx.errors.push(unsupported("JSON.parse requires an argument", span));
                        Lowered::bare(null_output(ctx))
                    }
                };
            }
            "Boolean" => return to_boolean(ctx, arguments.first()),
            "Number" => return match arguments.first() {
                Some(a) => to_number(ctx, a),
                None => Lowered::bare(Output::literal(json!(0))),
            },
            "String" => return match arguments.first() {
                Some(a) => to_string_coerced(ctx, a),
                None => Lowered::bare(Output::literal(json!(""))),
            },
            _ => {}
        }
    }

    if let Expr::Member { object, property: MemberProperty::Identifier(method), .. } = callee {
        if let Some(lowered) = crate::lower::array_methods::try_lower_method_call(ctx, object, method, arguments, span) {
            return lowered;
        }
    }

    // Otherwise, ask the integration resolver.
    if let Expr::Identifier { decl, name, .. } = callee {
        let call = crate::lower::integration::IntegrationCall { decl: *decl, callee_name: name, arguments, span };
        if let Some(mut lowered) = ctx.integrations.resolve(&call) {
            // An integration call sitting inside a reachable try/catch must
            // route its Task-native failures there too (§4.6 "call to an
            // integration is delegated to C10"; C10 attaches the Catch, C9
            // decides where it points).
            if let crate::lower::error_router::ThrowRoute::ToCatch { result_path } = crate::lower::error_router::route_throw(&ctx.frames) {
                let route = CatchRule { error_equals: vec!["States.ALL".to_string()], result_path, next: CATCH_NEXT.to_string() };
                crate::lower::integration::attach_catch_routing(&mut lowered, &route);
            }
            return lowered;
        }
    }

    ctx.errors.push(unsupported(format!("unsupported call expression at {span:?}"), span));
    Lowered::bare(null_output(ctx))
}

fn simple_callee_name(callee: &Expr) -> Option<String> {
    if let Expr::Member { object, property: MemberProperty::Identifier(prop), .. } = callee {
        if let Expr::Identifier { name, .. } = object.as_ref() {
            return Some(format!("{name}.{prop}"));
        }
    }
    if let Expr::Identifier { name, .. } = callee {
        return Some(name.clone());
    }
    None
}

fn wrap_intrinsic(ctx: &mut LowerCtx, lowered: Lowered, build: impl FnOnce(IntrinsicArg) -> Intrinsic) -> Lowered {
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }
    let slot = ctx.heap.alloc();
    let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    pass.parameters = Some(parameters_with_intrinsic("value", build(intrinsic_arg_for(&lowered.output))));
    parts.push(SubState::single("intrinsic call", NodeState::Pass(pass)));
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
}

fn to_boolean(ctx: &mut LowerCtx, arg: Option<&Expr>) -> Lowered {
    let Some(arg) = arg else {
        return Lowered::bare(Output::literal(json!(false)));
    };
    let lowered = lower_expr(ctx, arg);
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }
    if let Output::Literal { value, .. } = &lowered.output {
        return Lowered { states: join_sub_states(parts), output: Output::literal(json!(is_truthy_literal(value))) };
    }
    let cond = to_condition(ctx, &lowered.output);
    Lowered { states: join_sub_states(parts), output: Output::Condition(cond) }
}

/// `toNumber`: for literals, compute directly (`NaN` folds to `null`); for
/// paths, emits a `Choice` dispatching on runtime type to either pass
/// through, parse, or map to `0`/`1`/`null` (§4.6).
pub fn to_number(ctx: &mut LowerCtx, expr: &Expr) -> Lowered {
    let lowered = lower_expr(ctx, expr);
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }
    match &lowered.output {
        Output::Literal { value, .. } => {
            let n = match value {
                Json::Number(n) => n.as_f64(),
                Json::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                Json::String(s) => s.trim().parse::<f64>().ok(),
                Json::Null => None,
                _ => None,
            };
            Lowered { states: join_sub_states(parts), output: Output::literal(n.map(|v| json!(v)).unwrap_or(Json::Null)) }
        }
        Output::JsonPath(path) => {
            let slot = ctx.heap.alloc();
            let is_number = condition::is_numeric(path.clone());
            let is_string = condition::is_string(path.clone());
            let is_bool = condition::is_boolean(path.clone());
            let is_missing = condition::not(condition::is_present(path.clone(), true));

            let passthrough = {
                let pass = PassState { input_path: Some(path.clone()), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                SubState::single("number passthrough", NodeState::Pass(pass))
            };
            let parse_string = {
                let mut pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::string_to_json(IntrinsicArg::path(path.clone()))));
                SubState::single("parse string", NodeState::Pass(pass))
            };
            let bool_to_number = {
                // `true`/`false` map to `1`/`0`; approximated as a literal
                // choice between the two, keyed on BooleanEquals.
                let true_branch = PassState { result: Some(json!(1)), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                let false_branch = PassState { result: Some(json!(0)), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                let inner_choice = ChoiceState {
                    choices: vec![ChoiceRule { condition: condition::boolean_equals(path.clone(), true), next: "as one".to_string() }],
                    default: Some("as zero".to_string()),
                    naming_hint: Some("bool to number".to_string()),
                };
                let mut inner = SubState { start_state: "bool to number".to_string(), states: vec![("bool to number".to_string(), StateEntry::Leaf(NodeState::Choice(inner_choice)))] };
                inner.insert("as one", StateEntry::Nested(SubState::single("as one", NodeState::Pass(true_branch))));
                inner.insert("as zero", StateEntry::Nested(SubState::single("as zero", NodeState::Pass(false_branch))));
                inner
            };
            let as_null = {
                let pass = PassState { result_path: Some(slot.clone()), result: Some(Json::Null), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
                SubState::single("as null", NodeState::Pass(pass))
            };

            let choice = ChoiceState {
                choices: vec![
                    ChoiceRule { condition: is_number, next: "number passthrough".to_string() },
                    ChoiceRule { condition: is_string, next: "parse string".to_string() },
                    ChoiceRule { condition: is_bool, next: "bool to number".to_string() },
                    ChoiceRule { condition: is_missing, next: "as null".to_string() },
                ],
                default: Some("as null".to_string()),
                naming_hint: Some("toNumber".to_string()),
            };
            let mut sub = SubState { start_state: "toNumber".to_string(), states: vec![("toNumber".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("number passthrough", StateEntry::Nested(passthrough));
            sub.insert("parse string", StateEntry::Nested(parse_string));
            sub.insert("bool to number", StateEntry::Nested(bool_to_number));
            sub.insert("as null", StateEntry::Nested(as_null));
            parts.push(sub);
            Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
        }
        Output::Condition(_) => {
            let slot = ctx.heap.alloc();
            let choice = ChoiceState {
                choices: vec![ChoiceRule { condition: to_condition(ctx, &lowered.output), next: "one".to_string() }],
                default: Some("zero".to_string()),
                naming_hint: Some("bool to number".to_string()),
            };
            let mut sub = SubState { start_state: "bool to number".to_string(), states: vec![("bool to number".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("one", StateEntry::Nested(SubState::single("one", NodeState::Pass(PassState { result: Some(json!(1)), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
            sub.insert("zero", StateEntry::Nested(SubState::single("zero", NodeState::Pass(PassState { result: Some(json!(0)), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
            parts.push(sub);
            Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
        }
    }
}

/// `toString`: literals stringify via host conversion; paths emit a choice
/// that either passes through a string or applies `JsonToString` (§4.6).
pub fn to_string_coerced(ctx: &mut LowerCtx, expr: &Expr) -> Lowered {
    let lowered = lower_expr(ctx, expr);
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }
    match &lowered.output {
        Output::Literal { value, .. } => Lowered { states: join_sub_states(parts), output: Output::literal(json!(json_to_display(value))) },
        Output::JsonPath(path) => {
            let slot = ctx.heap.alloc();
            let is_string = condition::is_string(path.clone());
            let passthrough = SubState::single("string passthrough", NodeState::Pass(PassState { input_path: Some(path.clone()), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }));
            let mut stringify_pass = PassState { result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            stringify_pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::json_to_string(IntrinsicArg::path(path.clone()))));
            let stringify = SubState::single("json to string", NodeState::Pass(stringify_pass));
            let choice = ChoiceState { choices: vec![ChoiceRule { condition: is_string, next: "string passthrough".to_string() }], default: Some("json to string".to_string()), naming_hint: Some("toString".to_string()) };
            let mut sub = SubState { start_state: "toString".to_string(), states: vec![("toString".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("string passthrough", StateEntry::Nested(passthrough));
            sub.insert("json to string", StateEntry::Nested(stringify));
            parts.push(sub);
            Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value")))
        }
        Output::Condition(_) => {
            let cond = to_condition(ctx, &lowered.output);
            let slot = ctx.heap.alloc();
            let choice = ChoiceState { choices: vec![ChoiceRule { condition: cond, next: "true".to_string() }], default: Some("false".to_string()), naming_hint: Some("bool to string".to_string()) };
            let mut sub = SubState { start_state: "bool to string".to_string(), states: vec![("bool to string".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("true", StateEntry::Nested(SubState::single("true", NodeState::Pass(PassState { result: Some(json!("true")), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
            sub.insert("false", StateEntry::Nested(SubState::single("false", NodeState::Pass(PassState { result: Some(json!("false")), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
            parts.push(sub);
            Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
        }
    }
}

/// `-x`: `toNumber` then negate via the split-format-rejoin trick —
/// stringify, split on `"-"`; if present, take the numeric tail; else
/// format `"-{}"` (§4.6).
fn negate(ctx: &mut LowerCtx, numeric: Lowered) -> Lowered {
    let mut parts = Vec::new();
    if let Some(s) = numeric.states {
        parts.push(s);
    }
    if let Output::Literal { value, .. } = &numeric.output {
        let n = value.as_f64().unwrap_or(0.0);
        return Lowered { states: join_sub_states(parts), output: Output::literal(json!(-n)) };
    }
    let Output::JsonPath(path) = &numeric.output else {
        return Lowered { states: join_sub_states(parts), output: numeric.output };
    };

    let str_slot = ctx.heap.alloc();
    let mut stringify = PassState { result_path: Some(str_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    stringify.parameters = Some(parameters_with_intrinsic("value", Intrinsic::json_to_string(IntrinsicArg::path(path.clone()))));
    parts.push(SubState::single("stringify for negate", NodeState::Pass(stringify)));

    let split_slot = ctx.heap.alloc();
    let mut split = PassState { result_path: Some(split_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
    split.parameters = Some(parameters_with_intrinsic("value", Intrinsic::string_split(IntrinsicArg::path(format!("{str_slot}.value")), IntrinsicArg::literal(json!("-")))));
    parts.push(SubState::single("split for negate", NodeState::Pass(split)));

    let result_slot = ctx.heap.alloc();
    let is_negative = condition::is_present(format!("{split_slot}.value[1]"), true);
    let take_tail = {
        let mut pass = PassState { result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::string_to_json(IntrinsicArg::path(format!("{split_slot}.value[1]")))));
        SubState::single("take positive tail", NodeState::Pass(pass))
    };
    let prefix_minus = {
        let mut pass = PassState { result_path: Some(result_slot.clone()), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
        let formatted = Intrinsic::format("-{}", vec![IntrinsicArg::path(format!("{str_slot}.value"))]);
        pass.parameters = Some(parameters_with_intrinsic("value", Intrinsic::string_to_json(IntrinsicArg::from(formatted))));
        SubState::single("prefix minus", NodeState::Pass(pass))
    };
    let choice = ChoiceState { choices: vec![ChoiceRule { condition: is_negative, next: "take positive tail".to_string() }], default: Some("prefix minus".to_string()), naming_hint: Some("negate".to_string()) };
    let mut sub = SubState { start_state: "negate".to_string(), states: vec![("negate".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert("take positive tail", StateEntry::Nested(take_tail));
    sub.insert("prefix minus", StateEntry::Nested(prefix_minus));
    parts.push(sub);

    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{result_slot}.value")))
}

/// Used by the binding resolver/statement lowerer to materialize a pattern
/// binding directly from a call site (kept `pub(crate)` for `stmt.rs`).
pub(crate) fn bind_to_pattern(ctx: &mut LowerCtx, pattern: &crate::parse::ast::Pattern, output: &Output, span: Span) -> SubState {
    bind_pattern(ctx, pattern, output, span)
}
