//! Array-Method Skeleton (C11): one higher-order generator, parameterized
//! per method, that drives every `.map`/`.filter`/`.forEach`/`.some`/
//! `.every`/`.join`/`.includes`/`.slice` call (§4.11).
//!
//! `Map` states run each iteration against an isolated copy of the
//! execution state, so a cross-iteration accumulator cannot live inside
//! one — the skeleton instead lowers to an ordinary counted loop over the
//! source array's indices, the same shape `lower::stmt` builds for a `for`
//! statement, so a heap slot can carry the running accumulator between
//! iterations. Each specialization differs only in its scratch
//! initializer, how it folds one iteration's callback result into the
//! accumulator (the "handle iteration result" hook), and how it finalizes
//! the accumulator once the loop ends (the "end" hook).
//!
//! `.filter` with a predicate that is a static expression over only the
//! element parameter bypasses the skeleton entirely and emits a JSON Path
//! filter expression instead (§8 scenario 3); `.includes` with no start
//! index and a plain array path source emits `States.ArrayContains`
//! directly rather than looping.

use serde_json::json;

use crate::ir::graph::{join_sub_states, pass_with_input};
use crate::ir::types::*;
use crate::lower::condition;
use crate::lower::context::{Frame, LowerCtx};
use crate::lower::expr::lower_expr;
use crate::lower::intrinsic::{Intrinsic, IntrinsicArg};
use crate::lower::stmt::{lower_block, ReturnTemplate};
use crate::parse::ast::*;

/// Entry point from the expression lowerer's call handling: returns `Some`
/// if `method` names a supported array method, `None` to fall through to
/// ordinary call lowering (including integration dispatch).
pub fn try_lower_method_call(ctx: &mut LowerCtx, object: &Expr, method: &str, arguments: &[Expr], span: Span) -> Option<Lowered> {
    match method {
        "map" | "forEach" | "filter" | "some" | "every" | "join" | "includes" | "slice" => {}
        _ => return None,
    }

    if method == "filter" {
        if let Some(fast_path) = try_filter_json_path(ctx, object, arguments) {
            return Some(fast_path);
        }
    }
    if method == "includes" {
        if let Some(fast) = try_includes_fast_path(ctx, object, arguments) {
            return Some(fast);
        }
    }
    if method == "slice" {
        return Some(lower_slice(ctx, object, arguments, span));
    }

    let base = lower_expr(ctx, object);
    let mut parts = Vec::new();
    if let Some(s) = base.states {
        parts.push(s);
    }
    let Output::JsonPath(source_path) = base.output else {
        ctx.errors.push(unsupported("array methods require a path-valued source array", span));
        return Some(Lowered::bare(Output::JsonPath(ctx.options.null_context_path.clone())));
    };

    if method == "join" {
        let (sep_states, sep_arg) = lower_join_separator(ctx, arguments.first());
        if let Some(s) = sep_states {
            parts.push(s);
        }
        let skeleton = build_join_skeleton(ctx, &source_path, &sep_arg);
        parts.push(skeleton.states);
        return Some(Lowered::with_states(join_sub_states(parts).unwrap(), skeleton.output));
    }

    let Some(Expr::Arrow { params, body, .. }) = arguments.first() else {
        ctx.errors.push(unsupported(format!("`{method}` requires a callback argument"), span));
        return Some(Lowered::bare(Output::JsonPath(ctx.options.null_context_path.clone())));
    };

    let skeleton = build_skeleton(ctx, &source_path, params, body, method, span);
    parts.push(skeleton.states);
    Some(Lowered::with_states(join_sub_states(parts).unwrap(), skeleton.output))
}

/// `Array.prototype.join`'s separator argument: a plain string literal folds
/// to an intrinsic literal, anything else lowers as an ordinary expression.
/// Missing argument defaults to `","`, matching the native method.
fn lower_join_separator(ctx: &mut LowerCtx, arg: Option<&Expr>) -> (Option<SubState>, IntrinsicArg) {
    let Some(arg) = arg else {
        return (None, IntrinsicArg::literal(json!(",")));
    };
    if let Expr::Literal { value: Literal::String(s), .. } = arg {
        return (None, IntrinsicArg::literal(json!(s)));
    }
    let lowered = lower_expr(ctx, arg);
    (lowered.states, intrinsic_arg(&lowered.output))
}

fn unsupported(message: impl Into<String>, span: Span) -> crate::error::CompilerError {
    crate::error::CompilerError::new(crate::error::CompilerErrorKind::UnsupportedFeature(message.into()), crate::error::Phase::Lower, Some(span))
}

fn intrinsic_arg(output: &Output) -> IntrinsicArg {
    match output {
        Output::JsonPath(p) => IntrinsicArg::path(p.clone()),
        Output::Literal { value, .. } => IntrinsicArg::literal(value.clone()),
        Output::Condition(_) => unreachable!("a Condition cannot be an intrinsic argument"),
    }
}

fn materialize(output: &Output) -> Output {
    match output {
        Output::Condition(_) => Output::literal(json!(true)),
        other => other.clone(),
    }
}

fn intrinsic_pass(result_path: &str, key: &str, intrinsic: Intrinsic) -> PassState {
    PassState {
        result_path: Some(result_path.to_string()),
        parameters: Some(json!({ format!("{key}.$"): intrinsic.render() })),
        next: Some(DEFERRED_NEXT.to_string()),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------
// Fast paths
// ---------------------------------------------------------------------

fn try_filter_json_path(ctx: &mut LowerCtx, object: &Expr, arguments: &[Expr]) -> Option<Lowered> {
    let Some(Expr::Arrow { params, body: ArrowBody::Expression(body), .. }) = arguments.first() else {
        return None;
    };
    let [Pattern::Identifier { decl: item_decl, .. }] = params.as_slice() else {
        return None;
    };
    let filter_expr = static_filter_predicate(body, *item_decl)?;

    let base = lower_expr(ctx, object);
    let Output::JsonPath(source_path) = &base.output else {
        return None;
    };
    let mut parts = Vec::new();
    if let Some(s) = base.states {
        parts.push(s);
    }

    let result_slot = ctx.heap.alloc();
    let pass = PassState {
        input_path: Some(format!("{source_path}[?({filter_expr})]")),
        result_path: Some(result_slot.clone()),
        next: Some(DEFERRED_NEXT.to_string()),
        naming_hint: Some("filter".to_string()),
        ..Default::default()
    };
    parts.push(SubState::single("filter", NodeState::Pass(pass)));
    Some(Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(result_slot)))
}

/// Static over the element parameter means: a comparison of `@` against a
/// literal. Anything else (another identifier, a call, the array itself)
/// falls through to the general skeleton.
fn static_filter_predicate(expr: &Expr, item_decl: DeclId) -> Option<String> {
    let Expr::Binary { op, left, right, .. } = expr else { return None };
    let asl_op = match op {
        BinaryOp::StrictEq | BinaryOp::Eq => "==",
        BinaryOp::StrictNotEq | BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        _ => return None,
    };
    let (elem_side, literal_side) = match (left.as_ref(), right.as_ref()) {
        (Expr::Identifier { decl, .. }, other) if *decl == item_decl => (true, other),
        (other, Expr::Identifier { decl, .. }) if *decl == item_decl => (false, other),
        _ => return None,
    };
    let Expr::Literal { value, .. } = literal_side else { return None };
    let rendered = match value {
        Literal::String(s) => format!("'{}'", s.replace('\'', "\\'")),
        Literal::Number(n) => n.to_string(),
        Literal::Bool(b) => b.to_string(),
        _ => return None,
    };
    Some(if elem_side { format!("@ {asl_op} {rendered}") } else { format!("{rendered} {asl_op} @") })
}

fn try_includes_fast_path(ctx: &mut LowerCtx, object: &Expr, arguments: &[Expr]) -> Option<Lowered> {
    if arguments.len() != 1 {
        return None;
    }
    let base = lower_expr(ctx, object);
    let Output::JsonPath(source_path) = &base.output else {
        return None;
    };
    let mut parts = Vec::new();
    if let Some(s) = base.states {
        parts.push(s);
    }
    let needle = lower_expr(ctx, &arguments[0]);
    if let Some(s) = needle.states {
        parts.push(s);
    }

    let slot = ctx.heap.alloc();
    let pass = intrinsic_pass(&slot, "value", Intrinsic::array_contains(IntrinsicArg::path(source_path.clone()), intrinsic_arg(&needle.output)));
    parts.push(SubState::single("includes", NodeState::Pass(pass)));
    Some(Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(format!("{slot}.value"))))
}

/// Expressed as the native JSON Path slice syntax `arr[start:end]`, which
/// every ASL JSONPath evaluator supports.
fn lower_slice(ctx: &mut LowerCtx, object: &Expr, arguments: &[Expr], span: Span) -> Lowered {
    let base = lower_expr(ctx, object);
    let mut parts = Vec::new();
    if let Some(s) = base.states {
        parts.push(s);
    }
    let Output::JsonPath(source_path) = base.output else {
        ctx.errors.push(unsupported("`.slice` requires a path-valued source array", span));
        return Lowered::bare(Output::JsonPath(ctx.options.null_context_path.clone()));
    };

    let start = arguments.first().and_then(as_static_int);
    let end = arguments.get(1).and_then(as_static_int);
    let slice_expr = match (start, end) {
        (Some(s), Some(e)) => format!("[{s}:{e}]"),
        (Some(s), None) => format!("[{s}:]"),
        (None, None) => "[:]".to_string(),
        (None, Some(e)) => format!("[:{e}]"),
    };

    let slot = ctx.heap.alloc();
    let pass = PassState { input_path: Some(format!("{source_path}{slice_expr}")), result_path: Some(slot.clone()), next: Some(DEFERRED_NEXT.to_string()), naming_hint: Some("slice".to_string()), ..Default::default() };
    parts.push(SubState::single("slice", NodeState::Pass(pass)));
    Lowered::with_states(join_sub_states(parts).unwrap(), Output::JsonPath(slot))
}

fn as_static_int(expr: &Expr) -> Option<i64> {
    if let Expr::Literal { value: Literal::Number(n), .. } = expr {
        return Some(*n as i64);
    }
    None
}

// ---------------------------------------------------------------------
// The general skeleton: a counted loop over the source array
// ---------------------------------------------------------------------

struct Skeleton {
    states: SubState,
    output: Output,
}

fn build_skeleton(ctx: &mut LowerCtx, source_path: &str, params: &[Pattern], body: &ArrowBody, method: &str, span: Span) -> Skeleton {
    let len_slot = ctx.heap.alloc();
    let len_pass = intrinsic_pass(&len_slot, "value", Intrinsic::array_length(IntrinsicArg::path(source_path.to_string())));

    let idx_slot = ctx.heap.alloc();
    let head_slot = ctx.heap.alloc();
    let init_head = init_value_for(method);
    // Every scratch slot stores its payload at `{slot}.value`, never bare —
    // `Parameters` (the only way to invoke an intrinsic) must be a JSON
    // object, so a slot populated by an intrinsic is always wrapped; a
    // slot's literal initializer is written the same way so later reads
    // don't need to know which form produced the current value.
    let mut parts = vec![
        SubState::single("array length", NodeState::Pass(len_pass)),
        SubState::single(
            "init index",
            NodeState::Pass(PassState { result: Some(json!(0)), result_path: Some(format!("{idx_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }),
        ),
        SubState::single(
            "init accumulator",
            NodeState::Pass(PassState { result: Some(init_head), result_path: Some(format!("{head_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }),
        ),
    ];

    ctx.push(Frame::Loop);
    let item_slot = ctx.heap.alloc();
    let get_item = intrinsic_pass(&item_slot, "value", Intrinsic::array_get_item(IntrinsicArg::path(source_path.to_string()), IntrinsicArg::path(format!("{idx_slot}.value"))));

    let item_pattern = params.first().cloned().unwrap_or(Pattern::Identifier { decl: DeclId(u32::MAX), name: "__item".to_string() });
    let index_pattern = params.get(1).cloned();

    let mut body_parts = vec![
        SubState::single("read element", NodeState::Pass(get_item)),
        crate::lower::binding::bind_pattern(ctx, &item_pattern, &Output::JsonPath(format!("{item_slot}.value")), span),
    ];
    if let Some(idx_pattern) = &index_pattern {
        body_parts.push(crate::lower::binding::bind_pattern(ctx, idx_pattern, &Output::JsonPath(format!("{idx_slot}.value")), span));
    }

    let callback_result_slot = ctx.heap.alloc();
    let callback_sub = match body {
        ArrowBody::Expression(expr) => {
            let lowered = lower_expr(ctx, expr);
            let mut inner = Vec::new();
            if let Some(s) = lowered.states {
                inner.push(s);
            }
            let mut write = PassState { result_path: Some(format!("{callback_result_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() };
            pass_with_input(&mut write, &materialize(&lowered.output));
            inner.push(SubState::single("callback result", NodeState::Pass(write)));
            join_sub_states(inner).unwrap()
        }
        ArrowBody::Block(stmts) => lower_block(ctx, stmts, &ReturnTemplate { result_path: format!("{callback_result_slot}.value"), next: Some(DEFERRED_NEXT.to_string()) }),
    };
    body_parts.push(callback_sub);
    body_parts.push(fold_for_method(method, &head_slot, &callback_result_slot, &item_slot));
    body_parts.push(SubState::single(
        "advance index",
        NodeState::Pass(intrinsic_pass(&idx_slot, "value", Intrinsic::math_add(IntrinsicArg::path(format!("{idx_slot}.value")), IntrinsicArg::literal(json!(1.0))))),
    ));

    let mut body_sub = join_sub_states(body_parts).unwrap();
    crate::ir::graph::update_deferred_next_states(&mut body_sub, CONTINUE_NEXT);
    ctx.pop();

    let test_cond = condition::numeric_less_than_path(format!("{idx_slot}.value"), format!("{len_slot}.value"));
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: test_cond, next: "body".to_string() }],
        default: Some(BREAK_NEXT.to_string()),
        naming_hint: Some(format!("{method} loop test")),
    };
    let loop_sub = SubState {
        start_state: "test".to_string(),
        states: vec![
            ("test".to_string(), StateEntry::Leaf(NodeState::Choice(choice))),
            ("body".to_string(), StateEntry::Nested(body_sub)),
            (BREAK_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))),
            (CONTINUE_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some("test".to_string()), ..Default::default() }))),
        ],
    };
    parts.push(loop_sub);

    let (finalize_sub, output) = finalize_for_method(ctx, method, &head_slot);
    if let Some(finalize_sub) = finalize_sub {
        parts.push(finalize_sub);
    }

    Skeleton { states: join_sub_states(parts).unwrap(), output }
}

/// `.join(sep)`: no callback, so this skips `build_skeleton`'s callback
/// binding/invocation entirely and folds each element (stringified via
/// `JsonToString`) straight onto the accumulator, separated by `sep` (§8
/// scenario, spec.md:213 — `Format("{}{}{}", acc, sep, head)`).
fn build_join_skeleton(ctx: &mut LowerCtx, source_path: &str, sep: &IntrinsicArg) -> Skeleton {
    let len_slot = ctx.heap.alloc();
    let len_pass = intrinsic_pass(&len_slot, "value", Intrinsic::array_length(IntrinsicArg::path(source_path.to_string())));

    let idx_slot = ctx.heap.alloc();
    let head_slot = ctx.heap.alloc();
    let mut parts = vec![
        SubState::single("array length", NodeState::Pass(len_pass)),
        SubState::single(
            "init index",
            NodeState::Pass(PassState { result: Some(json!(0)), result_path: Some(format!("{idx_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }),
        ),
        SubState::single(
            "init accumulator",
            NodeState::Pass(PassState { result: Some(json!("")), result_path: Some(format!("{head_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }),
        ),
    ];

    ctx.push(Frame::Loop);
    let item_slot = ctx.heap.alloc();
    let get_item = intrinsic_pass(&item_slot, "value", Intrinsic::array_get_item(IntrinsicArg::path(source_path.to_string()), IntrinsicArg::path(format!("{idx_slot}.value"))));

    let mut body_parts = vec![SubState::single("read element", NodeState::Pass(get_item)), fold_join(&head_slot, &item_slot, &idx_slot, sep)];
    body_parts.push(SubState::single(
        "advance index",
        NodeState::Pass(intrinsic_pass(&idx_slot, "value", Intrinsic::math_add(IntrinsicArg::path(format!("{idx_slot}.value")), IntrinsicArg::literal(json!(1.0))))),
    ));

    let mut body_sub = join_sub_states(body_parts).unwrap();
    crate::ir::graph::update_deferred_next_states(&mut body_sub, CONTINUE_NEXT);
    ctx.pop();

    let test_cond = condition::numeric_less_than_path(format!("{idx_slot}.value"), format!("{len_slot}.value"));
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: test_cond, next: "body".to_string() }],
        default: Some(BREAK_NEXT.to_string()),
        naming_hint: Some("join loop test".to_string()),
    };
    let loop_sub = SubState {
        start_state: "test".to_string(),
        states: vec![
            ("test".to_string(), StateEntry::Leaf(NodeState::Choice(choice))),
            ("body".to_string(), StateEntry::Nested(body_sub)),
            (BREAK_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))),
            (CONTINUE_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some("test".to_string()), ..Default::default() }))),
        ],
    };
    parts.push(loop_sub);

    Skeleton { states: join_sub_states(parts).unwrap(), output: Output::JsonPath(format!("{head_slot}.value")) }
}

/// `map`/`filter` build their result as a textual JSON array, seeded with a
/// leading `null` placeholder so the accumulator is always valid to parse
/// even before any real element has been appended; `finalize_for_method`
/// strips that placeholder off with a JSON Path slice once the array is
/// parsed back. `some`/`every` accumulate their running boolean bare (no
/// intrinsic ever writes through them, so they need no object wrapper).
fn init_value_for(method: &str) -> serde_json::Value {
    match method {
        "map" | "filter" => json!("[null"),
        "some" => json!(false),
        "every" => json!(true),
        _ => serde_json::Value::Null,
    }
}

/// The "handle iteration result" hook: folds one iteration's callback
/// result into `head_slot`, specialized per method.
fn fold_for_method(method: &str, head_slot: &str, callback_slot: &str, item_slot: &str) -> SubState {
    match method {
        "map" => append_json_element(head_slot, &format!("{callback_slot}.value")),
        "filter" => {
            let keep = append_json_element(head_slot, &format!("{item_slot}.value"));
            let skip = SubState::single("skip element", NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }));
            let choice = ChoiceState {
                choices: vec![ChoiceRule { condition: condition::boolean_equals(format!("{callback_slot}.value"), true), next: "keep element".to_string() }],
                default: Some("skip element".to_string()),
                naming_hint: Some("filter decision".to_string()),
            };
            let mut sub = SubState { start_state: "filter decision".to_string(), states: vec![("filter decision".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
            sub.insert("keep element", StateEntry::Nested(keep));
            sub.insert("skip element", StateEntry::Nested(skip));
            sub
        }
        "some" => decision(head_slot, callback_slot, true, "mark found", json!(true)),
        "every" => decision(head_slot, callback_slot, false, "mark failed", json!(false)),
        _ => SubState::single("discard result", NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() })),
    }
}

/// `some`/`every` short-circuit conceptually, but since a plain counted loop
/// always runs every index, "short-circuiting" is expressed as "a later
/// iteration's write is a no-op once the flag has already flipped" — the
/// Choice guard here only ever fires the flip once, further iterations take
/// the `unchanged` branch whether or not the callback still triggers it.
fn decision(head_slot: &str, callback_slot: &str, trigger: bool, label: &str, write_value: serde_json::Value) -> SubState {
    let act = SubState::single(label.to_string(), NodeState::Pass(PassState { result: Some(write_value), result_path: Some(format!("{head_slot}.value")), next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }));
    let keep = SubState::single("unchanged", NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }));
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: condition::boolean_equals(format!("{callback_slot}.value"), trigger), next: label.to_string() }],
        default: Some("unchanged".to_string()),
        naming_hint: Some(format!("{label} decision")),
    };
    let mut sub = SubState { start_state: format!("{label} decision"), states: vec![(format!("{label} decision"), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert(label, StateEntry::Nested(act));
    sub.insert("unchanged", StateEntry::Nested(keep));
    sub
}

/// Appends `value_path`'s `JsonToString` rendering onto `head_slot`'s
/// textual JSON array, separated by a comma.
fn append_json_element(head_slot: &str, value_path: &str) -> SubState {
    let pass = intrinsic_pass(
        head_slot,
        "value",
        Intrinsic::format(
            "{},{}",
            vec![IntrinsicArg::path(format!("{head_slot}.value")), IntrinsicArg::from(Intrinsic::json_to_string(IntrinsicArg::path(value_path.to_string())))],
        ),
    );
    SubState::single("append", NodeState::Pass(pass))
}

/// Appends `value_path`'s stringified value to `head_slot`, optionally
/// prefixed with `sep` — `.join`'s fold (`Format("{}{}{}", acc, sep, head)`).
fn append_raw(head_slot: &str, value_path: &str, sep: Option<&IntrinsicArg>) -> SubState {
    let mut args = vec![IntrinsicArg::path(format!("{head_slot}.value"))];
    let fmt = match sep {
        Some(sep) => {
            args.push(sep.clone());
            "{}{}{}"
        }
        None => "{}{}",
    };
    args.push(IntrinsicArg::from(Intrinsic::json_to_string(IntrinsicArg::path(value_path.to_string()))));
    let pass = intrinsic_pass(head_slot, "value", Intrinsic::format(fmt, args));
    SubState::single("append", NodeState::Pass(pass))
}

/// `.join`'s fold hook: the first element is appended bare, every later one
/// is prefixed with the separator, mirroring the Choice-guarded "first vs
/// rest" shape `fold_for_method`'s other specializations use.
fn fold_join(head_slot: &str, item_slot: &str, idx_slot: &str, sep: &IntrinsicArg) -> SubState {
    let rest = append_raw(head_slot, &format!("{item_slot}.value"), Some(sep));
    let first = append_raw(head_slot, &format!("{item_slot}.value"), None);
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: condition::numeric_equals(format!("{idx_slot}.value"), 0.0), next: "first".to_string() }],
        default: Some("rest".to_string()),
        naming_hint: Some("join separator".to_string()),
    };
    let mut sub = SubState { start_state: "join separator".to_string(), states: vec![("join separator".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert("first", StateEntry::Nested(first));
    sub.insert("rest", StateEntry::Nested(rest));
    sub
}

/// The "end" hook: finalizes the accumulator once the loop completes.
fn finalize_for_method(ctx: &mut LowerCtx, method: &str, head_slot: &str) -> (Option<SubState>, Output) {
    match method {
        "map" | "filter" => {
            let slot = ctx.heap.alloc();
            let close = intrinsic_pass(&slot, "value", Intrinsic::format("{}]", vec![IntrinsicArg::path(format!("{head_slot}.value"))]));
            let parse = intrinsic_pass(&slot, "value", Intrinsic::string_to_json(IntrinsicArg::path(format!("{slot}.value"))));
            let sub = join_sub_states(vec![
                SubState::single("close accumulator", NodeState::Pass(close)),
                SubState::single("parse accumulator", NodeState::Pass(parse)),
            ])
            .unwrap();
            // Drop the leading `null` placeholder the accumulator was seeded
            // with (see `init_value_for`).
            (Some(sub), Output::JsonPath(format!("{slot}.value[1:]")))
        }
        "some" | "every" => (None, Output::JsonPath(format!("{head_slot}.value"))),
        _ => (None, Output::JsonPath(ctx.options.null_context_path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use crate::lower::integration::NullIntegrationResolver;

    fn span() -> Span {
        Span { line: 1, column: 1 }
    }

    static NULL_RESOLVER: NullIntegrationResolver = NullIntegrationResolver;

    fn new_ctx() -> LowerCtx<'static> {
        LowerCtx::new(CompileOptions::default(), &NULL_RESOLVER)
    }

    fn ident(decl: u32, name: &str) -> Expr {
        Expr::Identifier { decl: DeclId(decl), name: name.to_string(), span: span() }
    }

    #[test]
    fn static_filter_predicate_recognizes_element_on_the_left() {
        let item_decl = DeclId(1);
        let expr = Expr::Binary {
            op: BinaryOp::StrictEq,
            left: Box::new(ident(1, "x")),
            right: Box::new(Expr::Literal { value: Literal::String("a".to_string()), span: span() }),
            span: span(),
        };
        assert_eq!(static_filter_predicate(&expr, item_decl), Some("@ == 'a'".to_string()));
    }

    #[test]
    fn static_filter_predicate_recognizes_element_on_the_right() {
        let item_decl = DeclId(1);
        let expr = Expr::Binary {
            op: BinaryOp::Lt,
            left: Box::new(Expr::Literal { value: Literal::Number(3.0), span: span() }),
            right: Box::new(ident(1, "x")),
            span: span(),
        };
        assert_eq!(static_filter_predicate(&expr, item_decl), Some("3 < @".to_string()));
    }

    #[test]
    fn static_filter_predicate_rejects_non_constant_rhs() {
        let item_decl = DeclId(1);
        let expr = Expr::Binary { op: BinaryOp::StrictEq, left: Box::new(ident(1, "x")), right: Box::new(ident(2, "y")), span: span() };
        assert_eq!(static_filter_predicate(&expr, item_decl), None);
    }

    #[test]
    fn init_value_for_map_and_filter_seed_a_placeholder_array() {
        assert_eq!(init_value_for("map"), json!("[null"));
        assert_eq!(init_value_for("filter"), json!("[null"));
        assert_eq!(init_value_for("some"), json!(false));
        assert_eq!(init_value_for("every"), json!(true));
    }

    #[test]
    fn join_separator_defaults_to_comma_when_no_argument_given() {
        let mut ctx = new_ctx();
        let (states, arg) = lower_join_separator(&mut ctx, None);
        assert!(states.is_none());
        assert_eq!(arg, IntrinsicArg::literal(json!(",")));
    }

    #[test]
    fn join_separator_folds_a_string_literal_to_an_intrinsic_literal() {
        let mut ctx = new_ctx();
        let sep_expr = Expr::Literal { value: Literal::String(" - ".to_string()), span: span() };
        let (states, arg) = lower_join_separator(&mut ctx, Some(&sep_expr));
        assert!(states.is_none(), "a literal separator needs no runtime lowering");
        assert_eq!(arg, IntrinsicArg::literal(json!(" - ")));
    }

    #[test]
    fn join_skeleton_folds_every_element_through_format_with_the_given_separator() {
        let mut ctx = new_ctx();
        let sep = IntrinsicArg::literal(json!(", "));
        let skeleton = build_join_skeleton(&mut ctx, "$.xs", &sep);
        let rendered = format!("{:?}", skeleton.states);
        assert!(rendered.contains("States.Format"), "join folds through States.Format, got: {rendered}");
        assert!(rendered.contains("States.JsonToString"), "each element is stringified before being appended");
    }

    #[test]
    fn finalize_map_or_filter_drops_the_placeholder_and_parses_back() {
        let mut ctx = new_ctx();
        let (sub, output) = finalize_for_method(&mut ctx, "map", "$.heap0");
        assert!(sub.is_some(), "map/filter need a close+parse pass after the loop");
        match output {
            Output::JsonPath(p) => assert!(p.ends_with(".value[1:]"), "expected the leading null placeholder to be sliced off, got {p}"),
            other => panic!("expected a JsonPath output, got {other:?}"),
        }
    }

    #[test]
    fn finalize_some_or_every_needs_no_extra_pass() {
        let mut ctx = new_ctx();
        let (sub, output) = finalize_for_method(&mut ctx, "some", "$.heap0");
        assert!(sub.is_none());
        assert_eq!(output, Output::JsonPath("$.heap0.value".to_string()));
    }
}
