//! Statement Lowerer (C7): sequences a function body's statements into one
//! sub-graph. Owns loop/try frame management; expression evaluation and
//! pattern binding are delegated to the Expression Lowerer (C6) and Binding
//! Resolver (C8).

use serde_json::json;
use serde_json::Value as Json;

use crate::error::CompilerError;
use crate::ir::graph::{join_sub_states, pass_with_input, update_deferred_next_states};
use crate::ir::types::*;
use crate::lower::binding::bind_pattern;
use crate::lower::context::{Frame, LowerCtx};
use crate::lower::error_router::{route_throw, ThrowRoute};
use crate::lower::expr::lower_expr;
use crate::parse::ast::*;

/// Where a `return` statement's value is written and which reserved label
/// it jumps to. The top-level function body uses `End: true`-equivalent
/// semantics (a `Succeed` boundary handled by the caller); a callback body
/// embedded inside the array-method skeleton (§4.11) uses a heap slot and
/// falls through instead.
#[derive(Clone)]
pub struct ReturnTemplate {
    pub result_path: String,
    /// Reserved or synthetic label a `return` jumps to once its value is
    /// written. `None` means "terminal" — the `return` produces `End: true`
    /// directly rather than a `Next`.
    pub next: Option<String>,
}

/// Lowers a full statement block against a `ReturnTemplate`, returning the
/// sub-graph. The block's own fall-through (no explicit `return` reached)
/// is left as `DEFERRED_NEXT` for the caller to resolve — the normalizer
/// guarantees every function body is statement-terminal (§C5), but a
/// callback body handed to the array-method skeleton is not required to be.
pub fn lower_block(ctx: &mut LowerCtx, stmts: &[Stmt], template: &ReturnTemplate) -> SubState {
    let mut parts = Vec::new();
    for stmt in stmts {
        parts.push(lower_stmt(ctx, stmt, template));
    }
    join_sub_states(parts).unwrap_or_else(noop)
}

fn noop() -> SubState {
    SubState::single("noop", NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))
}

fn lower_stmt(ctx: &mut LowerCtx, stmt: &Stmt, template: &ReturnTemplate) -> SubState {
    match stmt {
        Stmt::Block { body, .. } => lower_block(ctx, body, template),
        Stmt::Expression { expr, .. } => {
            let lowered = lower_expr(ctx, expr);
            lowered.states.unwrap_or_else(noop)
        }
        Stmt::VarDecl { pattern, init, span } => lower_var_decl(ctx, pattern, init, *span),
        Stmt::If { test, consequent, alternate, .. } => lower_if(ctx, test, consequent, alternate.as_deref(), template),
        Stmt::For { init, test, update, body, .. } => lower_for(ctx, init.as_deref(), test.as_ref(), update.as_ref(), body, template),
        Stmt::ForOf { decl, right, body, span } => lower_for_of(ctx, decl, right, body, template, *span),
        Stmt::ForIn { decl, right, body, span } => lower_for_in(ctx, decl, right, body, template, *span),
        Stmt::While { test, body, .. } => lower_while(ctx, test, body, template, false),
        Stmt::DoWhile { test, body, .. } => lower_while(ctx, test, body, template, true),
        Stmt::Return { argument, .. } => lower_return(ctx, argument.as_ref(), template),
        Stmt::Throw { argument, span } => lower_throw(ctx, argument, *span),
        Stmt::Try { block, handler, finalizer, span } => lower_try(ctx, block, handler.as_ref(), finalizer.as_deref(), template, *span),
        Stmt::Break { .. } => lower_break_continue(ctx, BREAK_NEXT),
        Stmt::Continue { .. } => lower_break_continue(ctx, CONTINUE_NEXT),
        Stmt::Switch { span } | Stmt::With { span } | Stmt::ForAwaitOf { span } => {
            ctx.errors.push(unsupported_stmt(*span));
            noop()
        }
        Stmt::Debugger { .. } => noop(),
    }
}

fn unsupported_stmt(span: Span) -> CompilerError {
    crate::error::CompilerError::new(
        crate::error::CompilerErrorKind::UnsupportedFeature("this statement form has no ASL lowering".into()),
        crate::error::Phase::Lower,
        Some(span),
    )
}

fn lower_break_continue(ctx: &mut LowerCtx, label: &str) -> SubState {
    if ctx.nearest_loop().is_none() {
        ctx.errors.push(crate::error::CompilerError::new(
            crate::error::CompilerErrorKind::UnsupportedFeature(format!("`{label}` outside a reachable loop")),
            crate::error::Phase::Lower,
            None,
        ));
    }
    SubState::single(format!("{label} jump"), NodeState::Pass(PassState { next: Some(label.to_string()), ..Default::default() }))
}

// ---------------------------------------------------------------------
// Declarations, conditionals
// ---------------------------------------------------------------------

fn lower_var_decl(ctx: &mut LowerCtx, pattern: &Pattern, init: &Option<Expr>, span: Span) -> SubState {
    let mut parts = Vec::new();
    let output = match init {
        Some(expr) => {
            let lowered = lower_expr(ctx, expr);
            if let Some(s) = lowered.states {
                parts.push(s);
            }
            lowered.output
        }
        None => Output::JsonPath(ctx.options.null_context_path.clone()),
    };
    parts.push(bind_pattern(ctx, pattern, &output, span));
    join_sub_states(parts).unwrap_or_else(noop)
}

fn lower_if(ctx: &mut LowerCtx, test: &Expr, consequent: &Stmt, alternate: Option<&Stmt>, template: &ReturnTemplate) -> SubState {
    let t = lower_expr(ctx, test);
    let mut parts = Vec::new();
    if let Some(s) = t.states {
        parts.push(s);
    }
    let cond = to_condition(&t.output);

    let then_sub = lower_stmt(ctx, consequent, template);
    let else_sub = alternate.map(|s| lower_stmt(ctx, s, template));

    let default_label = if else_sub.is_some() { "else".to_string() } else { DEFERRED_NEXT.to_string() };
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: cond, next: "then".to_string() }],
        default: Some(default_label),
        naming_hint: Some("if".to_string()),
    };
    let mut sub = SubState { start_state: "if".to_string(), states: vec![("if".to_string(), StateEntry::Leaf(NodeState::Choice(choice)))] };
    sub.insert("then", StateEntry::Nested(then_sub));
    if let Some(else_sub) = else_sub {
        sub.insert("else", StateEntry::Nested(else_sub));
    }
    parts.push(sub);
    join_sub_states(parts).unwrap()
}

fn to_condition(output: &Output) -> Condition {
    match output {
        Output::Condition(c) => c.clone(),
        Output::JsonPath(p) => crate::lower::condition::is_truthy(p),
        Output::Literal { value, .. } => {
            if is_literal_truthy(value) {
                crate::lower::condition::trivially_true()
            } else {
                crate::lower::condition::trivially_false()
            }
        }
    }
}

fn is_literal_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------
// Loops (§4.9 reserved labels)
// ---------------------------------------------------------------------

fn lower_while(ctx: &mut LowerCtx, test: &Expr, body: &Stmt, template: &ReturnTemplate, run_body_first: bool) -> SubState {
    ctx.push(Frame::Loop);
    let t = lower_expr(ctx, test);
    let test_prelude = t.states;
    let cond = to_condition(&t.output);
    let mut body_sub = lower_stmt(ctx, body, template);
    update_deferred_next_states(&mut body_sub, CONTINUE_NEXT);
    ctx.pop();

    // `test` re-evaluates the condition expression's own prelude states
    // each iteration; the prelude sub-graph (if any) is inlined ahead of
    // the `Choice` test every pass.
    let test_label = "test".to_string();
    let mut states = Vec::new();
    let choice = ChoiceState {
        choices: vec![ChoiceRule { condition: cond, next: "body".to_string() }],
        default: Some(BREAK_NEXT.to_string()),
        naming_hint: Some("loop test".to_string()),
    };
    let test_entry: StateEntry = match test_prelude {
        Some(mut pre) => {
            update_deferred_next_states(&mut pre, &test_label.clone());
            let mut combined = pre;
            combined.insert(test_label.clone(), StateEntry::Leaf(NodeState::Choice(choice)));
            StateEntry::Nested(combined)
        }
        None => StateEntry::Leaf(NodeState::Choice(choice)),
    };
    states.push((test_label.clone(), test_entry));
    states.push(("body".to_string(), StateEntry::Nested(body_sub)));
    states.push((BREAK_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
    states.push((CONTINUE_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some(test_label.clone()), ..Default::default() }))));

    let start = if run_body_first { "body".to_string() } else { test_label.clone() };
    SubState { start_state: start, states }
}

fn lower_for(ctx: &mut LowerCtx, init: Option<&Stmt>, test: Option<&Expr>, update: Option<&Expr>, body: &Stmt, template: &ReturnTemplate) -> SubState {
    let mut parts = Vec::new();
    if let Some(init) = init {
        parts.push(lower_stmt(ctx, init, template));
    }

    ctx.push(Frame::Loop);
    let cond = test.map(|t| {
        let lowered = lower_expr(ctx, t);
        (lowered.states, to_condition(&lowered.output))
    });
    let mut body_sub = lower_stmt(ctx, body, template);

    let update_sub = update.map(|u| {
        let lowered = lower_expr(ctx, u);
        lowered.states.unwrap_or_else(noop)
    });
    ctx.pop();

    update_deferred_next_states(&mut body_sub, CONTINUE_NEXT);

    let mut states = Vec::new();
    let test_label = "test".to_string();
    match cond {
        Some((prelude, condition)) => {
            let choice = ChoiceState {
                choices: vec![ChoiceRule { condition, next: "body".to_string() }],
                default: Some(BREAK_NEXT.to_string()),
                naming_hint: Some("loop test".to_string()),
            };
            let entry = match prelude {
                Some(mut pre) => {
                    update_deferred_next_states(&mut pre, &test_label);
                    pre.insert(test_label.clone(), StateEntry::Leaf(NodeState::Choice(choice)));
                    StateEntry::Nested(pre)
                }
                None => StateEntry::Leaf(NodeState::Choice(choice)),
            };
            states.push((test_label.clone(), entry));
        }
        None => {
            states.push((test_label.clone(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some("body".to_string()), ..Default::default() }))));
        }
    }
    states.push(("body".to_string(), StateEntry::Nested(body_sub)));
    states.push((BREAK_NEXT.to_string(), StateEntry::Leaf(NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }))));
    let continue_entry = match update_sub {
        Some(mut u) => {
            update_deferred_next_states(&mut u, &test_label);
            StateEntry::Nested(u)
        }
        None => StateEntry::Leaf(NodeState::Pass(PassState { next: Some(test_label.clone()), ..Default::default() })),
    };
    states.push((CONTINUE_NEXT.to_string(), continue_entry));

    parts.push(SubState { start_state: test_label, states });
    join_sub_states(parts).unwrap()
}

/// `for (decl of iterable) body`: lowered as a `Map` state whose iterator
/// binds `decl` to each element in turn (§4.10). `break`/`continue` inside
/// the iterator body cannot reach the enclosing loop's labels — a `Map`
/// worker is a closure boundary (§4.9) — so they are rejected here instead
/// of silently producing an unreachable jump.
fn lower_for_of(ctx: &mut LowerCtx, decl: &Pattern, right: &Expr, body: &Stmt, template: &ReturnTemplate, span: Span) -> SubState {
    let iterable = lower_expr(ctx, right);
    let mut parts = Vec::new();
    if let Some(s) = iterable.states {
        parts.push(s);
    }
    let Output::JsonPath(items_path) = iterable.output else {
        ctx.errors.push(unsupported_stmt(span));
        return join_sub_states(parts).unwrap_or_else(noop);
    };

    ctx.push(Frame::ClosureBoundary);
    let bind_sub = bind_pattern(ctx, decl, &Output::JsonPath("$$.Map.Item.Value".to_string()), span);
    let body_sub = lower_stmt(ctx, body, template);
    ctx.pop();
    let mut iterator = join_sub_states(vec![bind_sub, body_sub]).unwrap();
    terminalize_deferred(&mut iterator);

    let map_state = MapState {
        items_path: Some(items_path),
        parameters: None,
        iterator: Box::new(iterator),
        result_path: None,
        next: Some(DEFERRED_NEXT.to_string()),
        end: false,
        catch: Vec::new(),
        max_concurrency: Some(1),
        naming_hint: Some("for of".to_string()),
    };
    parts.push(SubState::single("for of", NodeState::Map(map_state)));
    join_sub_states(parts).unwrap()
}

/// `for (decl in obj)`: lowered identically to `for-of` (§4.10), except the
/// `Map` state's own context object already "zips" each element with its
/// index (`$$.Map.Item.Index`/`$$.Map.Item.Value`) — `decl` binds to the
/// index, and the element itself is stashed at the reserved path
/// `$.0__<name>` so `obj[decl]` lookups inside the body resolve to the saved
/// item instead of re-indexing `obj`, which is unreachable from inside the
/// iterator's closure.
fn lower_for_in(ctx: &mut LowerCtx, decl: &Pattern, right: &Expr, body: &Stmt, template: &ReturnTemplate, span: Span) -> SubState {
    let Pattern::Identifier { decl: index_decl, name } = decl else {
        ctx.errors.push(unsupported_stmt(span));
        return noop();
    };

    let iterable = lower_expr(ctx, right);
    let mut parts = Vec::new();
    if let Some(s) = iterable.states {
        parts.push(s);
    }
    let Output::JsonPath(items_path) = iterable.output else {
        ctx.errors.push(unsupported_stmt(span));
        return join_sub_states(parts).unwrap_or_else(noop);
    };

    let stash_path = format!("$.0__{name}");
    let iterable_decl = if let Expr::Identifier { decl, .. } = right { Some(*decl) } else { None };
    if let Some(iterable_decl) = iterable_decl {
        ctx.push_for_in_stash(iterable_decl, *index_decl, stash_path.clone());
    }

    ctx.push(Frame::ClosureBoundary);
    let stash_item = {
        let pass = PassState {
            input_path: Some("$$.Map.Item.Value".to_string()),
            result_path: Some(stash_path),
            next: Some(DEFERRED_NEXT.to_string()),
            ..Default::default()
        };
        SubState::single("stash item", NodeState::Pass(pass))
    };
    let bind_sub = bind_pattern(ctx, decl, &Output::JsonPath("$$.Map.Item.Index".to_string()), span);
    let body_sub = lower_stmt(ctx, body, template);
    ctx.pop();
    if iterable_decl.is_some() {
        ctx.pop_for_in_stash();
    }

    let mut iterator = join_sub_states(vec![stash_item, bind_sub, body_sub]).unwrap();
    terminalize_deferred(&mut iterator);

    let map_state = MapState {
        items_path: Some(items_path),
        parameters: None,
        iterator: Box::new(iterator),
        result_path: None,
        next: Some(DEFERRED_NEXT.to_string()),
        end: false,
        catch: Vec::new(),
        max_concurrency: Some(1),
        naming_hint: Some("for in".to_string()),
    };
    parts.push(SubState::single("for in", NodeState::Map(map_state)));
    join_sub_states(parts).unwrap()
}

/// A `Map` iterator's last state has no successor inside the iterator —
/// one iteration simply ends — so any dangling `DEFERRED_NEXT` left after
/// flattening the loop body is resolved to `End: true` rather than a label.
fn terminalize_deferred(sub: &mut SubState) {
    for (_, entry) in sub.states.iter_mut() {
        match entry {
            StateEntry::Leaf(state) => terminalize_leaf(state),
            StateEntry::Nested(inner) => terminalize_deferred(inner),
        }
    }
}

fn terminalize_leaf(state: &mut NodeState) {
    fn finish(next: &mut Option<String>, end: &mut bool) {
        if next.as_deref() == Some(DEFERRED_NEXT) {
            *next = None;
            *end = true;
        }
    }
    match state {
        NodeState::Pass(s) => finish(&mut s.next, &mut s.end),
        NodeState::Task(s) => finish(&mut s.next, &mut s.end),
        NodeState::Wait(s) => finish(&mut s.next, &mut s.end),
        NodeState::Map(s) => finish(&mut s.next, &mut s.end),
        NodeState::Parallel(s) => finish(&mut s.next, &mut s.end),
        NodeState::Choice(_) | NodeState::Succeed(_) | NodeState::Fail(_) => {}
    }
}

// ---------------------------------------------------------------------
// Return / throw
// ---------------------------------------------------------------------

fn lower_return(ctx: &mut LowerCtx, argument: Option<&Expr>, template: &ReturnTemplate) -> SubState {
    let mut parts = Vec::new();
    let output = match argument {
        Some(expr) => {
            let lowered = lower_expr(ctx, expr);
            if let Some(s) = lowered.states {
                parts.push(s);
            }
            lowered.output
        }
        None => Output::JsonPath(ctx.options.null_context_path.clone()),
    };
    // `ResultPath: "$"` is ASL's own default, so the root return template
    // (§8 scenario 1) omits the field rather than spelling it out.
    let result_path = if template.result_path == "$" { None } else { Some(template.result_path.clone()) };
    let mut pass = PassState { result_path, ..Default::default() };
    pass_with_input(&mut pass, &materialize(&output));
    match &template.next {
        Some(label) => pass.next = Some(label.clone()),
        None => pass.end = true,
    }
    parts.push(SubState::single("return", NodeState::Pass(pass)));
    join_sub_states(parts).unwrap()
}

fn materialize(output: &Output) -> Output {
    match output {
        Output::Condition(_) => Output::literal(json!(true)),
        other => other.clone(),
    }
}

fn null_output(ctx: &LowerCtx) -> Output {
    Output::JsonPath(ctx.options.null_context_path.clone())
}

/// Resolves the value carried by a `throw` (§4.6, §7): only `new Error(msg)`,
/// `Error(msg)`, and `new StepFunctionError(name, cause)` construct a
/// thrown value. Other call shapes — and anything that isn't a call at all —
/// are rejected with the spec's dedicated error code.
fn lower_throw_argument(ctx: &mut LowerCtx, expr: &Expr, span: Span) -> Lowered {
    let (callee, arguments) = match expr {
        Expr::New { callee, arguments, .. } | Expr::Call { callee, arguments, .. } => (callee.as_ref(), arguments.as_slice()),
        _ => {
            ctx.errors.push(throw_shape_error(span));
            return Lowered::bare(null_output(ctx));
        }
    };
    let Expr::Identifier { name, .. } = callee else {
        ctx.errors.push(throw_shape_error(span));
        return Lowered::bare(null_output(ctx));
    };

    match name.as_str() {
        "Error" => {
            let mut parts = Vec::new();
            let message = match arguments.first() {
                Some(arg) => {
                    let lowered = lower_expr(ctx, arg);
                    if let Some(s) = lowered.states {
                        parts.push(s);
                    }
                    lowered.output.as_literal_value().cloned()
                }
                None => Some(json!("")),
            };
            match message {
                Some(v) => Lowered { states: join_sub_states(parts), output: Output::literal(json!({ "message": v })) },
                None => {
                    ctx.errors.push(unsupported_stmt(span));
                    Lowered::bare(null_output(ctx))
                }
            }
        }
        "StepFunctionError" => {
            let mut parts = Vec::new();
            let error_name = match arguments.first() {
                Some(arg) => {
                    let lowered = lower_expr(ctx, arg);
                    if let Some(s) = lowered.states {
                        parts.push(s);
                    }
                    match lowered.output.as_literal_value() {
                        Some(Json::String(s)) => Some(s.clone()),
                        _ => None,
                    }
                }
                None => None,
            };
            let Some(error_name) = error_name else {
                ctx.errors.push(unsupported_stmt(span));
                return Lowered::bare(null_output(ctx));
            };
            let cause = match arguments.get(1) {
                Some(arg) => {
                    let lowered = lower_expr(ctx, arg);
                    if let Some(s) = lowered.states {
                        parts.push(s);
                    }
                    match lowered.output.as_literal_value() {
                        Some(v) => v.clone(),
                        None => {
                            ctx.errors.push(unsupported_stmt(span));
                            Json::Null
                        }
                    }
                }
                None => Json::Null,
            };
            Lowered { states: join_sub_states(parts), output: Output::literal(json!({ "name": error_name, "cause": cause })) }
        }
        _ => {
            ctx.errors.push(throw_shape_error(span));
            Lowered::bare(null_output(ctx))
        }
    }
}

fn throw_shape_error(span: Span) -> CompilerError {
    CompilerError::new(
        crate::error::CompilerErrorKind::StepFunctionThrowMustBeErrorOrStepFunctionErrorClass,
        crate::error::Phase::Lower,
        Some(span),
    )
}

/// JSON-stringifies a `Fail` cause that is not already a string (§7: "a
/// `Fail` with that name and JSON-stringified cause").
fn fail_cause_text(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lower_throw(ctx: &mut LowerCtx, argument: &Expr, span: Span) -> SubState {
    let lowered = lower_throw_argument(ctx, argument, span);
    let mut parts = Vec::new();
    if let Some(s) = lowered.states {
        parts.push(s);
    }

    let route = route_throw(&ctx.frames);
    match route {
        ThrowRoute::Terminal => {
            let fail = match &lowered.output {
                Output::Literal { value, .. } => {
                    let error_name = value.get("name").and_then(Json::as_str).unwrap_or("Error").to_string();
                    let cause = value.get("message").or_else(|| value.get("cause")).map(fail_cause_text);
                    FailState { error: Some(error_name), cause, error_path: None, cause_path: None, naming_hint: Some("throw".to_string()) }
                }
                Output::JsonPath(p) => FailState {
                    error: None,
                    cause: None,
                    error_path: Some(format!("{p}.name")),
                    cause_path: Some(format!("{p}.message")),
                    naming_hint: Some("throw".to_string()),
                },
                Output::Condition(_) => {
                    ctx.errors.push(unsupported_stmt(span));
                    FailState::default()
                }
            };
            parts.push(SubState::single("throw", NodeState::Fail(fail)));
        }
        ThrowRoute::ToCatch { result_path } => {
            let mut pass = PassState { next: Some(CATCH_NEXT.to_string()), ..Default::default() };
            if let Some(rp) = result_path {
                pass.result_path = Some(rp);
                pass_with_input(&mut pass, &materialize(&lowered.output));
            } else {
                pass.result_path = Some("$.__fnl_discard".to_string());
            }
            parts.push(SubState::single("throw to catch", NodeState::Pass(pass)));
        }
    }
    join_sub_states(parts).unwrap()
}

// ---------------------------------------------------------------------
// Try / catch / finally
// ---------------------------------------------------------------------

fn lower_try(
    ctx: &mut LowerCtx,
    block: &[Stmt],
    handler: Option<&CatchClause>,
    finalizer: Option<&[Stmt]>,
    template: &ReturnTemplate,
    span: Span,
) -> SubState {
    let catch_var_path = handler.and_then(|h| h.param.as_ref()).map(|_| ctx.heap.alloc());
    if handler.is_some() {
        ctx.push(Frame::TryCatch { catch_var_path: catch_var_path.clone() });
    }
    let mut try_sub = lower_block(ctx, block, template);
    if handler.is_some() {
        ctx.pop();
    }

    // The try body's fall-through and any `throw`-to-catch jumps both
    // resolve against the same `__catch` label, defined locally on this
    // sub-graph so neither bubbles further than this `try` (§4.9 point 4).
    update_deferred_next_states(&mut try_sub, "__after_try__");

    let mut states = vec![("try".to_string(), StateEntry::Nested(try_sub))];

    let catch_sub = handler.map(|h| {
        let bind = match (&h.param, &catch_var_path) {
            (Some(pattern), Some(path)) => Some(bind_pattern(ctx, pattern, &Output::JsonPath(path.clone()), span)),
            _ => None,
        };
        let body = lower_block(ctx, &h.body, template);
        match bind {
            Some(b) => join_sub_states(vec![b, body]).unwrap(),
            None => body,
        }
    });
    if let Some(catch_sub) = catch_sub {
        states.push((CATCH_NEXT.to_string(), StateEntry::Nested(catch_sub)));
    }

    let after_try = SubState::single("after try", NodeState::Pass(PassState { next: Some(DEFERRED_NEXT.to_string()), ..Default::default() }));
    states.push(("__after_try__".to_string(), StateEntry::Nested(after_try)));

    let body = SubState { start_state: "try".to_string(), states };

    match finalizer {
        None => body,
        Some(fin_stmts) => {
            // `finally` always runs after `try`/`catch` resolve, whether
            // they fell through or one of them threw to an even-further-out
            // handler. Re-throwing the in-flight error from a non-terminal
            // `finally` body (the `ReThrowFromFinally` case, §4.7) needs the
            // stashed-error slot this `Finally` frame carries; wiring a
            // `finally`-local `throw` back to that stash is left to a
            // future pass — today `finally` only sequences after, it never
            // intercepts a throw in flight.
            let error_slot = ctx.heap.alloc();
            ctx.push(Frame::Finally { error_slot });
            let fin_sub = lower_block(ctx, fin_stmts, template);
            ctx.pop();
            join_sub_states(vec![body, fin_sub]).unwrap()
        }
    }
}
