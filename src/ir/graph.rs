//! Graph Model operations (C3): joining, deferred-next rewriting, and
//! flattening a `SubState` tree into the final `{StartAt, States}` JSON map.

use std::collections::HashMap;

use serde_json::{json, Map as JsonMap, Value as Json};

use super::types::*;
use crate::lower::condition::condition_to_json;
use crate::lower::names::StateNameAllocator;

/// Concatenates ordered sub-states into one (§4.3). Each sub-state's
/// deferred-next is rewired to the next one's `startState`; the last one's
/// deferred-next is left deferred for the caller to fill in.
///
/// Sequencing is represented by wrapping each input under a synthetic label
/// so that internal labels of each statement's sub-graph never have to be
/// globally unique at this stage — only `flatten` assigns global names.
pub fn join_sub_states(mut subs: Vec<SubState>) -> Option<SubState> {
    if subs.is_empty() {
        return None;
    }
    if subs.len() == 1 {
        return subs.pop();
    }

    let labels: Vec<String> = (0..subs.len()).map(|i| format!("__seq{i}")).collect();
    for i in 0..subs.len() - 1 {
        let target_label = labels[i + 1].clone();
        update_deferred_next_states(&mut subs[i], &target_label);
    }

    let start_state = labels[0].clone();
    let mut states = Vec::with_capacity(subs.len());
    for (label, sub) in labels.into_iter().zip(subs.into_iter()) {
        states.push((label, StateEntry::Nested(sub)));
    }
    Some(SubState { start_state, states })
}

/// Replaces every sentinel `Next` in `sub` with `target` (§4.3). Recurses
/// into sequentially-nested sub-states but never into the closure bodies of
/// `Map`/`Parallel` states — those have already been fully resolved when
/// they were constructed and form a separate lexical scope.
pub fn update_deferred_next_states(sub: &mut SubState, target: &str) {
    for (_, entry) in sub.states.iter_mut() {
        update_entry(entry, target);
    }
}

fn update_entry(entry: &mut StateEntry, target: &str) {
    match entry {
        StateEntry::Leaf(state) => update_leaf_next(state, target),
        StateEntry::Nested(inner) => update_deferred_next_states(inner, target),
    }
}

fn replace_if_deferred(next: &mut Option<String>, target: &str) {
    if let Some(n) = next {
        if n == DEFERRED_NEXT {
            *n = target.to_string();
        }
    }
}

fn update_leaf_next(state: &mut NodeState, target: &str) {
    match state {
        NodeState::Pass(s) => replace_if_deferred(&mut s.next, target),
        NodeState::Task(s) => replace_if_deferred(&mut s.next, target),
        NodeState::Wait(s) => replace_if_deferred(&mut s.next, target),
        NodeState::Map(s) => replace_if_deferred(&mut s.next, target),
        NodeState::Parallel(s) => replace_if_deferred(&mut s.next, target),
        NodeState::Choice(s) => {
            for rule in s.choices.iter_mut() {
                if rule.next == DEFERRED_NEXT {
                    rule.next = target.to_string();
                }
            }
            if s.default.as_deref() == Some(DEFERRED_NEXT) {
                s.default = Some(target.to_string());
            }
        }
        NodeState::Succeed(_) | NodeState::Fail(_) => {}
    }
}

/// Extracts the `output` field of a lowered result, when one is recorded on
/// the state's naming hint metadata is not relevant here — this is the thin
/// accessor the statement lowerer uses after calling the expression
/// lowerer, kept as a named operation per §4.3 for symmetry with
/// `passWithInput`.
pub fn get_asl_state_output(lowered: &Lowered) -> &Output {
    &lowered.output
}

/// Fills a `Pass` state's input from an `Output` (§4.3): a path becomes
/// `InputPath`; a literal becomes `Result`, unless it still contains
/// embedded JSON Path references, in which case it must be expressed as
/// `Parameters` with `.$`-suffixed keys instead.
pub fn pass_with_input(state: &mut PassState, output: &Output) {
    match output {
        Output::JsonPath(p) => {
            state.input_path = Some(p.clone());
        }
        Output::Literal { value, contains_json_path: false } => {
            state.result = Some(value.clone());
        }
        Output::Literal { value, contains_json_path: true } => {
            state.parameters = Some(literal_to_parameters(value));
        }
        Output::Condition(_) => {
            unreachable!("a Condition output must be materialized to a value before passWithInput")
        }
    }
}

/// Rewrites a literal JSON tree that has embedded path placeholders
/// (strings of the form `"$path:<jsonpath>"`, produced by the expression
/// lowerer when it must mix literal structure with dynamic values) into an
/// ASL `Parameters` object using `.$`-suffixed keys.
fn literal_to_parameters(value: &Json) -> Json {
    const PATH_MARKER: &str = "$path:";
    match value {
        Json::Object(map) => {
            let mut out = JsonMap::new();
            for (k, v) in map {
                if let Json::String(s) = v {
                    if let Some(path) = s.strip_prefix(PATH_MARKER) {
                        out.insert(format!("{k}.$"), Json::String(path.to_string()));
                        continue;
                    }
                }
                out.insert(k.clone(), literal_to_parameters(v));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(literal_to_parameters).collect()),
        other => other.clone(),
    }
}

/// Lexical environment used while flattening: a stack of local-label →
/// global-name maps, innermost last. Reserved labels (`__BreakNext`,
/// `__ContinueNext`, `__catch`) are looked up by walking this stack from
/// innermost to outermost, which is how they bubble through sub-state
/// walls up to the nearest loop/try that defines them. `Map`/`Parallel`
/// bodies flatten with a fresh, empty stack, which is what enforces the
/// closure boundary: a label not locally defined inside the worker simply
/// cannot resolve.
struct Env<'a> {
    frames: Vec<&'a HashMap<String, String>>,
}

impl<'a> Env<'a> {
    fn resolve(&self, label: &str) -> Option<&'a str> {
        for frame in self.frames.iter().rev() {
            if let Some(name) = frame.get(label) {
                return Some(name.as_str());
            }
        }
        None
    }
}

/// Flattens a `SubState` tree into ASL's `{StartAt, States}` shape (§4.3,
/// `toStates`). `names` assigns globally unique state names in traversal
/// order, which is what makes repeated compilations of the same AST
/// byte-identical (§5).
pub fn to_states(root: &SubState, names: &mut StateNameAllocator) -> (String, JsonMap<String, Json>) {
    let mut out = JsonMap::new();
    let env = Env { frames: vec![] };
    let start = flatten_level(root, names, &env, &mut out);
    (start, out)
}

fn flatten_level<'a>(
    sub: &'a SubState,
    names: &mut StateNameAllocator,
    parent_env: &Env<'_>,
    out: &mut JsonMap<String, Json>,
) -> String {
    // First pass: assign a global name to every label at this level. For a
    // nested entry, the label aliases the name chosen for the nested
    // sub-graph's own start state.
    let mut nested_starts: HashMap<String, String> = HashMap::new();
    let mut alias: HashMap<String, String> = HashMap::new();
    for (label, entry) in &sub.states {
        match entry {
            StateEntry::Leaf(_) => {
                let hint = naming_hint(entry).unwrap_or(label);
                let name = names.allocate(hint);
                alias.insert(label.clone(), name);
            }
            StateEntry::Nested(inner) => {
                // Reserve the nested graph's start name first so forward
                // references at this level resolve, then flatten it.
                let placeholder = peek_start_hint(inner);
                let name = names.allocate(&placeholder);
                nested_starts.insert(label.clone(), name.clone());
                alias.insert(label.clone(), name);
            }
        }
    }

    let mut frames: Vec<&HashMap<String, String>> = parent_env.frames.clone();
    frames.push(&alias);
    let env = Env { frames };

    for (label, entry) in &sub.states {
        match entry {
            StateEntry::Leaf(state) => {
                let name = alias.get(label).cloned().unwrap();
                let json = node_state_to_json(state, &env, names, out);
                out.insert(name, json);
            }
            StateEntry::Nested(inner) => {
                // Flatten using the pre-assigned name for its start state.
                let assigned = nested_starts.get(label).cloned().unwrap();
                flatten_nested_with_start(inner, names, &env, out, assigned);
            }
        }
    }

    alias.get(&sub.start_state).cloned().unwrap_or_else(|| sub.start_state.clone())
}

/// Like `flatten_level`, but the caller has already reserved (and consumed)
/// the global name for this sub-graph's start state, so the first entry
/// re-uses it instead of allocating a second name.
fn flatten_nested_with_start<'a>(
    sub: &'a SubState,
    names: &mut StateNameAllocator,
    parent_env: &Env<'_>,
    out: &mut JsonMap<String, Json>,
    reserved_start_name: String,
) {
    let mut alias: HashMap<String, String> = HashMap::new();
    let mut nested_starts: HashMap<String, String> = HashMap::new();
    for (label, entry) in &sub.states {
        if *label == sub.start_state {
            alias.insert(label.clone(), reserved_start_name.clone());
            if matches!(entry, StateEntry::Nested(_)) {
                nested_starts.insert(label.clone(), reserved_start_name.clone());
            }
            continue;
        }
        match entry {
            StateEntry::Leaf(_) => {
                let name = names.allocate(label);
                alias.insert(label.clone(), name);
            }
            StateEntry::Nested(inner) => {
                let hint = peek_start_hint(inner);
                let name = names.allocate(&hint);
                nested_starts.insert(label.clone(), name.clone());
                alias.insert(label.clone(), name);
            }
        }
    }

    let mut frames: Vec<&HashMap<String, String>> = parent_env.frames.clone();
    frames.push(&alias);
    let env = Env { frames };

    for (label, entry) in &sub.states {
        match entry {
            StateEntry::Leaf(state) => {
                let name = alias.get(label).cloned().unwrap();
                let json = node_state_to_json(state, &env, names, out);
                out.insert(name, json);
            }
            StateEntry::Nested(inner) => {
                let assigned = nested_starts.get(label).cloned().unwrap();
                flatten_nested_with_start(inner, names, &env, out, assigned);
            }
        }
    }
}

fn naming_hint(entry: &StateEntry) -> Option<&str> {
    match entry {
        StateEntry::Leaf(state) => match state {
            NodeState::Pass(s) => s.naming_hint.as_deref(),
            NodeState::Task(s) => s.naming_hint.as_deref(),
            NodeState::Choice(s) => s.naming_hint.as_deref(),
            NodeState::Wait(s) => s.naming_hint.as_deref(),
            NodeState::Succeed(s) => s.naming_hint.as_deref(),
            NodeState::Fail(s) => s.naming_hint.as_deref(),
            NodeState::Map(s) => s.naming_hint.as_deref(),
            NodeState::Parallel(s) => s.naming_hint.as_deref(),
        },
        StateEntry::Nested(_) => None,
    }
}

fn peek_start_hint(sub: &SubState) -> String {
    match sub.get(&sub.start_state) {
        Some(entry) => naming_hint(entry).unwrap_or(&sub.start_state).to_string(),
        None => sub.start_state.clone(),
    }
}

fn resolve_next(label: &Option<String>, env: &Env<'_>) -> Option<String> {
    label.as_ref().map(|l| env.resolve(l).unwrap_or(l).to_string())
}

fn catch_to_json(rules: &[CatchRule], env: &Env<'_>) -> Json {
    Json::Array(
        rules
            .iter()
            .map(|r| {
                let mut m = JsonMap::new();
                m.insert("ErrorEquals".into(), json!(r.error_equals));
                if let Some(rp) = &r.result_path {
                    m.insert("ResultPath".into(), json!(rp));
                } else {
                    m.insert("ResultPath".into(), Json::Null);
                }
                m.insert("Next".into(), json!(env.resolve(&r.next).unwrap_or(&r.next)));
                Json::Object(m)
            })
            .collect(),
    )
}

fn retry_to_json(rules: &[RetryRule]) -> Json {
    Json::Array(
        rules
            .iter()
            .map(|r| {
                json!({
                    "ErrorEquals": r.error_equals,
                    "IntervalSeconds": r.interval_seconds,
                    "MaxAttempts": r.max_attempts,
                    "BackoffRate": r.backoff_rate,
                })
            })
            .collect(),
    )
}

fn node_state_to_json(
    state: &NodeState,
    env: &Env<'_>,
    names: &mut StateNameAllocator,
    out: &mut JsonMap<String, Json>,
) -> Json {
    match state {
        NodeState::Pass(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Pass"));
            if let Some(v) = &s.input_path {
                m.insert("InputPath".into(), json!(v));
            }
            if let Some(v) = &s.output_path {
                m.insert("OutputPath".into(), json!(v));
            }
            if let Some(v) = &s.result_path {
                m.insert("ResultPath".into(), json!(v));
            }
            if let Some(v) = &s.parameters {
                m.insert("Parameters".into(), v.clone());
            }
            if let Some(v) = &s.result {
                m.insert("Result".into(), v.clone());
            }
            if s.end {
                m.insert("End".into(), json!(true));
            } else if let Some(next) = resolve_next(&s.next, env) {
                m.insert("Next".into(), json!(next));
            }
            Json::Object(m)
        }
        NodeState::Task(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Task"));
            m.insert("Resource".into(), json!(s.resource));
            if let Some(v) = &s.parameters {
                m.insert("Parameters".into(), v.clone());
            }
            if let Some(v) = &s.input_path {
                m.insert("InputPath".into(), json!(v));
            }
            if let Some(v) = &s.output_path {
                m.insert("OutputPath".into(), json!(v));
            }
            if let Some(v) = &s.result_path {
                m.insert("ResultPath".into(), json!(v));
            }
            if !s.retry.is_empty() {
                m.insert("Retry".into(), retry_to_json(&s.retry));
            }
            if !s.catch.is_empty() {
                m.insert("Catch".into(), catch_to_json(&s.catch, env));
            }
            if s.end {
                m.insert("End".into(), json!(true));
            } else if let Some(next) = resolve_next(&s.next, env) {
                m.insert("Next".into(), json!(next));
            }
            Json::Object(m)
        }
        NodeState::Choice(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Choice"));
            let choices: Vec<Json> = s
                .choices
                .iter()
                .map(|c| {
                    let mut cm = match condition_to_json(&c.condition) {
                        Json::Object(obj) => obj,
                        _ => JsonMap::new(),
                    };
                    cm.insert("Next".into(), json!(env.resolve(&c.next).unwrap_or(&c.next)));
                    Json::Object(cm)
                })
                .collect();
            m.insert("Choices".into(), Json::Array(choices));
            if let Some(default) = &s.default {
                m.insert("Default".into(), json!(env.resolve(default).unwrap_or(default)));
            }
            Json::Object(m)
        }
        NodeState::Wait(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Wait"));
            if let Some(v) = s.seconds {
                m.insert("Seconds".into(), json!(v));
            }
            if let Some(v) = &s.seconds_path {
                m.insert("SecondsPath".into(), json!(v));
            }
            if s.end {
                m.insert("End".into(), json!(true));
            } else if let Some(next) = resolve_next(&s.next, env) {
                m.insert("Next".into(), json!(next));
            }
            Json::Object(m)
        }
        NodeState::Succeed(_) => {
            json!({ "Type": "Succeed" })
        }
        NodeState::Fail(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Fail"));
            if let Some(v) = &s.error {
                m.insert("Error".into(), json!(v));
            }
            if let Some(v) = &s.error_path {
                m.insert("ErrorPath".into(), json!(v));
            }
            if let Some(v) = &s.cause {
                m.insert("Cause".into(), json!(v));
            }
            if let Some(v) = &s.cause_path {
                m.insert("CausePath".into(), json!(v));
            }
            Json::Object(m)
        }
        NodeState::Map(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Map"));
            if let Some(v) = &s.items_path {
                m.insert("ItemsPath".into(), json!(v));
            }
            if let Some(v) = &s.parameters {
                m.insert("Parameters".into(), v.clone());
            }
            let (iter_start, iter_states) = to_states(&s.iterator, names);
            m.insert(
                "Iterator".into(),
                json!({ "StartAt": iter_start, "States": iter_states }),
            );
            if let Some(v) = &s.result_path {
                m.insert("ResultPath".into(), json!(v));
            }
            if let Some(v) = s.max_concurrency {
                m.insert("MaxConcurrency".into(), json!(v));
            }
            if !s.catch.is_empty() {
                m.insert("Catch".into(), catch_to_json(&s.catch, env));
            }
            if s.end {
                m.insert("End".into(), json!(true));
            } else if let Some(next) = resolve_next(&s.next, env) {
                m.insert("Next".into(), json!(next));
            }
            Json::Object(m)
        }
        NodeState::Parallel(s) => {
            let mut m = JsonMap::new();
            m.insert("Type".into(), json!("Parallel"));
            let branches: Vec<Json> = s
                .branches
                .iter()
                .map(|b| {
                    let (start, states) = to_states(b, names);
                    json!({ "StartAt": start, "States": states })
                })
                .collect();
            m.insert("Branches".into(), Json::Array(branches));
            if let Some(v) = &s.result_path {
                m.insert("ResultPath".into(), json!(v));
            }
            if !s.catch.is_empty() {
                m.insert("Catch".into(), catch_to_json(&s.catch, env));
            }
            if s.end {
                m.insert("End".into(), json!(true));
            } else if let Some(next) = resolve_next(&s.next, env) {
                m.insert("Next".into(), json!(next));
            }
            Json::Object(m)
        }
    }
}

/// Assembles the final ASL `{StartAt, States}` document from the fully
/// lowered function body, prefixed with the "Initialize Functionless
/// Context" `Pass` state that seeds `$.fnl_context.null` (§2, §6).
pub fn to_asl_json(body: &SubState, names: &mut StateNameAllocator, null_context_path: &str) -> Json {
    let (body_start, mut states) = to_states(body, names);

    let init_name = names.allocate("Initialize Functionless Context");
    let mut result = JsonMap::new();
    result.insert(
        context_leaf_key(null_context_path).to_string(),
        Json::Null,
    );
    let init_state = json!({
        "Type": "Pass",
        "Result": Json::Object(result),
        "ResultPath": context_result_path(null_context_path),
        "Next": body_start,
    });
    states.insert(init_name.clone(), init_state);

    json!({ "StartAt": init_name, "States": states })
}

fn context_result_path(null_context_path: &str) -> String {
    // "$.fnl_context.null" -> "$.fnl_context"
    match null_context_path.rfind('.') {
        Some(idx) => null_context_path[..idx].to_string(),
        None => null_context_path.to_string(),
    }
}

fn context_leaf_key(null_context_path: &str) -> &str {
    null_context_path.rsplit('.').next().unwrap_or("null")
}
