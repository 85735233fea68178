//! IR validation (§8 testable properties): single start, reference
//! resolution, reachability, and per-state termination — checked against
//! the flattened ASL JSON document, the boundary callers actually consume
//! (`ir::graph::to_asl_json`'s output). Uniqueness of `States` keys is
//! guaranteed by construction (a JSON object cannot carry a duplicate key),
//! so it is not re-checked here.

use std::collections::HashSet;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Validates one `{StartAt, States}` document, including the nested
/// documents carried by any `Map`/`Parallel` state's `Iterator`/`Branches`
/// (each is its own self-contained graph with its own `StartAt`).
#[tracing::instrument(level = "debug", skip_all)]
pub fn validate_asl(asl: &Json) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_document(asl, &mut errors);
    errors
}

fn validate_document(doc: &Json, errors: &mut Vec<ValidationError>) {
    let Some(states) = doc.get("States").and_then(Json::as_object) else {
        errors.push(ValidationError { code: "V001", message: "document has no `States` map".into() });
        return;
    };
    let Some(start_at) = doc.get("StartAt").and_then(Json::as_str) else {
        errors.push(ValidationError { code: "V002", message: "document has no `StartAt`".into() });
        return;
    };
    if !states.contains_key(start_at) {
        errors.push(ValidationError {
            code: "V002",
            message: format!("StartAt '{start_at}' does not name a key of States"),
        });
        return;
    }

    let names: HashSet<&str> = states.keys().map(String::as_str).collect();
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in &names {
        graph.add_node(name);
    }

    for (name, state) in states {
        for target in referenced_next(state) {
            if names.contains(target.as_str()) {
                graph.add_edge(name.as_str(), names.get(target.as_str()).unwrap(), ());
            } else {
                errors.push(ValidationError {
                    code: "V003",
                    message: format!("state '{name}' transitions to undefined state '{target}'"),
                });
            }
        }
        if let Err(e) = check_termination(name, state) {
            errors.push(e);
        }
        validate_nested(state, errors);
    }

    let mut dfs = Dfs::new(&graph, start_at);
    let mut reached: HashSet<&str> = HashSet::new();
    while let Some(n) = dfs.next(&graph) {
        reached.insert(n);
    }
    for name in &names {
        if !reached.contains(name) {
            errors.push(ValidationError {
                code: "V004",
                message: format!("state '{name}' is unreachable from StartAt"),
            });
        }
    }
}

/// `Map`/`Parallel` iterator/branch documents are independent graphs (§4.9
/// closure boundary) — each is validated on its own terms.
fn validate_nested(state: &Json, errors: &mut Vec<ValidationError>) {
    if let Some(iterator) = state.get("Iterator") {
        validate_document(iterator, errors);
    }
    if let Some(branches) = state.get("Branches").and_then(Json::as_array) {
        for branch in branches {
            validate_document(branch, errors);
        }
    }
}

fn referenced_next(state: &Json) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(n) = state.get("Next").and_then(Json::as_str) {
        out.push(n.to_string());
    }
    if let Some(n) = state.get("Default").and_then(Json::as_str) {
        out.push(n.to_string());
    }
    if let Some(choices) = state.get("Choices").and_then(Json::as_array) {
        for choice in choices {
            if let Some(n) = choice.get("Next").and_then(Json::as_str) {
                out.push(n.to_string());
            }
        }
    }
    if let Some(catches) = state.get("Catch").and_then(Json::as_array) {
        for catch in catches {
            if let Some(n) = catch.get("Next").and_then(Json::as_str) {
                out.push(n.to_string());
            }
        }
    }
    out
}

/// Exactly one of `End: true`, a `Next`, `Type: Fail|Succeed`, or a `Choice`
/// (whose `Default` already covers its fallthrough) may apply (§8
/// "Termination").
fn check_termination(name: &str, state: &Json) -> Result<(), ValidationError> {
    let ty = state.get("Type").and_then(Json::as_str).unwrap_or("");
    match ty {
        "Succeed" | "Fail" => Ok(()),
        "Choice" => {
            if state.get("Default").and_then(Json::as_str).is_some() {
                Ok(())
            } else {
                Err(ValidationError { code: "V005", message: format!("Choice state '{name}' has no Default") })
            }
        }
        _ => {
            let has_end = state.get("End").and_then(Json::as_bool).unwrap_or(false);
            let has_next = state.get("Next").and_then(Json::as_str).is_some();
            if has_end ^ has_next {
                Ok(())
            } else {
                Err(ValidationError {
                    code: "V005",
                    message: format!("state '{name}' must have exactly one of End:true or a resolvable Next"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_machine_is_valid() {
        let asl = json!({
            "StartAt": "only",
            "States": { "only": { "Type": "Pass", "Result": 3, "End": true } }
        });
        assert!(validate_asl(&asl).is_empty());
    }

    #[test]
    fn dangling_next_is_rejected() {
        let asl = json!({
            "StartAt": "a",
            "States": { "a": { "Type": "Pass", "Next": "missing" } }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V003"));
    }

    #[test]
    fn unreachable_state_is_rejected() {
        let asl = json!({
            "StartAt": "a",
            "States": {
                "a": { "Type": "Pass", "End": true },
                "orphan": { "Type": "Pass", "End": true }
            }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V004"));
    }

    #[test]
    fn missing_start_at_key_is_rejected() {
        let asl = json!({
            "StartAt": "missing",
            "States": { "a": { "Type": "Pass", "End": true } }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V002"));
    }

    #[test]
    fn choice_without_default_is_rejected() {
        let asl = json!({
            "StartAt": "a",
            "States": {
                "a": { "Type": "Choice", "Choices": [{ "Variable": "$.x", "IsPresent": true, "Next": "b" }] },
                "b": { "Type": "Pass", "End": true }
            }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V005"));
    }

    #[test]
    fn end_and_next_both_present_is_rejected() {
        let asl = json!({
            "StartAt": "a",
            "States": { "a": { "Type": "Pass", "End": true, "Next": "a" } }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V005"));
    }

    #[test]
    fn map_iterator_validated_independently() {
        let asl = json!({
            "StartAt": "loop",
            "States": {
                "loop": {
                    "Type": "Map",
                    "ItemsPath": "$.xs",
                    "Iterator": {
                        "StartAt": "body",
                        "States": { "body": { "Type": "Pass", "Next": "nowhere" } }
                    },
                    "End": true
                }
            }
        });
        let errors = validate_asl(&asl);
        assert!(errors.iter().any(|e| e.code == "V003"));
    }
}
