//! Condition Builder (C1): pure, stateless constructors for ASL
//! `Choice`-rule predicates plus their `and`/`or`/`not` combinators.

use serde_json::{json, Value as Json};

use crate::ir::types::{ComparisonCheck, Condition};

/// `and()` of zero conditions is trivially true, of one is the inner
/// condition, of many wraps with `And` (§4.1).
pub fn and(mut conditions: Vec<Condition>) -> Condition {
    match conditions.len() {
        0 => trivially_true(),
        1 => conditions.remove(0),
        _ => Condition::And(conditions),
    }
}

/// `or()` is symmetric with a trivially-false predicate (§4.1).
pub fn or(mut conditions: Vec<Condition>) -> Condition {
    match conditions.len() {
        0 => trivially_false(),
        1 => conditions.remove(0),
        _ => Condition::Or(conditions),
    }
}

pub fn not(condition: Condition) -> Condition {
    Condition::Not(Box::new(condition))
}

/// A predicate that always holds, used as the identity element of `and`.
pub fn trivially_true() -> Condition {
    Condition::Compare {
        variable: "$$.Execution.Id".to_string(),
        check: ComparisonCheck::IsNull(false),
    }
}

/// A predicate that never holds, used as the identity element of `or`.
pub fn trivially_false() -> Condition {
    Condition::Compare {
        variable: "$$.Execution.Id".to_string(),
        check: ComparisonCheck::IsNull(true),
    }
}

pub fn is_present(path: impl Into<String>, present: bool) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::IsPresent(present) }
}

pub fn is_null(path: impl Into<String>, null: bool) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::IsNull(null) }
}

pub fn is_string(path: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::IsString(true) }
}

pub fn is_boolean(path: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::IsBoolean(true) }
}

pub fn is_numeric(path: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::IsNumeric(true) }
}

pub fn string_equals(path: impl Into<String>, value: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::StringEquals(value.into()) }
}

pub fn string_equals_path(path: impl Into<String>, other: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::StringEqualsPath(other.into()) }
}

pub fn numeric_equals(path: impl Into<String>, value: f64) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::NumericEquals(value) }
}

pub fn numeric_equals_path(path: impl Into<String>, other: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::NumericEqualsPath(other.into()) }
}

pub fn numeric_less_than(path: impl Into<String>, value: f64) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::NumericLessThan(value) }
}

pub fn numeric_less_than_path(path: impl Into<String>, other: impl Into<String>) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::NumericLessThanPath(other.into()) }
}

pub fn boolean_equals(path: impl Into<String>, value: bool) -> Condition {
    Condition::Compare { variable: path.into(), check: ComparisonCheck::BooleanEquals(value) }
}

/// Runtime type/operator spanning one of `==`/`===`/`<`/`<=`/`>`/`>=`. Maps
/// an operator plus the runtime type of a literal comparand to an ASL atom.
/// `!=`/`!==` have no entry here — they are expressed via `not` over the
/// `==`/`===` mapping (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Builds the atom for `left <op> literal`, where `left` is a path and
/// `literal` is a constant JSON value of string/number/boolean type. Returns
/// `None` for a comparand type ASL cannot compare directly (object/array/
/// null), which the caller must handle via `isTruthy`-style expansion or an
/// error.
pub fn compare_literal(path: impl Into<String>, op: CompareOp, literal: &Json) -> Option<Condition> {
    let path = path.into();
    let check = match (op, literal) {
        (CompareOp::Eq, Json::String(s)) => ComparisonCheck::StringEquals(s.clone()),
        (CompareOp::Eq, Json::Number(n)) => ComparisonCheck::NumericEquals(n.as_f64()?),
        (CompareOp::Eq, Json::Bool(b)) => ComparisonCheck::BooleanEquals(*b),
        (CompareOp::Lt, Json::String(s)) => ComparisonCheck::StringLessThan(s.clone()),
        (CompareOp::Lt, Json::Number(n)) => ComparisonCheck::NumericLessThan(n.as_f64()?),
        (CompareOp::LtEq, Json::String(s)) => ComparisonCheck::StringLessThanEquals(s.clone()),
        (CompareOp::LtEq, Json::Number(n)) => ComparisonCheck::NumericLessThanEquals(n.as_f64()?),
        (CompareOp::Gt, Json::String(s)) => ComparisonCheck::StringGreaterThan(s.clone()),
        (CompareOp::Gt, Json::Number(n)) => ComparisonCheck::NumericGreaterThan(n.as_f64()?),
        (CompareOp::GtEq, Json::String(s)) => ComparisonCheck::StringGreaterThanEquals(s.clone()),
        (CompareOp::GtEq, Json::Number(n)) => ComparisonCheck::NumericGreaterThanEquals(n.as_f64()?),
        _ => return None,
    };
    Some(Condition::Compare { variable: path, check })
}

/// `isTruthy(v)`: present ∧ not-null ∧ ((string ∧ ≠"") ∨ (number ∧ ≠0) ∨
/// (boolean ∧ true) ∨ compound) (§4.1).
pub fn is_truthy(path: &str) -> Condition {
    let string_truthy = and(vec![is_string(path), not(string_equals(path, ""))]);
    let number_truthy = and(vec![is_numeric(path), not(numeric_equals(path, 0.0))]);
    let boolean_truthy = and(vec![is_boolean(path), boolean_equals(path, true)]);
    let compound_truthy = and(vec![not(is_string(path)), not(is_numeric(path)), not(is_boolean(path))]);

    and(vec![
        is_present(path, true),
        not(is_null(path, true)),
        or(vec![string_truthy, number_truthy, boolean_truthy, compound_truthy]),
    ])
}

/// Renders a `Condition` to the ASL JSON shape used inside a `Choice`
/// rule's predicate (everything except the rule's own `Next`).
pub fn condition_to_json(cond: &Condition) -> Json {
    match cond {
        Condition::Compare { variable, check } => {
            let (key, value) = check_to_field(check);
            json!({ "Variable": variable, key: value })
        }
        Condition::And(conds) => {
            json!({ "And": conds.iter().map(condition_to_json).collect::<Vec<_>>() })
        }
        Condition::Or(conds) => {
            json!({ "Or": conds.iter().map(condition_to_json).collect::<Vec<_>>() })
        }
        Condition::Not(inner) => {
            json!({ "Not": condition_to_json(inner) })
        }
    }
}

fn check_to_field(check: &ComparisonCheck) -> (&'static str, Json) {
    use ComparisonCheck::*;
    match check {
        IsPresent(b) => ("IsPresent", json!(b)),
        IsNull(b) => ("IsNull", json!(b)),
        IsBoolean(b) => ("IsBoolean", json!(b)),
        IsString(b) => ("IsString", json!(b)),
        IsNumeric(b) => ("IsNumeric", json!(b)),
        StringEquals(s) => ("StringEquals", json!(s)),
        StringEqualsPath(p) => ("StringEqualsPath", json!(p)),
        StringLessThan(s) => ("StringLessThan", json!(s)),
        StringLessThanPath(p) => ("StringLessThanPath", json!(p)),
        StringGreaterThan(s) => ("StringGreaterThan", json!(s)),
        StringGreaterThanPath(p) => ("StringGreaterThanPath", json!(p)),
        StringLessThanEquals(s) => ("StringLessThanEquals", json!(s)),
        StringLessThanEqualsPath(p) => ("StringLessThanEqualsPath", json!(p)),
        StringGreaterThanEquals(s) => ("StringGreaterThanEquals", json!(s)),
        StringGreaterThanEqualsPath(p) => ("StringGreaterThanEqualsPath", json!(p)),
        NumericEquals(n) => ("NumericEquals", json!(n)),
        NumericEqualsPath(p) => ("NumericEqualsPath", json!(p)),
        NumericLessThan(n) => ("NumericLessThan", json!(n)),
        NumericLessThanPath(p) => ("NumericLessThanPath", json!(p)),
        NumericGreaterThan(n) => ("NumericGreaterThan", json!(n)),
        NumericGreaterThanPath(p) => ("NumericGreaterThanPath", json!(p)),
        NumericLessThanEquals(n) => ("NumericLessThanEquals", json!(n)),
        NumericLessThanEqualsPath(p) => ("NumericLessThanEqualsPath", json!(p)),
        NumericGreaterThanEquals(n) => ("NumericGreaterThanEquals", json!(n)),
        NumericGreaterThanEqualsPath(p) => ("NumericGreaterThanEqualsPath", json!(p)),
        BooleanEquals(b) => ("BooleanEquals", json!(b)),
        BooleanEqualsPath(p) => ("BooleanEqualsPath", json!(p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_of_zero_is_trivially_true() {
        assert_eq!(and(vec![]), trivially_true());
    }

    #[test]
    fn and_of_one_is_inner() {
        let c = is_string("$.x");
        assert_eq!(and(vec![c.clone()]), c);
    }

    #[test]
    fn or_of_zero_is_trivially_false() {
        assert_eq!(or(vec![]), trivially_false());
    }

    #[test]
    fn and_of_many_wraps() {
        let a = is_string("$.x");
        let b = is_numeric("$.y");
        assert_eq!(and(vec![a.clone(), b.clone()]), Condition::And(vec![a, b]));
    }

    #[test]
    fn compare_literal_picks_type() {
        let c = compare_literal("$.x", CompareOp::Eq, &json!("a")).unwrap();
        assert_eq!(c, string_equals("$.x", "a"));
        let c = compare_literal("$.x", CompareOp::Lt, &json!(3.0)).unwrap();
        assert_eq!(c, Condition::Compare { variable: "$.x".into(), check: ComparisonCheck::NumericLessThan(3.0) });
    }

    #[test]
    fn compare_literal_rejects_null() {
        assert!(compare_literal("$.x", CompareOp::Eq, &Json::Null).is_none());
    }

    #[test]
    fn condition_to_json_renders_atom() {
        let v = condition_to_json(&string_equals("$.x", "a"));
        assert_eq!(v, json!({ "Variable": "$.x", "StringEquals": "a" }));
    }

    #[test]
    fn condition_to_json_renders_not() {
        let v = condition_to_json(&not(is_string("$.x")));
        assert_eq!(v, json!({ "Not": { "Variable": "$.x", "IsString": true } }));
    }
}
