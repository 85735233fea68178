//! Snapshot tests over the flattened ASL document's state-type composition:
//! a cheap structural fingerprint that catches an accidental change in
//! which ASL state kinds a given program lowers to (e.g. a fast path
//! silently falling back to the general loop skeleton, or vice versa)
//! without pinning every path/label byte for byte.

mod common;
use common::*;

use asl_lower::ir::validate_asl;
use asl_lower::parse::ast::*;

/// `() => 1 + 2` constant-folds entirely at compile time: the flattened
/// document is just the context-init state plus one `Pass` carrying the
/// folded literal, no `Choice`/`Task`/`Map` of any kind.
#[test]
fn constant_addition_state_type_snapshot() {
    let function = Function {
        params: vec![],
        body: vec![Stmt::Return { argument: Some(binary(BinaryOp::Add, num(1.0), num(2.0))), span: span() }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);
    assert!(validate_asl(&asl).is_empty());

    insta::assert_snapshot!(sorted_state_types(&asl), @"Pass");
}

/// `(xs) => xs.join(",")` lowers through the counted-loop skeleton: every
/// iteration re-derives whether it is the first element via a `Choice`, so
/// the document's state-type composition is `Choice` + `Pass` with no
/// `Map`/`Task` state anywhere (§4.11).
#[test]
fn join_state_type_snapshot() {
    let function = Function {
        params: vec![ident_param("xs")],
        body: vec![Stmt::Return {
            argument: Some(Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(ident(0, "xs")),
                    property: MemberProperty::Identifier("join".to_string()),
                    optional: false,
                    span: span(),
                }),
                arguments: vec![],
                span: span(),
            }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);
    assert!(validate_asl(&asl).is_empty());

    insta::assert_snapshot!(sorted_state_types(&asl), @"Choice, Pass");
}

/// `(xs) => xs.filter(x => x === "a")` is compilable to a JSON Path filter
/// expression, so the whole document is two `Pass` states: context init and
/// the filter itself — no `Choice`, no loop.
#[test]
fn static_filter_state_type_snapshot() {
    let function = Function {
        params: vec![ident_param("xs")],
        body: vec![Stmt::Return {
            argument: Some(Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(ident(0, "xs")),
                    property: MemberProperty::Identifier("filter".to_string()),
                    optional: false,
                    span: span(),
                }),
                arguments: vec![Expr::Arrow {
                    params: vec![Pattern::Identifier { decl: DeclId(1), name: "x".to_string() }],
                    body: ArrowBody::Expression(Box::new(binary(
                        BinaryOp::StrictEq,
                        ident(1, "x"),
                        Expr::Literal { value: Literal::String("a".to_string()), span: span() },
                    ))),
                    span: span(),
                }],
                span: span(),
            }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);
    assert!(validate_asl(&asl).is_empty());

    insta::assert_snapshot!(sorted_state_types(&asl), @"Pass");
}

/// Collects every state's `Type` across the whole document, including
/// `Map`/`Parallel` iterators and branches, deduplicated and sorted — a
/// stable fingerprint regardless of state naming or path details.
fn sorted_state_types(value: &serde_json::Value) -> String {
    let mut types = std::collections::BTreeSet::new();
    collect_types(value, &mut types);
    types.into_iter().collect::<Vec<_>>().join(", ")
}

fn collect_types(value: &serde_json::Value, out: &mut std::collections::BTreeSet<String>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(t)) = map.get("Type") {
                out.insert(t.clone());
            }
            for v in map.values() {
                collect_types(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_types(v, out);
            }
        }
        _ => {}
    }
}
