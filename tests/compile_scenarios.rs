//! End-to-end scenarios exercising the public `compile`/`compile_standalone`
//! pipeline (parse → lower → flatten → validate) against the concrete
//! examples enumerated in the specification.

mod common;
use common::*;

use asl_lower::config::CompileOptions;
use asl_lower::ir::validate_asl;
use asl_lower::parse::ast::*;
use asl_lower::compile_standalone;

/// Scenario 1: `() => 1 + 2` constant-folds to a single `Pass` carrying the
/// literal result, with no explicit `ResultPath` (ASL's own default is `$`).
#[test]
fn constant_addition_folds_to_a_literal_pass() {
    let function = Function {
        params: vec![],
        body: vec![Stmt::Return { argument: Some(binary(BinaryOp::Add, num(1.0), num(2.0))), span: span() }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty());

    let states = asl["States"].as_object().unwrap();
    assert_eq!(states.len(), 2, "expected the context-init state plus one body state");

    let body_state = states.values().find(|s| s["Type"] == "Pass" && s.get("Result") == Some(&serde_json::json!(3.0))).expect("folded Pass state with Result: 3");
    assert_eq!(body_state["End"], true);
    assert!(body_state.get("ResultPath").is_none(), "root return omits ResultPath since ASL's default is already `$`");
}

/// Scenario 2: `(x) => x + 1` cannot be constant-folded (the left operand is
/// a path), so it dispatches through `States.MathAdd`.
#[test]
fn variable_plus_literal_uses_math_add_intrinsic() {
    let function = Function {
        params: vec![ident_param("x")],
        body: vec![Stmt::Return { argument: Some(binary(BinaryOp::Add, ident(0, "x"), num(1.0))), span: span() }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty());
    assert!(contains_intrinsic(&asl, "States.MathAdd"), "expected a States.MathAdd(...) call somewhere in the document");
}

/// Scenario 6: `(x) => typeof x` dispatches at runtime through a `Choice`
/// state, since the argument's type cannot generally be known at compile
/// time.
#[test]
fn typeof_on_a_variable_dispatches_through_choice() {
    let function = Function {
        params: vec![ident_param("x")],
        body: vec![Stmt::Return {
            argument: Some(Expr::Unary { op: UnaryOp::Typeof, argument: Box::new(ident(0, "x")), span: span() }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty());
    let states = asl["States"].as_object().unwrap();
    let choice = states.values().find(|s| s["Type"] == "Choice").expect("typeof lowers through a Choice state");
    assert_eq!(choice["Default"], "object");
}

/// Scenario 5: `try { throw new Error("boom") } catch (e) { return e.message }`
/// — the try body's throw routes to the catch clause rather than
/// terminating the machine, since the handler is in the same closure.
#[test]
fn throw_inside_try_routes_to_catch_clause() {
    let new_error = Expr::New {
        callee: Box::new(ident(99, "Error")),
        arguments: vec![Expr::Literal { value: Literal::String("boom".to_string()), span: span() }],
        span: span(),
    };
    let catch_body = vec![Stmt::Return {
        argument: Some(Expr::Member {
            object: Box::new(ident(1, "e")),
            property: MemberProperty::Identifier("message".to_string()),
            optional: false,
            span: span(),
        }),
        span: span(),
    }];
    let function = Function {
        params: vec![],
        body: vec![Stmt::Try {
            block: vec![Stmt::Throw { argument: new_error, span: span() }],
            handler: Some(CatchClause {
                param: Some(Pattern::Identifier { decl: DeclId(1), name: "e".to_string() }),
                body: catch_body,
                span: span(),
            }),
            finalizer: None,
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty(), "{:?}", validate_asl(&asl));
    let states = asl["States"].as_object().unwrap();
    assert!(!states.values().any(|s| s["Type"] == "Fail"), "a try with a live handler must not terminate via Fail");
}

/// A `throw` with no enclosing `try` always terminates the machine.
#[test]
fn throw_without_try_produces_a_fail_state() {
    let new_error = Expr::New {
        callee: Box::new(ident(99, "Error")),
        arguments: vec![Expr::Literal { value: Literal::String("boom".to_string()), span: span() }],
        span: span(),
    };
    let function = Function { params: vec![], body: vec![Stmt::Throw { argument: new_error, span: span() }], span: span() };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty());
    let states = asl["States"].as_object().unwrap();
    let fail = states.values().find(|s| s["Type"] == "Fail").expect("uncaught throw produces a Fail state");
    assert_eq!(fail["Error"], "Error");
    assert_eq!(fail["Cause"], "boom");
}

/// Exercises the JSON entry point end to end (§6 input contract): the same
/// `(x) => x + 1` program, this time serialized exactly as an embedder
/// would hand it to `compile_standalone`.
#[test]
fn compiles_from_json_text() {
    let json = serde_json::json!({
        "params": [
            { "pattern": { "kind": "Identifier", "value": { "decl": 0, "name": "x" } }, "is_context_param": false, "span": { "line": 1, "column": 1 } }
        ],
        "body": [
            {
                "kind": "Return",
                "value": {
                    "argument": {
                        "kind": "Binary",
                        "value": {
                            "op": "Add",
                            "left": { "kind": "Identifier", "value": { "decl": 0, "name": "x", "span": { "line": 1, "column": 1 } } },
                            "right": { "kind": "Literal", "value": { "value": { "kind": "Number", "value": 1.0 }, "span": { "line": 1, "column": 1 } } },
                            "span": { "line": 1, "column": 1 }
                        }
                    },
                    "span": { "line": 1, "column": 1 }
                }
            }
        ],
        "span": { "line": 1, "column": 1 }
    })
    .to_string();

    let asl = compile_standalone(&json, CompileOptions::default()).expect("compiles cleanly");
    assert!(validate_asl(&asl).is_empty());
    assert!(contains_intrinsic(&asl, "States.MathAdd"));
}

/// Scenario 3: `(xs) => xs.filter(x => x === "a")` with the predicate
/// compilable to JSON Path bypasses the loop skeleton entirely and emits a
/// single `Pass` with an `InputPath` filter expression.
#[test]
fn filter_with_static_predicate_uses_json_path_fast_path() {
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
                    body: ArrowBody::Expression(Box::new(binary(BinaryOp::StrictEq, ident(1, "x"), Expr::Literal { value: Literal::String("a".to_string()), span: span() }))),
                    span: span(),
                }],
                span: span(),
            }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty(), "{:?}", validate_asl(&asl));
    let states = asl["States"].as_object().unwrap();
    assert!(!states.values().any(|s| s["Type"] == "Map"), "a statically-compilable predicate must not fall back to the loop skeleton");
    let filter_state = states.values().find(|s| s["Type"] == "Pass" && s.get("InputPath").map(|p| p.as_str().unwrap_or("").contains("[?(")).unwrap_or(false)).expect("expected a Pass state with a JSON Path filter InputPath");
    assert_eq!(filter_state["InputPath"], "$.xs[?(@ == 'a')]");
}

/// Scenario 4: `(xs) => xs.map(x => x + 1)` cannot be expressed as a single
/// JSON Path rewrite, so it lowers through the counted-loop skeleton: a
/// `Choice`-guarded loop over the array's indices whose body computes each
/// element via `States.MathAdd` and accumulates the result as a textual
/// JSON array, parsed back once the loop ends.
#[test]
fn map_with_callback_uses_the_loop_skeleton() {
    let function = Function {
        params: vec![ident_param("xs")],
        body: vec![Stmt::Return {
            argument: Some(Expr::Call {
                callee: Box::new(Expr::Member {
                    object: Box::new(ident(0, "xs")),
                    property: MemberProperty::Identifier("map".to_string()),
                    optional: false,
                    span: span(),
                }),
                arguments: vec![Expr::Arrow {
                    params: vec![Pattern::Identifier { decl: DeclId(1), name: "x".to_string() }],
                    body: ArrowBody::Expression(Box::new(binary(BinaryOp::Add, ident(1, "x"), num(1.0)))),
                    span: span(),
                }],
                span: span(),
            }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty(), "{:?}", validate_asl(&asl));
    assert!(contains_intrinsic(&asl, "States.MathAdd"), "the callback's `x + 1` should dispatch through States.MathAdd");
    assert!(contains_intrinsic(&asl, "States.StringToJson"), "the accumulator is parsed back from text once the loop ends");

    let states = asl["States"].as_object().unwrap();
    assert!(states.values().any(|s| s["Type"] == "Choice" && s.get("Default").is_some()), "the counted loop dispatches through a Choice state testing the running index against the array length");
}

/// `.join` with an explicit separator folds each stringified element onto
/// the accumulator using that separator rather than the default comma.
#[test]
fn join_with_explicit_separator_uses_format_intrinsic() {
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
                arguments: vec![Expr::Literal { value: Literal::String(" - ".to_string()), span: span() }],
                span: span(),
            }),
            span: span(),
        }],
        span: span(),
    };
    let asl = lower_and_flatten(&function);

    assert!(validate_asl(&asl).is_empty(), "{:?}", validate_asl(&asl));
    assert!(contains_intrinsic(&asl, "States.Format"));
    assert!(contains_intrinsic(&asl, " - "), "the user-supplied separator must appear verbatim in a Format template");
}

/// `.join` called with no arguments defaults to a comma, matching the
/// native `Array.prototype.join` signature.
#[test]
fn join_without_arguments_defaults_to_comma_separator() {
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

    assert!(validate_asl(&asl).is_empty(), "{:?}", validate_asl(&asl));
    let states = asl["States"].as_object().unwrap();
    assert!(!states.values().any(|s| s["Type"] == "Map"), ".join never needs the callback-driven Map skeleton");
    assert!(contains_intrinsic(&asl, "{}{}{}"), "the default-separator fold still uses the three-arg Format template once past the first element");
}

fn contains_intrinsic(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains(needle),
        serde_json::Value::Array(items) => items.iter().any(|v| contains_intrinsic(v, needle)),
        serde_json::Value::Object(map) => map.values().any(|v| contains_intrinsic(v, needle)),
        _ => false,
    }
}
