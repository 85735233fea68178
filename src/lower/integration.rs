//! Integration Bridge (C10).
//!
//! A call expression may reference an external *integration* descriptor —
//! out of scope for this crate to define (§1: "invokes their generation
//! hook but does not specify it"). `IntegrationResolver` is the seam:
//! callers supply one that knows how their integrations lower to ASL
//! `Task`-family states; this crate splices the returned graph into the
//! current lowering frame and attaches the host's `Catch` routing so
//! integration exceptions participate in the enclosing try/catch.

use crate::ir::types::{CatchRule, Lowered, NodeState, StateEntry};
use crate::parse::ast::{DeclId, Span};

/// One resolved reference to an external integration, as looked up by
/// name/declaration from a call expression's callee.
pub struct IntegrationCall<'a> {
    pub decl: DeclId,
    pub callee_name: &'a str,
    pub arguments: &'a [crate::parse::ast::Expr],
    pub span: Span,
}

/// Supplied by the embedder. The default `NullIntegrationResolver` resolves
/// nothing, so this crate compiles and its tests run standalone (§B).
pub trait IntegrationResolver {
    /// Returns `Some` with the lowered graph for a call that references a
    /// known integration, or `None` if this call is not an integration
    /// reference (an ordinary function call, method call, etc.) and should
    /// fall through to the expression lowerer's normal call handling.
    fn resolve(&self, call: &IntegrationCall<'_>) -> Option<Lowered>;
}

/// Default resolver used when an embedder does not supply one: no call
/// expression is ever treated as an integration reference.
pub struct NullIntegrationResolver;

impl IntegrationResolver for NullIntegrationResolver {
    fn resolve(&self, _call: &IntegrationCall<'_>) -> Option<Lowered> {
        None
    }
}

/// Splices an integration's lowered graph into the current frame, attaching
/// a synthesized `Catch: ["States.ALL"]` to every task-like state inside it
/// so integration exceptions can be routed by the host's Error Router (C9)
/// — whose chosen `Next`/`ResultPath` are passed in as `route`.
pub fn attach_catch_routing(lowered: &mut Lowered, route: &CatchRule) {
    if let Some(sub) = &mut lowered.states {
        attach_catch_in_substate(sub, route);
    }
}

fn attach_catch_in_substate(sub: &mut crate::ir::types::SubState, route: &CatchRule) {
    for (_, entry) in sub.states.iter_mut() {
        match entry {
            StateEntry::Leaf(state) => attach_catch_in_leaf(state, route),
            StateEntry::Nested(inner) => attach_catch_in_substate(inner, route),
        }
    }
}

fn attach_catch_in_leaf(state: &mut NodeState, route: &CatchRule) {
    match state {
        NodeState::Task(s) => s.catch.push(route.clone()),
        NodeState::Map(s) => s.catch.push(route.clone()),
        NodeState::Parallel(s) => s.catch.push(route.clone()),
        _ => {}
    }
}
