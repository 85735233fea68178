//! The in-memory graph IR (C3): `Output`, `NodeState`, `SubState`, and the
//! handful of reserved labels that bubble control-flow edges through
//! sub-state walls.
//!
//! Following the design note "graph IR, not direct JSON" (spec §9), none of
//! these types derive `serde::Serialize` for the final ASL shape — JSON is
//! assembled once, explicitly, by `ir::graph::to_asl_json`, the same way the
//! teacher's `codegen::writer::CodeWriter` assembles TypeScript source by
//! explicit emission rather than a derived format. `NodeState`/`SubState`/
//! `Output` are plain values, copied freely, with no cycles (§9 "arena
//! allocation").

use serde_json::Value as Json;

/// Sentinel `Next` value meaning "the successor is to be filled in by the
/// enclosing sub-state" (§3 "deferred next"). Rewritten away by
/// `graph::update_deferred_next_states` before a sub-state is embedded.
pub const DEFERRED_NEXT: &str = "\u{0}__deferred_next__";

/// Reserved label jumped to by `continue`; the nearest loop must define it.
pub const CONTINUE_NEXT: &str = "__ContinueNext";
/// Reserved label jumped to by `break`; the nearest loop must define it.
pub const BREAK_NEXT: &str = "__BreakNext";
/// Reserved label jumped to by throwing operations; the nearest `try`
/// defines it.
pub const CATCH_NEXT: &str = "__catch";

/// The result of lowering any expression (§3). The three forms are
/// disjoint; conversions between them are explicit, never implicit.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A JSON Path into the execution state, e.g. `$.x` or `$$`.
    JsonPath(String),
    /// A JSON value. `contains_json_path` is set when this literal's tree
    /// still has embedded path references that must be resolved via
    /// `Parameters` + `.$`-suffixed keys rather than a plain `Result`.
    Literal { value: Json, contains_json_path: bool },
    /// An ASL `Choice`-rule predicate, not yet materialized into a boolean
    /// value.
    Condition(Condition),
}

impl Output {
    pub fn path(p: impl Into<String>) -> Self {
        Output::JsonPath(p.into())
    }

    pub fn literal(value: Json) -> Self {
        Output::Literal { value, contains_json_path: false }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Output::Literal { .. })
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Output::JsonPath(_))
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, Output::Condition(_))
    }

    /// The underlying literal JSON value, if this output constant-folds.
    pub fn as_literal_value(&self) -> Option<&Json> {
        match self {
            Output::Literal { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// An ASL `Choice`-rule predicate (C1). Pure data; rendered to JSON by
/// `lower::condition::condition_to_json`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare { variable: String, check: ComparisonCheck },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// One ASL comparison atom, keyed by the runtime type of the compared value
/// and whether the right-hand side is itself a path (`*Path` variants).
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonCheck {
    IsPresent(bool),
    IsNull(bool),
    IsBoolean(bool),
    IsString(bool),
    IsNumeric(bool),
    StringEquals(String),
    StringEqualsPath(String),
    StringLessThan(String),
    StringLessThanPath(String),
    StringGreaterThan(String),
    StringGreaterThanPath(String),
    StringLessThanEquals(String),
    StringLessThanEqualsPath(String),
    StringGreaterThanEquals(String),
    StringGreaterThanEqualsPath(String),
    NumericEquals(f64),
    NumericEqualsPath(String),
    NumericLessThan(f64),
    NumericLessThanPath(String),
    NumericGreaterThan(f64),
    NumericGreaterThanPath(String),
    NumericLessThanEquals(f64),
    NumericLessThanEqualsPath(String),
    NumericGreaterThanEquals(f64),
    NumericGreaterThanEqualsPath(String),
    BooleanEquals(bool),
    BooleanEqualsPath(String),
}

/// One ASL state object (§3). Tagged by `kind`; carries the standard ASL
/// fields relevant to that state type plus an optional back-reference to
/// the originating AST node, used only as a naming hint (`lower::names`)
/// and dropped before JSON is emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeState {
    Pass(PassState),
    Task(TaskState),
    Choice(ChoiceState),
    Wait(WaitState),
    Succeed(SucceedState),
    Fail(FailState),
    Map(MapState),
    Parallel(ParallelState),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PassState {
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub result_path: Option<String>,
    pub parameters: Option<Json>,
    pub result: Option<Json>,
    pub next: Option<String>,
    pub end: bool,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub resource: String,
    pub parameters: Option<Json>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub result_path: Option<String>,
    pub next: Option<String>,
    pub end: bool,
    pub catch: Vec<CatchRule>,
    pub retry: Vec<RetryRule>,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceRule {
    pub condition: Condition,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChoiceState {
    pub choices: Vec<ChoiceRule>,
    pub default: Option<String>,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitState {
    pub seconds: Option<u64>,
    pub seconds_path: Option<String>,
    pub next: Option<String>,
    pub end: bool,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SucceedState {
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FailState {
    pub error: Option<String>,
    pub cause: Option<String>,
    pub error_path: Option<String>,
    pub cause_path: Option<String>,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapState {
    pub items_path: Option<String>,
    pub parameters: Option<Json>,
    pub iterator: Box<SubState>,
    pub result_path: Option<String>,
    pub next: Option<String>,
    pub end: bool,
    pub catch: Vec<CatchRule>,
    pub max_concurrency: Option<u32>,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParallelState {
    pub branches: Vec<SubState>,
    pub result_path: Option<String>,
    pub next: Option<String>,
    pub end: bool,
    pub catch: Vec<CatchRule>,
    pub naming_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchRule {
    pub error_equals: Vec<String>,
    pub result_path: Option<String>,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryRule {
    pub error_equals: Vec<String>,
    pub interval_seconds: u32,
    pub max_attempts: u32,
    pub backoff_rate: f64,
}

/// A small named-state graph (§3): a `startState` label plus a map from
/// local label to either a leaf `NodeState` or a nested `SubState`.
/// Sub-states compose recursively; deferred successors are rewritten when a
/// sub-state is embedded into its caller (`graph::update_deferred_next_states`).
#[derive(Debug, Clone, PartialEq)]
pub struct SubState {
    pub start_state: String,
    pub states: Vec<(String, StateEntry)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateEntry {
    Leaf(NodeState),
    Nested(SubState),
}

impl SubState {
    pub fn single(label: impl Into<String>, state: NodeState) -> Self {
        let label = label.into();
        SubState { start_state: label.clone(), states: vec![(label, StateEntry::Leaf(state))] }
    }

    pub fn get(&self, label: &str) -> Option<&StateEntry> {
        self.states.iter().find(|(l, _)| l == label).map(|(_, s)| s)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut StateEntry> {
        self.states.iter_mut().find(|(l, _)| l == label).map(|(_, s)| s)
    }

    pub fn insert(&mut self, label: impl Into<String>, entry: StateEntry) {
        self.states.push((label.into(), entry));
    }
}

/// The result of lowering one expression or statement: any states that must
/// be spliced before the `output`/continuation is used (§9 "expression
/// side-effects are sequential").
#[derive(Debug, Clone, PartialEq)]
pub struct Lowered {
    pub states: Option<SubState>,
    pub output: Output,
}

impl Lowered {
    pub fn bare(output: Output) -> Self {
        Lowered { states: None, output }
    }

    pub fn with_states(states: SubState, output: Output) -> Self {
        Lowered { states: Some(states), output }
    }
}
