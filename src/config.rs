//! Ambient compile-time configuration.
//!
//! The lowering engine is otherwise a pure function of its AST input; this
//! struct carries the handful of constants the specification calls
//! load-bearing so they are not scattered as magic numbers through the
//! lowering passes.

/// Tunables for one compilation. `CompileOptions::default()` matches the
/// specification's fixed constants exactly; callers should not normally
/// need to override anything besides `deterministic_names`, and only then
/// for testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Maximum byte length of a generated ASL state name (§3, §4.4).
    pub max_state_name_len: usize,
    /// Prefix used for heap scratch slots: `$.{heap_prefix}{n}`.
    pub heap_prefix: String,
    /// JSON Path to the slot holding the constructed `null` value (§6).
    pub null_context_path: String,
    /// When true (always in production), name allocation is a pure function
    /// of AST traversal order, so repeated compilations are byte-identical
    /// (§5). Exposed so tests can assert the determinism law without
    /// depending on incidental traversal order.
    pub deterministic_names: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_state_name_len: 75,
            heap_prefix: "heap".to_string(),
            null_context_path: "$.fnl_context.null".to_string(),
            deterministic_names: true,
        }
    }
}
