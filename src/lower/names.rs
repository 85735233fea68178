//! Name Allocator (C4): unique ASL state names, unique variable names, and
//! monotonic heap slots. Each allocator's state lives for the duration of a
//! single compilation (§3).

use std::collections::HashMap;

use crate::config::CompileOptions;
use crate::parse::ast::DeclId;

/// Produces globally unique ASL state names. On each request, truncates the
/// input to `max_len` bytes; if unseen, registers it as-is; on collision,
/// appends a space plus the smallest unused suffix number (§4.4). Both the
/// truncated base and every suffixed form are memoized so a later request
/// for the same truncated base continues the same sequence rather than
/// re-colliding.
pub struct StateNameAllocator {
    max_len: usize,
    /// truncated base -> next untried suffix (0 means the bare base has not
    /// been taken yet).
    next_suffix: HashMap<String, u32>,
    taken: std::collections::HashSet<String>,
}

impl StateNameAllocator {
    pub fn new(options: &CompileOptions) -> Self {
        StateNameAllocator {
            max_len: options.max_state_name_len,
            next_suffix: HashMap::new(),
            taken: std::collections::HashSet::new(),
        }
    }

    pub fn allocate(&mut self, hint: &str) -> String {
        let base = truncate_bytes(hint, self.max_len);
        if !self.taken.contains(&base) {
            self.taken.insert(base.clone());
            self.next_suffix.entry(base.clone()).or_insert(1);
            return base;
        }
        loop {
            let n = self.next_suffix.entry(base.clone()).or_insert(1);
            let candidate = format!("{base} {n}");
            *n += 1;
            if !self.taken.contains(&candidate) {
                self.taken.insert(candidate.clone());
                return candidate;
            }
        }
    }
}

fn truncate_bytes(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Produces unique variable names for declared identifiers: the identifier
/// verbatim on first sight, `name__1`, `name__2`, … on collision (§4.4).
/// Memoized by declaration identity (`DeclId`), not by name, so repeated
/// lookups of the same declaration are stable.
pub struct VariableNameAllocator {
    by_decl: HashMap<DeclId, String>,
    taken: std::collections::HashSet<String>,
    next_suffix: HashMap<String, u32>,
    /// Declarations whose storage lives under a batch-bound object (§4.8
    /// "batch Parameters builder") rather than the default top-level
    /// `$.<name>` slot — set once, at the binding site, before any read.
    custom_root: HashMap<DeclId, String>,
}

impl VariableNameAllocator {
    pub fn new() -> Self {
        VariableNameAllocator {
            by_decl: HashMap::new(),
            taken: std::collections::HashSet::new(),
            next_suffix: HashMap::new(),
            custom_root: HashMap::new(),
        }
    }

    /// Returns the allocated name for `decl`, allocating it from `name` on
    /// first sight.
    pub fn name_for(&mut self, decl: DeclId, name: &str) -> String {
        if let Some(existing) = self.by_decl.get(&decl) {
            return existing.clone();
        }
        let allocated = if !self.taken.contains(name) {
            name.to_string()
        } else {
            loop {
                let n = self.next_suffix.entry(name.to_string()).or_insert(1);
                let candidate = format!("{name}__{n}");
                *n += 1;
                if !self.taken.contains(&candidate) {
                    break candidate;
                }
            }
        };
        self.taken.insert(allocated.clone());
        self.by_decl.insert(decl, allocated.clone());
        allocated
    }

    /// JSON Path for a declaration's variable name: `$.<name>`, or
    /// `<root>.<name>` if it was bound into a batch object.
    pub fn path_for(&mut self, decl: DeclId, name: &str) -> String {
        let allocated = self.name_for(decl, name);
        match self.custom_root.get(&decl) {
            Some(root) => format!("{root}.{allocated}"),
            None => format!("$.{allocated}"),
        }
    }

    /// Marks `decl` as living under `root` (e.g. a heap slot holding a
    /// batch-bound object) instead of the default top-level `$.<name>`.
    /// Must be called before the declaration's first read.
    pub fn set_custom_root(&mut self, decl: DeclId, root: String) {
        self.custom_root.insert(decl, root);
    }
}

impl Default for VariableNameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A monotonic counter allocating fresh `$.heap{n}` scratch locations; no
/// reuse (§3, §4.4).
pub struct HeapAllocator {
    next: u32,
    prefix: String,
}

impl HeapAllocator {
    pub fn new(options: &CompileOptions) -> Self {
        HeapAllocator { next: 0, prefix: options.heap_prefix.clone() }
    }

    /// Allocates the next heap slot and returns its JSON Path.
    pub fn alloc(&mut self) -> String {
        let n = self.next;
        self.next += 1;
        format!("$.{}{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names_collide_with_space_suffix() {
        let opts = CompileOptions::default();
        let mut a = StateNameAllocator::new(&opts);
        assert_eq!(a.allocate("body"), "body");
        assert_eq!(a.allocate("body"), "body 1");
        assert_eq!(a.allocate("body"), "body 2");
    }

    #[test]
    fn state_names_truncate_long_hints() {
        let mut opts = CompileOptions::default();
        opts.max_state_name_len = 5;
        let mut a = StateNameAllocator::new(&opts);
        assert_eq!(a.allocate("abcdefgh"), "abcde");
        assert_eq!(a.allocate("abcdeXYZ"), "abcde 1");
    }

    #[test]
    fn variable_names_stable_by_decl() {
        let mut a = VariableNameAllocator::new();
        let d1 = DeclId(1);
        let d2 = DeclId(2);
        assert_eq!(a.name_for(d1, "x"), "x");
        assert_eq!(a.name_for(d2, "x"), "x__1");
        assert_eq!(a.name_for(d1, "x"), "x");
    }

    #[test]
    fn heap_slots_monotonic() {
        let opts = CompileOptions::default();
        let mut h = HeapAllocator::new(&opts);
        assert_eq!(h.alloc(), "$.heap0");
        assert_eq!(h.alloc(), "$.heap1");
    }
}
