//! Compilation session state.
//!
//! The [`Session`] replaces process-wide registries: it owns the event log, the
//! interning tables shared by the analysis and the program cache, and the
//! per-method flags passes hand to each other. A session is created explicitly and
//! passed by reference; every table is safe to use from parallel passes.

use std::time::{Duration, Instant};

use dashmap::DashSet;

use crate::{cache::SymbolTable, compiler::events::EventLog, model::MethodReference};

/// Shared state of one compilation.
#[derive(Debug)]
pub struct Session {
    /// Accumulated diagnostics and transformation events.
    pub events: EventLog,

    /// Class and type names seen by the dependency analysis.
    pub types: SymbolTable,

    /// Strings referenced from cached programs.
    pub symbols: SymbolTable,

    /// Source file names referenced from cached programs.
    pub files: SymbolTable,

    /// Methods whose bodies were rewritten by a bootstrap substitutor. Their
    /// programs depend on plugin behavior and must not be cached.
    pub no_cache: DashSet<MethodReference>,

    /// Methods that were inlined into at least one caller.
    pub inlined_methods: DashSet<MethodReference>,

    start_time: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: EventLog::new(),
            types: SymbolTable::new(),
            symbols: SymbolTable::new(),
            files: SymbolTable::new(),
            no_cache: DashSet::new(),
            inlined_methods: DashSet::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the elapsed time since the session was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Marks `method` as not cacheable.
    pub fn mark_no_cache(&self, method: &MethodReference) {
        self.no_cache.insert(method.clone());
    }

    /// Returns `true` if the program of `method` may be stored in the cache.
    #[must_use]
    pub fn is_cacheable(&self, method: &MethodReference) -> bool {
        !self.no_cache.contains(method)
    }

    /// Records that `method` was inlined somewhere.
    pub fn mark_inlined(&self, method: &MethodReference) {
        self.inlined_methods.insert(method.clone());
    }

    /// Returns `true` if `method` was inlined into some caller.
    #[must_use]
    pub fn was_inlined(&self, method: &MethodReference) -> bool {
        self.inlined_methods.contains(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodDescriptor, ValueType};

    #[test]
    fn test_method_flags() {
        let session = Session::new();
        let method = MethodReference::new("A", MethodDescriptor::new("f", vec![], ValueType::Void));
        assert!(session.is_cacheable(&method));
        session.mark_no_cache(&method);
        assert!(!session.is_cacheable(&method));
        assert!(!session.was_inlined(&method));
        session.mark_inlined(&method);
        assert!(session.was_inlined(&method));
    }

    #[test]
    fn test_tables_are_independent() {
        let session = Session::new();
        session.types.lookup("A");
        session.files.lookup("A.java");
        assert_eq!(session.types.len(), 1);
        assert_eq!(session.symbols.len(), 0);
        assert_eq!(session.files.find("A.java"), Some(0));
    }
}
