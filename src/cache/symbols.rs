//! Concurrent string interning.

use dashmap::DashMap;

/// Interns strings to dense `u32` indices.
///
/// Indices are assigned in insertion order and never change, so a table shared
/// by several writers stays valid for every blob encoded against it. Lookups and
/// insertions only need `&self` and may happen from any thread.
#[derive(Debug, Default)]
pub struct SymbolTable {
    indices: DashMap<String, u32>,
    symbols: boxcar::Vec<String>,
}

impl SymbolTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `symbol`, inserting it if it is new.
    pub fn lookup(&self, symbol: &str) -> u32 {
        if let Some(index) = self.indices.get(symbol) {
            return *index;
        }
        *self
            .indices
            .entry(symbol.to_owned())
            .or_insert_with(|| self.symbols.push(symbol.to_owned()) as u32)
    }

    /// Returns the index of `symbol` without inserting it.
    #[must_use]
    pub fn find(&self, symbol: &str) -> Option<u32> {
        self.indices.get(symbol).map(|index| *index)
    }

    /// Returns the symbol stored at `index`.
    #[must_use]
    pub fn at(&self, index: u32) -> Option<&str> {
        self.symbols.get(index as usize).map(String::as_str)
    }

    /// Number of interned symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.count()
    }

    /// Returns `true` if nothing was interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over `(index, symbol)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.symbols
            .iter()
            .map(|(index, symbol)| (index as u32, symbol.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_stable() {
        let table = SymbolTable::new();
        let a = table.lookup("java.lang.Object");
        let b = table.lookup("java.lang.String");
        assert_ne!(a, b);
        assert_eq!(table.lookup("java.lang.Object"), a);
        assert_eq!(table.at(b), Some("java.lang.String"));
        assert_eq!(table.find("missing"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_interning_agrees() {
        let table = SymbolTable::new();
        let names: Vec<String> = (0..64).map(|i| format!("C{i}")).collect();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for name in &names {
                        table.lookup(name);
                    }
                });
            }
        });
        assert_eq!(table.len(), names.len());
        for name in &names {
            let index = table.find(name).unwrap();
            assert_eq!(table.at(index), Some(name.as_str()));
        }
    }
}
