//! Results of a finished dependency analysis.

use rustc_hash::FxHashMap;

use crate::{
    callgraph::CallGraph,
    model::{FieldReference, MethodReference},
};

use super::{
    analyzer::{ClassDependency, FieldDependency, MethodDependency},
    node::{DependencyGraph, DependencyNodeId},
};

/// Read-only view of what the analysis reached and which types flow where.
///
/// Produced by [`super::DependencyAnalyzer::finish`] and consumed by the linker
/// and the transformation passes.
#[derive(Debug)]
pub struct DependencyInfo {
    pub(crate) graph: DependencyGraph,
    pub(crate) type_names: Vec<String>,
    pub(crate) methods: FxHashMap<MethodReference, MethodDependency>,
    pub(crate) method_aliases: FxHashMap<MethodReference, Option<MethodReference>>,
    pub(crate) fields: FxHashMap<FieldReference, FieldDependency>,
    pub(crate) field_aliases: FxHashMap<FieldReference, Option<FieldReference>>,
    pub(crate) classes: FxHashMap<String, ClassDependency>,
    pub(crate) call_graph: CallGraph,
}

impl DependencyInfo {
    /// Record of a linked method, by declaration.
    #[must_use]
    pub fn method(&self, method: &MethodReference) -> Option<&MethodDependency> {
        self.methods.get(method)
    }

    /// Declaration a method reference was linked to. `None` when the reference was
    /// never linked or could not be resolved.
    #[must_use]
    pub fn method_implementation(&self, method: &MethodReference) -> Option<&MethodReference> {
        if let Some(dependency) = self.methods.get(method) {
            return Some(&dependency.reference);
        }
        self.method_aliases.get(method)?.as_ref()
    }

    /// Record of a linked field, by declaration or by any reference linked to it.
    #[must_use]
    pub fn field(&self, field: &FieldReference) -> Option<&FieldDependency> {
        self.fields.get(field).or_else(|| {
            self.field_aliases
                .get(field)?
                .as_ref()
                .and_then(|resolved| self.fields.get(resolved))
        })
    }

    /// Record of a linked class.
    #[must_use]
    pub fn class(&self, class_name: &str) -> Option<&ClassDependency> {
        self.classes.get(class_name)
    }

    /// Methods marked as used, sorted.
    #[must_use]
    pub fn reachable_methods(&self) -> Vec<&MethodReference> {
        let mut methods: Vec<_> = self
            .methods
            .values()
            .filter(|m| m.used)
            .map(|m| &m.reference)
            .collect();
        methods.sort();
        methods
    }

    /// Every linked method, used or not, sorted.
    #[must_use]
    pub fn linked_methods(&self) -> Vec<&MethodReference> {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        methods
    }

    /// Linked fields, sorted.
    #[must_use]
    pub fn reachable_fields(&self) -> Vec<&FieldReference> {
        let mut fields: Vec<_> = self.fields.keys().collect();
        fields.sort();
        fields
    }

    /// Linked classes, sorted.
    #[must_use]
    pub fn reachable_classes(&self) -> Vec<&str> {
        let mut classes: Vec<_> = self.classes.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }

    /// Runtime type names that reached `node`, in arrival order.
    #[must_use]
    pub fn types(&self, node: DependencyNodeId) -> Vec<&str> {
        self.graph
            .types(node)
            .iter()
            .filter_map(|ty| self.type_names.get(ty.index()).map(String::as_str))
            .collect()
    }

    /// Types of a variable of an analyzed method body, sorted.
    #[must_use]
    pub fn variable_types(&self, method: &MethodReference, variable: usize) -> Vec<&str> {
        self.sorted(self.method(method).and_then(|m| m.variable(variable)))
    }

    /// Types of a parameter slot (0 is the instance), sorted.
    #[must_use]
    pub fn parameter_types(&self, method: &MethodReference, slot: usize) -> Vec<&str> {
        self.sorted(self.method(method).and_then(|m| m.parameter(slot)))
    }

    /// Types a method may return, sorted.
    #[must_use]
    pub fn result_types(&self, method: &MethodReference) -> Vec<&str> {
        self.sorted(self.method(method).and_then(MethodDependency::result))
    }

    /// Exception types escaping a method, sorted.
    #[must_use]
    pub fn thrown_types(&self, method: &MethodReference) -> Vec<&str> {
        self.sorted(self.method(method).map(MethodDependency::thrown))
    }

    /// Types stored into a field, sorted.
    #[must_use]
    pub fn field_types(&self, field: &FieldReference) -> Vec<&str> {
        self.sorted(self.field(field).and_then(FieldDependency::value))
    }

    fn sorted(&self, node: Option<DependencyNodeId>) -> Vec<&str> {
        let mut types = node.map(|n| self.types(n)).unwrap_or_default();
        types.sort_unstable();
        types
    }

    /// The call graph built during the analysis.
    #[must_use]
    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    /// Takes the call graph out, leaving an empty one.
    pub fn take_call_graph(&mut self) -> CallGraph {
        std::mem::take(&mut self.call_graph)
    }
}
