//! Call graph storage and queries.
//!
//! The graph is filled incrementally by the dependency analysis as it discovers
//! calls and accesses. Sites are kept in flat tables owned by the graph and nodes
//! refer to them by index, which keeps the structure free of reference cycles and
//! trivially serializable.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    callgraph::{CallGraphNode, CallGraphNodeId, CallSite, ClassAccessSite, FieldAccessSite},
    model::{FieldReference, MethodReference, TextLocation},
    utils::graph::{
        algorithms::{is_cyclic_component, strongly_connected_components},
        Graph, GraphBuilder,
    },
};

/// Inter-procedural call graph of the reachable program.
///
/// # Example
///
/// ```rust,ignore
/// let mut graph = CallGraph::new();
/// let main = graph.node_for(&main_ref);
/// graph.add_call_site(main, &helper_ref, None);
///
/// assert_eq!(graph.callees(&main_ref), vec![helper_ref]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: Vec<CallGraphNode>,
    index: FxHashMap<MethodReference, CallGraphNodeId>,
    call_sites: Vec<CallSite>,
    field_accesses: Vec<FieldAccessSite>,
    class_accesses: Vec<ClassAccessSite>,
    known_calls: FxHashSet<CallSite>,
    known_fields: FxHashSet<FieldAccessSite>,
    known_classes: FxHashSet<ClassAccessSite>,
    field_index: FxHashMap<FieldReference, Vec<usize>>,
    class_index: FxHashMap<String, Vec<usize>>,
}

impl CallGraph {
    /// Creates an empty call graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from its tables, recomputing every lookup index.
    ///
    /// Site indices stored in `nodes` must refer to the given site tables.
    pub(crate) fn from_tables(
        nodes: Vec<CallGraphNode>,
        call_sites: Vec<CallSite>,
        field_accesses: Vec<FieldAccessSite>,
        class_accesses: Vec<ClassAccessSite>,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.method.clone(), CallGraphNodeId(i)))
            .collect();
        let mut field_index: FxHashMap<FieldReference, Vec<usize>> = FxHashMap::default();
        for (i, site) in field_accesses.iter().enumerate() {
            field_index.entry(site.field.clone()).or_default().push(i);
        }
        let mut class_index: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, site) in class_accesses.iter().enumerate() {
            class_index.entry(site.class_name.clone()).or_default().push(i);
        }
        Self {
            known_calls: call_sites.iter().cloned().collect(),
            known_fields: field_accesses.iter().cloned().collect(),
            known_classes: class_accesses.iter().cloned().collect(),
            nodes,
            index,
            call_sites,
            field_accesses,
            class_accesses,
            field_index,
            class_index,
        }
    }

    /// Returns the node of `method`, creating it on first use.
    pub fn node_for(&mut self, method: &MethodReference) -> CallGraphNodeId {
        if let Some(&id) = self.index.get(method) {
            return id;
        }
        let id = CallGraphNodeId(self.nodes.len());
        self.nodes.push(CallGraphNode::new(method.clone()));
        self.index.insert(method.clone(), id);
        id
    }

    /// Returns the id of `method`'s node, if it exists.
    #[must_use]
    pub fn node_id(&self, method: &MethodReference) -> Option<CallGraphNodeId> {
        self.index.get(method).copied()
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: CallGraphNodeId) -> &CallGraphNode {
        &self.nodes[id.0]
    }

    /// Returns the node of `method`, if it exists.
    #[must_use]
    pub fn find(&self, method: &MethodReference) -> Option<&CallGraphNode> {
        self.node_id(method).map(|id| self.node(id))
    }

    /// Iterates over all nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &CallGraphNode> {
        self.nodes.iter()
    }

    /// Number of method nodes.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.nodes.len()
    }

    /// Records a call from `caller` to `callee`. Returns `false` if the same call
    /// at the same location was already known.
    pub fn add_call_site(
        &mut self,
        caller: CallGraphNodeId,
        callee: &MethodReference,
        location: Option<TextLocation>,
    ) -> bool {
        let callee = self.node_for(callee);
        let site = CallSite {
            location,
            callee,
            caller,
        };
        if !self.known_calls.insert(site.clone()) {
            return false;
        }
        let index = self.call_sites.len();
        self.call_sites.push(site);
        self.nodes[caller.0].call_sites.push(index);
        self.nodes[callee.0].caller_call_sites.push(index);
        true
    }

    /// Records an access of `field` by `method`. Returns `false` for a duplicate.
    pub fn add_field_access(
        &mut self,
        method: CallGraphNodeId,
        field: &FieldReference,
        location: Option<TextLocation>,
    ) -> bool {
        let site = FieldAccessSite {
            location,
            method,
            field: field.clone(),
        };
        if !self.known_fields.insert(site.clone()) {
            return false;
        }
        let index = self.field_accesses.len();
        self.field_accesses.push(site);
        self.nodes[method.0].field_access_sites.push(index);
        self.field_index.entry(field.clone()).or_default().push(index);
        true
    }

    /// Records a use of `class_name` by `method`. Returns `false` for a duplicate.
    pub fn add_class_access(
        &mut self,
        method: CallGraphNodeId,
        class_name: &str,
        location: Option<TextLocation>,
    ) -> bool {
        let site = ClassAccessSite {
            location,
            method,
            class_name: class_name.to_string(),
        };
        if !self.known_classes.insert(site.clone()) {
            return false;
        }
        let index = self.class_accesses.len();
        self.class_accesses.push(site);
        self.nodes[method.0].class_access_sites.push(index);
        self.class_index
            .entry(class_name.to_string())
            .or_default()
            .push(index);
        true
    }

    /// All call sites.
    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }

    /// All field access sites.
    #[must_use]
    pub fn field_accesses(&self) -> &[FieldAccessSite] {
        &self.field_accesses
    }

    /// All class access sites.
    #[must_use]
    pub fn class_accesses(&self) -> &[ClassAccessSite] {
        &self.class_accesses
    }

    /// Methods called by `caller`, deduplicated, in discovery order.
    #[must_use]
    pub fn callees(&self, caller: &MethodReference) -> Vec<MethodReference> {
        let Some(node) = self.find(caller) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        node.call_sites
            .iter()
            .map(|&i| self.call_sites[i].callee)
            .filter(|id| seen.insert(*id))
            .map(|id| self.node(id).method.clone())
            .collect()
    }

    /// Methods calling `callee`, deduplicated, in discovery order.
    #[must_use]
    pub fn callers(&self, callee: &MethodReference) -> Vec<MethodReference> {
        let Some(node) = self.find(callee) else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        node.caller_call_sites
            .iter()
            .map(|&i| self.call_sites[i].caller)
            .filter(|id| seen.insert(*id))
            .map(|id| self.node(id).method.clone())
            .collect()
    }

    /// Every recorded access of `field`.
    pub fn field_access_sites<'a>(
        &'a self,
        field: &FieldReference,
    ) -> impl Iterator<Item = &'a FieldAccessSite> + 'a {
        self.field_index
            .get(field)
            .into_iter()
            .flatten()
            .map(|&i| &self.field_accesses[i])
    }

    /// Every recorded use of `class_name`.
    pub fn class_access_sites<'a>(
        &'a self,
        class_name: &str,
    ) -> impl Iterator<Item = &'a ClassAccessSite> + 'a {
        self.class_index
            .get(class_name)
            .into_iter()
            .flatten()
            .map(|&i| &self.class_accesses[i])
    }

    /// Materializes the caller → callee relation as a graph over node indices.
    #[must_use]
    pub fn to_graph(&self) -> Graph {
        let mut builder = GraphBuilder::new(self.nodes.len());
        for site in &self.call_sites {
            builder.add_edge(site.caller.0, site.callee.0);
        }
        builder.build()
    }

    /// Strongly connected components of the call relation.
    #[must_use]
    pub fn sccs(&self) -> Vec<Vec<CallGraphNodeId>> {
        strongly_connected_components(&self.to_graph())
            .into_iter()
            .map(|component| {
                component
                    .into_iter()
                    .map(|node| CallGraphNodeId(node.index()))
                    .collect()
            })
            .collect()
    }

    /// Returns `true` if any method is directly or mutually recursive.
    #[must_use]
    pub fn has_recursion(&self) -> bool {
        !self.recursive_methods().is_empty()
    }

    /// All methods taking part in direct or mutual recursion, sorted.
    #[must_use]
    pub fn recursive_methods(&self) -> Vec<MethodReference> {
        let graph = self.to_graph();
        let mut recursive: Vec<MethodReference> = strongly_connected_components(&graph)
            .into_iter()
            .filter(|component| is_cyclic_component(&graph, component))
            .flatten()
            .map(|node| self.nodes[node.index()].method.clone())
            .collect();
        recursive.sort();
        recursive
    }

    /// Methods nobody calls.
    #[must_use]
    pub fn entry_points(&self) -> Vec<MethodReference> {
        self.nodes
            .iter()
            .filter(|node| node.caller_call_sites.is_empty())
            .map(|node| node.method.clone())
            .collect()
    }

    /// Methods calling nothing.
    #[must_use]
    pub fn leaf_methods(&self) -> Vec<MethodReference> {
        self.nodes
            .iter()
            .filter(|node| node.is_leaf())
            .map(|node| node.method.clone())
            .collect()
    }

    /// Returns statistics about the call graph.
    #[must_use]
    pub fn stats(&self) -> CallGraphStats {
        let edges: FxHashSet<(CallGraphNodeId, CallGraphNodeId)> = self
            .call_sites
            .iter()
            .map(|site| (site.caller, site.callee))
            .collect();
        CallGraphStats {
            method_count: self.nodes.len(),
            edge_count: edges.len(),
            total_call_sites: self.call_sites.len(),
            field_accesses: self.field_accesses.len(),
            class_accesses: self.class_accesses.len(),
            entry_points: self.entry_points().len(),
            leaf_methods: self.leaf_methods().len(),
            scc_count: self.sccs().len(),
            recursive_methods: self.recursive_methods().len(),
        }
    }
}

/// Statistics about a call graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallGraphStats {
    /// Number of methods (nodes) in the graph.
    pub method_count: usize,
    /// Number of distinct caller/callee pairs.
    pub edge_count: usize,
    /// Total number of call sites.
    pub total_call_sites: usize,
    /// Number of field access sites.
    pub field_accesses: usize,
    /// Number of class access sites.
    pub class_accesses: usize,
    /// Number of methods with no callers.
    pub entry_points: usize,
    /// Number of methods with no callees.
    pub leaf_methods: usize,
    /// Number of strongly connected components.
    pub scc_count: usize,
    /// Number of methods involved in direct or mutual recursion.
    pub recursive_methods: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodDescriptor, ValueType};

    fn method(class: &str) -> MethodReference {
        MethodReference::new(class, MethodDescriptor::new("m", vec![], ValueType::Void))
    }

    #[test]
    fn test_call_sites_are_deduplicated() {
        let mut graph = CallGraph::new();
        let a = graph.node_for(&method("A"));
        let here = Some(TextLocation::new("A.java", 3));
        assert!(graph.add_call_site(a, &method("B"), here.clone()));
        assert!(!graph.add_call_site(a, &method("B"), here));
        assert!(graph.add_call_site(a, &method("B"), Some(TextLocation::new("A.java", 4))));

        assert_eq!(graph.call_sites().len(), 2);
        assert_eq!(graph.callees(&method("A")), vec![method("B")]);
        assert_eq!(graph.callers(&method("B")), vec![method("A")]);
        assert_eq!(graph.stats().edge_count, 1);
    }

    #[test]
    fn test_back_edge_makes_cycle_recursive() {
        // A -> B -> C -> B
        let mut graph = CallGraph::new();
        let a = graph.node_for(&method("A"));
        graph.add_call_site(a, &method("B"), None);
        let b = graph.node_for(&method("B"));
        graph.add_call_site(b, &method("C"), None);
        let c = graph.node_for(&method("C"));
        graph.add_call_site(c, &method("B"), None);

        assert!(graph.has_recursion());
        assert_eq!(graph.recursive_methods(), vec![method("B"), method("C")]);
        assert_eq!(graph.entry_points(), vec![method("A")]);
        assert!(graph.leaf_methods().is_empty());
    }

    #[test]
    fn test_self_call_is_recursive() {
        let mut graph = CallGraph::new();
        let a = graph.node_for(&method("A"));
        graph.add_call_site(a, &method("A"), None);
        assert_eq!(graph.recursive_methods(), vec![method("A")]);
    }

    #[test]
    fn test_access_sites_are_indexed() {
        let mut graph = CallGraph::new();
        let a = graph.node_for(&method("A"));
        let field = FieldReference::new("B", "value");
        assert!(graph.add_field_access(a, &field, None));
        assert!(!graph.add_field_access(a, &field, None));
        assert!(graph.add_class_access(a, "B", None));

        assert_eq!(graph.field_access_sites(&field).count(), 1);
        assert_eq!(graph.class_access_sites("B").count(), 1);
        assert_eq!(graph.class_access_sites("C").count(), 0);
        assert_eq!(graph.node(a).field_access_sites, vec![0]);
    }
}
