//! Dependency nodes and the propagation arena.
//!
//! A node is a monotonically growing set of concrete types. Nodes are connected by
//! transitions (optionally filtered) and observed by consumers. Propagation is
//! deferred: adding a type only queues the node, and [`DependencyGraph::flush`]
//! later forwards every type a transition or consumer has not seen yet. Each
//! transition and each consumer registration keeps a cursor into the node's type
//! list, so every `(node, type)` pair is delivered to each of them exactly once,
//! no matter when the registration happened.

use std::collections::VecDeque;

use crate::utils::BitSet;

/// Nesting depth up to which array item facets of connected nodes are tied.
const DEGREE_THRESHOLD: u8 = 2;

/// Handle of a node in a [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyNodeId(pub(crate) u32);

impl DependencyNodeId {
    /// Returns the dense index of this node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A concrete runtime type, interned in the session's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyType(pub(crate) u32);

impl DependencyType {
    /// Returns the index of the type name in the session's type table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Predicate restricting which types cross a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    /// Only subtypes of the named class or array type pass
    SubtypeOf(String),
}

/// Observer of a node. The payload indexes into tables owned by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Consumer {
    /// Routes thrown types to handlers or to the method's thrown node
    Exception(usize),
    /// Resolves virtual call targets for each receiver type
    VirtualCall(usize),
    /// Adds each type to another node without tying facets
    Propagate(DependencyNodeId),
    /// A callback registered by a plugin
    Callback(usize),
}

#[derive(Debug, Clone)]
struct Transition {
    target: DependencyNodeId,
    filter: Option<TypeFilter>,
    cursor: usize,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    consumer: Consumer,
    cursor: usize,
}

#[derive(Debug, Clone, Default)]
struct DependencyNode {
    types: Vec<DependencyType>,
    type_set: BitSet,
    transitions: Vec<Transition>,
    sources: Vec<DependencyNodeId>,
    consumers: Vec<Registration>,
    array_item: Option<DependencyNodeId>,
    class_value: Option<DependencyNodeId>,
    degree: u8,
    tag: Option<String>,
}

/// Arena of dependency nodes with a queue of nodes holding undelivered types.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
    pending: VecDeque<DependencyNodeId>,
    queued: BitSet,
}

impl DependencyGraph {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node was created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Creates a new empty node.
    pub fn create_node(&mut self) -> DependencyNodeId {
        self.create_node_with_degree(0)
    }

    fn create_node_with_degree(&mut self, degree: u8) -> DependencyNodeId {
        let id = DependencyNodeId(self.nodes.len() as u32);
        self.nodes.push(DependencyNode {
            degree,
            ..DependencyNode::default()
        });
        id
    }

    /// Attaches a debugging label to a node.
    pub fn set_tag(&mut self, node: DependencyNodeId, tag: impl Into<String>) {
        self.nodes[node.index()].tag = Some(tag.into());
    }

    /// Returns the debugging label of a node.
    #[must_use]
    pub fn tag(&self, node: DependencyNodeId) -> Option<&str> {
        self.nodes[node.index()].tag.as_deref()
    }

    /// Types that reached `node`, in arrival order.
    #[must_use]
    pub fn types(&self, node: DependencyNodeId) -> &[DependencyType] {
        &self.nodes[node.index()].types
    }

    /// Returns `true` if `ty` reached `node`.
    #[must_use]
    pub fn has_type(&self, node: DependencyNodeId, ty: DependencyType) -> bool {
        self.nodes[node.index()].type_set.contains_or_false(ty.index())
    }

    /// Adds `ty` to `node`. Returns `false` if it was already present.
    pub fn propagate(&mut self, node: DependencyNodeId, ty: DependencyType) -> bool {
        let entry = &mut self.nodes[node.index()];
        if !entry.type_set.grow_insert(ty.index()) {
            return false;
        }
        entry.types.push(ty);
        self.schedule(node);
        true
    }

    fn schedule(&mut self, node: DependencyNodeId) {
        let entry = &self.nodes[node.index()];
        if entry.types.is_empty() || (entry.transitions.is_empty() && entry.consumers.is_empty()) {
            return;
        }
        if self.queued.grow_insert(node.index()) {
            self.pending.push_back(node);
        }
    }

    /// Registers a consumer; it will see every type of `node`, past and future.
    pub(crate) fn add_consumer(&mut self, node: DependencyNodeId, consumer: Consumer) {
        self.nodes[node.index()].consumers.push(Registration {
            consumer,
            cursor: 0,
        });
        self.schedule(node);
    }

    /// Connects `from` to `to`: every type of `from` accepted by `filter` also
    /// reaches `to`. Connections are permanent and deduplicated per target;
    /// connecting a node to itself does nothing.
    ///
    /// Unfiltered connections also tie the array item facets of both nodes in
    /// both directions (up to a bounded nesting depth) and forward the class
    /// value facet.
    pub fn connect(
        &mut self,
        from: DependencyNodeId,
        to: DependencyNodeId,
        filter: Option<TypeFilter>,
    ) {
        if from == to
            || self.nodes[from.index()]
                .transitions
                .iter()
                .any(|t| t.target == to)
        {
            return;
        }
        self.nodes[from.index()].transitions.push(Transition {
            target: to,
            filter,
            cursor: 0,
        });
        self.nodes[to.index()].sources.push(from);
        self.schedule(from);

        if self.nodes[from.index()].array_item.is_some() || self.nodes[to.index()].array_item.is_some()
        {
            self.tie_array_items(from, to);
        }
        if let Some(value) = self.nodes[from.index()].class_value {
            let target = self.class_value(to);
            self.connect(value, target, None);
        }
    }

    fn tie_array_items(&mut self, first: DependencyNodeId, second: DependencyNodeId) {
        let degree = self.nodes[first.index()]
            .degree
            .max(self.nodes[second.index()].degree);
        if degree > DEGREE_THRESHOLD {
            return;
        }
        let first_item = self.array_item(first);
        let second_item = self.array_item(second);
        if first_item != second_item {
            self.connect(first_item, second_item, None);
            self.connect(second_item, first_item, None);
        }
    }

    /// Returns the node holding the item types of arrays reaching `node`,
    /// creating it and tying it to the facets of connected nodes on first use.
    pub fn array_item(&mut self, node: DependencyNodeId) -> DependencyNodeId {
        if let Some(item) = self.nodes[node.index()].array_item {
            return item;
        }
        let degree = self.nodes[node.index()].degree;
        let item = self.create_node_with_degree(degree.saturating_add(1));
        self.nodes[node.index()].array_item = Some(item);
        if degree > DEGREE_THRESHOLD {
            return item;
        }

        let entry = &self.nodes[node.index()];
        let neighbors: Vec<DependencyNodeId> = entry
            .transitions
            .iter()
            .map(|t| t.target)
            .chain(entry.sources.iter().copied())
            .collect();
        for neighbor in neighbors {
            self.tie_array_items(node, neighbor);
        }
        item
    }

    /// Returns the node holding the classes represented by `java.lang.Class`
    /// values reaching `node`.
    pub fn class_value(&mut self, node: DependencyNodeId) -> DependencyNodeId {
        if let Some(value) = self.nodes[node.index()].class_value {
            return value;
        }
        let value = self.create_node();
        self.nodes[node.index()].class_value = Some(value);
        let targets: Vec<DependencyNodeId> = self.nodes[node.index()]
            .transitions
            .iter()
            .map(|t| t.target)
            .collect();
        for target in targets {
            let target_value = self.class_value(target);
            self.connect(value, target_value, None);
        }
        value
    }

    /// The array item facet of `node` if it was created.
    #[must_use]
    pub fn existing_array_item(&self, node: DependencyNodeId) -> Option<DependencyNodeId> {
        self.nodes[node.index()].array_item
    }

    /// The class value facet of `node` if it was created.
    #[must_use]
    pub fn existing_class_value(&self, node: DependencyNodeId) -> Option<DependencyNodeId> {
        self.nodes[node.index()].class_value
    }

    /// Pops the next node holding undelivered types.
    pub(crate) fn pop_pending(&mut self) -> Option<DependencyNodeId> {
        let node = self.pending.pop_front()?;
        self.queued.remove(node.index());
        Some(node)
    }

    /// Returns `true` if some node holds undelivered types.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forwards the undelivered types of `node` along its transitions and returns
    /// the consumer deliveries the caller must perform.
    ///
    /// `accepts` decides whether a type passes a transition filter.
    pub(crate) fn flush(
        &mut self,
        node: DependencyNodeId,
        accepts: impl Fn(&TypeFilter, DependencyType) -> bool,
    ) -> Vec<(Consumer, DependencyType)> {
        let count = self.nodes[node.index()].types.len();

        let mut index = 0;
        while index < self.nodes[node.index()].transitions.len() {
            let entry = &mut self.nodes[node.index()];
            let transition = &mut entry.transitions[index];
            let start = transition.cursor;
            transition.cursor = count;
            let target = transition.target;
            let filter = transition.filter.clone();
            let delivered: Vec<DependencyType> = entry.types[start..count]
                .iter()
                .copied()
                .filter(|&ty| filter.as_ref().map_or(true, |f| accepts(f, ty)))
                .collect();
            for ty in delivered {
                self.propagate(target, ty);
            }
            index += 1;
        }

        let entry = &mut self.nodes[node.index()];
        let mut deliveries = Vec::new();
        for registration in &mut entry.consumers {
            for &ty in &entry.types[registration.cursor..count] {
                deliveries.push((registration.consumer, ty));
            }
            registration.cursor = count;
        }
        deliveries
    }
}
