//! Directed graph primitives used by every analysis in the crate.
//!
//! Control-flow graphs, dominator trees, call graphs and the per-method dataflow
//! graphs of the dependency analysis are all expressed as dense, index-addressed
//! graphs. The algorithms in [`algorithms`] are written against the small trait
//! family defined here so they can run on the materialized [`Graph`] as well as on
//! lightweight views.
//!
//! # Traits
//!
//! - [`GraphBase`] - node count and node enumeration
//! - [`Successors`] - forward edge traversal
//! - [`Predecessors`] - backward edge traversal
//!
//! # Building graphs
//!
//! ```rust,ignore
//! use aotflow::utils::graph::{GraphBuilder, NodeId, Successors};
//!
//! let mut builder = GraphBuilder::new(3);
//! builder.add_edge(0, 1);
//! builder.add_edge(1, 2);
//! builder.add_edge(2, 1);
//! let graph = builder.build();
//!
//! assert_eq!(graph.successors(NodeId::new(2)).collect::<Vec<_>>(), vec![NodeId::new(1)]);
//! ```

pub mod algorithms;
mod node;

pub use node::NodeId;

/// Basic node-level information about a graph.
pub trait GraphBase {
    /// Returns the number of nodes. Node ids are dense in `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Iterates over every node id.
    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.node_count()).map(NodeId::new)
    }
}

/// Forward edge traversal.
pub trait Successors: GraphBase {
    /// Iterates over the targets of the outgoing edges of `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Iterates over the sources of the incoming edges of `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;

    /// Returns the number of incoming edges of `node`.
    fn in_degree(&self, node: NodeId) -> usize {
        self.predecessors(node).count()
    }
}

/// An immutable directed graph with precomputed adjacency in both directions.
///
/// Parallel edges are collapsed by [`GraphBuilder::build`]; the order of the
/// remaining edges is the order in which they were first added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
}

impl Graph {
    /// Returns the number of nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.outgoing.len()
    }

    /// Returns the outgoing edges of `node` as a slice.
    #[must_use]
    pub fn outgoing_edges(&self, node: NodeId) -> &[NodeId] {
        &self.outgoing[node.index()]
    }

    /// Returns the incoming edges of `node` as a slice.
    #[must_use]
    pub fn incoming_edges(&self, node: NodeId) -> &[NodeId] {
        &self.incoming[node.index()]
    }

    /// Returns the number of incoming edges of `node`.
    #[must_use]
    pub fn incoming_count(&self, node: NodeId) -> usize {
        self.incoming[node.index()].len()
    }

    /// Returns the number of outgoing edges of `node`.
    #[must_use]
    pub fn outgoing_count(&self, node: NodeId) -> usize {
        self.outgoing[node.index()].len()
    }

    /// Returns every node with no incoming edges, in index order.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&node| self.incoming_count(node) == 0)
            .collect()
    }

    /// Returns a builder prefilled with the edges of this graph.
    #[must_use]
    pub fn to_builder(&self) -> GraphBuilder {
        let mut builder = GraphBuilder::new(self.size());
        for (from, targets) in self.outgoing.iter().enumerate() {
            for to in targets {
                builder.add_edge(from, to.index());
            }
        }
        builder
    }
}

impl GraphBase for Graph {
    fn node_count(&self) -> usize {
        self.outgoing.len()
    }
}

impl Successors for Graph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing[node.index()].iter().copied()
    }
}

impl Predecessors for Graph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming[node.index()].iter().copied()
    }

    fn in_degree(&self, node: NodeId) -> usize {
        self.incoming[node.index()].len()
    }
}

/// Incremental builder for [`Graph`].
///
/// Adding an edge that refers to a node past the current size grows the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    edges: Vec<Vec<NodeId>>,
}

impl GraphBuilder {
    /// Creates a builder for a graph with `size` nodes and no edges.
    #[must_use]
    pub fn new(size: usize) -> Self {
        GraphBuilder {
            edges: vec![Vec::new(); size],
        }
    }

    /// Returns the current number of nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.edges.len()
    }

    /// Grows the graph so that it has at least `size` nodes.
    pub fn ensure_size(&mut self, size: usize) {
        if self.edges.len() < size {
            self.edges.resize(size, Vec::new());
        }
    }

    /// Adds the edge `from -> to`.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.ensure_size(from.max(to) + 1);
        self.edges[from].push(NodeId::new(to));
    }

    /// Removes every outgoing edge of `from`.
    pub fn clear_outgoing(&mut self, from: usize) {
        if let Some(edges) = self.edges.get_mut(from) {
            edges.clear();
        }
    }

    /// Finishes the graph, collapsing duplicate edges.
    #[must_use]
    pub fn build(self) -> Graph {
        let size = self.edges.len();
        let mut outgoing = Vec::with_capacity(size);
        let mut incoming = vec![Vec::new(); size];
        let mut seen = vec![usize::MAX; size];
        for (from, targets) in self.edges.into_iter().enumerate() {
            let mut unique = Vec::with_capacity(targets.len());
            for to in targets {
                if seen[to.index()] != from {
                    seen[to.index()] = from;
                    unique.push(to);
                    incoming[to.index()].push(NodeId::new(from));
                }
            }
            outgoing.push(unique);
        }
        Graph { outgoing, incoming }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collapses_duplicates() {
        let mut builder = GraphBuilder::new(2);
        builder.add_edge(0, 1);
        builder.add_edge(0, 1);
        builder.add_edge(1, 0);
        let graph = builder.build();

        assert_eq!(graph.outgoing_edges(NodeId::new(0)), &[NodeId::new(1)]);
        assert_eq!(graph.incoming_edges(NodeId::new(0)), &[NodeId::new(1)]);
        assert_eq!(graph.incoming_count(NodeId::new(1)), 1);
    }

    #[test]
    fn test_builder_grows_on_edge() {
        let mut builder = GraphBuilder::new(0);
        builder.add_edge(3, 1);
        let graph = builder.build();

        assert_eq!(graph.size(), 4);
        assert_eq!(graph.entry_nodes(), vec![NodeId::new(0), NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_round_trip_through_builder() {
        let mut builder = GraphBuilder::new(3);
        builder.add_edge(0, 2);
        builder.add_edge(2, 1);
        let graph = builder.build();

        assert_eq!(graph.to_builder().build(), graph);
    }
}
