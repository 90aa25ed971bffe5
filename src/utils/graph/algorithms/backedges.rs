//! Back edge detection.
//!
//! A back edge is an edge whose target is still on the depth-first search path
//! when the edge is examined. Back edges identify loops; whether every back edge
//! target dominates its source decides whether the graph is reducible.

use crate::utils::graph::{NodeId, Predecessors, Successors};

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    None,
    Visiting,
    Visited,
}

/// Finds every back edge of a graph.
///
/// The traversal starts from every node with no incoming edges and uses an explicit
/// stack, so the depth of the graph does not consume native stack. Nodes that are not
/// reachable from such an entry node are not visited.
///
/// Returns the back edges as `(source, target)` pairs in discovery order.
///
/// # Examples
///
/// ```rust,ignore
/// use aotflow::utils::graph::{GraphBuilder, NodeId, algorithms::find_back_edges};
///
/// // A -> B -> C -> B
/// let mut builder = GraphBuilder::new(3);
/// builder.add_edge(0, 1);
/// builder.add_edge(1, 2);
/// builder.add_edge(2, 1);
///
/// let edges = find_back_edges(&builder.build());
/// assert_eq!(edges, vec![(NodeId::new(2), NodeId::new(1))]);
/// ```
pub fn find_back_edges<G>(graph: &G) -> Vec<(NodeId, NodeId)>
where
    G: Successors + Predecessors,
{
    let size = graph.node_count();
    let mut state = vec![VisitState::None; size];
    let mut stack: Vec<NodeId> = graph
        .node_ids()
        .filter(|&node| graph.in_degree(node) == 0)
        .collect();
    let mut result = Vec::new();

    while let Some(node) = stack.pop() {
        match state[node.index()] {
            VisitState::None => {
                state[node.index()] = VisitState::Visiting;
                stack.push(node);
                for next in graph.successors(node) {
                    match state[next.index()] {
                        VisitState::None => stack.push(next),
                        VisitState::Visiting => result.push((node, next)),
                        VisitState::Visited => {}
                    }
                }
            }
            VisitState::Visiting => state[node.index()] = VisitState::Visited,
            VisitState::Visited => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::GraphBuilder;

    #[test]
    fn test_simple_loop_has_one_back_edge() {
        let mut builder = GraphBuilder::new(3);
        builder.add_edge(0, 1);
        builder.add_edge(1, 2);
        builder.add_edge(2, 1);

        let edges = find_back_edges(&builder.build());
        assert_eq!(edges, vec![(NodeId::new(2), NodeId::new(1))]);
    }

    #[test]
    fn test_acyclic_graph_has_none() {
        let mut builder = GraphBuilder::new(4);
        builder.add_edge(0, 1);
        builder.add_edge(0, 2);
        builder.add_edge(1, 3);
        builder.add_edge(2, 3);

        assert!(find_back_edges(&builder.build()).is_empty());
    }

    #[test]
    fn test_self_loop() {
        let mut builder = GraphBuilder::new(2);
        builder.add_edge(0, 1);
        builder.add_edge(1, 1);

        let edges = find_back_edges(&builder.build());
        assert_eq!(edges, vec![(NodeId::new(1), NodeId::new(1))]);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let size = 200_000;
        let mut builder = GraphBuilder::new(size);
        for i in 0..size - 1 {
            builder.add_edge(i, i + 1);
        }
        builder.add_edge(size - 1, 1);

        let edges = find_back_edges(&builder.build());
        assert_eq!(edges, vec![(NodeId::new(size - 1), NodeId::new(1))]);
    }
}
