//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! A strongly connected component is a maximal set of vertices such that there
//! is a path from every vertex to every other vertex in the set.
//!
//! # Use Cases
//!
//! - **Irreducible loop splitting**: multi-entry cycles are found as SCCs
//! - **Dataflow merging**: cycles of phi operands collapse into one dependency node
//! - **Recursion detection**: mutually recursive methods form an SCC of the call graph

use crate::utils::graph::{GraphBase, NodeId, Successors};

/// Computes the strongly connected components reachable from `start`.
///
/// This is an iterative formulation of Tarjan's algorithm: every node is pushed
/// once to be numbered and once more to be closed, so no recursion is involved.
/// Nodes rejected by `filter` are treated as absent from the graph (the start nodes
/// themselves are not filtered).
///
/// Only non-empty components are returned, trivial single-node components
/// included. Components are unordered sets of node ids.
///
/// # Examples
///
/// ```rust,ignore
/// use aotflow::utils::graph::{GraphBuilder, NodeId, algorithms::find_strongly_connected_components};
///
/// // 0 -> 1 -> 2 -> 1
/// let mut builder = GraphBuilder::new(3);
/// builder.add_edge(0, 1);
/// builder.add_edge(1, 2);
/// builder.add_edge(2, 1);
/// let graph = builder.build();
///
/// let components = find_strongly_connected_components(&graph, &[NodeId::new(0)], |_| true);
/// assert_eq!(components.len(), 2);
/// ```
pub fn find_strongly_connected_components<G, F>(
    graph: &G,
    start: &[NodeId],
    filter: F,
) -> Vec<Vec<NodeId>>
where
    G: Successors,
    F: Fn(NodeId) -> bool,
{
    let size = graph.node_count();
    let closed = size + 1;
    let mut components = Vec::new();
    let mut visit_index = vec![0usize; size];
    let mut header_index = vec![0usize; size];
    let mut last_index = 0usize;
    let mut stack: Vec<NodeId> = Vec::with_capacity(size);

    for &start_node in start {
        stack.push(start_node);
        let mut current_component: Vec<NodeId> = Vec::new();

        while let Some(node) = stack.pop() {
            let idx = node.index();
            if visit_index[idx] > 0 {
                if header_index[idx] > 0 {
                    continue;
                }
                let mut hdr = visit_index[idx];
                for successor in graph.successors(node) {
                    if !filter(successor) {
                        continue;
                    }
                    let s = successor.index();
                    if header_index[s] == 0 {
                        hdr = hdr.min(visit_index[s]);
                    } else {
                        hdr = hdr.min(header_index[s]);
                    }
                }
                if hdr == visit_index[idx] {
                    let mut members = Vec::new();
                    while let Some(member) = current_component.pop() {
                        members.push(member);
                        header_index[member.index()] = closed;
                        if visit_index[member.index()] == hdr {
                            break;
                        }
                    }
                    components.push(members);
                }
                header_index[idx] = hdr;
            } else {
                last_index += 1;
                visit_index[idx] = last_index;
                current_component.push(node);
                stack.push(node);
                for successor in graph.successors(node) {
                    if !filter(successor) || visit_index[successor.index()] > 0 {
                        continue;
                    }
                    stack.push(successor);
                }
            }
        }

        for (visited, header) in visit_index.iter().zip(header_index.iter_mut()) {
            if *visited > 0 {
                *header = closed;
            }
        }
    }

    components
}

/// Computes the strongly connected components of the whole graph.
///
/// Every node is used as a start node, so every node ends up in exactly one
/// component.
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let start: Vec<NodeId> = graph.node_ids().collect();
    find_strongly_connected_components(graph, &start, |_| true)
}

/// Returns `true` if the component forms a cycle: more than one node, or a single
/// node with an edge to itself.
pub fn is_cyclic_component<G>(graph: &G, component: &[NodeId]) -> bool
where
    G: Successors + GraphBase,
{
    match component {
        [] => false,
        [single] => graph.successors(*single).any(|s| s == *single),
        _ => true,
    }
}
