//! Reducibility test and node splitting.
//!
//! A graph is reducible when every cycle has a single entry, or equivalently
//! when the target of every back edge dominates its source. Dominance-based
//! analyses (SSA construction in particular) assume reducible control flow, so
//! irreducible graphs are made reducible by duplicating nodes.
//!
//! The splitting algorithm keeps a worklist of regions. For each region it finds
//! the cyclic strongly connected components; a component entered from more than
//! one node keeps its heaviest entry and everything else in the component is
//! copied. Predecessors outside the component are redirected to the copies, which
//! leaves the original component with a single entry. Both the copies and the
//! component without its entry are then examined again for nested cycles.

use crate::{
    utils::{
        graph::{
            algorithms::{
                backedges::find_back_edges,
                dominators::build_dominator_tree,
                scc::find_strongly_connected_components,
            },
            Graph, GraphBuilder, NodeId, Predecessors, Successors,
        },
        BitSet,
    },
    Result,
};

/// Receives node duplication requests from [`split_irreducible_graph`].
///
/// The graph itself is never mutated by the algorithm; the backend owns the
/// structure the graph was derived from (for example a program's basic blocks) and
/// applies each split to it.
pub trait GraphSplittingBackend {
    /// Duplicates `nodes`.
    ///
    /// Edges between two nodes of `nodes` must be mirrored between their copies.
    /// Edges from copies to any other node point to the same node as the original.
    /// Every edge from a node of `domain` into `nodes` must be redirected to the
    /// corresponding copy.
    ///
    /// Returns the ids of the copies, in the order of `nodes`. Copies must be
    /// numbered consecutively after all previously existing nodes.
    fn split(&mut self, domain: &[NodeId], nodes: &[NodeId]) -> Vec<NodeId>;
}

/// Returns `true` if some back edge's target does not dominate its source.
///
/// # Errors
///
/// Returns [`crate::Error::GraphError`] when the graph has no entry node.
pub fn is_irreducible<G>(graph: &G) -> Result<bool>
where
    G: Successors + Predecessors,
{
    let dom = build_dominator_tree(graph)?;
    Ok(find_back_edges(graph)
        .into_iter()
        .any(|(source, target)| !dom.dominates(target, source)))
}

/// Converts a graph to reducible form by node splitting.
///
/// `weights` gives a cost per node (for control-flow graphs the instruction count
/// of a block); the heaviest entry of a multi-entry cycle is kept so the least
/// code is duplicated. Copies inherit the weight of their original.
///
/// Returns the graph after all splits have been applied.
///
/// # Errors
///
/// Returns [`crate::Error::GraphError`] when the graph has no entry node or the
/// backend returns the wrong number of copies.
pub fn split_irreducible_graph<G, B>(graph: &G, weights: &[usize], backend: &mut B) -> Result<Graph>
where
    G: Successors + Predecessors,
    B: GraphSplittingBackend,
{
    if graph.node_count() > 0 && !graph.node_ids().any(|n| graph.in_degree(n) == 0) {
        return Err(graph_error!(
            "graph of {} nodes has no entry node",
            graph.node_count()
        ));
    }

    let mut edges: Vec<Vec<NodeId>> = graph
        .node_ids()
        .map(|node| graph.successors(node).collect())
        .collect();
    let mut weights: Vec<usize> = (0..graph.node_count())
        .map(|i| weights.get(i).copied().unwrap_or(1))
        .collect();
    let mut worklist: Vec<Vec<NodeId>> = vec![graph.node_ids().collect()];

    while let Some(region) = worklist.pop() {
        let current = snapshot(&edges);
        let mut in_region = BitSet::new(current.size());
        for node in &region {
            in_region.insert(node.index());
        }

        let components =
            find_strongly_connected_components(&current, &region, |n| in_region.contains(n.index()));
        // Subregions are only scheduled once the whole region needed no split;
        // after a split the region is examined again against the updated edges.
        let mut subregions = Vec::new();
        let mut split = false;
        for component in components {
            let cyclic = component.len() > 1
                || current
                    .outgoing_edges(component[0])
                    .contains(&component[0]);
            if !cyclic {
                continue;
            }

            let mut in_component = BitSet::new(current.size());
            for node in &component {
                in_component.insert(node.index());
            }
            let entries: Vec<NodeId> = component
                .iter()
                .copied()
                .filter(|&node| {
                    current
                        .incoming_edges(node)
                        .iter()
                        .any(|pred| !in_component.contains(pred.index()))
                })
                .collect();

            let header = heaviest(&weights, &entries)
                .or_else(|| heaviest(&weights, &component))
                .unwrap_or(component[0]);

            let mut rest: Vec<NodeId> = component
                .iter()
                .copied()
                .filter(|&n| n != header)
                .collect();
            rest.sort_unstable();

            if entries.len() > 1 {
                let mut domain: Vec<NodeId> = Vec::new();
                for node in &rest {
                    for &pred in current.incoming_edges(*node) {
                        if !in_component.contains(pred.index()) && !domain.contains(&pred) {
                            domain.push(pred);
                        }
                    }
                }
                domain.sort_unstable();

                let copies = backend.split(&domain, &rest);
                if copies.len() != rest.len() {
                    return Err(graph_error!(
                        "splitting backend returned {} copies for {} nodes",
                        copies.len(),
                        rest.len()
                    ));
                }
                apply_split(&mut edges, &mut weights, &domain, &rest, &copies)?;
                worklist.push(copies);
                split = true;
                break;
            }

            if !rest.is_empty() {
                subregions.push(rest);
            }
        }

        if split {
            worklist.push(region);
        } else {
            worklist.extend(subregions);
        }
    }

    Ok(snapshot(&edges))
}

/// Picks the node with the largest weight, preferring the lower index on ties.
fn heaviest(weights: &[usize], candidates: &[NodeId]) -> Option<NodeId> {
    candidates.iter().copied().max_by(|a, b| {
        weights[a.index()]
            .cmp(&weights[b.index()])
            .then(b.index().cmp(&a.index()))
    })
}

fn snapshot(edges: &[Vec<NodeId>]) -> Graph {
    let mut builder = GraphBuilder::new(edges.len());
    for (from, targets) in edges.iter().enumerate() {
        for to in targets {
            builder.add_edge(from, to.index());
        }
    }
    builder.build()
}

fn apply_split(
    edges: &mut Vec<Vec<NodeId>>,
    weights: &mut Vec<usize>,
    domain: &[NodeId],
    nodes: &[NodeId],
    copies: &[NodeId],
) -> Result<()> {
    let map_to_copy = |target: NodeId| -> Option<NodeId> {
        nodes
            .iter()
            .position(|&n| n == target)
            .map(|pos| copies[pos])
    };

    for (original, copy) in nodes.iter().zip(copies) {
        if copy.index() != edges.len() {
            return Err(graph_error!(
                "split copy {} is not numbered after the {} existing nodes",
                copy.index(),
                edges.len()
            ));
        }
        let targets: Vec<NodeId> = edges[original.index()]
            .iter()
            .map(|&t| map_to_copy(t).unwrap_or(t))
            .collect();
        edges.push(targets);
        weights.push(weights[original.index()]);
    }

    for source in domain {
        for target in &mut edges[source.index()] {
            if let Some(copy) = map_to_copy(*target) {
                *target = copy;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(size: usize, edges: &[(usize, usize)]) -> Graph {
        let mut builder = GraphBuilder::new(size);
        for &(from, to) in edges {
            builder.add_edge(from, to);
        }
        builder.build()
    }

    /// Backend that only records requests and hands out fresh ids.
    struct Recorder {
        next: usize,
        splits: Vec<(Vec<NodeId>, Vec<NodeId>)>,
    }

    impl GraphSplittingBackend for Recorder {
        fn split(&mut self, domain: &[NodeId], nodes: &[NodeId]) -> Vec<NodeId> {
            self.splits.push((domain.to_vec(), nodes.to_vec()));
            let copies = (self.next..self.next + nodes.len()).map(NodeId::new).collect();
            self.next += nodes.len();
            copies
        }
    }

    #[test]
    fn test_reducible_loop() -> Result<()> {
        let g = graph(3, &[(0, 1), (1, 2), (2, 1)]);
        assert!(!is_irreducible(&g)?);
        Ok(())
    }

    #[test]
    fn test_two_entry_loop_is_irreducible() -> Result<()> {
        // 0 -> 1, 0 -> 2, 1 <-> 2
        let g = graph(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        assert!(is_irreducible(&g)?);
        Ok(())
    }

    #[test]
    fn test_split_two_entry_loop() -> Result<()> {
        let g = graph(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let mut backend = Recorder {
            next: 3,
            splits: Vec::new(),
        };
        let result = split_irreducible_graph(&g, &[1, 5, 1], &mut backend)?;

        assert_eq!(backend.splits.len(), 1);
        assert_eq!(backend.splits[0], (vec![NodeId::new(0)], vec![NodeId::new(2)]));
        assert_eq!(result.size(), 4);
        assert!(!is_irreducible(&result)?);
        Ok(())
    }

    #[test]
    fn test_split_requires_entry() {
        let g = graph(2, &[(0, 1), (1, 0)]);
        let mut backend = Recorder {
            next: 2,
            splits: Vec::new(),
        };
        assert!(split_irreducible_graph(&g, &[1, 1], &mut backend).is_err());
    }

    #[test]
    fn test_reducible_graph_is_untouched() -> Result<()> {
        let g = graph(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let mut backend = Recorder {
            next: 4,
            splits: Vec::new(),
        };
        let result = split_irreducible_graph(&g, &[1; 4], &mut backend)?;
        assert!(backend.splits.is_empty());
        assert_eq!(result, g);
        Ok(())
    }
}
