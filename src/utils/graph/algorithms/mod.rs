//! Graph algorithms for program analysis.
//!
//! # Available Algorithms
//!
//! ## Loops and Reducibility
//!
//! - [`find_back_edges`] - Back edges found by an iterative depth-first search
//! - [`is_irreducible`] - Checks whether some loop has more than one entry
//! - [`split_irreducible_graph`] - Node splitting through a [`GraphSplittingBackend`]
//!
//! ## Dominator Analysis
//!
//! - [`build_dominator_tree`] - Dominator tree rooted at every entry node
//! - [`compute_dominators`] - Dominator tree for an explicit entry node
//! - [`find_dominance_frontiers`] - Dominance frontiers for phi placement
//! - [`build_dominator_graph`] - The dominator tree as a [`super::Graph`]
//!
//! ## Strongly Connected Components
//!
//! - [`find_strongly_connected_components`] - Iterative Tarjan with a node filter
//! - [`strongly_connected_components`] - Components of the whole graph
//!
//! # Algorithm Selection
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Back edges | O(V + E) | Loop detection |
//! | Dominators | O(E α(V)) | SSA construction |
//! | Frontiers | O(V + E + F) | Phi placement |
//! | SCC | O(V + E) | Irreducible loops, dataflow merging, recursion |

mod backedges;
mod dominators;
mod irreducible;
mod scc;

pub use backedges::find_back_edges;
pub use dominators::{
    build_dominator_graph, build_dominator_tree, compute_dominators, compute_dominators_from,
    find_dominance_frontiers, DominatorTree,
};
pub use irreducible::{is_irreducible, split_irreducible_graph, GraphSplittingBackend};
pub use scc::{find_strongly_connected_components, is_cyclic_component, strongly_connected_components};
