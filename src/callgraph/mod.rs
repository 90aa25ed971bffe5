//! Inter-procedural call graph of the reachable program.
//!
//! The dependency analysis records every call, field access and class use it
//! interprets, together with the source position. The graph is used for
//! diagnostics (who reaches a missing method) and for recursion detection; the
//! analysis itself never reads it back.
//!
//! # Components
//!
//! - [`CallGraph`] - node arena plus flat site tables
//! - [`CallGraphNode`] - one method with indices of its sites
//! - [`CallSite`], [`FieldAccessSite`], [`ClassAccessSite`] - deduplicated records
//!
//! Binary serialization lives in [`crate::cache::CallGraphIO`].

mod graph;
mod site;

pub use graph::{CallGraph, CallGraphStats};
pub use site::{CallGraphNode, CallGraphNodeId, CallSite, ClassAccessSite, FieldAccessSite};
