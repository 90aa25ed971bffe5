//! Node and site records of the call graph.

use crate::model::{FieldReference, MethodReference, TextLocation};

/// Handle of a method node inside a [`crate::callgraph::CallGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallGraphNodeId(pub(crate) usize);

impl CallGraphNodeId {
    /// Returns the dense index of this node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One call from `caller` to `callee` at a source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Position of the call in the caller, if known
    pub location: Option<TextLocation>,
    /// The called method
    pub callee: CallGraphNodeId,
    /// The calling method
    pub caller: CallGraphNodeId,
}

/// One read or write of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldAccessSite {
    /// Position of the access, if known
    pub location: Option<TextLocation>,
    /// The accessing method
    pub method: CallGraphNodeId,
    /// The accessed field
    pub field: FieldReference,
}

/// One use of a class: construction, constant, cast or initialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassAccessSite {
    /// Position of the access, if known
    pub location: Option<TextLocation>,
    /// The accessing method
    pub method: CallGraphNodeId,
    /// The accessed class
    pub class_name: String,
}

/// A method of the call graph with indices into the graph's site tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallGraphNode {
    /// The method this node stands for
    pub method: MethodReference,
    /// Calls made by this method
    pub call_sites: Vec<usize>,
    /// Calls made to this method
    pub caller_call_sites: Vec<usize>,
    /// Field accesses performed by this method
    pub field_access_sites: Vec<usize>,
    /// Class accesses performed by this method
    pub class_access_sites: Vec<usize>,
}

impl CallGraphNode {
    pub(crate) fn new(method: MethodReference) -> Self {
        Self {
            method,
            call_sites: Vec::new(),
            caller_call_sites: Vec::new(),
            field_access_sites: Vec::new(),
            class_access_sites: Vec::new(),
        }
    }

    /// Returns `true` if the method calls nothing.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.call_sites.is_empty()
    }
}
