//! Node splitting backend that duplicates basic blocks of a program.

use rustc_hash::FxHashMap;

use crate::{
    model::{util::map_block_references, BlockId, Program},
    utils::graph::{algorithms::GraphSplittingBackend, NodeId},
};

/// Applies node splits requested by
/// [`crate::utils::graph::algorithms::split_irreducible_graph`] to the blocks of a
/// program that is not yet in SSA form.
///
/// Before SSA construction, copying a block verbatim is always valid: variables may
/// have any number of definitions, so the copy can keep the original's variables.
pub struct ProgramNodeSplitter<'a> {
    program: &'a mut Program,
    copies: usize,
}

impl<'a> ProgramNodeSplitter<'a> {
    /// Creates a backend for `program`.
    pub fn new(program: &'a mut Program) -> Self {
        ProgramNodeSplitter { program, copies: 0 }
    }

    /// Number of blocks created so far.
    #[must_use]
    pub fn copies(&self) -> usize {
        self.copies
    }
}

impl GraphSplittingBackend for ProgramNodeSplitter<'_> {
    fn split(&mut self, domain: &[NodeId], nodes: &[NodeId]) -> Vec<NodeId> {
        let mut mapping: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        let mut result = Vec::with_capacity(nodes.len());
        for node in nodes {
            let copy = self.program.create_basic_block();
            mapping.insert(BlockId(node.index()), copy);
            result.push(NodeId::new(copy.index()));
        }
        self.copies += nodes.len();

        for node in nodes {
            let original = BlockId(node.index());
            let mut block = self.program.block(original).clone();
            map_block_references(&mut block, |target| {
                mapping.get(&target).copied().unwrap_or(target)
            });
            if let Some(&copy) = mapping.get(&original) {
                *self.program.block_mut(copy) = block;
            }
        }

        for node in domain {
            let block = self.program.block_mut(BlockId(node.index()));
            if let Some(last) = block.instructions.last_mut() {
                last.kind
                    .map_targets(|target| mapping.get(&target).copied().unwrap_or(target));
            }
            for try_catch in &mut block.try_catches {
                if let Some(&copy) = mapping.get(&try_catch.handler) {
                    try_catch.handler = copy;
                }
            }
        }
        result
    }
}
