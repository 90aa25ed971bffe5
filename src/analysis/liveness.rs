//! Live variable analysis over programs, in or out of SSA form.
//!
//! A variable is *live* on entry to a block if some path from the block start
//! reaches a use of the variable without passing through a definition of it.
//!
//! # Algorithm
//!
//! This is a backward data flow analysis solved with a worklist:
//!
//! - `USE[B]` = variables read in B before any definition in B
//! - `DEF[B]` = variables defined in B
//! - `END[B]` = phi incoming values flowing out of B, plus joint sources
//! - `OUT[B]` = `END[B]` ∪ ⋃{`IN[S]` | S a normal successor of B}
//! - `IN[B]` = `USE[B]` ∪ (`OUT[B]` - `DEF[B]`) ∪ ⋃{`IN[H]` | H a handler of B}
//!
//! Handlers contribute to the *entry* of a protected block rather than its exit:
//! the protected code may throw before any of its own definitions executed.

use std::collections::VecDeque;

use crate::{
    model::{
        util::{build_control_flow_graph, exception_successors},
        BlockId, Program, Variable,
    },
    utils::{
        graph::{NodeId, Predecessors},
        BitSet,
    },
};

/// Live-in sets per block.
#[derive(Debug, Clone)]
pub struct LivenessAnalyzer {
    live_in: Vec<BitSet>,
    variable_count: usize,
}

impl LivenessAnalyzer {
    /// Computes live-in sets for every block of `program`.
    #[must_use]
    pub fn analyze(program: &Program) -> Self {
        let variable_count = program.variable_count();
        let block_count = program.block_count();
        let cfg = build_control_flow_graph(program);

        // Caught exceptions are defined on handler entry; in SSA form the per-region
        // exception variable is also considered defined by the protected block.
        let mut entry_defs = vec![BitSet::new(variable_count); block_count];
        let mut end_sets = vec![BitSet::new(variable_count); block_count];
        for (index, block) in program.blocks().iter().enumerate() {
            if let Some(var) = block.exception_variable {
                entry_defs[index].insert(var.index());
            }
            for try_catch in &block.try_catches {
                if let Some(var) = try_catch.exception_variable {
                    entry_defs[try_catch.handler.index()].insert(var.index());
                    entry_defs[index].insert(var.index());
                }
                for joint in &try_catch.joints {
                    entry_defs[index].insert(joint.receiver.index());
                    for source in &joint.source_variables {
                        end_sets[index].insert(source.index());
                    }
                }
            }
            for phi in &block.phis {
                for incoming in &phi.incomings {
                    if let Some(end) = end_sets.get_mut(incoming.source.index()) {
                        end.insert(incoming.value.index());
                    }
                }
            }
        }

        let mut use_sets = Vec::with_capacity(block_count);
        let mut def_sets = Vec::with_capacity(block_count);
        for (block, mut defs) in program.blocks().iter().zip(entry_defs) {
            let mut uses = BitSet::new(variable_count);
            for phi in &block.phis {
                defs.insert(phi.receiver.index());
            }
            for insn in &block.instructions {
                insn.kind.visit_uses(|var| {
                    if !defs.contains(var.index()) {
                        uses.insert(var.index());
                    }
                });
                if let Some(var) = insn.kind.defined_variable() {
                    defs.insert(var.index());
                }
            }
            use_sets.push(uses);
            def_sets.push(defs);
        }

        let handlers: Vec<Vec<BlockId>> = program
            .blocks()
            .iter()
            .map(exception_successors)
            .collect();
        let successors: Vec<Vec<BlockId>> = program
            .blocks()
            .iter()
            .map(|block| block.successors())
            .collect();

        let mut live_in = vec![BitSet::new(variable_count); block_count];
        let mut queued = BitSet::new(block_count);
        let mut worklist: VecDeque<usize> = (0..block_count).rev().collect();
        queued.fill();

        while let Some(index) = worklist.pop_front() {
            queued.remove(index);

            let mut live = end_sets[index].clone();
            for succ in &successors[index] {
                live.union_with(&live_in[succ.index()]);
            }
            live.difference_with(&def_sets[index]);
            live.union_with(&use_sets[index]);
            for handler in &handlers[index] {
                live.union_with(&live_in[handler.index()]);
            }

            if live != live_in[index] {
                live_in[index] = live;
                for pred in cfg.predecessors(NodeId::new(index)) {
                    if !queued.contains(pred.index()) {
                        queued.insert(pred.index());
                        worklist.push_back(pred.index());
                    }
                }
            }
        }

        LivenessAnalyzer {
            live_in,
            variable_count,
        }
    }

    /// Returns `true` if `var` is live on entry to `block`.
    #[must_use]
    pub fn live_in(&self, block: BlockId, var: Variable) -> bool {
        self.live_in
            .get(block.index())
            .is_some_and(|set| set.contains_or_false(var.index()))
    }

    /// The live-in set of a block.
    #[must_use]
    pub fn live_in_set(&self, block: BlockId) -> &BitSet {
        &self.live_in[block.index()]
    }

    /// Number of variables tracked.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }
}
