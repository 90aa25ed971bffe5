//! Structural helpers shared by the passes.
//!
//! Control-flow graphs are derived from programs on demand and never cached: every
//! pass that edits terminators or try/catch regions simply rebuilds the graph.

use rustc_hash::FxHashMap;

use crate::{
    model::{
        instruction::{BlockId, InstructionKind, Variable},
        program::{BasicBlock, Program},
    },
    utils::{
        graph::{Graph, GraphBuilder},
        BitSet,
    },
};

/// Builds the control-flow graph of a program, including an edge from every
/// protected block to each of its handlers.
#[must_use]
pub fn build_control_flow_graph(program: &Program) -> Graph {
    let mut builder = GraphBuilder::new(program.block_count());
    for (index, block) in program.blocks().iter().enumerate() {
        for target in block.successors() {
            builder.add_edge(index, target.index());
        }
        for try_catch in &block.try_catches {
            builder.add_edge(index, try_catch.handler.index());
        }
    }
    builder.build()
}

/// Builds the control-flow graph of a program from terminators only.
#[must_use]
pub fn build_control_flow_graph_without_exceptions(program: &Program) -> Graph {
    let mut builder = GraphBuilder::new(program.block_count());
    for (index, block) in program.blocks().iter().enumerate() {
        for target in block.successors() {
            builder.add_edge(index, target.index());
        }
    }
    builder.build()
}

/// Returns the distinct handlers of a block, innermost first.
#[must_use]
pub fn exception_successors(block: &BasicBlock) -> Vec<BlockId> {
    let mut result: Vec<BlockId> = Vec::with_capacity(block.try_catches.len());
    for try_catch in &block.try_catches {
        if !result.contains(&try_catch.handler) {
            result.push(try_catch.handler);
        }
    }
    result
}

/// Returns the blocks reachable from block 0, following exception edges.
#[must_use]
pub fn reachable_blocks(program: &Program) -> BitSet {
    let mut reached = BitSet::new(program.block_count());
    if program.is_empty() {
        return reached;
    }
    let mut stack = vec![BlockId(0)];
    reached.insert(0);
    while let Some(block) = stack.pop() {
        let block = program.block(block);
        for next in block
            .successors()
            .into_iter()
            .chain(block.try_catches.iter().map(|tc| tc.handler))
        {
            if !reached.contains(next.index()) {
                reached.insert(next.index());
                stack.push(next);
            }
        }
    }
    reached
}

/// Empties every block unreachable from the entry and returns how many were cleared.
///
/// Block indices are preserved, so no remapping is necessary. Phi incomings from
/// cleared blocks are removed.
pub fn clear_unreachable_blocks(program: &mut Program) -> usize {
    let reached = reachable_blocks(program);
    let mut cleared = 0;
    for index in 0..program.block_count() {
        if reached.contains(index) || program.block(BlockId(index)).is_empty() {
            continue;
        }
        *program.block_mut(BlockId(index)) = BasicBlock::default();
        cleared += 1;
    }
    if cleared > 0 {
        for block in program.blocks_mut() {
            for phi in &mut block.phis {
                phi.incomings
                    .retain(|incoming| reached.contains(incoming.source.index()));
            }
        }
    }
    cleared
}

/// Gives every handler that is also entered by normal control flow, or that is
/// the entry block, a landing block of its own and returns how many were created.
///
/// A landing block jumps to the handler and takes over its block-level exception
/// variable; every try/catch region targeting the handler is redirected to it.
/// Afterwards handlers are only entered through exception edges. Only valid
/// before SSA construction: existing phis are not updated.
pub fn isolate_exception_handlers(program: &mut Program) -> usize {
    let block_count = program.block_count();
    let mut entered_normally = BitSet::new(block_count);
    entered_normally.insert(0);
    for block in program.blocks() {
        for successor in block.successors() {
            entered_normally.insert(successor.index());
        }
    }

    let mut landings: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for index in 0..block_count {
        for handler in exception_successors(program.block(BlockId(index))) {
            if !entered_normally.contains(handler.index()) || landings.contains_key(&handler) {
                continue;
            }
            let landing = program.create_basic_block();
            let exception_variable = program.block_mut(handler).exception_variable.take();
            let block = program.block_mut(landing);
            block.exception_variable = exception_variable;
            block.push(InstructionKind::Jump { target: handler });
            landings.insert(handler, landing);
        }
    }

    if !landings.is_empty() {
        for block in program.blocks_mut() {
            for try_catch in &mut block.try_catches {
                if let Some(&landing) = landings.get(&try_catch.handler) {
                    try_catch.handler = landing;
                }
            }
        }
    }
    landings.len()
}

/// Per-block weights for node splitting: the instruction count plus one.
#[must_use]
pub fn block_weights(program: &Program) -> Vec<usize> {
    program
        .blocks()
        .iter()
        .map(|block| block.instructions.len() + block.phis.len() + 1)
        .collect()
}

/// Calls `f` for every variable a block defines: handler exception variables, phi
/// receivers, instruction receivers and joint receivers, in that order.
pub fn visit_block_definitions(block: &BasicBlock, mut f: impl FnMut(Variable)) {
    if let Some(var) = block.exception_variable {
        f(var);
    }
    for phi in &block.phis {
        f(phi.receiver);
    }
    for insn in &block.instructions {
        if let Some(var) = insn.kind.defined_variable() {
            f(var);
        }
    }
    for try_catch in &block.try_catches {
        for joint in &try_catch.joints {
            f(joint.receiver);
        }
    }
}

/// Returns the block defining each variable of an SSA program.
///
/// Variables without a definition (parameters) map to `None`. Exception variables
/// of try/catch regions are reported at the protected block, matching the
/// incoming edge of the handler's exception phi.
#[must_use]
pub fn definition_places(program: &Program) -> Vec<Option<BlockId>> {
    let mut places = vec![None; program.variable_count()];
    for (index, block) in program.blocks().iter().enumerate() {
        let id = BlockId(index);
        visit_block_definitions(block, |var| {
            if let Some(slot) = places.get_mut(var.index()) {
                *slot = Some(id);
            }
        });
        for try_catch in &block.try_catches {
            if let Some(var) = try_catch.exception_variable {
                if let Some(slot) = places.get_mut(var.index()) {
                    *slot = Some(id);
                }
            }
        }
    }
    places
}

/// Rewrites every block reference inside a block: terminator targets, handlers
/// and phi incoming sources.
pub fn map_block_references(block: &mut BasicBlock, mut f: impl FnMut(BlockId) -> BlockId) {
    if let Some(last) = block.instructions.last_mut() {
        last.kind.map_targets(&mut f);
    }
    for try_catch in &mut block.try_catches {
        try_catch.handler = f(try_catch.handler);
    }
    for phi in &mut block.phis {
        for incoming in &mut phi.incomings {
            incoming.source = f(incoming.source);
        }
    }
}

/// Rewrites every variable a block mentions, definitions and uses alike.
pub fn map_block_variables(block: &mut BasicBlock, mut f: impl FnMut(Variable) -> Variable) {
    if let Some(var) = &mut block.exception_variable {
        *var = f(*var);
    }
    for phi in &mut block.phis {
        phi.receiver = f(phi.receiver);
        for incoming in &mut phi.incomings {
            incoming.value = f(incoming.value);
        }
    }
    for insn in &mut block.instructions {
        insn.kind.map_uses(&mut f);
        insn.kind.map_definition(&mut f);
    }
    for try_catch in &mut block.try_catches {
        if let Some(var) = &mut try_catch.exception_variable {
            *var = f(*var);
        }
        for joint in &mut try_catch.joints {
            joint.receiver = f(joint.receiver);
            for source in &mut joint.source_variables {
                *source = f(*source);
            }
        }
    }
}

/// Replaces `from` by `to` in the phi incoming sources of every successor of
/// `block`, normal and exceptional.
pub fn redirect_successor_phis(program: &mut Program, block: BlockId, from: BlockId, to: BlockId) {
    let source = program.block(block);
    let mut successors = source.successors();
    successors.extend(exception_successors(source));
    for successor in successors {
        program.block_mut(successor).redirect_phi_sources(from, to);
    }
}
