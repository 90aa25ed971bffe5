//! Structural validation of SSA programs.

use crate::{
    model::{util::build_control_flow_graph, BlockId, Program, Variable},
    utils::graph::{algorithms::compute_dominators, NodeId},
    Result,
};

/// Where inside its block a variable is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// Receiver and parameters, defined before the entry block
    Parameter,
    /// Phi receiver or caught exception, defined on block entry
    Entry,
    /// Defined by the instruction with this index
    Instruction(usize),
    /// Joint receiver or per-region exception variable, defined when control leaves
    /// the block
    Exit,
}

/// Checks that `program` is in SSA form.
///
/// Every variable must have exactly one definition, and every use must be
/// dominated by it: instruction operands by a definition earlier in the same block
/// or in a dominating block, phi incoming values at the end of the incoming source
/// block, joint sources inside the protected block. Variables `0..=parameter_count`
/// are the receiver and parameters and are defined on entry. Unreachable blocks are
/// ignored.
///
/// # Errors
///
/// Returns [`crate::Error::Ssa`] describing the first violation found.
pub fn verify_ssa(program: &Program, parameter_count: usize) -> Result<()> {
    if program.is_empty() {
        return Ok(());
    }
    let variable_count = program.variable_count();
    let mut definitions: Vec<Option<(BlockId, Position)>> = vec![None; variable_count];

    let mut define = |var: Variable, block: BlockId, position: Position| -> Result<()> {
        let slot = definitions
            .get_mut(var.index())
            .ok_or_else(|| ssa_error!("{} is outside the variable table", var))?;
        if slot.is_some() {
            return Err(ssa_error!("{} is defined more than once", var));
        }
        *slot = Some((block, position));
        Ok(())
    };

    for index in 0..=parameter_count.min(variable_count.saturating_sub(1)) {
        define(Variable(index), BlockId(0), Position::Parameter)?;
    }
    for (index, block) in program.blocks().iter().enumerate() {
        let id = BlockId(index);
        if let Some(var) = block.exception_variable {
            define(var, id, Position::Entry)?;
        }
        for phi in &block.phis {
            define(phi.receiver, id, Position::Entry)?;
        }
        for (position, insn) in block.instructions.iter().enumerate() {
            if let Some(var) = insn.kind.defined_variable() {
                define(var, id, Position::Instruction(position))?;
            }
        }
        for try_catch in &block.try_catches {
            if let Some(var) = try_catch.exception_variable {
                define(var, id, Position::Exit)?;
            }
            for joint in &try_catch.joints {
                define(joint.receiver, id, Position::Exit)?;
            }
        }
    }

    let cfg = build_control_flow_graph(program);
    let dom = compute_dominators(&cfg, NodeId::new(0));
    let check = |var: Variable, block: BlockId, before: Option<usize>| -> Result<()> {
        let Some((def_block, position)) = definitions.get(var.index()).copied().flatten() else {
            return Err(ssa_error!("{} used in {} but never defined", var, block));
        };
        let ok = match position {
            Position::Parameter => true,
            _ if def_block != block => {
                dom.dominates(NodeId::new(def_block.index()), NodeId::new(block.index()))
            }
            Position::Entry => true,
            Position::Instruction(at) => before.map_or(true, |limit| at < limit),
            Position::Exit => before.is_none(),
        };
        if ok {
            Ok(())
        } else {
            Err(ssa_error!(
                "use of {} in {} is not dominated by its definition in {}",
                var,
                block,
                def_block
            ))
        }
    };

    for (index, block) in program.blocks().iter().enumerate() {
        let id = BlockId(index);
        if !dom.is_reachable(NodeId::new(index)) {
            continue;
        }
        for (position, insn) in block.instructions.iter().enumerate() {
            let mut result = Ok(());
            insn.kind.visit_uses(|var| {
                if result.is_ok() {
                    result = check(var, id, Some(position));
                }
            });
            result?;
        }
        for phi in &block.phis {
            for incoming in &phi.incomings {
                if dom.is_reachable(NodeId::new(incoming.source.index())) {
                    check(incoming.value, incoming.source, None)?;
                }
            }
        }
        for try_catch in &block.try_catches {
            for joint in &try_catch.joints {
                for &source in &joint.source_variables {
                    check(source, id, None)?;
                }
            }
        }
    }
    Ok(())
}
