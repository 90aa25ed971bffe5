//! Pruned SSA construction (Cytron et al.) over programs with exception edges.
//!
//! # Algorithm Overview
//!
//! 1. **Cleanup**: blocks unreachable from the entry are emptied, handlers that
//!    are also entered normally get a landing block of their own, and irreducible
//!    control flow is made reducible by node splitting. Copies the splitting
//!    leaves without predecessors are emptied again
//! 2. **Phi Placement**: for each variable, a worklist walks the iterated dominance
//!    frontier of its defining blocks. A phi is only placed where the variable is
//!    live. A variable assigned inside a protected block is also merged at every
//!    handler of that block, because the handler may observe any of its versions
//! 3. **Variable Renaming**: blocks are visited in dominator-tree preorder with an
//!    explicit stack. Each task carries its own copy of the current-definition
//!    slots
//!
//! Values crossing an exception edge are modelled with [`TryCatchJoint`]s: when a
//! handler phi needs the value of a variable redefined inside the protected block,
//! the incoming value is a joint receiver whose sources are every version the
//! variable had while the block executed.
//!
//! The caught exception of each try/catch region is renamed to a fresh variable
//! per region, and the handler receives an extra phi merging them.

use crate::{
    analysis::{liveness::LivenessAnalyzer, ssa::splitter::ProgramNodeSplitter},
    model::{
        util::{
            block_weights, build_control_flow_graph, clear_unreachable_blocks,
            exception_successors, isolate_exception_handlers,
        },
        BlockId, Incoming, Phi, Program, TryCatchJoint, ValueType, Variable,
    },
    utils::{
        graph::{
            algorithms::{
                compute_dominators, find_dominance_frontiers, is_irreducible,
                split_irreducible_graph, DominatorTree,
            },
            Graph, NodeId,
        },
        BitSet,
    },
    Result,
};
use rustc_hash::FxHashMap;

/// Converts programs to SSA form.
///
/// # Usage
///
/// ```rust,ignore
/// use aotflow::analysis::ssa::SsaTransformer;
///
/// // `int max(int a, int b)` as a static method: slot 0 is unused, a = slot 1, b = slot 2
/// SsaTransformer::transform(&mut program, &[ValueType::INTEGER, ValueType::INTEGER])?;
/// ```
pub struct SsaTransformer<'a> {
    program: &'a mut Program,
    cfg: Graph,
    dom: DominatorTree,
    /// Original variable of each phi placed in a block, by phi index
    phi_origins: Vec<Vec<Variable>>,
    /// Try/catch regions (protected block, region index) catching into each block
    caught: Vec<Vec<(BlockId, usize)>>,
}

/// Definitions made by the block being renamed: entry version and every new
/// version, per original variable.
type BlockVersions = FxHashMap<Variable, (Option<Variable>, Vec<Variable>)>;

impl<'a> SsaTransformer<'a> {
    /// Transforms `program` to SSA form in place.
    ///
    /// `parameters` are the declared parameter types, without the receiver. On
    /// input, variable 0 holds the receiver and parameters occupy consecutive slots
    /// starting at 1, `long` and `double` taking two. On output parameters are the
    /// variables `1..=parameters.len()`.
    ///
    /// Programs without blocks are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Ssa`] if an instruction reads a variable that has no
    /// dominating definition.
    pub fn transform(program: &'a mut Program, parameters: &[ValueType]) -> Result<()> {
        if program.is_empty() {
            return Ok(());
        }

        let cleared = clear_unreachable_blocks(program);
        if cleared > 0 {
            tracing::trace!(cleared = cleared, "emptied unreachable blocks before SSA construction");
        }

        let landings = isolate_exception_handlers(program);
        if landings > 0 {
            tracing::trace!(landings = landings, "isolated exception handlers");
        }

        let mut cfg = build_control_flow_graph(program);
        if !cfg.entry_nodes().is_empty() && is_irreducible(&cfg)? {
            let weights = block_weights(program);
            let mut splitter = ProgramNodeSplitter::new(&mut *program);
            split_irreducible_graph(&cfg, &weights, &mut splitter)?;
            let copies = splitter.copies();
            // copies of nodes no outside edge entered are never reached
            let orphaned = clear_unreachable_blocks(program);
            tracing::debug!(copies = copies, orphaned = orphaned, "split irreducible control flow");
            cfg = build_control_flow_graph(program);
        }

        let dom = compute_dominators(&cfg, NodeId::new(0));
        let block_count = program.block_count();
        let mut transformer = SsaTransformer {
            program,
            cfg,
            dom,
            phi_origins: vec![Vec::new(); block_count],
            caught: vec![Vec::new(); block_count],
        };
        let slots = transformer.apply_signature(parameters);
        transformer.place_phis();
        transformer.rename_variables(slots)
    }

    /// Seeds the receiver and parameters as the initial definitions.
    fn apply_signature(&mut self, parameters: &[ValueType]) -> Vec<Option<Variable>> {
        while self.program.variable_count() <= parameters.len() {
            self.program.create_variable();
        }
        let width: usize = parameters.iter().map(|p| if p.is_wide() { 2 } else { 1 }).sum();
        let mut slots = vec![None; self.program.variable_count().max(width + 1)];

        slots[0] = Some(Variable(0));
        let mut index = 1;
        for (i, parameter) in parameters.iter().enumerate() {
            slots[index] = Some(Variable(i + 1));
            index += 1;
            if parameter.is_wide() {
                slots[index] = Some(Variable(i + 1));
                index += 1;
            }
        }
        slots
    }

    fn place_phis(&mut self) {
        let variable_count = self.program.variable_count();
        let block_count = self.program.block_count();
        let frontiers = find_dominance_frontiers(&self.cfg, &self.dom);
        let liveness = LivenessAnalyzer::analyze(self.program);

        let mut def_blocks: Vec<Vec<BlockId>> = vec![Vec::new(); variable_count];
        for (index, block) in self.program.blocks().iter().enumerate() {
            for insn in &block.instructions {
                if let Some(var) = insn.kind.defined_variable() {
                    let blocks = &mut def_blocks[var.index()];
                    if blocks.last() != Some(&BlockId(index)) {
                        blocks.push(BlockId(index));
                    }
                }
            }
        }
        let handlers: Vec<Vec<BlockId>> = self
            .program
            .blocks()
            .iter()
            .map(exception_successors)
            .collect();

        let mut has_phi: Vec<BitSet> = vec![BitSet::new(variable_count); block_count];
        let mut worklist: Vec<BlockId> = Vec::new();
        for (var_index, blocks) in def_blocks.iter().enumerate() {
            let var = Variable(var_index);
            worklist.clear();
            worklist.extend(blocks.iter().copied());
            while let Some(block) = worklist.pop() {
                let defines = blocks.contains(&block);
                let targets = frontiers[block.index()]
                    .iter()
                    .map(|node| BlockId(node.index()))
                    .chain(
                        handlers[block.index()]
                            .iter()
                            .copied()
                            .filter(|_| defines),
                    );
                for target in targets {
                    if has_phi[target.index()].contains(var_index)
                        || !liveness.live_in(target, var)
                    {
                        continue;
                    }
                    has_phi[target.index()].insert(var_index);
                    self.program.block_mut(target).phis.push(Phi::new(var));
                    self.phi_origins[target.index()].push(var);
                    worklist.push(target);
                }
            }
        }

        for (index, block) in self.program.blocks().iter().enumerate() {
            for (region, try_catch) in block.try_catches.iter().enumerate() {
                if try_catch.exception_variable.is_some() {
                    self.caught[try_catch.handler.index()].push((BlockId(index), region));
                }
            }
        }
    }

    /// Allocates a fresh variable carrying the debug names of `origin`.
    fn fresh(&mut self, origin: Variable) -> Variable {
        let result = self.program.create_variable();
        if let Some(names) = self
            .program
            .variables()
            .get(origin.index())
            .map(|info| info.debug_names.clone())
        {
            self.program.variable_mut(result).debug_names.extend(names);
        }
        result
    }

    fn rename_variables(&mut self, initial: Vec<Option<Variable>>) -> Result<()> {
        let block_count = self.program.block_count();
        let mut exception_phis: Vec<Option<Phi>> = vec![None; block_count];
        let mut processed = BitSet::new(block_count);
        let mut stack: Vec<(BlockId, Vec<Option<Variable>>)> = vec![(BlockId(0), initial)];

        while let Some((block, mut slots)) = stack.pop() {
            if processed.contains(block.index()) {
                continue;
            }
            processed.insert(block.index());

            if let Some(var) = self.program.block(block).exception_variable {
                let renamed = self.fresh(var);
                set_slot(&mut slots, var, renamed);
                self.program.block_mut(block).exception_variable = Some(renamed);
            }

            for (index, origin) in self.phi_origins[block.index()].clone().into_iter().enumerate() {
                let renamed = self.fresh(origin);
                set_slot(&mut slots, origin, renamed);
                self.program.block_mut(block).phis[index].receiver = renamed;
            }

            if !self.caught[block.index()].is_empty() {
                exception_phis[block.index()] = Some(self.rename_caught_exception(block, &mut slots));
            }

            let versions = self.rename_instructions(block, &mut slots)?;

            let successors = self.program.block(block).successors();
            for &successor in &successors {
                self.add_incomings(block, successor, &slots);
            }
            self.add_exception_incomings(block, &slots, &versions);

            let children = self.dom.children(NodeId::new(block.index()));
            for child in children.iter().rev() {
                stack.push((BlockId(child.index()), slots.clone()));
            }
        }

        for (index, phi) in exception_phis.into_iter().enumerate() {
            if let Some(phi) = phi {
                self.program.block_mut(BlockId(index)).phis.push(phi);
            }
        }
        Ok(())
    }

    /// Gives every region catching into `handler` its own exception variable and
    /// returns the phi merging them.
    fn rename_caught_exception(&mut self, handler: BlockId, slots: &mut Vec<Option<Variable>>) -> Phi {
        let receiver = self.program.create_variable();
        let mut phi = Phi::new(receiver);
        for (protected, region) in self.caught[handler.index()].clone() {
            let Some(original) = self.program.block(protected).try_catches[region].exception_variable
            else {
                continue;
            };
            set_slot(slots, original, receiver);
            let names = self.program.variable(original).debug_names.clone();
            self.program.variable_mut(receiver).debug_names.extend(names);
            let renamed = self.fresh(original);
            self.program.block_mut(protected).try_catches[region].exception_variable = Some(renamed);
            phi.incomings.push(Incoming {
                source: protected,
                value: renamed,
            });
        }
        phi
    }

    fn rename_instructions(
        &mut self,
        block: BlockId,
        slots: &mut Vec<Option<Variable>>,
    ) -> Result<BlockVersions> {
        let mut versions = BlockVersions::default();
        let mut instructions = std::mem::take(&mut self.program.block_mut(block).instructions);
        let mut outcome = Ok(());
        for insn in &mut instructions {
            outcome = insn.kind.try_map_uses(|var| {
                slots.get(var.index()).copied().flatten().ok_or_else(|| {
                    ssa_error!("variable {} read in {} before any definition", var, block)
                })
            });
            if outcome.is_err() {
                break;
            }
            let Some(origin) = insn.kind.defined_variable() else {
                continue;
            };
            let renamed = self.fresh(origin);
            let previous = slots.get(origin.index()).copied().flatten();
            set_slot(slots, origin, renamed);
            versions
                .entry(origin)
                .or_insert_with(|| (previous, Vec::new()))
                .1
                .push(renamed);
            insn.kind.map_definition(|_| renamed);
        }
        self.program.block_mut(block).instructions = instructions;
        outcome.map(|()| versions)
    }

    /// Appends the incoming edge from `block` to every placed phi of `successor`.
    fn add_incomings(&mut self, block: BlockId, successor: BlockId, slots: &[Option<Variable>]) {
        for (index, origin) in self.phi_origins[successor.index()].clone().into_iter().enumerate() {
            if let Some(value) = slots.get(origin.index()).copied().flatten() {
                self.program.block_mut(successor).phis[index]
                    .incomings
                    .push(Incoming { source: block, value });
            }
        }
    }

    /// Appends incoming edges along exception edges, creating joints for variables
    /// the protected block redefines.
    ///
    /// Handlers are never normal successors here, so each handler phi gets exactly
    /// one incoming from `block`.
    fn add_exception_incomings(
        &mut self,
        block: BlockId,
        slots: &[Option<Variable>],
        versions: &BlockVersions,
    ) {
        let regions: Vec<BlockId> = self
            .program
            .block(block)
            .try_catches
            .iter()
            .map(|tc| tc.handler)
            .collect();
        let mut visited: Vec<BlockId> = Vec::new();
        for (region, handler) in regions.into_iter().enumerate() {
            if visited.contains(&handler) {
                continue;
            }
            visited.push(handler);

            for (index, origin) in self.phi_origins[handler.index()].clone().into_iter().enumerate() {
                let value = match versions.get(&origin) {
                    Some((entry, redefinitions)) => {
                        let receiver = self.fresh(origin);
                        let mut source_variables: Vec<Variable> = entry.iter().copied().collect();
                        source_variables.extend(redefinitions.iter().copied());
                        self.program.block_mut(block).try_catches[region]
                            .joints
                            .push(TryCatchJoint {
                                receiver,
                                source_variables,
                            });
                        receiver
                    }
                    None => match slots.get(origin.index()).copied().flatten() {
                        Some(value) => value,
                        None => continue,
                    },
                };
                self.program.block_mut(handler).phis[index]
                    .incomings
                    .push(Incoming { source: block, value });
            }
        }
    }
}

fn set_slot(slots: &mut Vec<Option<Variable>>, origin: Variable, value: Variable) {
    if origin.index() >= slots.len() {
        slots.resize(origin.index() + 1, None);
    }
    slots[origin.index()] = Some(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::ssa::verify_ssa,
        model::util::reachable_blocks,
        model::{
            BinaryOperation, BranchingCondition, InstructionKind, InvocationType,
            MethodDescriptor, MethodReference, NumericOperandType, TryCatchBlock,
        },
        Error,
    };

    fn int(receiver: usize, constant: i32) -> InstructionKind {
        InstructionKind::IntegerConstant {
            receiver: Variable(receiver),
            constant,
        }
    }

    fn add(receiver: usize, first: usize, second: usize) -> InstructionKind {
        InstructionKind::Binary {
            receiver: Variable(receiver),
            operation: BinaryOperation::Add,
            operand_type: NumericOperandType::Int,
            first: Variable(first),
            second: Variable(second),
        }
    }

    fn branch(operand: usize, consequent: usize, alternative: usize) -> InstructionKind {
        InstructionKind::Branch {
            condition: BranchingCondition::Greater,
            operand: Variable(operand),
            consequent: BlockId(consequent),
            alternative: BlockId(alternative),
        }
    }

    fn jump(target: usize) -> InstructionKind {
        InstructionKind::Jump {
            target: BlockId(target),
        }
    }

    fn exit(value: usize) -> InstructionKind {
        InstructionKind::Exit {
            value: Some(Variable(value)),
        }
    }

    fn program(variables: usize, blocks: Vec<Vec<InstructionKind>>) -> Program {
        let mut program = Program::new();
        for _ in 0..variables {
            program.create_variable();
        }
        for body in blocks {
            let block = program.create_basic_block();
            for kind in body {
                program.block_mut(block).push(kind);
            }
        }
        program
    }

    #[test]
    fn test_diamond_gets_one_phi() -> Result<()> {
        // static int f(int p) { int x; if (p > 0) x = 1; else x = 2; return x; }
        let mut program = program(
            3,
            vec![
                vec![branch(1, 1, 2)],
                vec![int(2, 1), jump(3)],
                vec![int(2, 2), jump(3)],
                vec![exit(2)],
            ],
        );
        SsaTransformer::transform(&mut program, &[ValueType::INTEGER])?;

        let join = program.block(BlockId(3));
        assert_eq!(join.phis.len(), 1);
        let sources: Vec<BlockId> = join.phis[0].incomings.iter().map(|i| i.source).collect();
        assert_eq!(sources, vec![BlockId(1), BlockId(2)]);
        assert_eq!(join.instructions[0].kind.uses(), vec![join.phis[0].receiver]);
        verify_ssa(&program, 1)
    }

    #[test]
    fn test_block_local_variable_gets_no_phi() -> Result<()> {
        // The temporary v3 is defined in both arms but only read where it is defined.
        let mut program = program(
            4,
            vec![
                vec![branch(1, 1, 2)],
                vec![int(3, 1), add(2, 3, 3), jump(3)],
                vec![int(3, 2), add(2, 3, 1), jump(3)],
                vec![exit(2)],
            ],
        );
        SsaTransformer::transform(&mut program, &[ValueType::INTEGER])?;
        assert_eq!(program.block(BlockId(3)).phis.len(), 1);
        verify_ssa(&program, 1)
    }

    #[test]
    fn test_loop_variable_is_merged_at_header() -> Result<()> {
        let mut program = program(
            4,
            vec![
                vec![int(2, 0), jump(1)],
                vec![add(3, 2, 1), InstructionKind::Assign {
                    receiver: Variable(2),
                    assignee: Variable(3),
                }, branch(2, 1, 2)],
                vec![exit(2)],
            ],
        );
        SsaTransformer::transform(&mut program, &[ValueType::INTEGER])?;

        let header = program.block(BlockId(1));
        assert_eq!(header.phis.len(), 1);
        let sources: Vec<BlockId> = header.phis[0].incomings.iter().map(|i| i.source).collect();
        assert!(sources.contains(&BlockId(0)));
        assert!(sources.contains(&BlockId(1)));
        verify_ssa(&program, 1)
    }

    #[test]
    fn test_read_before_definition_fails() {
        let mut program = program(3, vec![vec![exit(2)]]);
        let result = SsaTransformer::transform(&mut program, &[ValueType::INTEGER]);
        assert!(matches!(result, Err(Error::Ssa(_))));
    }

    #[test]
    fn test_empty_program_is_untouched() -> Result<()> {
        let mut program = Program::new();
        SsaTransformer::transform(&mut program, &[])?;
        assert!(program.is_empty());
        assert_eq!(program.variable_count(), 0);
        Ok(())
    }

    #[test]
    fn test_wide_parameters_take_two_slots() -> Result<()> {
        // static int f(long a, int b) { return b; }  with b in slot 3
        let mut program = program(4, vec![vec![exit(3)]]);
        SsaTransformer::transform(&mut program, &[ValueType::LONG, ValueType::INTEGER])?;
        assert_eq!(
            program.block(BlockId(0)).instructions[0].kind.uses(),
            vec![Variable(2)]
        );
        verify_ssa(&program, 2)
    }

    #[test]
    fn test_handler_sees_joint_of_protected_versions() -> Result<()> {
        let call = InstructionKind::Invoke {
            receiver: None,
            instance: None,
            method: MethodReference::new("A", MethodDescriptor::new("risky", vec![], ValueType::Void)),
            arguments: vec![],
            invocation: InvocationType::Special,
        };
        let mut program = program(
            4,
            vec![
                vec![int(1, 1), jump(1)],
                vec![int(1, 2), call, exit(1)],
                vec![add(2, 1, 1), exit(2)],
            ],
        );
        program
            .block_mut(BlockId(1))
            .try_catches
            .push(TryCatchBlock::new(None, Some(Variable(3)), BlockId(2)));
        SsaTransformer::transform(&mut program, &[])?;

        let protected = program.block(BlockId(1));
        let joints = &protected.try_catches[0].joints;
        assert_eq!(joints.len(), 1);
        assert_eq!(joints[0].source_variables.len(), 2);
        let renamed_exception = protected.try_catches[0].exception_variable;
        assert!(renamed_exception.is_some());
        assert_ne!(renamed_exception, Some(Variable(3)));

        let handler = program.block(BlockId(2));
        // one merge for the variable, one for the caught exception
        assert_eq!(handler.phis.len(), 2);
        assert_eq!(handler.phis[0].incomings[0].value, joints[0].receiver);
        assert_eq!(handler.phis[1].incomings[0].value, renamed_exception.unwrap_or(Variable(0)));
        verify_ssa(&program, 0)
    }

    fn risky_call() -> InstructionKind {
        InstructionKind::Invoke {
            receiver: None,
            instance: None,
            method: MethodReference::new("A", MethodDescriptor::new("risky", vec![], ValueType::Void)),
            arguments: vec![],
            invocation: InvocationType::Special,
        }
    }

    /// Blocks the entry cannot reach hold nothing, and no phi merges a value from them.
    fn assert_no_dead_code(program: &Program) {
        let reached = reachable_blocks(program);
        for (index, block) in program.blocks().iter().enumerate() {
            if !reached.contains(index) {
                assert!(block.is_empty(), "unreachable {} still has code", BlockId(index));
                continue;
            }
            for phi in &block.phis {
                for incoming in &phi.incomings {
                    assert!(reached.contains(incoming.source.index()));
                }
            }
        }
    }

    #[test]
    fn test_loop_entered_through_two_handlers_is_split() -> Result<()> {
        // b0: v1 = 0; risky()          (E1 -> b1, any -> b3)
        // b1 -> b2 -> b3 -> b1 | b4, so both handlers enter the same loop
        let mut program = program(
            3,
            vec![
                vec![int(1, 0), risky_call(), exit(1)],
                vec![add(2, 1, 1), add(1, 2, 2), add(1, 1, 2), jump(2)],
                vec![add(1, 1, 1), jump(3)],
                vec![branch(1, 1, 4)],
                vec![exit(1)],
            ],
        );
        program.block_mut(BlockId(0)).try_catches = vec![
            TryCatchBlock::new(Some("E1".into()), None, BlockId(1)),
            TryCatchBlock::new(None, None, BlockId(3)),
        ];
        assert!(is_irreducible(&build_control_flow_graph(&program))?);

        SsaTransformer::transform(&mut program, &[])?;

        // two landing blocks plus at least one copy
        assert!(program.block_count() > 7);
        assert!(!is_irreducible(&build_control_flow_graph(&program))?);
        assert_no_dead_code(&program);
        verify_ssa(&program, 0)
    }

    #[test]
    fn test_handler_entered_normally_gets_landing_block() -> Result<()> {
        // b0: x = 1; risky(); x = 2; risky(); goto b1   (any -> b1)
        // b1: return x
        let mut program = program(
            2,
            vec![
                vec![int(1, 1), risky_call(), int(1, 2), risky_call(), jump(1)],
                vec![exit(1)],
            ],
        );
        program
            .block_mut(BlockId(0))
            .try_catches
            .push(TryCatchBlock::new(None, None, BlockId(1)));

        SsaTransformer::transform(&mut program, &[])?;

        let landing = program.block(BlockId(0)).try_catches[0].handler;
        assert_ne!(landing, BlockId(1));
        assert_eq!(program.block(landing).successors(), vec![BlockId(1)]);

        // the landing merges every version x had inside the protected block
        let joints = &program.block(BlockId(0)).try_catches[0].joints;
        assert_eq!(joints.len(), 1);
        assert_eq!(joints[0].source_variables.len(), 2);
        let landing_phi = &program.block(landing).phis[0];
        assert_eq!(landing_phi.incomings.len(), 1);
        assert_eq!(landing_phi.incomings[0].value, joints[0].receiver);

        let join = program.block(BlockId(1));
        assert_eq!(join.phis.len(), 1);
        let sources: Vec<BlockId> = join.phis[0].incomings.iter().map(|i| i.source).collect();
        assert_eq!(sources, [BlockId(0), landing]);
        verify_ssa(&program, 0)
    }
}
