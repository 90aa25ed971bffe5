//! Lowering of class initialization markers.
//!
//! Every `InitClass` becomes a run-time check followed by a conditional call of the
//! initializer:
//!
//! ```text
//! B:  a; init X; b          B:  c = class X; f = isInitialized(c); if f != 0 goto C else I
//!                    ==>    I:  init X; goto C
//!                           C:  b
//! ```
//!
//! The continuation takes over the terminator, so phis of the original successors
//! are redirected to it. Protected blocks hand their try/catch regions to both new
//! blocks; each copy gets its own exception variables and joints, and the handlers
//! receive one phi incoming per copy.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    compiler::{events::EventKind, pass::ProgramPass, Session},
    model::{
        BlockId, BranchingCondition, Incoming, Instruction, InstructionKind, InvocationType,
        MethodDescriptor, MethodReference, Program, TryCatchBlock, TryCatchJoint, ValueType,
        Variable,
    },
    Result,
};

/// Runtime class providing the initialization check.
pub const ALLOCATOR_CLASS: &str = "aotflow.runtime.Allocator";

/// `Allocator.isInitialized(Class): boolean`
#[must_use]
pub fn is_initialized_method() -> MethodReference {
    MethodReference::new(
        ALLOCATOR_CLASS,
        MethodDescriptor::new(
            "isInitialized",
            vec![ValueType::object("java.lang.Class")],
            ValueType::BOOLEAN,
        ),
    )
}

/// Replaces `InitClass` markers with guarded initializer calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassInitPass;

impl ClassInitPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Lowers every `InitClass` of `program` and returns how many were lowered.
    pub fn lower(&self, program: &mut Program, method: &MethodReference, session: &Session) -> usize {
        let mut lowered = 0;
        for index in 0..program.block_count() {
            let mut block = BlockId(index);
            while let Some((position, class_name)) = find_init(program, block) {
                block = split_at_init(program, block, position, class_name);
                lowered += 1;
            }
        }
        if lowered > 0 {
            session
                .events
                .record(EventKind::ClassInitLowered)
                .method(method)
                .message(format!("{lowered} class initialization checks"));
        }
        lowered
    }
}

impl ProgramPass for ClassInitPass {
    fn name(&self) -> &'static str {
        "class-init"
    }

    fn description(&self) -> &'static str {
        "Guards class initialization with an explicit isInitialized check"
    }

    fn run_on_method(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<bool> {
        Ok(self.lower(program, method, session) > 0)
    }
}

fn find_init(program: &Program, block: BlockId) -> Option<(usize, String)> {
    program
        .block(block)
        .instructions
        .iter()
        .enumerate()
        .find_map(|(index, insn)| match &insn.kind {
            InstructionKind::InitClass { class_name } => Some((index, class_name.clone())),
            _ => None,
        })
}

/// Splits `block` at the marker at `position` and returns the continuation.
fn split_at_init(
    program: &mut Program,
    block: BlockId,
    position: usize,
    class_name: String,
) -> BlockId {
    let successors = program.block(block).successors();
    let continuation = program.create_basic_block();
    let init = program.create_basic_block();

    let mut tail = program.block_mut(block).instructions.split_off(position);
    let marker = tail.remove(0);
    let location = marker.location.clone();
    program.block_mut(continuation).instructions = tail;
    program.block_mut(init).instructions = vec![
        marker,
        Instruction::at(InstructionKind::Jump { target: continuation }, location.clone()),
    ];

    let class = program.create_variable();
    let initialized = program.create_variable();
    let head = program.block_mut(block);
    head.instructions.push(Instruction::at(
        InstructionKind::ClassConstant {
            receiver: class,
            constant: ValueType::object(class_name),
        },
        location.clone(),
    ));
    head.instructions.push(Instruction::at(
        InstructionKind::Invoke {
            receiver: Some(initialized),
            instance: None,
            method: is_initialized_method(),
            arguments: vec![class],
            invocation: InvocationType::Special,
        },
        location.clone(),
    ));
    head.instructions.push(Instruction::at(
        InstructionKind::Branch {
            condition: BranchingCondition::NotEqual,
            operand: initialized,
            consequent: continuation,
            alternative: init,
        },
        location,
    ));

    for &successor in &successors {
        program.block_mut(successor).redirect_phi_sources(block, continuation);
    }
    if !program.block(block).try_catches.is_empty() {
        split_regions(program, block, continuation, init, &successors);
    }
    continuation
}

/// Value of each joint receiver or exception variable of the head as seen from a
/// copy of its regions. `None` means the variable has no value on that path.
type RegionValues = FxHashMap<Variable, Option<Variable>>;

/// Gives `continuation` and `init` copies of the regions of `head`.
///
/// Joint sources defined in the moved tail go to the continuation's joints; the
/// init block defines nothing, so handlers see the value current at the split.
fn split_regions(
    program: &mut Program,
    head: BlockId,
    continuation: BlockId,
    init: BlockId,
    normal_successors: &[BlockId],
) {
    let tail_definitions: FxHashSet<Variable> = program
        .block(continuation)
        .instructions
        .iter()
        .filter_map(|insn| insn.kind.defined_variable())
        .collect();
    let regions = std::mem::take(&mut program.block_mut(head).try_catches);
    let mut handlers: Vec<BlockId> = Vec::new();
    for region in &regions {
        if !handlers.contains(&region.handler) {
            handlers.push(region.handler);
        }
    }

    let mut continuation_values = RegionValues::default();
    let mut init_values = RegionValues::default();
    let mut dropped: FxHashSet<Variable> = FxHashSet::default();
    let mut head_regions = Vec::with_capacity(regions.len());
    let mut continuation_regions = Vec::with_capacity(regions.len());
    let mut init_regions = Vec::with_capacity(regions.len());

    for region in regions {
        let mut head_region =
            TryCatchBlock::new(region.exception_type.clone(), region.exception_variable, region.handler);
        let mut continuation_region =
            TryCatchBlock::new(region.exception_type.clone(), None, region.handler);
        let mut init_region = TryCatchBlock::new(region.exception_type, None, region.handler);

        if let Some(caught) = region.exception_variable {
            let in_continuation = program.create_variable();
            let in_init = program.create_variable();
            continuation_region.exception_variable = Some(in_continuation);
            init_region.exception_variable = Some(in_init);
            continuation_values.insert(caught, Some(in_continuation));
            init_values.insert(caught, Some(in_init));
        }

        for TryCatchJoint {
            receiver,
            source_variables,
        } in region.joints
        {
            let (before, after): (Vec<Variable>, Vec<Variable>) = source_variables
                .into_iter()
                .partition(|var| !tail_definitions.contains(var));
            let current = before.last().copied();
            init_values.insert(receiver, current);
            if after.is_empty() {
                continuation_values.insert(receiver, current);
            } else {
                let joined = program.create_variable();
                continuation_region.joints.push(TryCatchJoint {
                    receiver: joined,
                    source_variables: current.into_iter().chain(after).collect(),
                });
                continuation_values.insert(receiver, Some(joined));
            }
            if before.is_empty() {
                dropped.insert(receiver);
            } else {
                head_region.joints.push(TryCatchJoint {
                    receiver,
                    source_variables: before,
                });
            }
        }

        head_regions.push(head_region);
        continuation_regions.push(continuation_region);
        init_regions.push(init_region);
    }
    program.block_mut(head).try_catches = head_regions;
    program.block_mut(continuation).try_catches = continuation_regions;
    program.block_mut(init).try_catches = init_regions;

    for handler in handlers {
        if normal_successors.contains(&handler) {
            continue;
        }
        for phi in &mut program.block_mut(handler).phis {
            let mut incomings = Vec::with_capacity(phi.incomings.len() + 2);
            for incoming in phi.incomings.drain(..) {
                if incoming.source != head {
                    incomings.push(incoming);
                    continue;
                }
                let value = incoming.value;
                if !dropped.contains(&value) {
                    incomings.push(incoming);
                }
                for (source, values) in [(continuation, &continuation_values), (init, &init_values)] {
                    if let Some(value) = values.get(&value).copied().unwrap_or(Some(value)) {
                        incomings.push(Incoming { source, value });
                    }
                }
            }
            phi.incomings = incomings;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{verify_ssa, SsaTransformer},
        model::{ProgramEmitter, TryCatchBlock},
        test::{method, program_with_parameters},
    };

    fn init(class_name: &str) -> InstructionKind {
        InstructionKind::InitClass {
            class_name: class_name.to_string(),
        }
    }

    fn caller() -> MethodReference {
        method("Main", "main", vec![], ValueType::Void)
    }

    #[test]
    fn test_marker_becomes_guarded_call() {
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        emitter.emit(init("Config"));
        emitter.exit(None);
        let session = Session::new();

        assert_eq!(ClassInitPass::new().lower(&mut program, &caller(), &session), 1);

        assert_eq!(program.block_count(), 3);
        let head = &program.block(BlockId(0)).instructions;
        assert_eq!(
            head[0].kind,
            InstructionKind::ClassConstant {
                receiver: Variable(1),
                constant: ValueType::object("Config"),
            }
        );
        assert!(matches!(
            &head[1].kind,
            InstructionKind::Invoke { method, .. } if *method == is_initialized_method()
        ));
        assert_eq!(
            head[2].kind,
            InstructionKind::Branch {
                condition: BranchingCondition::NotEqual,
                operand: Variable(2),
                consequent: BlockId(1),
                alternative: BlockId(2),
            }
        );
        assert_eq!(program.block(BlockId(2)).instructions[0].kind, init("Config"));
        assert_eq!(program.block(BlockId(2)).successors(), [BlockId(1)]);
        assert!(matches!(
            program.block(BlockId(1)).instructions[0].kind,
            InstructionKind::Exit { value: None }
        ));
        assert_eq!(session.events.count_kind(EventKind::ClassInitLowered), 1);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_adjacent_markers_are_all_lowered() {
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        emitter.emit(init("First"));
        emitter.emit(init("Second"));
        emitter.exit(None);

        let lowered = ClassInitPass::new().lower(&mut program, &caller(), &Session::new());

        assert_eq!(lowered, 2);
        assert_eq!(program.block_count(), 5);
        let markers = program
            .blocks()
            .iter()
            .flat_map(|block| &block.instructions)
            .filter(|insn| matches!(insn.kind, InstructionKind::InitClass { .. }))
            .count();
        assert_eq!(markers, 2);
        // second marker sits at index 0 of the first continuation
        assert_eq!(program.block(BlockId(1)).instructions.len(), 3);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_successor_phis_follow_the_continuation() {
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        let join = emitter.create_block();
        let value = emitter.int(1);
        emitter.emit(init("Config"));
        emitter.jump(join);
        emitter.enter(join);
        let merged = emitter.phi(join, &[(BlockId(0), value)]);
        emitter.exit(Some(merged));

        ClassInitPass::new().lower(&mut program, &caller(), &Session::new());

        let continuation = BlockId(2);
        assert_eq!(program.block(continuation).successors(), [join]);
        assert_eq!(program.block(join).phis[0].incomings[0].source, continuation);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_protected_block_splits_its_regions() {
        // b0: v1 = 1; init; v1 = 2; goto b1   (catch-all into b2)
        // b1: return v1
        // b2: return v1
        let mut program = program_with_parameters(0);
        let local = program.create_variable();
        let caught = program.create_variable();
        for _ in 0..3 {
            program.create_basic_block();
        }
        let entry = program.block_mut(BlockId(0));
        entry.push(InstructionKind::IntegerConstant {
            receiver: local,
            constant: 1,
        });
        entry.push(init("Config"));
        entry.push(InstructionKind::IntegerConstant {
            receiver: local,
            constant: 2,
        });
        entry.push(InstructionKind::Jump { target: BlockId(1) });
        entry
            .try_catches
            .push(TryCatchBlock::new(None, Some(caught), BlockId(2)));
        program.block_mut(BlockId(1)).push(InstructionKind::Exit { value: Some(local) });
        program.block_mut(BlockId(2)).push(InstructionKind::Exit { value: Some(local) });
        SsaTransformer::transform(&mut program, &[]).unwrap();
        assert_eq!(program.block(BlockId(0)).try_catches[0].joints.len(), 1);

        ClassInitPass::new().lower(&mut program, &caller(), &Session::new());

        let (continuation, init_block) = (BlockId(3), BlockId(4));
        assert_eq!(program.block(continuation).try_catches.len(), 1);
        assert_eq!(program.block(init_block).try_catches.len(), 1);
        assert_eq!(program.block(continuation).try_catches[0].joints.len(), 1);
        assert!(program.block(init_block).try_catches[0].joints.is_empty());
        for phi in &program.block(BlockId(2)).phis {
            let sources: Vec<_> = phi.incomings.iter().map(|i| i.source).collect();
            assert_eq!(sources, [BlockId(0), continuation, init_block]);
        }
        verify_ssa(&program, 0).unwrap();
    }
}
