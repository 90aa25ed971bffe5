//! Inlining of small statically bound callees.
//!
//! The pass works in two phases. Planning scans the caller for `Special`
//! invocations whose target has a body below the complexity budget, recursively
//! planning inside every selected callee. Execution then splices copies of the
//! callee bodies into the caller.
//!
//! # Plan order
//!
//! Blocks are scanned last to first and instructions within a block last to first.
//! Executing entries in that order keeps every pending entry's block and
//! instruction index valid: splitting a block at an instruction only moves the
//! instructions after it.
//!
//! # Splicing
//!
//! ```text
//! B:  a; r = call f(x); b           B:  a; [init f's class]; jump F0
//!                            ==>    F0..Fn: f's blocks, parameters mapped to
//!                                          arguments, returns jump to S
//!                                   S:  r = phi(results) or r = result; b
//! ```
//!
//! Blocks with try/catch regions and virtual calls are never inlined into.

use crate::{
    compiler::{config::InliningConfig, events::EventKind, pass::ProgramPass, Session},
    model::{
        util::{map_block_references, map_block_variables, redirect_successor_phis},
        BlockId, CallLocation, ClassSet, ClassSource, Incoming, Instruction, InstructionKind,
        InvocationType, MethodReference, Phi, Program, Variable,
    },
    Result,
};

/// One call site selected for inlining.
#[derive(Debug)]
struct PlanEntry {
    target_block: usize,
    target_instruction: usize,
    callee: MethodReference,
    program: Program,
    inner_plan: Vec<PlanEntry>,
}

/// Inlines statically bound calls against an immutable snapshot of the classes.
pub struct InliningPass<'a> {
    classes: &'a ClassSet,
    config: InliningConfig,
}

impl<'a> InliningPass<'a> {
    /// Creates the pass. Callee bodies are looked up in `classes`.
    #[must_use]
    pub fn new(classes: &'a ClassSet, config: InliningConfig) -> Self {
        Self { classes, config }
    }

    /// Inlines into `program` and returns the number of inlined call sites,
    /// nested ones included.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a planned call site is not an
    /// invocation when the plan is executed.
    pub fn apply(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<usize> {
        let plan = self.build_plan(program, 0);
        let mut inlined = 0;
        exec_plan(program, &plan, 0, method, session, &mut inlined)?;
        Ok(inlined)
    }

    fn build_plan(&self, program: &Program, depth: usize) -> Vec<PlanEntry> {
        if depth >= self.config.max_depth {
            return Vec::new();
        }
        let threshold = self.config.threshold as isize;
        let own_complexity = complexity(program);
        let mut budget = threshold - 2 * depth as isize;
        if own_complexity < threshold {
            budget += threshold;
        }

        let mut plan = Vec::new();
        for (block_index, block) in program.blocks().iter().enumerate().rev() {
            if !block.try_catches.is_empty() {
                continue;
            }
            for (index, insn) in block.instructions.iter().enumerate().rev() {
                let InstructionKind::Invoke {
                    method,
                    invocation: InvocationType::Special,
                    ..
                } = &insn.kind
                else {
                    continue;
                };
                let Some(callee) = self
                    .classes
                    .find_method(method)
                    .and_then(|holder| holder.program.as_ref())
                    .filter(|program| !program.is_empty())
                else {
                    continue;
                };
                if complexity(callee) > budget {
                    continue;
                }

                let callee = callee.clone();
                let inner_plan = self.build_plan(&callee, depth + 1);
                plan.push(PlanEntry {
                    target_block: block_index,
                    target_instruction: index,
                    callee: method.clone(),
                    program: callee,
                    inner_plan,
                });
            }
        }
        plan
    }
}

impl ProgramPass for InliningPass<'_> {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn description(&self) -> &'static str {
        "Replaces small statically bound calls with the callee's body"
    }

    fn run_on_method(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<bool> {
        Ok(self.apply(program, method, session)? > 0)
    }
}

/// Size estimate used against the inlining budget: instructions other than
/// terminators and nops, plus the operands of every call, plus a penalty for
/// conditional control flow.
fn complexity(program: &Program) -> isize {
    let mut total: isize = 0;
    for block in program.blocks() {
        let mut block_total = block.instructions.len() as isize - 1;
        for insn in &block.instructions {
            match &insn.kind {
                InstructionKind::Empty => block_total -= 1,
                InstructionKind::Invoke {
                    instance,
                    arguments,
                    ..
                } => {
                    block_total += arguments.len() as isize + isize::from(instance.is_some()) + 1;
                }
                _ => {}
            }
        }
        total += block_total;
        match block.instructions.last().map(|insn| &insn.kind) {
            Some(InstructionKind::Switch { .. }) => total += 3,
            Some(InstructionKind::Branch { .. } | InstructionKind::BinaryBranch { .. }) => total += 2,
            _ => {}
        }
    }
    total
}

fn exec_plan(
    program: &mut Program,
    plan: &[PlanEntry],
    offset: usize,
    caller: &MethodReference,
    session: &Session,
    inlined: &mut usize,
) -> Result<()> {
    for entry in plan {
        exec_entry(program, entry, offset, caller, session, inlined)?;
    }
    Ok(())
}

fn exec_entry(
    program: &mut Program,
    entry: &PlanEntry,
    offset: usize,
    caller: &MethodReference,
    session: &Session,
    inlined: &mut usize,
) -> Result<()> {
    let block = BlockId(entry.target_block + offset);
    let invoke = program
        .get_block(block)
        .and_then(|b| b.instructions.get(entry.target_instruction))
        .cloned()
        .ok_or_else(|| malformed_error!("inlining target {} of {} is missing", block, caller))?;
    let InstructionKind::Invoke {
        receiver,
        instance,
        method,
        arguments,
        ..
    } = invoke.kind
    else {
        return Err(malformed_error!(
            "inlining target {} of {} is not a call",
            block,
            caller
        ));
    };
    if method != entry.callee {
        return Err(malformed_error!(
            "inlining target {} of {} calls {} but {} was planned",
            block,
            caller,
            method,
            entry.callee
        ));
    }

    let split = program.create_basic_block();
    let first_inline = program.block_count();
    for _ in 0..entry.program.block_count() {
        program.create_basic_block();
    }
    let variable_offset = program.variable_count();
    for _ in 0..entry.program.variable_count() {
        program.create_variable();
    }

    let try_catches = program.block(block).try_catches.clone();
    let tail = program
        .block_mut(block)
        .instructions
        .split_off(entry.target_instruction + 1);
    {
        let head = program.block_mut(block);
        head.instructions.truncate(entry.target_instruction);
        if instance.is_none() || method.descriptor.is_constructor() {
            head.instructions.push(Instruction::at(
                InstructionKind::InitClass {
                    class_name: method.class_name.clone(),
                },
                invoke.location.clone(),
            ));
        }
        head.instructions.push(Instruction::at(
            InstructionKind::Jump {
                target: BlockId(first_inline),
            },
            invoke.location.clone(),
        ));
    }
    {
        let split_block = program.block_mut(split);
        split_block.instructions = tail;
        split_block.try_catches.clone_from(&try_catches);
    }

    let map_variable = |var: Variable| -> Variable {
        match var.index() {
            0 => instance.unwrap_or(Variable(variable_offset)),
            index if index <= arguments.len() => arguments[index - 1],
            index => Variable(index + variable_offset),
        }
    };

    let mut results = Vec::new();
    for (index, source) in entry.program.blocks().iter().enumerate() {
        let target = BlockId(first_inline + index);
        let mut copy = source.clone();
        map_block_references(&mut copy, |b| BlockId(b.index() + first_inline));
        map_block_variables(&mut copy, map_variable);
        copy.try_catches.extend(try_catches.iter().cloned());
        if let Some(last) = copy.instructions.last_mut() {
            if let InstructionKind::Exit { value } = last.kind {
                last.kind = InstructionKind::Jump { target: split };
                if let Some(value) = value {
                    results.push(Incoming {
                        source: target,
                        value,
                    });
                }
            }
        }
        *program.block_mut(target) = copy;
    }

    if let Some(receiver) = receiver {
        match results.as_slice() {
            [] => {}
            [single] => program.block_mut(split).instructions.insert(
                0,
                Instruction::at(
                    InstructionKind::Assign {
                        receiver,
                        assignee: single.value,
                    },
                    invoke.location.clone(),
                ),
            ),
            _ => {
                let mut phi = Phi::new(receiver);
                phi.incomings = results;
                program.block_mut(split).phis.push(phi);
            }
        }
    }
    redirect_successor_phis(program, split, block, split);

    *inlined += 1;
    session.mark_inlined(&entry.callee);
    session
        .events
        .record(EventKind::MethodInlined)
        .at(&CallLocation::new(caller.clone(), invoke.location))
        .message(format!("inlined {}", entry.callee));

    exec_plan(program, &entry.inner_plan, first_inline, caller, session, inlined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::verify_ssa,
        model::{ElementModifier, ProgramEmitter, ValueType},
        test::{add_class, add_method, method, program_with_parameters},
    };

    fn choose() -> MethodReference {
        method(
            "Util",
            "choose",
            vec![ValueType::INTEGER, ValueType::INTEGER],
            ValueType::INTEGER,
        )
    }

    /// `choose(a, b) = a != 0 ? a : b`, with two returns.
    fn two_returns() -> Program {
        let mut program = program_with_parameters(2);
        let mut emitter = ProgramEmitter::create(&mut program);
        let first = emitter.create_block();
        let second = emitter.create_block();
        emitter.emit(InstructionKind::Branch {
            condition: crate::model::BranchingCondition::NotEqual,
            operand: Variable(1),
            consequent: first,
            alternative: second,
        });
        emitter.enter(first);
        emitter.exit(Some(Variable(1)));
        emitter.enter(second);
        emitter.exit(Some(Variable(2)));
        program
    }

    fn classes_with(callee: Program) -> ClassSet {
        let mut classes = ClassSet::new();
        add_class(&mut classes, "Util", "java.lang.Object");
        add_method(&mut classes, &choose(), ElementModifier::STATIC, Some(callee));
        classes
    }

    fn calling_program() -> (Program, Variable) {
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        let a = emitter.int(0);
        let b = emitter.int(7);
        let result = emitter.invoke_static(&choose(), &[a, b]).unwrap();
        emitter.exit(Some(result));
        (program, result)
    }

    #[test]
    fn test_two_returns_merge_into_one_phi() {
        let classes = classes_with(two_returns());
        let session = Session::new();
        let (mut program, result) = calling_program();
        let caller = method("Main", "main", vec![], ValueType::INTEGER);

        let count = InliningPass::new(&classes, InliningConfig::default())
            .apply(&mut program, &caller, &session)
            .unwrap();

        assert_eq!(count, 1);
        // entry, split, then the three callee blocks
        assert_eq!(program.block_count(), 5);
        let split = program.block(BlockId(1));
        assert_eq!(split.phis.len(), 1);
        assert_eq!(split.phis[0].receiver, result);
        let sources: Vec<_> = split.phis[0].incomings.iter().map(|i| i.source).collect();
        assert_eq!(sources, [BlockId(3), BlockId(4)]);
        assert!(matches!(
            program.block(BlockId(0)).instructions.last().map(|i| &i.kind),
            Some(InstructionKind::Jump { target }) if *target == BlockId(2)
        ));
        assert!(matches!(
            program.block(BlockId(0)).instructions[2].kind,
            InstructionKind::InitClass { .. }
        ));
        assert!(session.was_inlined(&choose()));
        assert_eq!(session.events.count_kind(EventKind::MethodInlined), 1);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_single_return_becomes_assignment() {
        let mut callee = program_with_parameters(2);
        ProgramEmitter::create(&mut callee).exit(Some(Variable(2)));
        let classes = classes_with(callee);
        let session = Session::new();
        let (mut program, result) = calling_program();
        let caller = method("Main", "main", vec![], ValueType::INTEGER);

        InliningPass::new(&classes, InliningConfig::default())
            .apply(&mut program, &caller, &session)
            .unwrap();

        let split = program.block(BlockId(1));
        assert!(split.phis.is_empty());
        assert_eq!(
            split.instructions[0].kind,
            InstructionKind::Assign {
                receiver: result,
                assignee: Variable(2)
            }
        );
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_complex_callee_is_skipped() {
        let mut callee = program_with_parameters(2);
        let mut emitter = ProgramEmitter::create(&mut callee);
        let mut value = Variable(1);
        for _ in 0..40 {
            value = emitter.assign(value);
        }
        emitter.exit(Some(value));
        let classes = classes_with(callee);
        let session = Session::new();
        let (mut program, _) = calling_program();
        let before = program.clone();

        let changed = InliningPass::new(&classes, InliningConfig::default())
            .run_on_method(&mut program, &method("Main", "main", vec![], ValueType::INTEGER), &session)
            .unwrap();

        assert!(!changed);
        assert_eq!(program, before);
    }

    #[test]
    fn test_nested_calls_are_inlined_up_to_depth() {
        // Util.choose calls itself: every level inlines one more copy
        let mut callee = program_with_parameters(2);
        let mut emitter = ProgramEmitter::create(&mut callee);
        let value = emitter.invoke_static(&choose(), &[Variable(1), Variable(2)]).unwrap();
        emitter.exit(Some(value));
        let classes = classes_with(callee);
        let session = Session::new();
        let (mut program, _) = calling_program();
        let config = InliningConfig {
            threshold: 15,
            max_depth: 3,
        };

        let count = InliningPass::new(&classes, config)
            .apply(&mut program, &method("Main", "main", vec![], ValueType::INTEGER), &session)
            .unwrap();

        assert_eq!(count, 3);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_plan_rejects_retargeted_call() {
        let classes = classes_with(two_returns());
        let pass = InliningPass::new(&classes, InliningConfig::default());
        let (mut program, _) = calling_program();
        let plan = pass.build_plan(&program, 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].callee, choose());

        let other = method(
            "Util",
            "other",
            vec![ValueType::INTEGER, ValueType::INTEGER],
            ValueType::INTEGER,
        );
        let call = &mut program.block_mut(BlockId(plan[0].target_block)).instructions
            [plan[0].target_instruction]
            .kind;
        if let InstructionKind::Invoke { method, .. } = call {
            *method = other;
        }

        let session = Session::new();
        let mut inlined = 0;
        let caller = method("Main", "main", vec![], ValueType::INTEGER);
        let result = exec_plan(&mut program, &plan, 0, &caller, &session, &mut inlined);
        assert!(matches!(result, Err(crate::Error::Malformed { .. })));
        assert_eq!(inlined, 0);
        assert!(!session.was_inlined(&choose()));
    }
}
