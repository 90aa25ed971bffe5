//! Exception lowering onto an explicit shadow stack.
//!
//! After this pass programs contain no try/catch regions. Exceptions travel as a
//! pending value in the runtime; every instruction that may throw is bracketed by
//! runtime calls:
//!
//! ```text
//! v = call f()          id = <call site>; registerCallSite(id)
//!                ==>    v = call f()
//!                       h = getExceptionHandlerId()
//!                       switch h: id -> continue, id+1 -> handler 1, ..., default -> catch-all or propagate
//! ```
//!
//! The runtime leaves the handler id at the call site id when the call returns
//! normally. When an exception is pending it stores the id of the first handler whose
//! class matches, as listed in the collected [`CallSiteDescriptor`]s. Without a
//! catch-all the default target propagates: it returns a dummy value of the method's
//! result type and leaves the exception to the caller's own dispatch.
//!
//! Handlers obtain the exception with `catchException()`. Values the handler sees
//! through try/catch joints become ordinary phi incomings from every dispatching
//! segment, carrying the version that was current at that call site.

use std::sync::atomic::{AtomicI32, Ordering};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    compiler::{events::EventKind, pass::ProgramPass, passes::classinit::ALLOCATOR_CLASS, Session},
    model::{
        BinaryBranchingCondition, BlockId, Incoming, Instruction, InstructionKind,
        InvocationType, MethodDescriptor, MethodReference, PrimitiveType, Program, SwitchEntry,
        TextLocation, ValueType, Variable,
    },
    Result,
};

/// Runtime class implementing exception delivery.
pub const EXCEPTION_HANDLING_CLASS: &str = "aotflow.runtime.ExceptionHandling";

/// Runtime class maintaining the shadow stack.
pub const SHADOW_STACK_CLASS: &str = "aotflow.runtime.ShadowStack";

const THROWABLE_CLASS: &str = "java.lang.Throwable";

/// `ExceptionHandling.catchException(): Throwable`
#[must_use]
pub fn catch_exception_method() -> MethodReference {
    MethodReference::new(
        EXCEPTION_HANDLING_CLASS,
        MethodDescriptor::new("catchException", vec![], ValueType::object(THROWABLE_CLASS)),
    )
}

/// `ExceptionHandling.throwException(Throwable)`
#[must_use]
pub fn throw_exception_method() -> MethodReference {
    MethodReference::new(
        EXCEPTION_HANDLING_CLASS,
        MethodDescriptor::new(
            "throwException",
            vec![ValueType::object(THROWABLE_CLASS)],
            ValueType::Void,
        ),
    )
}

/// `ShadowStack.registerCallSite(int)`
#[must_use]
pub fn register_call_site_method() -> MethodReference {
    MethodReference::new(
        SHADOW_STACK_CLASS,
        MethodDescriptor::new("registerCallSite", vec![ValueType::INTEGER], ValueType::Void),
    )
}

/// `ShadowStack.getExceptionHandlerId(): int`
#[must_use]
pub fn get_exception_handler_id_method() -> MethodReference {
    MethodReference::new(
        SHADOW_STACK_CLASS,
        MethodDescriptor::new("getExceptionHandlerId", vec![], ValueType::INTEGER),
    )
}

/// One handler reachable from a call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandlerDescriptor {
    /// Value the runtime stores to select this handler
    pub id: i32,
    /// Caught class, `None` for a catch-all
    pub class_name: Option<String>,
}

/// Metadata of one lowered call site, consumed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteDescriptor {
    /// Id registered before the call; also the "no exception" handler id
    pub id: i32,
    /// Method containing the call site
    pub method: MethodReference,
    /// Source position of the call
    pub location: Option<TextLocation>,
    /// Handlers in matching order
    pub handlers: Vec<ExceptionHandlerDescriptor>,
}

/// Replaces try/catch regions with shadow stack dispatch.
///
/// One instance numbers call sites across every method it lowers, so ids are
/// unique within a build. The pass is safe to run on several methods in parallel.
pub struct ShadowStackPass {
    next_id: AtomicI32,
    call_sites: boxcar::Vec<CallSiteDescriptor>,
    unmanaged: FxHashSet<String>,
}

impl Default for ShadowStackPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowStackPass {
    /// Creates the pass. Calls into the runtime support classes are not call sites.
    #[must_use]
    pub fn new() -> Self {
        let unmanaged = [EXCEPTION_HANDLING_CLASS, SHADOW_STACK_CLASS, ALLOCATOR_CLASS]
            .into_iter()
            .map(str::to_string)
            .collect();
        Self {
            next_id: AtomicI32::new(0),
            call_sites: boxcar::Vec::new(),
            unmanaged,
        }
    }

    /// Excludes calls to methods of `class_name` from lowering. Methods of that
    /// class are not lowered either.
    #[must_use]
    pub fn with_unmanaged_class(mut self, class_name: impl Into<String>) -> Self {
        self.unmanaged.insert(class_name.into());
        self
    }

    /// Returns the descriptors of every lowered call site, ordered by id.
    #[must_use]
    pub fn call_sites(&self) -> Vec<CallSiteDescriptor> {
        let mut result: Vec<CallSiteDescriptor> =
            self.call_sites.iter().map(|(_, site)| site.clone()).collect();
        result.sort_by_key(|site| site.id);
        result
    }

    /// Lowers `program`, which must be the body of `method`, and returns the number
    /// of call sites created.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a handler id range overflows.
    pub fn lower(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<usize> {
        if self.unmanaged.contains(&method.class_name) || program.is_empty() {
            return Ok(0);
        }
        let receivers = convert_exception_receivers(program);
        let mut lowering = MethodLowering {
            pass: self,
            method,
            propagate: None,
            call_sites: 0,
        };
        let had_regions = program.blocks().iter().any(|block| !block.try_catches.is_empty());
        for index in 0..program.block_count() {
            lowering.lower_block(program, BlockId(index))?;
        }
        for block in program.blocks_mut() {
            block.try_catches.clear();
        }

        let call_sites = lowering.call_sites;
        if call_sites > 0 || receivers > 0 || had_regions {
            session
                .events
                .record(EventKind::ExceptionsLowered)
                .method(method)
                .message(format!("{call_sites} call sites, {receivers} handlers"));
        }
        Ok(call_sites)
    }

    fn is_call_site(&self, kind: &InstructionKind) -> bool {
        match kind {
            InstructionKind::InitClass { .. }
            | InstructionKind::Construct { .. }
            | InstructionKind::ConstructArray { .. }
            | InstructionKind::ConstructMultiArray { .. }
            | InstructionKind::CloneArray { .. }
            | InstructionKind::Raise { .. }
            | InstructionKind::InvokeDynamic { .. } => true,
            InstructionKind::Invoke { method, .. } => !self.unmanaged.contains(&method.class_name),
            _ => false,
        }
    }

    /// Reserves `count` consecutive ids and returns the first.
    fn reserve(&self, count: usize) -> Result<i32> {
        let count = i32::try_from(count)
            .map_err(|_| malformed_error!("call site with {} handlers", count))?;
        let first = self.next_id.fetch_add(count, Ordering::Relaxed);
        if first.checked_add(count).is_none() {
            return Err(malformed_error!("call site ids exhausted"));
        }
        Ok(first)
    }
}

impl ProgramPass for ShadowStackPass {
    fn name(&self) -> &'static str {
        "shadow-stack"
    }

    fn description(&self) -> &'static str {
        "Lowers try/catch regions to explicit handler dispatch after each call"
    }

    fn run_on_method(
        &self,
        program: &mut Program,
        method: &MethodReference,
        session: &Session,
    ) -> Result<bool> {
        let had_regions = program.blocks().iter().any(|block| {
            !block.try_catches.is_empty() || block.exception_variable.is_some()
        });
        Ok(self.lower(program, method, session)? > 0 || had_regions)
    }
}

/// Turns the variables receiving a caught exception into `catchException()`
/// calls at the start of their handlers. Returns the number of calls inserted.
fn convert_exception_receivers(program: &mut Program) -> usize {
    let caught: FxHashSet<Variable> = program
        .blocks()
        .iter()
        .flat_map(|block| block.try_catches.iter())
        .filter_map(|region| region.exception_variable)
        .collect();

    let mut converted = 0;
    for block in program.blocks_mut() {
        let mut receivers: Vec<Variable> = block.exception_variable.take().into_iter().collect();
        block.phis.retain(|phi| {
            let is_exception = !phi.incomings.is_empty()
                && phi.incomings.iter().all(|incoming| caught.contains(&incoming.value));
            if is_exception {
                receivers.push(phi.receiver);
            }
            !is_exception
        });
        for (index, receiver) in receivers.into_iter().enumerate() {
            block.instructions.insert(
                index,
                Instruction::new(InstructionKind::Invoke {
                    receiver: Some(receiver),
                    instance: None,
                    method: catch_exception_method(),
                    arguments: Vec::new(),
                    invocation: InvocationType::Special,
                }),
            );
            converted += 1;
        }
    }
    converted
}

/// Per-method state of the lowering.
struct MethodLowering<'a> {
    pass: &'a ShadowStackPass,
    method: &'a MethodReference,
    /// Block returning a dummy value, created on first use
    propagate: Option<BlockId>,
    call_sites: usize,
}

/// Current version of every joint receiver of a block.
type JointValues = FxHashMap<Variable, Option<Variable>>;

/// A segment of a protected block that may transfer control to a handler.
struct Dispatch {
    handler: BlockId,
    segment: BlockId,
    values: JointValues,
}

impl MethodLowering<'_> {
    fn lower_block(&mut self, program: &mut Program, block: BlockId) -> Result<()> {
        if !program
            .block(block)
            .instructions
            .iter()
            .any(|insn| self.pass.is_call_site(&insn.kind))
        {
            // Nothing here can throw, so handlers lose the edge from this block.
            self.detach_handlers(program, block);
            return Ok(());
        }

        let regions = program.block(block).try_catches.clone();
        let original_successors = program.block(block).successors();
        let mut instructions = std::mem::take(&mut program.block_mut(block).instructions);

        let defined_here: FxHashSet<Variable> = instructions
            .iter()
            .filter_map(|insn| insn.kind.defined_variable())
            .collect();
        let mut joints = JointValues::default();
        let mut joints_of_source: FxHashMap<Variable, Vec<Variable>> = FxHashMap::default();
        for joint in regions.iter().flat_map(|region| &region.joints) {
            let entry = joint
                .source_variables
                .iter()
                .copied()
                .find(|var| !defined_here.contains(var));
            joints.insert(joint.receiver, entry);
            for &source in &joint.source_variables {
                if defined_here.contains(&source) {
                    joints_of_source.entry(source).or_default().push(joint.receiver);
                }
            }
        }

        let mut handlers: Vec<(String, BlockId)> = Vec::new();
        let mut catch_all = None;
        for region in &regions {
            match &region.exception_type {
                Some(class_name) => handlers.push((class_name.clone(), region.handler)),
                None => {
                    catch_all = Some(region.handler);
                    break;
                }
            }
        }
        let mut reachable_handlers: Vec<BlockId> = handlers.iter().map(|(_, h)| *h).collect();
        reachable_handlers.extend(catch_all);
        let reachable_handlers = dedup(reachable_handlers);

        let mut dispatches: Vec<Dispatch> = Vec::new();
        let mut segment = block;
        let mut current: Vec<Instruction> = Vec::with_capacity(instructions.len() + 4);
        let count = instructions.len();
        let mut index = 0;
        while index < count {
            let insn = std::mem::replace(&mut instructions[index], Instruction::new(InstructionKind::Empty));
            index += 1;
            if !self.pass.is_call_site(&insn.kind) {
                if let Some(defined) = insn.kind.defined_variable() {
                    update_joints(&mut joints, &joints_of_source, defined);
                }
                current.push(insn);
                continue;
            }

            let handler_count = handlers.len() + usize::from(catch_all.is_some());
            let id = self.pass.reserve(handler_count + 1)?;
            let location = insn.location.clone();
            let id_variable = program.create_variable();
            current.push(Instruction::at(
                InstructionKind::IntegerConstant {
                    receiver: id_variable,
                    constant: id,
                },
                location.clone(),
            ));
            current.push(Instruction::at(
                invoke(None, register_call_site_method(), vec![id_variable]),
                location.clone(),
            ));

            let raises = matches!(insn.kind, InstructionKind::Raise { .. });
            let defined = insn.kind.defined_variable();
            let kind = match insn.kind {
                InstructionKind::Raise { exception } => {
                    invoke(None, throw_exception_method(), vec![exception])
                }
                other => other,
            };
            current.push(Instruction::at(kind, location.clone()));

            // A trailing jump becomes the continuation; otherwise the rest of the
            // block moves to a fresh segment.
            let mut fresh = None;
            let continuation = if raises {
                None
            } else if let Some(InstructionKind::Jump { target }) = (index + 1 == count)
                .then(|| &instructions[index].kind)
            {
                let target = *target;
                index += 1;
                Some(target)
            } else {
                let next = program.create_basic_block();
                fresh = Some(next);
                Some(next)
            };

            let handler_id = program.create_variable();
            current.push(Instruction::at(
                invoke(Some(handler_id), get_exception_handler_id_method(), Vec::new()),
                location.clone(),
            ));
            let mut entries: Vec<SwitchEntry> = Vec::new();
            if let Some(target) = continuation {
                entries.push(SwitchEntry { condition: id, target });
            }
            let mut descriptors = Vec::with_capacity(handler_count);
            for (offset, (class_name, handler)) in handlers.iter().enumerate() {
                let handler_code = id + 1 + offset as i32;
                entries.push(SwitchEntry {
                    condition: handler_code,
                    target: *handler,
                });
                descriptors.push(ExceptionHandlerDescriptor {
                    id: handler_code,
                    class_name: Some(class_name.clone()),
                });
            }
            let default_target = match catch_all {
                Some(handler) => {
                    descriptors.push(ExceptionHandlerDescriptor {
                        id: id + 1 + handlers.len() as i32,
                        class_name: None,
                    });
                    handler
                }
                None => self.propagate_block(program),
            };
            self.emit_dispatch(
                program,
                &mut current,
                handler_id,
                (id, id_variable),
                entries,
                default_target,
                location.clone(),
            );

            for &handler in &reachable_handlers {
                dispatches.push(Dispatch {
                    handler,
                    segment,
                    values: joints.clone(),
                });
            }
            self.pass.call_sites.push(CallSiteDescriptor {
                id,
                method: self.method.clone(),
                location,
                handlers: descriptors,
            });
            self.call_sites += 1;

            program.block_mut(segment).instructions = std::mem::take(&mut current);
            if let Some(defined) = defined {
                update_joints(&mut joints, &joints_of_source, defined);
            }
            if let Some(next) = fresh {
                segment = next;
            }
        }
        if !current.is_empty() {
            program.block_mut(segment).instructions = current;
        }
        let tail = segment;

        let all_handlers: Vec<BlockId> = regions.iter().map(|region| region.handler).collect();
        for handler in dedup(all_handlers) {
            let normal = original_successors.contains(&handler);
            let reached: Vec<&Dispatch> = dispatches
                .iter()
                .filter(|dispatch| dispatch.handler == handler)
                .collect();
            for phi in &mut program.block_mut(handler).phis {
                let mut incomings = Vec::with_capacity(phi.incomings.len() + reached.len());
                for incoming in phi.incomings.drain(..) {
                    if incoming.source != block {
                        incomings.push(incoming);
                        continue;
                    }
                    for dispatch in &reached {
                        let value = dispatch
                            .values
                            .get(&incoming.value)
                            .copied()
                            .unwrap_or(Some(incoming.value));
                        if let Some(value) = value {
                            incomings.push(Incoming {
                                source: dispatch.segment,
                                value,
                            });
                        }
                    }
                    if normal {
                        incomings.push(Incoming {
                            source: tail,
                            value: incoming.value,
                        });
                    }
                }
                phi.incomings = incomings;
            }
        }

        if tail != block {
            let handler_set: Vec<BlockId> = regions.iter().map(|region| region.handler).collect();
            for successor in original_successors {
                if !handler_set.contains(&successor) {
                    program.block_mut(successor).redirect_phi_sources(block, tail);
                }
            }
        }
        Ok(())
    }

    /// Removes the exceptional incomings a block without call sites contributed to
    /// its handlers.
    fn detach_handlers(&self, program: &mut Program, block: BlockId) {
        let regions = std::mem::take(&mut program.block_mut(block).try_catches);
        let successors = program.block(block).successors();
        let handlers: Vec<BlockId> = regions.iter().map(|region| region.handler).collect();
        for handler in dedup(handlers) {
            if successors.contains(&handler) {
                continue;
            }
            for phi in &mut program.block_mut(handler).phis {
                phi.incomings.retain(|incoming| incoming.source != block);
            }
        }
    }

    fn emit_dispatch(
        &self,
        program: &mut Program,
        code: &mut Vec<Instruction>,
        handler_id: Variable,
        (id, id_variable): (i32, Variable),
        entries: Vec<SwitchEntry>,
        default_target: BlockId,
        location: Option<TextLocation>,
    ) {
        let kind = match entries.as_slice() {
            [] => InstructionKind::Jump {
                target: default_target,
            },
            [single] => {
                let expected = if single.condition == id {
                    id_variable
                } else {
                    let constant = program.create_variable();
                    code.push(Instruction::at(
                        InstructionKind::IntegerConstant {
                            receiver: constant,
                            constant: single.condition,
                        },
                        location.clone(),
                    ));
                    constant
                };
                InstructionKind::BinaryBranch {
                    condition: BinaryBranchingCondition::Equal,
                    first: handler_id,
                    second: expected,
                    consequent: single.target,
                    alternative: default_target,
                }
            }
            _ => InstructionKind::Switch {
                condition: handler_id,
                entries,
                default_target,
            },
        };
        code.push(Instruction::at(kind, location));
    }

    /// Returns the block that leaves the method with a dummy result while an
    /// exception is pending.
    fn propagate_block(&mut self, program: &mut Program) -> BlockId {
        if let Some(block) = self.propagate {
            return block;
        }
        let block = program.create_basic_block();
        let result = &self.method.descriptor.result;
        let value = dummy_value(result).map(|make| {
            let receiver = program.create_variable();
            program.block_mut(block).push(make(receiver));
            receiver
        });
        program.block_mut(block).push(InstructionKind::Exit { value });
        self.propagate = Some(block);
        block
    }
}

fn invoke(receiver: Option<Variable>, method: MethodReference, arguments: Vec<Variable>) -> InstructionKind {
    InstructionKind::Invoke {
        receiver,
        instance: None,
        method,
        arguments,
        invocation: InvocationType::Special,
    }
}

fn update_joints(
    joints: &mut JointValues,
    joints_of_source: &FxHashMap<Variable, Vec<Variable>>,
    defined: Variable,
) {
    if let Some(receivers) = joints_of_source.get(&defined) {
        for receiver in receivers {
            joints.insert(*receiver, Some(defined));
        }
    }
}

fn dedup(mut blocks: Vec<BlockId>) -> Vec<BlockId> {
    let mut seen = FxHashSet::default();
    blocks.retain(|block| seen.insert(*block));
    blocks
}

/// Constant instruction producing the zero value of `result`, `None` for void.
fn dummy_value(result: &ValueType) -> Option<fn(Variable) -> InstructionKind> {
    let make: fn(Variable) -> InstructionKind = match result {
        ValueType::Void => return None,
        ValueType::Object(_) | ValueType::Array(_) => {
            |receiver| InstructionKind::NullConstant { receiver }
        }
        ValueType::Primitive(PrimitiveType::Long) => |receiver| InstructionKind::LongConstant {
            receiver,
            constant: 0,
        },
        ValueType::Primitive(PrimitiveType::Float) => |receiver| InstructionKind::FloatConstant {
            receiver,
            constant: 0.0,
        },
        ValueType::Primitive(PrimitiveType::Double) => {
            |receiver| InstructionKind::DoubleConstant {
                receiver,
                constant: 0.0,
            }
        }
        ValueType::Primitive(_) => |receiver| InstructionKind::IntegerConstant {
            receiver,
            constant: 0,
        },
    };
    Some(make)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{verify_ssa, SsaTransformer},
        model::{ProgramEmitter, TryCatchBlock},
        test::{method, program_with_parameters, RUNTIME_EXCEPTION},
    };

    fn call(target: &MethodReference) -> InstructionKind {
        invoke(None, target.clone(), Vec::new())
    }

    fn terminator(program: &Program, block: usize) -> &InstructionKind {
        &program.block(BlockId(block)).instructions.last().unwrap().kind
    }

    #[test]
    fn test_unprotected_call_propagates() {
        let callee = method("Other", "compute", vec![], ValueType::INTEGER);
        let caller = method("Main", "run", vec![], ValueType::INTEGER);
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        let value = emitter.invoke_static(&callee, &[]).unwrap();
        emitter.exit(Some(value));
        let pass = ShadowStackPass::new();
        let session = Session::new();

        assert_eq!(pass.lower(&mut program, &caller, &session).unwrap(), 1);

        // entry, continuation, propagation
        assert_eq!(program.block_count(), 3);
        let entry = &program.block(BlockId(0)).instructions;
        assert!(matches!(entry[0].kind, InstructionKind::IntegerConstant { constant: 0, .. }));
        assert!(matches!(
            &entry[1].kind,
            InstructionKind::Invoke { method, .. } if *method == register_call_site_method()
        ));
        assert!(matches!(
            terminator(&program, 0),
            InstructionKind::BinaryBranch {
                condition: BinaryBranchingCondition::Equal,
                consequent: BlockId(1),
                alternative: BlockId(2),
                ..
            }
        ));
        assert!(matches!(
            program.block(BlockId(2)).instructions[0].kind,
            InstructionKind::IntegerConstant { constant: 0, .. }
        ));
        assert!(matches!(terminator(&program, 2), InstructionKind::Exit { value: Some(_) }));

        let sites = pass.call_sites();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].method, caller);
        assert!(sites[0].handlers.is_empty());
        assert_eq!(session.events.count_kind(EventKind::ExceptionsLowered), 1);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_raise_dispatches_to_handlers_in_order() {
        // b0: e = new RuntimeException; throw e   (RuntimeException -> b1, any -> b2)
        let caller = method("Main", "fail", vec![], ValueType::Void);
        let mut program = program_with_parameters(0);
        let exception = program.create_variable();
        let typed = program.create_variable();
        let any = program.create_variable();
        for _ in 0..3 {
            program.create_basic_block();
        }
        let entry = program.block_mut(BlockId(0));
        entry.push(InstructionKind::Construct {
            receiver: exception,
            class_name: RUNTIME_EXCEPTION.to_string(),
        });
        entry.push(InstructionKind::Raise { exception });
        entry.try_catches = vec![
            TryCatchBlock::new(Some(RUNTIME_EXCEPTION.to_string()), Some(typed), BlockId(1)),
            TryCatchBlock::new(None, Some(any), BlockId(2)),
        ];
        program.block_mut(BlockId(1)).push(InstructionKind::Exit { value: None });
        program.block_mut(BlockId(2)).push(InstructionKind::Exit { value: None });
        SsaTransformer::transform(&mut program, &[]).unwrap();
        let pass = ShadowStackPass::new();

        assert_eq!(pass.lower(&mut program, &caller, &Session::new()).unwrap(), 2);

        assert!(program.blocks().iter().all(|block| block.try_catches.is_empty()));
        for handler in [1, 2] {
            let block = program.block(BlockId(handler));
            assert!(block.phis.is_empty());
            assert!(matches!(
                &block.instructions[0].kind,
                InstructionKind::Invoke { method, receiver: Some(_), .. }
                    if *method == catch_exception_method()
            ));
        }
        let InstructionKind::Switch {
            entries,
            default_target,
            ..
        } = terminator(&program, 0)
        else {
            panic!("construct dispatches through a switch");
        };
        assert_eq!(
            entries.iter().map(|e| (e.condition, e.target)).collect::<Vec<_>>(),
            [(0, BlockId(3)), (1, BlockId(1))]
        );
        assert_eq!(*default_target, BlockId(2));
        assert!(program.block(BlockId(3)).instructions.iter().any(|insn| matches!(
            &insn.kind,
            InstructionKind::Invoke { method, .. } if *method == throw_exception_method()
        )));
        assert!(matches!(
            terminator(&program, 3),
            InstructionKind::BinaryBranch {
                consequent: BlockId(1),
                alternative: BlockId(2),
                ..
            }
        ));

        let sites = pass.call_sites();
        assert_eq!(sites.iter().map(|s| s.id).collect::<Vec<_>>(), [0, 3]);
        assert_eq!(
            sites[1].handlers,
            [
                ExceptionHandlerDescriptor {
                    id: 4,
                    class_name: Some(RUNTIME_EXCEPTION.to_string())
                },
                ExceptionHandlerDescriptor {
                    id: 5,
                    class_name: None
                },
            ]
        );
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_joint_becomes_phi_of_current_versions() {
        // b0: x = 1; f(); x = 2; f(); goto b1   (any -> b2)
        // b1: return x
        // b2: return x
        let callee = method("Other", "f", vec![], ValueType::Void);
        let caller = method("Main", "run", vec![], ValueType::INTEGER);
        let mut program = program_with_parameters(0);
        let x = program.create_variable();
        let caught = program.create_variable();
        for _ in 0..3 {
            program.create_basic_block();
        }
        let entry = program.block_mut(BlockId(0));
        entry.push(InstructionKind::IntegerConstant {
            receiver: x,
            constant: 1,
        });
        entry.push(call(&callee));
        entry.push(InstructionKind::IntegerConstant {
            receiver: x,
            constant: 2,
        });
        entry.push(call(&callee));
        entry.push(InstructionKind::Jump { target: BlockId(1) });
        entry
            .try_catches
            .push(TryCatchBlock::new(None, Some(caught), BlockId(2)));
        program.block_mut(BlockId(1)).push(InstructionKind::Exit { value: Some(x) });
        program.block_mut(BlockId(2)).push(InstructionKind::Exit { value: Some(x) });
        SsaTransformer::transform(&mut program, &[]).unwrap();

        ShadowStackPass::new()
            .lower(&mut program, &caller, &Session::new())
            .unwrap();

        let first = program.block(BlockId(0)).instructions[0].kind.defined_variable();
        let second_segment = BlockId(3);
        let second = program.block(second_segment).instructions[0].kind.defined_variable();
        let handler = program.block(BlockId(2));
        assert_eq!(handler.phis.len(), 1);
        let incomings: Vec<_> = handler.phis[0]
            .incomings
            .iter()
            .map(|i| (i.source, Some(i.value)))
            .collect();
        assert_eq!(incomings, [(BlockId(0), first), (second_segment, second)]);
        assert!(matches!(
            terminator(&program, 3),
            InstructionKind::BinaryBranch {
                consequent: BlockId(1),
                alternative: BlockId(2),
                ..
            }
        ));
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_handler_shared_with_normal_flow_catches_in_landing_block() {
        // b0: x = 1; f(); x = 2; f(); goto b1   (any -> b1)
        // b1: return x
        let callee = method("Other", "f", vec![], ValueType::Void);
        let caller = method("Main", "run", vec![], ValueType::INTEGER);
        let mut program = program_with_parameters(0);
        let x = program.create_variable();
        let caught = program.create_variable();
        for _ in 0..2 {
            program.create_basic_block();
        }
        let entry = program.block_mut(BlockId(0));
        for constant in [1, 2] {
            entry.push(InstructionKind::IntegerConstant {
                receiver: x,
                constant,
            });
            entry.push(call(&callee));
        }
        entry.push(InstructionKind::Jump { target: BlockId(1) });
        entry
            .try_catches
            .push(TryCatchBlock::new(None, Some(caught), BlockId(1)));
        program.block_mut(BlockId(1)).push(InstructionKind::Exit { value: Some(x) });
        SsaTransformer::transform(&mut program, &[]).unwrap();
        let landing = program.block(BlockId(0)).try_catches[0].handler;

        ShadowStackPass::new()
            .lower(&mut program, &caller, &Session::new())
            .unwrap();

        let catches = |block: &crate::model::BasicBlock| {
            block.instructions.iter().any(|insn| matches!(
                &insn.kind,
                InstructionKind::Invoke { method, .. } if *method == catch_exception_method()
            ))
        };
        let catching: Vec<BlockId> = (0..program.block_count())
            .map(BlockId)
            .filter(|&block| catches(program.block(block)))
            .collect();
        assert_eq!(catching, [landing]);
        verify_ssa(&program, 0).unwrap();
    }

    #[test]
    fn test_unmanaged_methods_are_left_alone() {
        let caller = method("Native", "helper", vec![], ValueType::Void);
        let mut program = program_with_parameters(0);
        let mut emitter = ProgramEmitter::create(&mut program);
        emitter.invoke_static(&method("Other", "f", vec![], ValueType::Void), &[]);
        emitter.exit(None);
        let before = program.clone();
        let pass = ShadowStackPass::new().with_unmanaged_class("Native");

        assert!(!pass
            .run_on_method(&mut program, &caller, &Session::new())
            .unwrap());
        assert_eq!(program, before);
        assert!(pass.call_sites().is_empty());
    }
}
