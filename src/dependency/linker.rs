//! Pruning and resolution of classes after the dependency analysis.
//!
//! The linker keeps only what the analysis reached:
//!
//! - classes that were never linked are dropped
//! - methods that were never linked are dropped
//! - methods that were linked but never used lose their body and become abstract
//! - fields that were never linked are dropped
//!
//! Bodies of used methods are rewritten so that every call site names the
//! declaration it resolves to, every field access names the declaring class, and
//! accesses to fields of other classes are preceded by the owner's class
//! initialization.

use crate::{
    compiler::{events::EventKind, Session},
    model::{ClassHolder, ClassSet, ElementModifier, Instruction, InstructionKind, Program},
};

use super::info::DependencyInfo;

/// Counters of a linking run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Classes dropped because they were never reached
    pub classes_removed: usize,
    /// Methods dropped because they were never linked
    pub methods_removed: usize,
    /// Methods linked but never used, turned abstract
    pub methods_stripped: usize,
    /// Fields dropped because they were never linked
    pub fields_removed: usize,
    /// Call sites retargeted to another declaration
    pub calls_resolved: usize,
    /// Class initializations inserted before field accesses
    pub inits_inserted: usize,
}

/// Applies the results of a dependency analysis to a class set.
pub struct Linker<'a> {
    info: &'a DependencyInfo,
    session: &'a Session,
}

impl<'a> Linker<'a> {
    /// Creates a linker for the given analysis results.
    #[must_use]
    pub fn new(info: &'a DependencyInfo, session: &'a Session) -> Self {
        Linker { info, session }
    }

    /// Links every class of `classes`, dropping unreached ones.
    pub fn link(&self, classes: &mut ClassSet) -> LinkStats {
        let mut stats = LinkStats::default();
        for name in classes.class_names() {
            if self.info.class(&name).is_none() {
                classes.remove(&name);
                stats.classes_removed += 1;
            }
        }
        for class in classes.iter_mut() {
            self.link_class(class, &mut stats);
        }
        stats
    }

    /// Links the members of one class.
    pub fn link_class(&self, class: &mut ClassHolder, stats: &mut LinkStats) {
        let descriptors: Vec<_> = class.methods.keys().cloned().collect();
        for descriptor in descriptors {
            let Some(method) = class.methods.get_mut(&descriptor) else {
                continue;
            };
            let reference = method.reference();
            match self.info.method(&reference) {
                None => {
                    class.methods.remove(&descriptor);
                    stats.methods_removed += 1;
                    self.session
                        .events
                        .record(EventKind::MethodRemoved)
                        .method(&reference);
                }
                Some(dependency) if !dependency.is_used() => {
                    method.modifiers.insert(ElementModifier::ABSTRACT);
                    method.program = None;
                    stats.methods_stripped += 1;
                    self.session
                        .events
                        .record(EventKind::MethodStripped)
                        .method(&reference);
                }
                Some(_) => {
                    if let Some(program) = method.program.as_mut() {
                        self.link_program(&class.name, program, stats);
                    }
                }
            }
        }

        let field_names: Vec<String> = class.fields.keys().cloned().collect();
        for name in field_names {
            let Some(field) = class.fields.get(&name) else {
                continue;
            };
            let reference = field.reference();
            if self.info.field(&reference).is_none() {
                class.fields.remove(&name);
                stats.fields_removed += 1;
                self.session
                    .events
                    .record(EventKind::FieldRemoved)
                    .message(format!("field {reference} removed"));
            }
        }
    }

    /// Rewrites the call sites and field accesses of a method body owned by
    /// `owner`.
    pub fn link_program(&self, owner: &str, program: &mut Program, stats: &mut LinkStats) {
        for block in program.blocks_mut() {
            let mut index = 0;
            while index < block.instructions.len() {
                let insn = &mut block.instructions[index];
                let location = insn.location.clone();
                let accessed_class = match &mut insn.kind {
                    InstructionKind::Invoke { method, .. } => {
                        if let Some(resolved) = self.info.method_implementation(method) {
                            if resolved != method {
                                *method = resolved.clone();
                                stats.calls_resolved += 1;
                            }
                        }
                        None
                    }
                    InstructionKind::GetField { field, .. }
                    | InstructionKind::PutField { field, .. } => {
                        if let Some(resolved) = self.info.field(field) {
                            field.clone_from(&resolved.reference);
                        }
                        (field.class_name != owner).then(|| field.class_name.clone())
                    }
                    _ => None,
                };

                if let Some(class_name) = accessed_class {
                    block.instructions.insert(
                        index,
                        Instruction::at(InstructionKind::InitClass { class_name }, location),
                    );
                    stats.inits_inserted += 1;
                    index += 1;
                }
                index += 1;
            }
        }
    }
}
