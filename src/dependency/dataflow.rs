//! Per-method merging of variables into dependency node classes.
//!
//! Variables that provably hold the same set of objects share a node: both sides
//! of an assignment, null check or array unwrap, and every member of a cycle of
//! phis and joints. Variables that only ever hold primitive values get no node.

use crate::{
    model::{InstructionKind, Program, Variable},
    utils::graph::{
        algorithms::{is_cyclic_component, strongly_connected_components},
        GraphBuilder,
    },
};

/// Disjoint sets over dense indices, with path halving and union by size.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(count: usize) -> Self {
        DisjointSet {
            parent: (0..count).collect(),
            size: vec![1; count],
        }
    }

    fn find(&mut self, mut index: usize) -> usize {
        while self.parent[index] != index {
            self.parent[index] = self.parent[self.parent[index]];
            index = self.parent[index];
        }
        index
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        let (big, small) = if self.size[a] >= self.size[b] { (a, b) } else { (b, a) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// Result of [`build_node_mapping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeMapping {
    /// Node class per variable, `None` for primitive-only variables
    pub classes: Vec<Option<usize>>,
    /// Number of classes; classes `0..=parameter_count` belong to the parameters
    pub class_count: usize,
}

/// Computes the node class of every variable of an SSA program.
///
/// `significant_parameters[i]` tells whether variable `i` (0 being the receiver)
/// is a reference-typed parameter.
pub(crate) fn build_node_mapping(program: &Program, significant_parameters: &[bool]) -> NodeMapping {
    let count = program.variable_count();
    let primitive = primitive_variables(program, significant_parameters);
    let mut sets = DisjointSet::new(count);

    let merge = |sets: &mut DisjointSet, a: Variable, b: Variable| {
        if a.index() < count && b.index() < count && !primitive[a.index()] && !primitive[b.index()] {
            sets.union(a.index(), b.index());
        }
    };

    let mut builder = GraphBuilder::new(count);
    for block in program.blocks() {
        for insn in &block.instructions {
            match &insn.kind {
                InstructionKind::Assign { receiver, assignee: value }
                | InstructionKind::NullCheck { receiver, value }
                | InstructionKind::UnwrapArray {
                    receiver,
                    array: value,
                    ..
                } => merge(&mut sets, *receiver, *value),
                _ => {}
            }
        }
        for phi in &block.phis {
            for incoming in &phi.incomings {
                if incoming.value.index() < count && phi.receiver.index() < count {
                    builder.add_edge(incoming.value.index(), phi.receiver.index());
                }
            }
        }
        for try_catch in &block.try_catches {
            for joint in &try_catch.joints {
                for source in &joint.source_variables {
                    if source.index() < count && joint.receiver.index() < count {
                        builder.add_edge(source.index(), joint.receiver.index());
                    }
                }
            }
        }
    }

    let graph = builder.build();
    for component in strongly_connected_components(&graph) {
        if !is_cyclic_component(&graph, &component) {
            continue;
        }
        let first = Variable(component[0].index());
        for node in &component[1..] {
            merge(&mut sets, first, Variable(node.index()));
        }
    }

    let parameter_slots = significant_parameters.len();
    let mut root_class: Vec<Option<usize>> = vec![None; count];
    let mut classes = vec![None; count];
    let mut class_count = parameter_slots;

    for index in 0..parameter_slots.min(count) {
        if primitive[index] {
            continue;
        }
        let root = sets.find(index);
        let class = *root_class[root].get_or_insert(index);
        classes[index] = Some(class);
    }
    for index in parameter_slots..count {
        if primitive[index] {
            continue;
        }
        let root = sets.find(index);
        let class = *root_class[root].get_or_insert_with(|| {
            class_count += 1;
            class_count - 1
        });
        classes[index] = Some(class);
    }

    NodeMapping {
        classes,
        class_count,
    }
}

/// Marks variables that can only hold primitive values.
fn primitive_variables(program: &Program, significant_parameters: &[bool]) -> Vec<bool> {
    let count = program.variable_count();
    let mut primitive = vec![false; count];
    // Variables whose kind follows other variables: (receiver, sources)
    let mut derived: Vec<(usize, Vec<usize>)> = Vec::new();

    for (index, significant) in significant_parameters.iter().enumerate() {
        if index < count {
            primitive[index] = !significant;
        }
    }

    for block in program.blocks() {
        for insn in &block.instructions {
            let (receiver, is_primitive) = match &insn.kind {
                InstructionKind::IntegerConstant { receiver, .. }
                | InstructionKind::LongConstant { receiver, .. }
                | InstructionKind::FloatConstant { receiver, .. }
                | InstructionKind::DoubleConstant { receiver, .. }
                | InstructionKind::Binary { receiver, .. }
                | InstructionKind::Negate { receiver, .. }
                | InstructionKind::CastNumber { receiver, .. }
                | InstructionKind::CastInteger { receiver, .. }
                | InstructionKind::ArrayLength { receiver, .. }
                | InstructionKind::IsInstance { receiver, .. } => (*receiver, true),
                InstructionKind::GetField {
                    receiver,
                    field_type,
                    ..
                } => (*receiver, field_type.is_primitive()),
                InstructionKind::Invoke {
                    receiver: Some(receiver),
                    method,
                    ..
                } => (*receiver, method.descriptor.result.is_primitive()),
                InstructionKind::InvokeDynamic {
                    receiver: Some(receiver),
                    method,
                    ..
                } => (*receiver, method.result.is_primitive()),
                InstructionKind::Assign { receiver, assignee } => {
                    derived.push((receiver.index(), vec![assignee.index()]));
                    continue;
                }
                InstructionKind::NullCheck { receiver, value } => {
                    derived.push((receiver.index(), vec![value.index()]));
                    continue;
                }
                _ => continue,
            };
            if receiver.index() < count {
                primitive[receiver.index()] = is_primitive;
            }
        }
        for phi in &block.phis {
            derived.push((
                phi.receiver.index(),
                phi.incomings.iter().map(|i| i.value.index()).collect(),
            ));
        }
        for try_catch in &block.try_catches {
            for joint in &try_catch.joints {
                derived.push((
                    joint.receiver.index(),
                    joint.source_variables.iter().map(|v| v.index()).collect(),
                ));
            }
        }
    }

    // Optimistic fixpoint: derived variables start primitive and are demoted once
    // any source may hold a reference.
    derived.retain(|(receiver, sources)| *receiver < count && !sources.is_empty());
    for (receiver, _) in &derived {
        primitive[*receiver] = true;
    }
    let mut changed = true;
    while changed {
        changed = false;
        for (receiver, sources) in &derived {
            if primitive[*receiver] && sources.iter().any(|&s| s >= count || !primitive[s]) {
                primitive[*receiver] = false;
                changed = true;
            }
        }
    }
    primitive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BasicBlock, BlockId, Incoming, Instruction, MethodDescriptor, MethodReference, Phi,
        ValueType,
    };

    fn program(variables: usize, blocks: Vec<BasicBlock>) -> Program {
        let mut program = Program::new();
        for _ in 0..variables {
            program.create_variable();
        }
        for block in blocks {
            let id = program.create_basic_block();
            *program.block_mut(id) = block;
        }
        program
    }

    fn block(kinds: Vec<InstructionKind>) -> BasicBlock {
        BasicBlock {
            instructions: kinds.into_iter().map(Instruction::new).collect(),
            ..BasicBlock::default()
        }
    }

    #[test]
    fn test_assignment_shares_class() {
        let p = program(
            3,
            vec![block(vec![
                InstructionKind::Construct {
                    receiver: Variable(1),
                    class_name: "A".into(),
                },
                InstructionKind::Assign {
                    receiver: Variable(2),
                    assignee: Variable(1),
                },
                InstructionKind::Exit { value: None },
            ])],
        );
        let mapping = build_node_mapping(&p, &[true]);
        assert_eq!(mapping.classes[0], Some(0));
        assert!(mapping.classes[1].is_some());
        assert_eq!(mapping.classes[1], mapping.classes[2]);
        assert_eq!(mapping.class_count, 2);
    }

    #[test]
    fn test_primitive_values_have_no_class() {
        let p = program(
            4,
            vec![block(vec![
                InstructionKind::IntegerConstant {
                    receiver: Variable(2),
                    constant: 1,
                },
                InstructionKind::Assign {
                    receiver: Variable(3),
                    assignee: Variable(2),
                },
                InstructionKind::Exit { value: None },
            ])],
        );
        let mapping = build_node_mapping(&p, &[false, false]);
        assert_eq!(mapping.classes, vec![None; 4]);
    }

    #[test]
    fn test_loop_carried_value_is_merged() {
        let call = MethodReference::new(
            "A",
            MethodDescriptor::new("next", vec![], ValueType::object("A")),
        );
        let mut entry = block(vec![InstructionKind::Jump { target: BlockId(1) }]);
        entry.instructions.insert(
            0,
            Instruction::new(InstructionKind::Construct {
                receiver: Variable(1),
                class_name: "A".into(),
            }),
        );
        let mut header = block(vec![
            InstructionKind::Invoke {
                receiver: Some(Variable(3)),
                instance: Some(Variable(2)),
                method: call,
                arguments: vec![],
                invocation: crate::model::InvocationType::Virtual,
            },
            InstructionKind::Jump { target: BlockId(1) },
        ]);
        header.phis.push(Phi {
            receiver: Variable(2),
            incomings: vec![
                Incoming {
                    source: BlockId(0),
                    value: Variable(1),
                },
                Incoming {
                    source: BlockId(1),
                    value: Variable(4),
                },
            ],
        });
        header.instructions.insert(
            1,
            Instruction::new(InstructionKind::Assign {
                receiver: Variable(4),
                assignee: Variable(2),
            }),
        );
        let p = program(5, vec![entry, header]);
        let mapping = build_node_mapping(&p, &[true]);
        assert_eq!(mapping.classes[2], mapping.classes[4]);
        assert_ne!(mapping.classes[1], mapping.classes[2]);
        assert_ne!(mapping.classes[3], mapping.classes[2]);
    }
}
