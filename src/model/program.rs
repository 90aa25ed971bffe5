//! Programs, basic blocks, phis and try/catch regions.
//!
//! A [`Program`] is the body of one method. It owns its variables and blocks;
//! both are addressed by dense indices ([`Variable`], [`BlockId`]). Passes mutate
//! programs in place. Any pass that inserts or splits blocks is responsible for
//! redirecting phi incomings whose source block changed.

use std::{collections::BTreeSet, fmt};

use crate::model::instruction::{BlockId, Instruction, InstructionKind, InvocationType, Variable};

/// Debug information attached to a variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableInfo {
    /// Source-level names this variable stands for
    pub debug_names: BTreeSet<String>,
}

/// One `(predecessor block, value)` pair of a phi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Incoming {
    /// The predecessor the value flows from
    pub source: BlockId,
    /// The value
    pub value: Variable,
}

/// A merge of values at a control-flow join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The variable defined by the phi
    pub receiver: Variable,
    /// One entry per merged predecessor
    pub incomings: Vec<Incoming>,
}

impl Phi {
    /// Creates a phi with no incomings.
    #[must_use]
    pub fn new(receiver: Variable) -> Self {
        Phi {
            receiver,
            incomings: Vec::new(),
        }
    }
}

/// The value of a variable on entry to an exception handler.
///
/// Inside a protected block a variable may be redefined several times, and an
/// exception may leave the block after any of those definitions. The joint's
/// receiver stands for "whichever of `source_variables` was current when the
/// exception was raised".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchJoint {
    /// Variable visible to the handler
    pub receiver: Variable,
    /// Every version that may be current when control leaves the protected block
    pub source_variables: Vec<Variable>,
}

/// A try/catch region protecting one basic block.
///
/// A block lists its regions innermost first; exceptions are matched against them
/// in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlock {
    /// Caught class, `None` for a catch-all
    pub exception_type: Option<String>,
    /// Receives the caught exception in the handler
    pub exception_variable: Option<Variable>,
    /// Entry of the handler
    pub handler: BlockId,
    /// Values merged across the exceptional edge
    pub joints: Vec<TryCatchJoint>,
}

impl TryCatchBlock {
    /// Creates a region without joints.
    #[must_use]
    pub fn new(
        exception_type: Option<String>,
        exception_variable: Option<Variable>,
        handler: BlockId,
    ) -> Self {
        TryCatchBlock {
            exception_type,
            exception_variable,
            handler,
            joints: Vec::new(),
        }
    }
}

/// A straight-line sequence of instructions ending in a terminator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    /// Merges at the start of the block
    pub phis: Vec<Phi>,
    /// Body, the last instruction being the terminator
    pub instructions: Vec<Instruction>,
    /// Regions protecting this block, innermost first
    pub try_catches: Vec<TryCatchBlock>,
    /// Variable receiving the caught exception when the block is a handler.
    /// Removed by exception lowering.
    pub exception_variable: Option<Variable>,
}

impl BasicBlock {
    /// Returns the terminating instruction, if the block has one.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions
            .last()
            .filter(|insn| insn.kind.is_terminator())
    }

    /// Returns the normal (non-exceptional) successors.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator()
            .map(|insn| insn.kind.targets())
            .unwrap_or_default()
    }

    /// Returns `true` if the block has no phis, instructions or regions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phis.is_empty() && self.instructions.is_empty() && self.try_catches.is_empty()
    }

    /// Replaces `from` by `to` in the incomings of this block's phis.
    pub fn redirect_phi_sources(&mut self, from: BlockId, to: BlockId) {
        for phi in &mut self.phis {
            for incoming in &mut phi.incomings {
                if incoming.source == from {
                    incoming.source = to;
                }
            }
        }
    }

    /// Appends an instruction without location.
    pub fn push(&mut self, kind: InstructionKind) {
        self.instructions.push(Instruction::new(kind));
    }
}

/// The intermediate representation of one method body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    variables: Vec<VariableInfo>,
    blocks: Vec<BasicBlock>,
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new variable.
    pub fn create_variable(&mut self) -> Variable {
        self.variables.push(VariableInfo::default());
        Variable(self.variables.len() - 1)
    }

    /// Allocates a new, empty basic block.
    pub fn create_basic_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        BlockId(self.blocks.len() - 1)
    }

    /// Number of variables.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Number of basic blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` for a program without blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns a block. Panics on an out-of-range id, which is a pass defect.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    /// Returns a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// Returns a block if the id is in range.
    #[must_use]
    pub fn get_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    /// All blocks in index order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// All blocks in index order, mutably.
    pub fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    /// Iterates over all block ids.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// Debug information of a variable.
    #[must_use]
    pub fn variable(&self, var: Variable) -> &VariableInfo {
        &self.variables[var.0]
    }

    /// Debug information of a variable, mutably.
    pub fn variable_mut(&mut self, var: Variable) -> &mut VariableInfo {
        &mut self.variables[var.0]
    }

    /// Debug information of all variables.
    #[must_use]
    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    /// Total number of instructions in all blocks.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Replaces the variable table, used when a pass renumbers variables.
    pub fn set_variables(&mut self, variables: Vec<VariableInfo>) {
        self.variables = variables;
    }

    /// Removes every block past `count`.
    pub fn truncate_blocks(&mut self, count: usize) {
        self.blocks.truncate(count);
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, block) in self.blocks.iter().enumerate() {
            writeln!(f, "{}", BlockId(index))?;
            if let Some(var) = block.exception_variable {
                writeln!(f, "    {var} := exception")?;
            }
            for phi in &block.phis {
                write!(f, "    {} := phi", phi.receiver)?;
                for (i, incoming) in phi.incomings.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{} from {}", incoming.value, incoming.source)?;
                }
                writeln!(f)?;
            }
            for insn in &block.instructions {
                writeln!(f, "    {}", insn.kind)?;
            }
            for tc in &block.try_catches {
                write!(
                    f,
                    "    catch {}",
                    tc.exception_type.as_deref().unwrap_or("<any>")
                )?;
                if let Some(var) = tc.exception_variable {
                    write!(f, " {var}")?;
                }
                writeln!(f, " -> {}", tc.handler)?;
                for joint in &tc.joints {
                    write!(f, "        {} := joint", joint.receiver)?;
                    for source in &joint.source_variables {
                        write!(f, " {source}")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(vars: &[Variable]) -> String {
            vars.iter()
                .map(Variable::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            InstructionKind::Empty => write!(f, "nop"),
            InstructionKind::ClassConstant { receiver, constant } => {
                write!(f, "{receiver} := classOf {constant}")
            }
            InstructionKind::NullConstant { receiver } => write!(f, "{receiver} := null"),
            InstructionKind::IntegerConstant { receiver, constant } => {
                write!(f, "{receiver} := {constant}")
            }
            InstructionKind::LongConstant { receiver, constant } => {
                write!(f, "{receiver} := {constant}L")
            }
            InstructionKind::FloatConstant { receiver, constant } => {
                write!(f, "{receiver} := {constant}F")
            }
            InstructionKind::DoubleConstant { receiver, constant } => {
                write!(f, "{receiver} := {constant}D")
            }
            InstructionKind::StringConstant { receiver, constant } => {
                write!(f, "{receiver} := {constant:?}")
            }
            InstructionKind::Binary {
                receiver,
                operation,
                operand_type,
                first,
                second,
            } => write!(f, "{receiver} := {first} {operation} {second} as {operand_type}"),
            InstructionKind::Negate {
                receiver,
                operand_type,
                operand,
            } => write!(f, "{receiver} := -{operand} as {operand_type}"),
            InstructionKind::Assign { receiver, assignee } => write!(f, "{receiver} := {assignee}"),
            InstructionKind::Cast {
                receiver,
                value,
                target_type,
            } => write!(f, "{receiver} := cast {value} to {target_type}"),
            InstructionKind::CastNumber {
                receiver,
                value,
                source,
                target,
            } => write!(f, "{receiver} := cast {value} from {source} to {target}"),
            InstructionKind::CastInteger {
                receiver,
                value,
                target,
                direction,
            } => write!(f, "{receiver} := cast {value} {direction} {target}"),
            InstructionKind::Branch {
                condition,
                operand,
                consequent,
                alternative,
            } => write!(f, "if {operand} {condition} then goto {consequent} else goto {alternative}"),
            InstructionKind::BinaryBranch {
                condition,
                first,
                second,
                consequent,
                alternative,
            } => write!(
                f,
                "if {first} {condition} {second} then goto {consequent} else goto {alternative}"
            ),
            InstructionKind::Jump { target } => write!(f, "goto {target}"),
            InstructionKind::Switch {
                condition,
                entries,
                default_target,
            } => {
                write!(f, "switch {condition}")?;
                for entry in entries {
                    write!(f, " case {}: goto {};", entry.condition, entry.target)?;
                }
                write!(f, " default: goto {default_target}")
            }
            InstructionKind::Exit { value: Some(v) } => write!(f, "return {v}"),
            InstructionKind::Exit { value: None } => write!(f, "return"),
            InstructionKind::Raise { exception } => write!(f, "throw {exception}"),
            InstructionKind::Construct {
                receiver,
                class_name,
            } => write!(f, "{receiver} := new {class_name}"),
            InstructionKind::ConstructArray {
                receiver,
                item_type,
                size,
            } => write!(f, "{receiver} := new {item_type}[{size}]"),
            InstructionKind::ConstructMultiArray {
                receiver,
                item_type,
                dimensions,
            } => write!(f, "{receiver} := new {item_type}[{}]", list(dimensions)),
            InstructionKind::GetField {
                receiver,
                instance,
                field,
                ..
            } => match instance {
                Some(i) => write!(f, "{receiver} := {i}.{}", field.field_name),
                None => write!(f, "{receiver} := {field}"),
            },
            InstructionKind::PutField {
                instance,
                field,
                value,
                ..
            } => match instance {
                Some(i) => write!(f, "{i}.{} := {value}", field.field_name),
                None => write!(f, "{field} := {value}"),
            },
            InstructionKind::GetElement {
                receiver,
                array,
                index,
            } => write!(f, "{receiver} := {array}[{index}]"),
            InstructionKind::PutElement {
                array,
                index,
                value,
            } => write!(f, "{array}[{index}] := {value}"),
            InstructionKind::ArrayLength { receiver, array } => {
                write!(f, "{receiver} := lengthOf {array}")
            }
            InstructionKind::UnwrapArray {
                receiver,
                array,
                element_type,
            } => write!(f, "{receiver} := data {array} as {element_type}"),
            InstructionKind::CloneArray { receiver, array } => {
                write!(f, "{receiver} := clone {array}")
            }
            InstructionKind::Invoke {
                receiver,
                instance,
                method,
                arguments,
                invocation,
            } => {
                if let Some(r) = receiver {
                    write!(f, "{r} := ")?;
                }
                let kind = match invocation {
                    InvocationType::Special => "invoke",
                    InvocationType::Virtual => "invokeVirtual",
                };
                match instance {
                    Some(i) => write!(f, "{kind} {method} on {i}({})", list(arguments)),
                    None => write!(f, "{kind} {method}({})", list(arguments)),
                }
            }
            InstructionKind::InvokeDynamic {
                receiver,
                method,
                arguments,
                bootstrap,
                ..
            } => {
                if let Some(r) = receiver {
                    write!(f, "{r} := ")?;
                }
                write!(
                    f,
                    "invokeDynamic {method}({}) via {}.{}",
                    list(arguments),
                    bootstrap.class_name,
                    bootstrap.name
                )
            }
            InstructionKind::IsInstance {
                receiver,
                value,
                target_type,
            } => write!(f, "{receiver} := {value} instanceOf {target_type}"),
            InstructionKind::InitClass { class_name } => write!(f, "initclass {class_name}"),
            InstructionKind::NullCheck { receiver, value } => {
                write!(f, "{receiver} := nullCheck {value}")
            }
            InstructionKind::MonitorEnter { object } => write!(f, "monitorEnter {object}"),
            InstructionKind::MonitorExit { object } => write!(f, "monitorExit {object}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_list() {
        let mut program = Program::new();
        let a = program.create_variable();
        let block = program.create_basic_block();
        program.block_mut(block).push(InstructionKind::IntegerConstant {
            receiver: a,
            constant: 7,
        });
        program
            .block_mut(block)
            .push(InstructionKind::Exit { value: Some(a) });

        let listing = program.to_string();
        assert!(listing.contains("v0 := 7"));
        assert!(listing.contains("return v0"));
        assert_eq!(program.instruction_count(), 2);
        assert!(program.block(block).terminator().is_some());
        assert!(program.block(block).successors().is_empty());
    }

    #[test]
    fn test_redirect_phi_sources() {
        let mut block = BasicBlock::default();
        let mut phi = Phi::new(Variable(3));
        phi.incomings.push(Incoming {
            source: BlockId(1),
            value: Variable(1),
        });
        phi.incomings.push(Incoming {
            source: BlockId(2),
            value: Variable(2),
        });
        block.phis.push(phi);

        block.redirect_phi_sources(BlockId(1), BlockId(5));
        assert_eq!(block.phis[0].incomings[0].source, BlockId(5));
        assert_eq!(block.phis[0].incomings[1].source, BlockId(2));
    }
}
