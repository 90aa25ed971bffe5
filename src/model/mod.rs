//! The program model: classes, methods, types and the SSA intermediate
//! representation every pass reads and writes.
//!
//! # Key Components
//!
//! - [`Program`] - one method body as basic blocks over dense variables
//! - [`InstructionKind`] - the closed instruction set
//! - [`ClassSet`] / [`ClassSource`] - class metadata and hierarchy queries
//! - [`ValueType`], [`MethodReference`], [`FieldReference`] - symbolic references
//! - [`ProgramEmitter`] - instruction cursor for synthesized code
//! - [`util`] - control-flow graphs and block rewriting helpers

mod class;
mod emit;
mod instruction;
mod program;
mod types;
pub mod util;

pub use class::{
    ClassHolder, ClassSet, ClassSource, ElementModifier, FieldHolder, MethodHolder, OBJECT_CLASS,
};
pub use emit::ProgramEmitter;
pub use instruction::{
    ArrayElementType, BinaryBranchingCondition, BinaryOperation, BlockId, BranchingCondition,
    CastIntegerDirection, Instruction, InstructionKind, IntegerSubtype, InvocationType,
    MethodHandle, MethodHandleKind, NumericOperandType, RuntimeConstant, SwitchEntry, Variable,
};
pub use program::{
    BasicBlock, Incoming, Phi, Program, TryCatchBlock, TryCatchJoint, VariableInfo,
};
pub use types::{
    CallLocation, FieldReference, MethodDescriptor, MethodReference, PrimitiveType, TextLocation,
    ValueType,
};
