//! The instruction set of the intermediate representation.
//!
//! Instructions form a closed sum type. Every pass matches exhaustively on
//! [`InstructionKind`], and the binary cache derives its tag byte from the variant
//! (see [`InstructionKind::tag`]).
//!
//! Operands are [`Variable`]s and control-flow targets are [`BlockId`]s. Helper
//! methods give uniform access to the variables an instruction reads
//! ([`InstructionKind::visit_uses`], [`InstructionKind::try_map_uses`]), the variable
//! it defines ([`InstructionKind::defined_variable`]) and the blocks it can transfer
//! control to ([`InstructionKind::targets`]).

use std::{convert::Infallible, fmt};

use strum::{Display, EnumIter, FromRepr};

use crate::model::types::{
    FieldReference, MethodDescriptor, MethodReference, TextLocation, ValueType,
};

/// A variable of a program, identified by its dense index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(pub usize);

impl Variable {
    /// Returns the raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A basic block of a program, identified by its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    /// Returns the raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$b{}", self.0)
    }
}

/// Arithmetic and bitwise binary operations.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum BinaryOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Compare,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    ShiftRightUnsigned,
}

/// The numeric kind an arithmetic instruction operates on.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum NumericOperandType {
    Int,
    Long,
    Float,
    Double,
}

/// Sub-int integer types for narrowing and widening casts.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum IntegerSubtype {
    Byte,
    Short,
    Character,
}

/// Direction of an integer-subtype cast.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum CastIntegerDirection {
    FromInteger,
    ToInteger,
}

/// Conditions comparing a single operand against zero or null.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum BranchingCondition {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Null,
    NotNull,
}

/// Conditions comparing two operands.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum BinaryBranchingCondition {
    Equal,
    NotEqual,
    ReferenceEqual,
    ReferenceNotEqual,
}

/// Element representation of an unwrapped array.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum ArrayElementType {
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
}

/// How an invocation selects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum InvocationType {
    /// Static calls, constructors and super calls: the reference is the target
    Special,
    /// Dispatch on the runtime type of the instance
    Virtual,
}

/// Kind of a method handle used by invoke-dynamic bootstrap data.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, Display)]
#[repr(u8)]
pub enum MethodHandleKind {
    GetField,
    GetStaticField,
    PutField,
    PutStaticField,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    InvokeConstructor,
    InvokeInterface,
}

/// A reference to a field accessor or method, as passed to bootstrap methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodHandle {
    /// What the handle does
    pub kind: MethodHandleKind,
    /// Owning class
    pub class_name: String,
    /// Field or method name
    pub name: String,
    /// Field type for accessors
    pub value_type: Option<ValueType>,
    /// Signature for method handles
    pub descriptor: Option<MethodDescriptor>,
}

impl MethodHandle {
    /// Creates a static-method handle.
    #[must_use]
    pub fn static_method(method: &MethodReference) -> Self {
        MethodHandle {
            kind: MethodHandleKind::InvokeStatic,
            class_name: method.class_name.clone(),
            name: method.descriptor.name.clone(),
            value_type: None,
            descriptor: Some(method.descriptor.clone()),
        }
    }

    /// Returns the referenced method, for the method-invoking kinds.
    #[must_use]
    pub fn method(&self) -> Option<MethodReference> {
        self.descriptor
            .as_ref()
            .map(|desc| MethodReference::new(self.class_name.clone(), desc.clone()))
    }
}

/// Constant arguments of bootstrap methods.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum RuntimeConstant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(ValueType),
    Method(MethodDescriptor),
    MethodHandle(MethodHandle),
}

/// One case of a switch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchEntry {
    /// The matched value
    pub condition: i32,
    /// The block executed on a match
    pub target: BlockId,
}

/// The instruction variants.
///
/// Receivers are the variables an instruction defines; every other variable field
/// is read.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum InstructionKind {
    /// No operation
    Empty,
    ClassConstant {
        receiver: Variable,
        constant: ValueType,
    },
    NullConstant {
        receiver: Variable,
    },
    IntegerConstant {
        receiver: Variable,
        constant: i32,
    },
    LongConstant {
        receiver: Variable,
        constant: i64,
    },
    FloatConstant {
        receiver: Variable,
        constant: f32,
    },
    DoubleConstant {
        receiver: Variable,
        constant: f64,
    },
    StringConstant {
        receiver: Variable,
        constant: String,
    },
    Binary {
        receiver: Variable,
        operation: BinaryOperation,
        operand_type: NumericOperandType,
        first: Variable,
        second: Variable,
    },
    Negate {
        receiver: Variable,
        operand_type: NumericOperandType,
        operand: Variable,
    },
    Assign {
        receiver: Variable,
        assignee: Variable,
    },
    /// Checked reference cast
    Cast {
        receiver: Variable,
        value: Variable,
        target_type: ValueType,
    },
    /// Conversion between numeric kinds
    CastNumber {
        receiver: Variable,
        value: Variable,
        source: NumericOperandType,
        target: NumericOperandType,
    },
    /// Narrowing to or widening from a sub-int type
    CastInteger {
        receiver: Variable,
        value: Variable,
        target: IntegerSubtype,
        direction: CastIntegerDirection,
    },
    Branch {
        condition: BranchingCondition,
        operand: Variable,
        consequent: BlockId,
        alternative: BlockId,
    },
    BinaryBranch {
        condition: BinaryBranchingCondition,
        first: Variable,
        second: Variable,
        consequent: BlockId,
        alternative: BlockId,
    },
    Jump {
        target: BlockId,
    },
    Switch {
        condition: Variable,
        entries: Vec<SwitchEntry>,
        default_target: BlockId,
    },
    /// Return from the method
    Exit {
        value: Option<Variable>,
    },
    /// Throw
    Raise {
        exception: Variable,
    },
    Construct {
        receiver: Variable,
        class_name: String,
    },
    ConstructArray {
        receiver: Variable,
        item_type: ValueType,
        size: Variable,
    },
    /// `item_type` is the type of the created array, with at least as many
    /// dimensions as `dimensions` has entries
    ConstructMultiArray {
        receiver: Variable,
        item_type: ValueType,
        dimensions: Vec<Variable>,
    },
    /// Field read; `instance` is `None` for static fields
    GetField {
        receiver: Variable,
        instance: Option<Variable>,
        field: FieldReference,
        field_type: ValueType,
    },
    /// Field write; `instance` is `None` for static fields
    PutField {
        instance: Option<Variable>,
        field: FieldReference,
        value: Variable,
        field_type: ValueType,
    },
    GetElement {
        receiver: Variable,
        array: Variable,
        index: Variable,
    },
    PutElement {
        array: Variable,
        index: Variable,
        value: Variable,
    },
    ArrayLength {
        receiver: Variable,
        array: Variable,
    },
    /// Access to the raw element storage of an array object
    UnwrapArray {
        receiver: Variable,
        array: Variable,
        element_type: ArrayElementType,
    },
    CloneArray {
        receiver: Variable,
        array: Variable,
    },
    /// Method call; `instance` is `None` for static calls
    Invoke {
        receiver: Option<Variable>,
        instance: Option<Variable>,
        method: MethodReference,
        arguments: Vec<Variable>,
        invocation: InvocationType,
    },
    /// Call site linked at run time through a bootstrap method
    InvokeDynamic {
        receiver: Option<Variable>,
        instance: Option<Variable>,
        method: MethodDescriptor,
        arguments: Vec<Variable>,
        bootstrap: MethodHandle,
        bootstrap_arguments: Vec<RuntimeConstant>,
    },
    IsInstance {
        receiver: Variable,
        value: Variable,
        target_type: ValueType,
    },
    /// Ensures the static initializer of the class has run
    InitClass {
        class_name: String,
    },
    /// Copies `value` to `receiver`, throwing when it is null
    NullCheck {
        receiver: Variable,
        value: Variable,
    },
    MonitorEnter {
        object: Variable,
    },
    MonitorExit {
        object: Variable,
    },
}

impl InstructionKind {
    /// Returns the tag byte identifying this variant in the binary cache format.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            InstructionKind::Empty => 0,
            InstructionKind::ClassConstant { .. } => 1,
            InstructionKind::NullConstant { .. } => 2,
            InstructionKind::IntegerConstant { .. } => 3,
            InstructionKind::LongConstant { .. } => 4,
            InstructionKind::FloatConstant { .. } => 5,
            InstructionKind::DoubleConstant { .. } => 6,
            InstructionKind::StringConstant { .. } => 7,
            InstructionKind::Binary { .. } => 8,
            InstructionKind::Negate { .. } => 9,
            InstructionKind::Assign { .. } => 10,
            InstructionKind::Cast { .. } => 11,
            InstructionKind::CastNumber { .. } => 12,
            InstructionKind::CastInteger { .. } => 13,
            InstructionKind::Branch { .. } => 14,
            InstructionKind::BinaryBranch { .. } => 15,
            InstructionKind::Jump { .. } => 16,
            InstructionKind::Switch { .. } => 17,
            InstructionKind::Exit { value: None } => 18,
            InstructionKind::Exit { value: Some(_) } => 19,
            InstructionKind::Raise { .. } => 20,
            InstructionKind::ConstructArray { .. } => 21,
            InstructionKind::Construct { .. } => 22,
            InstructionKind::ConstructMultiArray { .. } => 23,
            InstructionKind::GetField { instance: Some(_), .. } => 24,
            InstructionKind::GetField { instance: None, .. } => 25,
            InstructionKind::PutField { instance: Some(_), .. } => 26,
            InstructionKind::PutField { instance: None, .. } => 27,
            InstructionKind::ArrayLength { .. } => 28,
            InstructionKind::CloneArray { .. } => 29,
            InstructionKind::UnwrapArray { .. } => 30,
            InstructionKind::GetElement { .. } => 31,
            InstructionKind::PutElement { .. } => 32,
            InstructionKind::Invoke { instance: None, .. } => 33,
            InstructionKind::Invoke { instance: Some(_), .. } => 34,
            InstructionKind::IsInstance { .. } => 36,
            InstructionKind::InitClass { .. } => 37,
            InstructionKind::NullCheck { .. } => 38,
            InstructionKind::MonitorEnter { .. } => 39,
            InstructionKind::MonitorExit { .. } => 40,
            InstructionKind::InvokeDynamic { .. } => 41,
        }
    }

    /// Returns `true` for instructions that end a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstructionKind::Branch { .. }
                | InstructionKind::BinaryBranch { .. }
                | InstructionKind::Jump { .. }
                | InstructionKind::Switch { .. }
                | InstructionKind::Exit { .. }
                | InstructionKind::Raise { .. }
        )
    }

    /// Returns the variable defined by this instruction.
    #[must_use]
    pub fn defined_variable(&self) -> Option<Variable> {
        match self {
            InstructionKind::ClassConstant { receiver, .. }
            | InstructionKind::NullConstant { receiver }
            | InstructionKind::IntegerConstant { receiver, .. }
            | InstructionKind::LongConstant { receiver, .. }
            | InstructionKind::FloatConstant { receiver, .. }
            | InstructionKind::DoubleConstant { receiver, .. }
            | InstructionKind::StringConstant { receiver, .. }
            | InstructionKind::Binary { receiver, .. }
            | InstructionKind::Negate { receiver, .. }
            | InstructionKind::Assign { receiver, .. }
            | InstructionKind::Cast { receiver, .. }
            | InstructionKind::CastNumber { receiver, .. }
            | InstructionKind::CastInteger { receiver, .. }
            | InstructionKind::Construct { receiver, .. }
            | InstructionKind::ConstructArray { receiver, .. }
            | InstructionKind::ConstructMultiArray { receiver, .. }
            | InstructionKind::GetField { receiver, .. }
            | InstructionKind::GetElement { receiver, .. }
            | InstructionKind::ArrayLength { receiver, .. }
            | InstructionKind::UnwrapArray { receiver, .. }
            | InstructionKind::CloneArray { receiver, .. }
            | InstructionKind::IsInstance { receiver, .. }
            | InstructionKind::NullCheck { receiver, .. } => Some(*receiver),
            InstructionKind::Invoke { receiver, .. }
            | InstructionKind::InvokeDynamic { receiver, .. } => *receiver,
            _ => None,
        }
    }

    /// Rewrites the variable defined by this instruction.
    pub fn try_map_definition<E>(
        &mut self,
        mut f: impl FnMut(Variable) -> Result<Variable, E>,
    ) -> Result<(), E> {
        match self {
            InstructionKind::ClassConstant { receiver, .. }
            | InstructionKind::NullConstant { receiver }
            | InstructionKind::IntegerConstant { receiver, .. }
            | InstructionKind::LongConstant { receiver, .. }
            | InstructionKind::FloatConstant { receiver, .. }
            | InstructionKind::DoubleConstant { receiver, .. }
            | InstructionKind::StringConstant { receiver, .. }
            | InstructionKind::Binary { receiver, .. }
            | InstructionKind::Negate { receiver, .. }
            | InstructionKind::Assign { receiver, .. }
            | InstructionKind::Cast { receiver, .. }
            | InstructionKind::CastNumber { receiver, .. }
            | InstructionKind::CastInteger { receiver, .. }
            | InstructionKind::Construct { receiver, .. }
            | InstructionKind::ConstructArray { receiver, .. }
            | InstructionKind::ConstructMultiArray { receiver, .. }
            | InstructionKind::GetField { receiver, .. }
            | InstructionKind::GetElement { receiver, .. }
            | InstructionKind::ArrayLength { receiver, .. }
            | InstructionKind::UnwrapArray { receiver, .. }
            | InstructionKind::CloneArray { receiver, .. }
            | InstructionKind::IsInstance { receiver, .. }
            | InstructionKind::NullCheck { receiver, .. } => *receiver = f(*receiver)?,
            InstructionKind::Invoke { receiver, .. }
            | InstructionKind::InvokeDynamic { receiver, .. } => {
                if let Some(r) = receiver {
                    *r = f(*r)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Infallible form of [`InstructionKind::try_map_definition`].
    pub fn map_definition(&mut self, mut f: impl FnMut(Variable) -> Variable) {
        let result: Result<(), Infallible> = self.try_map_definition(|v| Ok(f(v)));
        if let Err(never) = result {
            match never {}
        }
    }

    /// Calls `f` for every variable this instruction reads, in operand order.
    pub fn visit_uses(&self, mut f: impl FnMut(Variable)) {
        match self {
            InstructionKind::Empty
            | InstructionKind::ClassConstant { .. }
            | InstructionKind::NullConstant { .. }
            | InstructionKind::IntegerConstant { .. }
            | InstructionKind::LongConstant { .. }
            | InstructionKind::FloatConstant { .. }
            | InstructionKind::DoubleConstant { .. }
            | InstructionKind::StringConstant { .. }
            | InstructionKind::Jump { .. }
            | InstructionKind::Construct { .. }
            | InstructionKind::InitClass { .. } => {}
            InstructionKind::Binary { first, second, .. }
            | InstructionKind::BinaryBranch { first, second, .. } => {
                f(*first);
                f(*second);
            }
            InstructionKind::Negate { operand, .. } | InstructionKind::Branch { operand, .. } => {
                f(*operand)
            }
            InstructionKind::Assign { assignee, .. } => f(*assignee),
            InstructionKind::Cast { value, .. }
            | InstructionKind::CastNumber { value, .. }
            | InstructionKind::CastInteger { value, .. }
            | InstructionKind::IsInstance { value, .. }
            | InstructionKind::NullCheck { value, .. } => f(*value),
            InstructionKind::Switch { condition, .. } => f(*condition),
            InstructionKind::Exit { value } => {
                if let Some(v) = value {
                    f(*v);
                }
            }
            InstructionKind::Raise { exception } => f(*exception),
            InstructionKind::ConstructArray { size, .. } => f(*size),
            InstructionKind::ConstructMultiArray { dimensions, .. } => {
                dimensions.iter().copied().for_each(f)
            }
            InstructionKind::GetField { instance, .. } => {
                if let Some(v) = instance {
                    f(*v);
                }
            }
            InstructionKind::PutField {
                instance, value, ..
            } => {
                if let Some(v) = instance {
                    f(*v);
                }
                f(*value);
            }
            InstructionKind::GetElement { array, index, .. } => {
                f(*array);
                f(*index);
            }
            InstructionKind::PutElement {
                array,
                index,
                value,
            } => {
                f(*array);
                f(*index);
                f(*value);
            }
            InstructionKind::ArrayLength { array, .. }
            | InstructionKind::UnwrapArray { array, .. }
            | InstructionKind::CloneArray { array, .. } => f(*array),
            InstructionKind::Invoke {
                instance,
                arguments,
                ..
            }
            | InstructionKind::InvokeDynamic {
                instance,
                arguments,
                ..
            } => {
                if let Some(v) = instance {
                    f(*v);
                }
                arguments.iter().copied().for_each(f);
            }
            InstructionKind::MonitorEnter { object } | InstructionKind::MonitorExit { object } => {
                f(*object)
            }
        }
    }

    /// Returns the variables this instruction reads.
    #[must_use]
    pub fn uses(&self) -> Vec<Variable> {
        let mut result = Vec::new();
        self.visit_uses(|v| result.push(v));
        result
    }

    /// Rewrites every variable this instruction reads, stopping at the first error.
    pub fn try_map_uses<E>(
        &mut self,
        mut f: impl FnMut(Variable) -> Result<Variable, E>,
    ) -> Result<(), E> {
        fn opt<E>(
            v: &mut Option<Variable>,
            f: &mut impl FnMut(Variable) -> Result<Variable, E>,
        ) -> Result<(), E> {
            if let Some(v) = v {
                *v = f(*v)?;
            }
            Ok(())
        }

        match self {
            InstructionKind::Empty
            | InstructionKind::ClassConstant { .. }
            | InstructionKind::NullConstant { .. }
            | InstructionKind::IntegerConstant { .. }
            | InstructionKind::LongConstant { .. }
            | InstructionKind::FloatConstant { .. }
            | InstructionKind::DoubleConstant { .. }
            | InstructionKind::StringConstant { .. }
            | InstructionKind::Jump { .. }
            | InstructionKind::Construct { .. }
            | InstructionKind::InitClass { .. } => {}
            InstructionKind::Binary { first, second, .. }
            | InstructionKind::BinaryBranch { first, second, .. } => {
                *first = f(*first)?;
                *second = f(*second)?;
            }
            InstructionKind::Negate { operand, .. } | InstructionKind::Branch { operand, .. } => {
                *operand = f(*operand)?
            }
            InstructionKind::Assign { assignee, .. } => *assignee = f(*assignee)?,
            InstructionKind::Cast { value, .. }
            | InstructionKind::CastNumber { value, .. }
            | InstructionKind::CastInteger { value, .. }
            | InstructionKind::IsInstance { value, .. }
            | InstructionKind::NullCheck { value, .. } => *value = f(*value)?,
            InstructionKind::Switch { condition, .. } => *condition = f(*condition)?,
            InstructionKind::Exit { value } => opt(value, &mut f)?,
            InstructionKind::Raise { exception } => *exception = f(*exception)?,
            InstructionKind::ConstructArray { size, .. } => *size = f(*size)?,
            InstructionKind::ConstructMultiArray { dimensions, .. } => {
                for d in dimensions.iter_mut() {
                    *d = f(*d)?;
                }
            }
            InstructionKind::GetField { instance, .. } => opt(instance, &mut f)?,
            InstructionKind::PutField {
                instance, value, ..
            } => {
                opt(instance, &mut f)?;
                *value = f(*value)?;
            }
            InstructionKind::GetElement { array, index, .. } => {
                *array = f(*array)?;
                *index = f(*index)?;
            }
            InstructionKind::PutElement {
                array,
                index,
                value,
            } => {
                *array = f(*array)?;
                *index = f(*index)?;
                *value = f(*value)?;
            }
            InstructionKind::ArrayLength { array, .. }
            | InstructionKind::UnwrapArray { array, .. }
            | InstructionKind::CloneArray { array, .. } => *array = f(*array)?,
            InstructionKind::Invoke {
                instance,
                arguments,
                ..
            }
            | InstructionKind::InvokeDynamic {
                instance,
                arguments,
                ..
            } => {
                opt(instance, &mut f)?;
                for a in arguments.iter_mut() {
                    *a = f(*a)?;
                }
            }
            InstructionKind::MonitorEnter { object } | InstructionKind::MonitorExit { object } => {
                *object = f(*object)?
            }
        }
        Ok(())
    }

    /// Infallible form of [`InstructionKind::try_map_uses`].
    pub fn map_uses(&mut self, mut f: impl FnMut(Variable) -> Variable) {
        let result: Result<(), Infallible> = self.try_map_uses(|v| Ok(f(v)));
        if let Err(never) = result {
            match never {}
        }
    }

    /// Returns the blocks this instruction can transfer control to, without
    /// duplicates, in first-occurrence order.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = Vec::new();
        let mut push = |b: BlockId| {
            if !result.contains(&b) {
                result.push(b);
            }
        };
        match self {
            InstructionKind::Branch {
                consequent,
                alternative,
                ..
            }
            | InstructionKind::BinaryBranch {
                consequent,
                alternative,
                ..
            } => {
                push(*consequent);
                push(*alternative);
            }
            InstructionKind::Jump { target } => push(*target),
            InstructionKind::Switch {
                entries,
                default_target,
                ..
            } => {
                for entry in entries {
                    push(entry.target);
                }
                push(*default_target);
            }
            _ => {}
        }
        result
    }

    /// Rewrites every control-flow target of this instruction.
    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            InstructionKind::Branch {
                consequent,
                alternative,
                ..
            }
            | InstructionKind::BinaryBranch {
                consequent,
                alternative,
                ..
            } => {
                *consequent = f(*consequent);
                *alternative = f(*alternative);
            }
            InstructionKind::Jump { target } => *target = f(*target),
            InstructionKind::Switch {
                entries,
                default_target,
                ..
            } => {
                for entry in entries.iter_mut() {
                    entry.target = f(entry.target);
                }
                *default_target = f(*default_target);
            }
            _ => {}
        }
    }
}

/// An instruction with its optional source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// What the instruction does
    pub kind: InstructionKind,
    /// Where it came from, for diagnostics
    pub location: Option<TextLocation>,
}

impl Instruction {
    /// Creates an instruction without location.
    #[must_use]
    pub fn new(kind: InstructionKind) -> Self {
        Instruction {
            kind,
            location: None,
        }
    }

    /// Creates an instruction with the given location.
    #[must_use]
    pub fn at(kind: InstructionKind, location: Option<TextLocation>) -> Self {
        Instruction { kind, location }
    }
}

impl From<InstructionKind> for Instruction {
    fn from(kind: InstructionKind) -> Self {
        Instruction::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: usize) -> Variable {
        Variable(i)
    }

    #[test]
    fn test_uses_and_definition() {
        let insn = InstructionKind::Invoke {
            receiver: Some(v(4)),
            instance: Some(v(1)),
            method: MethodReference::new("A", MethodDescriptor::new("m", vec![], ValueType::INTEGER)),
            arguments: vec![v(2), v(3)],
            invocation: InvocationType::Virtual,
        };
        assert_eq!(insn.uses(), vec![v(1), v(2), v(3)]);
        assert_eq!(insn.defined_variable(), Some(v(4)));
        assert!(!insn.is_terminator());
    }

    #[test]
    fn test_map_uses_leaves_definition() {
        let mut insn = InstructionKind::Binary {
            receiver: v(0),
            operation: BinaryOperation::Add,
            operand_type: NumericOperandType::Int,
            first: v(1),
            second: v(2),
        };
        insn.map_uses(|x| Variable(x.0 + 10));
        assert_eq!(insn.uses(), vec![v(11), v(12)]);
        assert_eq!(insn.defined_variable(), Some(v(0)));
    }

    #[test]
    fn test_try_map_uses_stops_on_error() {
        let mut insn = InstructionKind::PutElement {
            array: v(0),
            index: v(1),
            value: v(2),
        };
        let result: Result<(), usize> = insn.try_map_uses(|x| if x.0 == 1 { Err(1) } else { Ok(x) });
        assert_eq!(result, Err(1));
    }

    #[test]
    fn test_switch_targets_are_unique() {
        let mut insn = InstructionKind::Switch {
            condition: v(0),
            entries: vec![
                SwitchEntry {
                    condition: 1,
                    target: BlockId(2),
                },
                SwitchEntry {
                    condition: 2,
                    target: BlockId(2),
                },
            ],
            default_target: BlockId(3),
        };
        assert_eq!(insn.targets(), vec![BlockId(2), BlockId(3)]);
        insn.map_targets(|b| BlockId(b.0 + 1));
        assert_eq!(insn.targets(), vec![BlockId(3), BlockId(4)]);
        assert!(insn.is_terminator());
    }

    #[test]
    fn test_tags_are_distinct() {
        let kinds = [
            InstructionKind::Empty,
            InstructionKind::Exit { value: None },
            InstructionKind::Exit { value: Some(v(0)) },
            InstructionKind::InitClass {
                class_name: "A".into(),
            },
        ];
        let mut tags: Vec<u8> = kinds.iter().map(InstructionKind::tag).collect();
        tags.dedup();
        assert_eq!(tags.len(), kinds.len());
    }
}
