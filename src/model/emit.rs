//! A cursor for appending instructions to a program.
//!
//! [`ProgramEmitter`] is used wherever code is synthesized rather than lowered:
//! bootstrap-method substitutions, runtime helper calls inserted by passes, and
//! test fixtures.
//!
//! ```rust,ignore
//! use aotflow::model::{Program, ProgramEmitter, ValueType, MethodReference};
//!
//! let mut program = Program::new();
//! let mut emitter = ProgramEmitter::create(&mut program);
//! let value = emitter.int(42);
//! let text = emitter.invoke_static(&MethodReference::parse("java.lang.Integer.toString(I)Ljava.lang.String;")?, &[value]);
//! emitter.exit(text);
//! ```

use crate::model::{
    instruction::{BlockId, Instruction, InstructionKind, InvocationType, Variable},
    program::{Incoming, Phi, Program},
    types::{FieldReference, MethodDescriptor, MethodReference, TextLocation, ValueType},
};

/// Appends instructions to one block of a program at a time.
pub struct ProgramEmitter<'a> {
    program: &'a mut Program,
    block: BlockId,
    location: Option<TextLocation>,
}

impl<'a> ProgramEmitter<'a> {
    /// Starts emitting at the end of `block`.
    pub fn new(program: &'a mut Program, block: BlockId) -> Self {
        ProgramEmitter {
            program,
            block,
            location: None,
        }
    }

    /// Starts emitting into a fresh program, creating its entry block.
    pub fn create(program: &'a mut Program) -> Self {
        let block = program.create_basic_block();
        Self::new(program, block)
    }

    /// Returns the program being emitted into.
    pub fn program(&mut self) -> &mut Program {
        &mut *self.program
    }

    /// The block instructions are appended to.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.block
    }

    /// Moves the cursor to the end of another block.
    pub fn enter(&mut self, block: BlockId) {
        self.block = block;
    }

    /// Creates an empty block without moving the cursor.
    pub fn create_block(&mut self) -> BlockId {
        self.program.create_basic_block()
    }

    /// Sets the location attached to subsequent instructions.
    pub fn at(&mut self, location: Option<TextLocation>) -> &mut Self {
        self.location = location;
        self
    }

    /// Allocates a variable.
    pub fn variable(&mut self) -> Variable {
        self.program.create_variable()
    }

    /// Appends an instruction.
    pub fn emit(&mut self, kind: InstructionKind) {
        let location = self.location.clone();
        self.program
            .block_mut(self.block)
            .instructions
            .push(Instruction::at(kind, location));
    }

    fn define(&mut self, make: impl FnOnce(Variable) -> InstructionKind) -> Variable {
        let receiver = self.variable();
        self.emit(make(receiver));
        receiver
    }

    /// `int` constant.
    pub fn int(&mut self, constant: i32) -> Variable {
        self.define(|receiver| InstructionKind::IntegerConstant { receiver, constant })
    }

    /// `long` constant.
    pub fn long(&mut self, constant: i64) -> Variable {
        self.define(|receiver| InstructionKind::LongConstant { receiver, constant })
    }

    /// `float` constant.
    pub fn float(&mut self, constant: f32) -> Variable {
        self.define(|receiver| InstructionKind::FloatConstant { receiver, constant })
    }

    /// `double` constant.
    pub fn double(&mut self, constant: f64) -> Variable {
        self.define(|receiver| InstructionKind::DoubleConstant { receiver, constant })
    }

    /// `null`.
    pub fn null(&mut self) -> Variable {
        self.define(|receiver| InstructionKind::NullConstant { receiver })
    }

    /// String literal.
    pub fn string(&mut self, constant: impl Into<String>) -> Variable {
        let constant = constant.into();
        self.define(|receiver| InstructionKind::StringConstant { receiver, constant })
    }

    /// Class literal.
    pub fn class_constant(&mut self, constant: ValueType) -> Variable {
        self.define(|receiver| InstructionKind::ClassConstant { receiver, constant })
    }

    /// Copy of a value.
    pub fn assign(&mut self, assignee: Variable) -> Variable {
        self.define(|receiver| InstructionKind::Assign { receiver, assignee })
    }

    /// Assigns into an existing variable.
    pub fn assign_to(&mut self, receiver: Variable, assignee: Variable) {
        self.emit(InstructionKind::Assign { receiver, assignee });
    }

    /// Calls a static method. Returns the result variable unless the method is void.
    pub fn invoke_static(&mut self, method: &MethodReference, arguments: &[Variable]) -> Option<Variable> {
        self.invoke(None, method, arguments, InvocationType::Special)
    }

    /// Calls an instance method through virtual dispatch.
    pub fn invoke_virtual(
        &mut self,
        instance: Variable,
        method: &MethodReference,
        arguments: &[Variable],
    ) -> Option<Variable> {
        self.invoke(Some(instance), method, arguments, InvocationType::Virtual)
    }

    /// Calls an instance method without dispatch.
    pub fn invoke_special(
        &mut self,
        instance: Variable,
        method: &MethodReference,
        arguments: &[Variable],
    ) -> Option<Variable> {
        self.invoke(Some(instance), method, arguments, InvocationType::Special)
    }

    fn invoke(
        &mut self,
        instance: Option<Variable>,
        method: &MethodReference,
        arguments: &[Variable],
        invocation: InvocationType,
    ) -> Option<Variable> {
        let receiver = (method.descriptor.result != ValueType::Void).then(|| self.variable());
        self.emit(InstructionKind::Invoke {
            receiver,
            instance,
            method: method.clone(),
            arguments: arguments.to_vec(),
            invocation,
        });
        receiver
    }

    /// Allocates an instance and runs the constructor with the given parameter types.
    pub fn construct(
        &mut self,
        class_name: &str,
        parameters: Vec<ValueType>,
        arguments: &[Variable],
    ) -> Variable {
        let instance = self.define(|receiver| InstructionKind::Construct {
            receiver,
            class_name: class_name.to_string(),
        });
        let constructor = MethodReference::new(
            class_name,
            MethodDescriptor::new("<init>", parameters, ValueType::Void),
        );
        self.invoke_special(instance, &constructor, arguments);
        instance
    }

    /// Reads a field; `instance` is `None` for static fields.
    pub fn get_field(
        &mut self,
        instance: Option<Variable>,
        field: FieldReference,
        field_type: ValueType,
    ) -> Variable {
        self.define(|receiver| InstructionKind::GetField {
            receiver,
            instance,
            field,
            field_type,
        })
    }

    /// Writes a field; `instance` is `None` for static fields.
    pub fn put_field(
        &mut self,
        instance: Option<Variable>,
        field: FieldReference,
        value: Variable,
        field_type: ValueType,
    ) {
        self.emit(InstructionKind::PutField {
            instance,
            field,
            value,
            field_type,
        });
    }

    /// Unconditional jump.
    pub fn jump(&mut self, target: BlockId) {
        self.emit(InstructionKind::Jump { target });
    }

    /// Return, with or without value.
    pub fn exit(&mut self, value: Option<Variable>) {
        self.emit(InstructionKind::Exit { value });
    }

    /// Throw.
    pub fn raise(&mut self, exception: Variable) {
        self.emit(InstructionKind::Raise { exception });
    }

    /// Adds a phi to `block` merging the given `(source, value)` pairs.
    pub fn phi(&mut self, block: BlockId, incomings: &[(BlockId, Variable)]) -> Variable {
        let receiver = self.variable();
        let mut phi = Phi::new(receiver);
        phi.incomings = incomings
            .iter()
            .map(|&(source, value)| Incoming { source, value })
            .collect();
        self.program.block_mut(block).phis.push(phi);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_construct_and_call() {
        let mut program = Program::new();
        let mut emitter = ProgramEmitter::create(&mut program);
        let size = emitter.int(3);
        let list = emitter.construct("java.util.ArrayList", vec![ValueType::INTEGER], &[size]);
        let method = MethodReference::new(
            "java.util.ArrayList",
            MethodDescriptor::new("size", vec![], ValueType::INTEGER),
        );
        let result = emitter.invoke_virtual(list, &method, &[]);
        emitter.exit(result);

        assert_eq!(program.block_count(), 1);
        assert_eq!(program.instruction_count(), 5);
        assert_eq!(program.variable_count(), 3);
        let block = program.block(BlockId(0));
        assert!(matches!(
            block.instructions[2].kind,
            InstructionKind::Invoke { receiver: None, .. }
        ));
        assert!(block.terminator().is_some());
    }

    #[test]
    fn test_phi_and_locations() {
        let mut program = Program::new();
        let mut emitter = ProgramEmitter::create(&mut program);
        let join = emitter.create_block();
        let a = emitter.at(Some(TextLocation::new("A.java", 4))).int(1);
        emitter.jump(join);
        emitter.enter(join);
        let merged = emitter.phi(join, &[(BlockId(0), a)]);
        emitter.exit(Some(merged));

        assert_eq!(
            program.block(BlockId(0)).instructions[0].location,
            Some(TextLocation::new("A.java", 4))
        );
        assert_eq!(program.block(join).phis.len(), 1);
    }
}
