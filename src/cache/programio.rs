//! Binary encoding of method programs.
//!
//! The format is versioned and self-delimiting:
//!
//! ```text
//! magic "AOTP" | version u8 | variable count | block count
//! per variable: debug name count, names
//! per block:    phi count, try/catch count, exception variable?,
//!               phis, try/catch regions with joints,
//!               instruction stream terminated by END
//! ```
//!
//! Counts and indices are 7-bit encoded. Class names, types, method and field
//! references go through the session symbol table, file names through the file
//! table, so a blob is only meaningful together with the tables it was written
//! against. Instruction locations are coalesced: a `SET_LOCATION` or
//! `CLEAR_LOCATION` marker is emitted only when the location changes between
//! consecutive instructions of a block.
//!
//! Every instruction starts with the tag byte returned by
//! [`InstructionKind::tag`]; enum operands are stored as their `repr(u8)`
//! ordinal. Unknown tags and ordinals fail with [`crate::Error::Malformed`].

use crate::{
    cache::{
        io::{Parser, Writer},
        SymbolTable,
    },
    model::{
        ArrayElementType, BinaryBranchingCondition, BinaryOperation, BlockId, BranchingCondition,
        CastIntegerDirection, FieldReference, Incoming, Instruction, InstructionKind,
        IntegerSubtype, InvocationType, MethodDescriptor, MethodHandle, MethodHandleKind,
        MethodReference, NumericOperandType, Phi, Program, RuntimeConstant, SwitchEntry,
        TextLocation, TryCatchBlock, TryCatchJoint, ValueType, Variable,
    },
    Result,
};

const MAGIC: &[u8; 4] = b"AOTP";

/// Version of the program encoding; bump on any layout change.
pub const FORMAT_VERSION: u8 = 1;

const END: u8 = 0xFF;
const CLEAR_LOCATION: u8 = 0xFE;
const SET_LOCATION: u8 = 0xFD;

/// Reads and writes programs against a pair of symbol tables.
#[derive(Debug, Clone, Copy)]
pub struct ProgramIO<'a> {
    symbols: &'a SymbolTable,
    files: &'a SymbolTable,
}

impl<'a> ProgramIO<'a> {
    /// Creates a codec using `symbols` for names and `files` for source files.
    #[must_use]
    pub fn new(symbols: &'a SymbolTable, files: &'a SymbolTable) -> Self {
        Self { symbols, files }
    }

    /// Encodes `program` into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when a count or index exceeds the
    /// format limits.
    pub fn write(&self, program: &Program) -> Result<Vec<u8>> {
        let mut writer = Writer::new();
        self.write_to(program, &mut writer)?;
        Ok(writer.into_inner())
    }

    /// Appends the encoding of `program` to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when a count or index exceeds the
    /// format limits.
    pub fn write_to(&self, program: &Program, writer: &mut Writer) -> Result<()> {
        writer.write_bytes(MAGIC);
        writer.write_le(FORMAT_VERSION);
        writer.write_index(program.variable_count())?;
        writer.write_index(program.block_count())?;

        for info in program.variables() {
            writer.write_index(info.debug_names.len())?;
            for name in &info.debug_names {
                writer.write_prefixed_string_utf8(name)?;
            }
        }

        for block in program.blocks() {
            writer.write_index(block.phis.len())?;
            writer.write_index(block.try_catches.len())?;
            writer.write_optional_index(block.exception_variable.map(Variable::index))?;

            for phi in &block.phis {
                writer.write_index(phi.receiver.index())?;
                writer.write_index(phi.incomings.len())?;
                for incoming in &phi.incomings {
                    writer.write_index(incoming.source.index())?;
                    writer.write_index(incoming.value.index())?;
                }
            }

            for try_catch in &block.try_catches {
                self.write_optional_symbol(writer, try_catch.exception_type.as_deref())?;
                writer.write_optional_index(try_catch.exception_variable.map(Variable::index))?;
                writer.write_index(try_catch.handler.index())?;
                writer.write_index(try_catch.joints.len())?;
                for joint in &try_catch.joints {
                    writer.write_index(joint.receiver.index())?;
                    write_variables(writer, &joint.source_variables)?;
                }
            }

            let mut location: Option<&TextLocation> = None;
            for insn in &block.instructions {
                if insn.location.as_ref() != location {
                    location = insn.location.as_ref();
                    match location {
                        Some(loc) => {
                            writer.write_le(SET_LOCATION);
                            writer.write_index(self.files.lookup(&loc.file) as usize)?;
                            writer.write_7bit_encoded_int(loc.line);
                        }
                        None => writer.write_le(CLEAR_LOCATION),
                    }
                }
                self.write_instruction(writer, &insn.kind)?;
            }
            writer.write_le(END);
        }
        Ok(())
    }

    /// Decodes a program written by [`ProgramIO::write`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a wrong header, truncated data,
    /// unknown tags or ordinals, out-of-range variable or block indices and
    /// symbols missing from the tables.
    pub fn read(&self, data: &[u8]) -> Result<Program> {
        let mut parser = Parser::new(data);
        self.read_from(&mut parser)
    }

    /// Decodes one program at the current position of `parser`.
    ///
    /// # Errors
    ///
    /// See [`ProgramIO::read`].
    pub fn read_from(&self, parser: &mut Parser<'_>) -> Result<Program> {
        if parser.read_bytes(MAGIC.len())? != MAGIC {
            return Err(malformed_error!("not a program blob"));
        }
        let version = parser.read_le::<u8>()?;
        if version != FORMAT_VERSION {
            return Err(malformed_error!(
                "unsupported program format version {} (expected {})",
                version,
                FORMAT_VERSION
            ));
        }

        let variable_count = parser.read_index()?;
        let block_count = parser.read_index()?;
        // every variable and block occupies at least one byte
        if variable_count.saturating_add(block_count) > parser.remaining() {
            return Err(malformed_error!(
                "program header claims {} variables and {} blocks in {} bytes",
                variable_count,
                block_count,
                parser.remaining()
            ));
        }
        let mut reader = ProgramReader {
            io: self,
            parser,
            variable_count,
            block_count,
        };

        let mut program = Program::new();
        for _ in 0..variable_count {
            let var = program.create_variable();
            let name_count = reader.parser.read_index()?;
            for _ in 0..name_count {
                let name = reader.parser.read_prefixed_string_utf8()?;
                program.variable_mut(var).debug_names.insert(name);
            }
        }
        for _ in 0..block_count {
            program.create_basic_block();
        }

        for index in 0..block_count {
            let phi_count = reader.parser.read_index()?;
            let try_catch_count = reader.parser.read_index()?;
            let exception_variable = reader.optional_variable()?;

            let mut phis = Vec::new();
            for _ in 0..phi_count {
                let mut phi = Phi::new(reader.variable()?);
                let incoming_count = reader.parser.read_index()?;
                for _ in 0..incoming_count {
                    let source = reader.block()?;
                    let value = reader.variable()?;
                    phi.incomings.push(Incoming { source, value });
                }
                phis.push(phi);
            }

            let mut try_catches = Vec::new();
            for _ in 0..try_catch_count {
                let exception_type = reader.optional_symbol()?.map(str::to_string);
                let exception_variable = reader.optional_variable()?;
                let handler = reader.block()?;
                let mut try_catch = TryCatchBlock::new(exception_type, exception_variable, handler);
                let joint_count = reader.parser.read_index()?;
                for _ in 0..joint_count {
                    let receiver = reader.variable()?;
                    let source_variables = reader.variables()?;
                    try_catch.joints.push(TryCatchJoint {
                        receiver,
                        source_variables,
                    });
                }
                try_catches.push(try_catch);
            }

            let mut instructions = Vec::new();
            let mut location: Option<TextLocation> = None;
            loop {
                match reader.parser.read_le::<u8>()? {
                    END => break,
                    CLEAR_LOCATION => location = None,
                    SET_LOCATION => {
                        let file_index = reader.parser.read_7bit_encoded_int()?;
                        let file = self.files.at(file_index).ok_or_else(|| {
                            malformed_error!("file index {} is not in the file table", file_index)
                        })?;
                        let line = reader.parser.read_7bit_encoded_int()?;
                        location = Some(TextLocation::new(file, line));
                    }
                    tag => {
                        let kind = reader.instruction(tag)?;
                        instructions.push(Instruction::at(kind, location.clone()));
                    }
                }
            }

            let block = program.block_mut(BlockId(index));
            block.phis = phis;
            block.try_catches = try_catches;
            block.exception_variable = exception_variable;
            block.instructions = instructions;
        }
        Ok(program)
    }

    fn symbol(&self, value: &str) -> usize {
        self.symbols.lookup(value) as usize
    }

    fn write_optional_symbol(&self, writer: &mut Writer, value: Option<&str>) -> Result<()> {
        writer.write_optional_index(value.map(|value| self.symbol(value)))
    }

    fn write_type(&self, writer: &mut Writer, value: &ValueType) -> Result<()> {
        writer.write_index(self.symbol(&value.to_string()))
    }

    fn write_method(&self, writer: &mut Writer, method: &MethodReference) -> Result<()> {
        writer.write_index(self.symbol(&method.class_name))?;
        writer.write_index(self.symbol(&method.descriptor.to_string()))
    }

    fn write_field(&self, writer: &mut Writer, field: &FieldReference) -> Result<()> {
        writer.write_index(self.symbol(&field.class_name))?;
        writer.write_index(self.symbol(&field.field_name))
    }

    fn write_handle(&self, writer: &mut Writer, handle: &MethodHandle) -> Result<()> {
        writer.write_le(handle.kind as u8);
        writer.write_index(self.symbol(&handle.class_name))?;
        writer.write_index(self.symbol(&handle.name))?;
        let value_type = handle.value_type.as_ref().map(ToString::to_string);
        self.write_optional_symbol(writer, value_type.as_deref())?;
        let descriptor = handle.descriptor.as_ref().map(ToString::to_string);
        self.write_optional_symbol(writer, descriptor.as_deref())
    }

    fn write_constant(&self, writer: &mut Writer, constant: &RuntimeConstant) -> Result<()> {
        match constant {
            RuntimeConstant::Int(value) => {
                writer.write_le(0u8);
                writer.write_compressed_int(*value);
            }
            RuntimeConstant::Long(value) => {
                writer.write_le(1u8);
                writer.write_le(*value);
            }
            RuntimeConstant::Float(value) => {
                writer.write_le(2u8);
                writer.write_le(*value);
            }
            RuntimeConstant::Double(value) => {
                writer.write_le(3u8);
                writer.write_le(*value);
            }
            RuntimeConstant::String(value) => {
                writer.write_le(4u8);
                writer.write_prefixed_string_utf8(value)?;
            }
            RuntimeConstant::Type(value) => {
                writer.write_le(5u8);
                self.write_type(writer, value)?;
            }
            RuntimeConstant::Method(value) => {
                writer.write_le(6u8);
                writer.write_index(self.symbol(&value.to_string()))?;
            }
            RuntimeConstant::MethodHandle(value) => {
                writer.write_le(7u8);
                self.write_handle(writer, value)?;
            }
        }
        Ok(())
    }

    fn write_instruction(&self, writer: &mut Writer, kind: &InstructionKind) -> Result<()> {
        writer.write_le(kind.tag());
        match kind {
            InstructionKind::Empty => {}
            InstructionKind::ClassConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                self.write_type(writer, constant)?;
            }
            InstructionKind::NullConstant { receiver } => {
                writer.write_index(receiver.index())?;
            }
            InstructionKind::IntegerConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                writer.write_compressed_int(*constant);
            }
            InstructionKind::LongConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                writer.write_le(*constant);
            }
            InstructionKind::FloatConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                writer.write_le(*constant);
            }
            InstructionKind::DoubleConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                writer.write_le(*constant);
            }
            InstructionKind::StringConstant { receiver, constant } => {
                writer.write_index(receiver.index())?;
                writer.write_prefixed_string_utf8(constant)?;
            }
            InstructionKind::Binary {
                receiver,
                operation,
                operand_type,
                first,
                second,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_le(*operation as u8);
                writer.write_le(*operand_type as u8);
                writer.write_index(first.index())?;
                writer.write_index(second.index())?;
            }
            InstructionKind::Negate {
                receiver,
                operand_type,
                operand,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_le(*operand_type as u8);
                writer.write_index(operand.index())?;
            }
            InstructionKind::Assign { receiver, assignee } => {
                writer.write_index(receiver.index())?;
                writer.write_index(assignee.index())?;
            }
            InstructionKind::Cast {
                receiver,
                value,
                target_type,
            }
            | InstructionKind::IsInstance {
                receiver,
                value,
                target_type,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(value.index())?;
                self.write_type(writer, target_type)?;
            }
            InstructionKind::CastNumber {
                receiver,
                value,
                source,
                target,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(value.index())?;
                writer.write_le(*source as u8);
                writer.write_le(*target as u8);
            }
            InstructionKind::CastInteger {
                receiver,
                value,
                target,
                direction,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(value.index())?;
                writer.write_le(*target as u8);
                writer.write_le(*direction as u8);
            }
            InstructionKind::Branch {
                condition,
                operand,
                consequent,
                alternative,
            } => {
                writer.write_le(*condition as u8);
                writer.write_index(operand.index())?;
                writer.write_index(consequent.index())?;
                writer.write_index(alternative.index())?;
            }
            InstructionKind::BinaryBranch {
                condition,
                first,
                second,
                consequent,
                alternative,
            } => {
                writer.write_le(*condition as u8);
                writer.write_index(first.index())?;
                writer.write_index(second.index())?;
                writer.write_index(consequent.index())?;
                writer.write_index(alternative.index())?;
            }
            InstructionKind::Jump { target } => {
                writer.write_index(target.index())?;
            }
            InstructionKind::Switch {
                condition,
                entries,
                default_target,
            } => {
                writer.write_index(condition.index())?;
                writer.write_index(entries.len())?;
                for entry in entries {
                    writer.write_compressed_int(entry.condition);
                    writer.write_index(entry.target.index())?;
                }
                writer.write_index(default_target.index())?;
            }
            InstructionKind::Exit { value } => {
                if let Some(value) = value {
                    writer.write_index(value.index())?;
                }
            }
            InstructionKind::Raise { exception } => {
                writer.write_index(exception.index())?;
            }
            InstructionKind::Construct {
                receiver,
                class_name,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(self.symbol(class_name))?;
            }
            InstructionKind::ConstructArray {
                receiver,
                item_type,
                size,
            } => {
                writer.write_index(receiver.index())?;
                self.write_type(writer, item_type)?;
                writer.write_index(size.index())?;
            }
            InstructionKind::ConstructMultiArray {
                receiver,
                item_type,
                dimensions,
            } => {
                writer.write_index(receiver.index())?;
                self.write_type(writer, item_type)?;
                write_variables(writer, dimensions)?;
            }
            InstructionKind::GetField {
                receiver,
                instance,
                field,
                field_type,
            } => {
                writer.write_index(receiver.index())?;
                if let Some(instance) = instance {
                    writer.write_index(instance.index())?;
                }
                self.write_field(writer, field)?;
                self.write_type(writer, field_type)?;
            }
            InstructionKind::PutField {
                instance,
                field,
                value,
                field_type,
            } => {
                if let Some(instance) = instance {
                    writer.write_index(instance.index())?;
                }
                self.write_field(writer, field)?;
                writer.write_index(value.index())?;
                self.write_type(writer, field_type)?;
            }
            InstructionKind::GetElement {
                receiver,
                array,
                index,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(array.index())?;
                writer.write_index(index.index())?;
            }
            InstructionKind::PutElement {
                array,
                index,
                value,
            } => {
                writer.write_index(array.index())?;
                writer.write_index(index.index())?;
                writer.write_index(value.index())?;
            }
            InstructionKind::ArrayLength { receiver, array }
            | InstructionKind::CloneArray { receiver, array } => {
                writer.write_index(receiver.index())?;
                writer.write_index(array.index())?;
            }
            InstructionKind::UnwrapArray {
                receiver,
                array,
                element_type,
            } => {
                writer.write_index(receiver.index())?;
                writer.write_index(array.index())?;
                writer.write_le(*element_type as u8);
            }
            InstructionKind::Invoke {
                receiver,
                instance,
                method,
                arguments,
                invocation,
            } => {
                writer.write_optional_index(receiver.map(Variable::index))?;
                if let Some(instance) = instance {
                    writer.write_index(instance.index())?;
                }
                self.write_method(writer, method)?;
                write_variables(writer, arguments)?;
                writer.write_le(*invocation as u8);
            }
            InstructionKind::InvokeDynamic {
                receiver,
                instance,
                method,
                arguments,
                bootstrap,
                bootstrap_arguments,
            } => {
                writer.write_optional_index(receiver.map(Variable::index))?;
                writer.write_optional_index(instance.map(Variable::index))?;
                writer.write_index(self.symbol(&method.to_string()))?;
                write_variables(writer, arguments)?;
                self.write_handle(writer, bootstrap)?;
                writer.write_index(bootstrap_arguments.len())?;
                for constant in bootstrap_arguments {
                    self.write_constant(writer, constant)?;
                }
            }
            InstructionKind::InitClass { class_name } => {
                writer.write_index(self.symbol(class_name))?;
            }
            InstructionKind::NullCheck { receiver, value } => {
                writer.write_index(receiver.index())?;
                writer.write_index(value.index())?;
            }
            InstructionKind::MonitorEnter { object } | InstructionKind::MonitorExit { object } => {
                writer.write_index(object.index())?;
            }
        }
        Ok(())
    }
}

fn write_variables(writer: &mut Writer, variables: &[Variable]) -> Result<()> {
    writer.write_index(variables.len())?;
    for var in variables {
        writer.write_index(var.index())?;
    }
    Ok(())
}

/// Decodes an enum operand from its `repr(u8)` ordinal.
macro_rules! read_ordinal {
    ($parser:expr, $ty:ty) => {{
        let ordinal = $parser.read_le::<u8>()?;
        <$ty>::from_repr(ordinal).ok_or_else(|| {
            malformed_error!("invalid {} ordinal {}", stringify!($ty), ordinal)
        })?
    }};
}

/// Decoding state of one blob; validates every index against the header counts.
struct ProgramReader<'r, 'p, 'd> {
    io: &'r ProgramIO<'r>,
    parser: &'p mut Parser<'d>,
    variable_count: usize,
    block_count: usize,
}

impl ProgramReader<'_, '_, '_> {
    fn variable(&mut self) -> Result<Variable> {
        let index = self.parser.read_index()?;
        if index >= self.variable_count {
            return Err(malformed_error!(
                "variable {} out of range ({} variables)",
                index,
                self.variable_count
            ));
        }
        Ok(Variable(index))
    }

    fn optional_variable(&mut self) -> Result<Option<Variable>> {
        match self.parser.read_optional_index()? {
            Some(index) if index < self.variable_count => Ok(Some(Variable(index))),
            Some(index) => Err(malformed_error!(
                "variable {} out of range ({} variables)",
                index,
                self.variable_count
            )),
            None => Ok(None),
        }
    }

    fn variables(&mut self) -> Result<Vec<Variable>> {
        let count = self.parser.read_index()?;
        (0..count).map(|_| self.variable()).collect()
    }

    fn block(&mut self) -> Result<BlockId> {
        let index = self.parser.read_index()?;
        if index >= self.block_count {
            return Err(malformed_error!(
                "block {} out of range ({} blocks)",
                index,
                self.block_count
            ));
        }
        Ok(BlockId(index))
    }

    fn symbol(&mut self) -> Result<&str> {
        let index = self.parser.read_7bit_encoded_int()?;
        self.io
            .symbols
            .at(index)
            .ok_or_else(|| malformed_error!("symbol {} is not in the symbol table", index))
    }

    fn optional_symbol(&mut self) -> Result<Option<&str>> {
        match self.parser.read_optional_index()? {
            Some(index) => {
                let index = u32::try_from(index)
                    .map_err(|_| malformed_error!("symbol {} out of range", index))?;
                self.io
                    .symbols
                    .at(index)
                    .map(Some)
                    .ok_or_else(|| malformed_error!("symbol {} is not in the symbol table", index))
            }
            None => Ok(None),
        }
    }

    fn value_type(&mut self) -> Result<ValueType> {
        ValueType::parse(self.symbol()?)
    }

    fn method(&mut self) -> Result<MethodReference> {
        let class_name = self.symbol()?.to_string();
        let descriptor = MethodDescriptor::parse(self.symbol()?)?;
        Ok(MethodReference::new(class_name, descriptor))
    }

    fn field(&mut self) -> Result<FieldReference> {
        let class_name = self.symbol()?.to_string();
        let field_name = self.symbol()?.to_string();
        Ok(FieldReference::new(class_name, field_name))
    }

    fn handle(&mut self) -> Result<MethodHandle> {
        let kind = read_ordinal!(self.parser, MethodHandleKind);
        let class_name = self.symbol()?.to_string();
        let name = self.symbol()?.to_string();
        let value_type = self.optional_symbol()?.map(ValueType::parse).transpose()?;
        let descriptor = self
            .optional_symbol()?
            .map(MethodDescriptor::parse)
            .transpose()?;
        Ok(MethodHandle {
            kind,
            class_name,
            name,
            value_type,
            descriptor,
        })
    }

    fn constant(&mut self) -> Result<RuntimeConstant> {
        Ok(match self.parser.read_le::<u8>()? {
            0 => RuntimeConstant::Int(self.parser.read_compressed_int()?),
            1 => RuntimeConstant::Long(self.parser.read_le()?),
            2 => RuntimeConstant::Float(self.parser.read_le()?),
            3 => RuntimeConstant::Double(self.parser.read_le()?),
            4 => RuntimeConstant::String(self.parser.read_prefixed_string_utf8()?),
            5 => RuntimeConstant::Type(self.value_type()?),
            6 => RuntimeConstant::Method(MethodDescriptor::parse(self.symbol()?)?),
            7 => RuntimeConstant::MethodHandle(self.handle()?),
            tag => return Err(malformed_error!("unknown bootstrap constant tag {}", tag)),
        })
    }

    #[allow(clippy::too_many_lines)]
    fn instruction(&mut self, tag: u8) -> Result<InstructionKind> {
        Ok(match tag {
            0 => InstructionKind::Empty,
            1 => InstructionKind::ClassConstant {
                receiver: self.variable()?,
                constant: self.value_type()?,
            },
            2 => InstructionKind::NullConstant {
                receiver: self.variable()?,
            },
            3 => InstructionKind::IntegerConstant {
                receiver: self.variable()?,
                constant: self.parser.read_compressed_int()?,
            },
            4 => InstructionKind::LongConstant {
                receiver: self.variable()?,
                constant: self.parser.read_le()?,
            },
            5 => InstructionKind::FloatConstant {
                receiver: self.variable()?,
                constant: self.parser.read_le()?,
            },
            6 => InstructionKind::DoubleConstant {
                receiver: self.variable()?,
                constant: self.parser.read_le()?,
            },
            7 => InstructionKind::StringConstant {
                receiver: self.variable()?,
                constant: self.parser.read_prefixed_string_utf8()?,
            },
            8 => InstructionKind::Binary {
                receiver: self.variable()?,
                operation: read_ordinal!(self.parser, BinaryOperation),
                operand_type: read_ordinal!(self.parser, NumericOperandType),
                first: self.variable()?,
                second: self.variable()?,
            },
            9 => InstructionKind::Negate {
                receiver: self.variable()?,
                operand_type: read_ordinal!(self.parser, NumericOperandType),
                operand: self.variable()?,
            },
            10 => InstructionKind::Assign {
                receiver: self.variable()?,
                assignee: self.variable()?,
            },
            11 => InstructionKind::Cast {
                receiver: self.variable()?,
                value: self.variable()?,
                target_type: self.value_type()?,
            },
            12 => InstructionKind::CastNumber {
                receiver: self.variable()?,
                value: self.variable()?,
                source: read_ordinal!(self.parser, NumericOperandType),
                target: read_ordinal!(self.parser, NumericOperandType),
            },
            13 => InstructionKind::CastInteger {
                receiver: self.variable()?,
                value: self.variable()?,
                target: read_ordinal!(self.parser, IntegerSubtype),
                direction: read_ordinal!(self.parser, CastIntegerDirection),
            },
            14 => InstructionKind::Branch {
                condition: read_ordinal!(self.parser, BranchingCondition),
                operand: self.variable()?,
                consequent: self.block()?,
                alternative: self.block()?,
            },
            15 => InstructionKind::BinaryBranch {
                condition: read_ordinal!(self.parser, BinaryBranchingCondition),
                first: self.variable()?,
                second: self.variable()?,
                consequent: self.block()?,
                alternative: self.block()?,
            },
            16 => InstructionKind::Jump {
                target: self.block()?,
            },
            17 => {
                let condition = self.variable()?;
                let count = self.parser.read_index()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let condition = self.parser.read_compressed_int()?;
                    let target = self.block()?;
                    entries.push(SwitchEntry { condition, target });
                }
                InstructionKind::Switch {
                    condition,
                    entries,
                    default_target: self.block()?,
                }
            }
            18 => InstructionKind::Exit { value: None },
            19 => InstructionKind::Exit {
                value: Some(self.variable()?),
            },
            20 => InstructionKind::Raise {
                exception: self.variable()?,
            },
            21 => InstructionKind::ConstructArray {
                receiver: self.variable()?,
                item_type: self.value_type()?,
                size: self.variable()?,
            },
            22 => InstructionKind::Construct {
                receiver: self.variable()?,
                class_name: self.symbol()?.to_string(),
            },
            23 => InstructionKind::ConstructMultiArray {
                receiver: self.variable()?,
                item_type: self.value_type()?,
                dimensions: self.variables()?,
            },
            24 | 25 => InstructionKind::GetField {
                receiver: self.variable()?,
                instance: if tag == 24 {
                    Some(self.variable()?)
                } else {
                    None
                },
                field: self.field()?,
                field_type: self.value_type()?,
            },
            26 | 27 => InstructionKind::PutField {
                instance: if tag == 26 {
                    Some(self.variable()?)
                } else {
                    None
                },
                field: self.field()?,
                value: self.variable()?,
                field_type: self.value_type()?,
            },
            28 => InstructionKind::ArrayLength {
                receiver: self.variable()?,
                array: self.variable()?,
            },
            29 => InstructionKind::CloneArray {
                receiver: self.variable()?,
                array: self.variable()?,
            },
            30 => InstructionKind::UnwrapArray {
                receiver: self.variable()?,
                array: self.variable()?,
                element_type: read_ordinal!(self.parser, ArrayElementType),
            },
            31 => InstructionKind::GetElement {
                receiver: self.variable()?,
                array: self.variable()?,
                index: self.variable()?,
            },
            32 => InstructionKind::PutElement {
                array: self.variable()?,
                index: self.variable()?,
                value: self.variable()?,
            },
            33 | 34 => InstructionKind::Invoke {
                receiver: self.optional_variable()?,
                instance: if tag == 34 {
                    Some(self.variable()?)
                } else {
                    None
                },
                method: self.method()?,
                arguments: self.variables()?,
                invocation: read_ordinal!(self.parser, InvocationType),
            },
            36 => InstructionKind::IsInstance {
                receiver: self.variable()?,
                value: self.variable()?,
                target_type: self.value_type()?,
            },
            37 => InstructionKind::InitClass {
                class_name: self.symbol()?.to_string(),
            },
            38 => InstructionKind::NullCheck {
                receiver: self.variable()?,
                value: self.variable()?,
            },
            39 => InstructionKind::MonitorEnter {
                object: self.variable()?,
            },
            40 => InstructionKind::MonitorExit {
                object: self.variable()?,
            },
            41 => {
                let receiver = self.optional_variable()?;
                let instance = self.optional_variable()?;
                let method = MethodDescriptor::parse(self.symbol()?)?;
                let arguments = self.variables()?;
                let bootstrap = self.handle()?;
                let count = self.parser.read_index()?;
                let bootstrap_arguments = (0..count)
                    .map(|_| self.constant())
                    .collect::<Result<Vec<_>>>()?;
                InstructionKind::InvokeDynamic {
                    receiver,
                    instance,
                    method,
                    arguments,
                    bootstrap,
                    bootstrap_arguments,
                }
            }
            _ => return Err(malformed_error!("unknown instruction tag {}", tag)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::ProgramEmitter;

    fn method(class: &str, name: &str, params: &[ValueType], result: ValueType) -> MethodReference {
        MethodReference::new(class, MethodDescriptor::new(name, params.to_vec(), result))
    }

    /// A program touching every instruction variant, phis, regions and joints.
    fn every_kind() -> Program {
        let mut program = Program::new();
        for _ in 0..8 {
            program.create_variable();
        }
        let entry = program.create_basic_block();
        let next = program.create_basic_block();
        let handler = program.create_basic_block();
        let v = Variable;
        let object = ValueType::object("java.lang.Object");
        let field = FieldReference::new("A", "f");
        let callee = method("A", "g", &[ValueType::INTEGER], ValueType::INTEGER);
        let handle = MethodHandle {
            kind: MethodHandleKind::InvokeStatic,
            class_name: "Boot".into(),
            name: "bootstrap".into(),
            value_type: Some(ValueType::LONG),
            descriptor: Some(MethodDescriptor::new("bootstrap", vec![], object.clone())),
        };

        let kinds = vec![
            InstructionKind::Empty,
            InstructionKind::ClassConstant {
                receiver: v(1),
                constant: ValueType::array_of(object.clone()),
            },
            InstructionKind::NullConstant { receiver: v(1) },
            InstructionKind::IntegerConstant {
                receiver: v(2),
                constant: -70_000,
            },
            InstructionKind::LongConstant {
                receiver: v(3),
                constant: i64::MIN,
            },
            InstructionKind::FloatConstant {
                receiver: v(3),
                constant: 1.5,
            },
            InstructionKind::DoubleConstant {
                receiver: v(3),
                constant: -0.25,
            },
            InstructionKind::StringConstant {
                receiver: v(1),
                constant: "text".into(),
            },
            InstructionKind::Binary {
                receiver: v(2),
                operation: BinaryOperation::ShiftRightUnsigned,
                operand_type: NumericOperandType::Long,
                first: v(2),
                second: v(3),
            },
            InstructionKind::Negate {
                receiver: v(2),
                operand_type: NumericOperandType::Double,
                operand: v(2),
            },
            InstructionKind::Assign {
                receiver: v(4),
                assignee: v(2),
            },
            InstructionKind::Cast {
                receiver: v(4),
                value: v(1),
                target_type: ValueType::object("A"),
            },
            InstructionKind::CastNumber {
                receiver: v(4),
                value: v(2),
                source: NumericOperandType::Int,
                target: NumericOperandType::Float,
            },
            InstructionKind::CastInteger {
                receiver: v(4),
                value: v(2),
                target: IntegerSubtype::Character,
                direction: CastIntegerDirection::ToInteger,
            },
            InstructionKind::Construct {
                receiver: v(5),
                class_name: "A".into(),
            },
            InstructionKind::ConstructArray {
                receiver: v(5),
                item_type: ValueType::INTEGER,
                size: v(2),
            },
            InstructionKind::ConstructMultiArray {
                receiver: v(5),
                item_type: ValueType::array_of(ValueType::array_of(ValueType::DOUBLE)),
                dimensions: vec![v(2), v(2)],
            },
            InstructionKind::GetField {
                receiver: v(6),
                instance: Some(v(5)),
                field: field.clone(),
                field_type: ValueType::INTEGER,
            },
            InstructionKind::GetField {
                receiver: v(6),
                instance: None,
                field: field.clone(),
                field_type: ValueType::INTEGER,
            },
            InstructionKind::PutField {
                instance: Some(v(5)),
                field: field.clone(),
                value: v(6),
                field_type: ValueType::INTEGER,
            },
            InstructionKind::PutField {
                instance: None,
                field,
                value: v(6),
                field_type: ValueType::INTEGER,
            },
            InstructionKind::ArrayLength {
                receiver: v(6),
                array: v(5),
            },
            InstructionKind::CloneArray {
                receiver: v(6),
                array: v(5),
            },
            InstructionKind::UnwrapArray {
                receiver: v(6),
                array: v(5),
                element_type: ArrayElementType::Object,
            },
            InstructionKind::GetElement {
                receiver: v(6),
                array: v(5),
                index: v(2),
            },
            InstructionKind::PutElement {
                array: v(5),
                index: v(2),
                value: v(6),
            },
            InstructionKind::Invoke {
                receiver: Some(v(6)),
                instance: None,
                method: callee.clone(),
                arguments: vec![v(2)],
                invocation: InvocationType::Special,
            },
            InstructionKind::Invoke {
                receiver: None,
                instance: Some(v(5)),
                method: callee,
                arguments: vec![v(2)],
                invocation: InvocationType::Virtual,
            },
            InstructionKind::InvokeDynamic {
                receiver: Some(v(6)),
                instance: None,
                method: MethodDescriptor::new("run", vec![], object),
                arguments: vec![],
                bootstrap: handle.clone(),
                bootstrap_arguments: vec![
                    RuntimeConstant::Int(-3),
                    RuntimeConstant::Long(1 << 40),
                    RuntimeConstant::Float(0.5),
                    RuntimeConstant::Double(2.0),
                    RuntimeConstant::String("s".into()),
                    RuntimeConstant::Type(ValueType::BOOLEAN),
                    RuntimeConstant::Method(MethodDescriptor::new("m", vec![], ValueType::Void)),
                    RuntimeConstant::MethodHandle(handle),
                ],
            },
            InstructionKind::IsInstance {
                receiver: v(6),
                value: v(5),
                target_type: ValueType::object("A"),
            },
            InstructionKind::InitClass {
                class_name: "A".into(),
            },
            InstructionKind::NullCheck {
                receiver: v(7),
                value: v(5),
            },
            InstructionKind::MonitorEnter { object: v(7) },
            InstructionKind::MonitorExit { object: v(7) },
            InstructionKind::Switch {
                condition: v(2),
                entries: vec![
                    SwitchEntry {
                        condition: -1,
                        target: next,
                    },
                    SwitchEntry {
                        condition: 1000,
                        target: handler,
                    },
                ],
                default_target: next,
            },
        ];
        let located = TextLocation::new("A.java", 12);
        for (index, kind) in kinds.into_iter().enumerate() {
            let location = (index % 3 != 0).then(|| located.clone());
            program
                .block_mut(entry)
                .instructions
                .push(Instruction::at(kind, location));
        }
        let mut region = TryCatchBlock::new(Some("java.lang.Exception".into()), Some(v(0)), handler);
        region.joints.push(TryCatchJoint {
            receiver: v(7),
            source_variables: vec![v(4), v(6)],
        });
        program.block_mut(entry).try_catches.push(region);
        program
            .block_mut(entry)
            .try_catches
            .push(TryCatchBlock::new(None, None, handler));

        let block = program.block_mut(next);
        let mut phi = Phi::new(v(4));
        phi.incomings.push(Incoming {
            source: entry,
            value: v(2),
        });
        block.phis.push(phi);
        block.push(InstructionKind::BinaryBranch {
            condition: BinaryBranchingCondition::ReferenceNotEqual,
            first: v(5),
            second: v(6),
            consequent: handler,
            alternative: handler,
        });

        let block = program.block_mut(handler);
        block.exception_variable = Some(v(0));
        block.instructions.push(Instruction::at(
            InstructionKind::Branch {
                condition: BranchingCondition::NotNull,
                operand: v(0),
                consequent: next,
                alternative: next,
            },
            Some(TextLocation::new("B.java", 3)),
        ));
        block.instructions.push(Instruction::new(InstructionKind::Raise {
            exception: v(0),
        }));
        let returns = program.create_basic_block();
        program.block_mut(returns).push(InstructionKind::Exit { value: None });
        let returns_value = program.create_basic_block();
        program
            .block_mut(returns_value)
            .push(InstructionKind::Exit { value: Some(v(2)) });
        program.block_mut(returns_value).push(InstructionKind::Jump { target: entry });

        program.variable_mut(v(2)).debug_names = BTreeSet::from(["i".to_string(), "j".to_string()]);
        program
    }

    #[test]
    fn test_round_trip_preserves_every_instruction_kind() {
        let program = every_kind();
        let tags: BTreeSet<u8> = program
            .blocks()
            .iter()
            .flat_map(|b| b.instructions.iter().map(|i| i.kind.tag()))
            .collect();
        assert_eq!(tags.len(), 41);

        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = ProgramIO::new(&symbols, &files);
        let bytes = io.write(&program).unwrap();
        let decoded = io.read(&bytes).unwrap();
        assert_eq!(decoded, program);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_locations_are_coalesced() {
        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = ProgramIO::new(&symbols, &files);

        let mut program = Program::new();
        let mut emitter = ProgramEmitter::create(&mut program);
        emitter.at(Some(TextLocation::new("A.java", 1)));
        let a = emitter.int(1);
        emitter.int(2);
        emitter.exit(Some(a));
        let bytes = io.write(&program).unwrap();
        let markers = bytes.iter().filter(|&&b| b == SET_LOCATION).count();
        assert_eq!(markers, 1);

        let decoded = io.read(&bytes).unwrap();
        assert!(decoded.block(BlockId(0)).instructions.iter().all(|i| i.location
            == Some(TextLocation::new("A.java", 1))));
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = ProgramIO::new(&symbols, &files);
        let mut program = Program::new();
        let block = program.create_basic_block();
        program.block_mut(block).push(InstructionKind::Empty);
        let mut bytes = io.write(&program).unwrap();
        let empty_tag = bytes.len() - 2;
        bytes[empty_tag] = 35;
        assert!(matches!(io.read(&bytes), Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_bad_ordinal_is_malformed() {
        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = ProgramIO::new(&symbols, &files);
        let mut program = Program::new();
        let v = program.create_variable();
        let block = program.create_basic_block();
        program.block_mut(block).push(InstructionKind::Negate {
            receiver: v,
            operand_type: NumericOperandType::Int,
            operand: v,
        });
        let mut bytes = io.write(&program).unwrap();
        // tag, receiver, operand type, operand, END
        let ordinal = bytes.len() - 3;
        bytes[ordinal] = 200;
        assert!(matches!(io.read(&bytes), Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn test_truncated_blob_and_foreign_table_fail() {
        let symbols = SymbolTable::new();
        let files = SymbolTable::new();
        let io = ProgramIO::new(&symbols, &files);
        let bytes = io.write(&every_kind()).unwrap();
        assert!(io.read(&bytes[..bytes.len() / 2]).is_err());

        let other = SymbolTable::new();
        let foreign = ProgramIO::new(&other, &files);
        assert!(foreign.read(&bytes).is_err());
    }
}
