//! Value types, method and field references, and source locations.
//!
//! Types use the JVM descriptor notation for their textual form (`I`, `J`,
//! `Ljava.lang.String;`, `[I`, ...), with `.` as the package separator. Runtime
//! type names, as carried through the dependency analysis, are plain class names
//! for object types and `[` followed by the item descriptor for arrays.

use std::fmt;

use strum::{EnumIter, FromRepr};

use crate::Result;

/// The primitive value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromRepr, EnumIter)]
#[repr(u8)]
pub enum PrimitiveType {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Character,
    /// `I`
    Integer,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
}

impl PrimitiveType {
    /// Returns the one-letter descriptor of this primitive.
    #[must_use]
    pub fn descriptor(self) -> char {
        match self {
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Short => 'S',
            PrimitiveType::Character => 'C',
            PrimitiveType::Integer => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
        }
    }

    fn from_descriptor(c: char) -> Option<Self> {
        Some(match c {
            'Z' => PrimitiveType::Boolean,
            'B' => PrimitiveType::Byte,
            'S' => PrimitiveType::Short,
            'C' => PrimitiveType::Character,
            'I' => PrimitiveType::Integer,
            'J' => PrimitiveType::Long,
            'F' => PrimitiveType::Float,
            'D' => PrimitiveType::Double,
            _ => return None,
        })
    }
}

/// The static type of a value, field, parameter or method result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    /// No value, only valid as a method result
    Void,
    /// A primitive value
    Primitive(PrimitiveType),
    /// A reference to an instance of the named class
    Object(String),
    /// An array with the given item type
    Array(Box<ValueType>),
}

impl ValueType {
    /// Shorthand for an object type.
    #[must_use]
    pub fn object(class_name: impl Into<String>) -> Self {
        ValueType::Object(class_name.into())
    }

    /// Shorthand for an array of `item`.
    #[must_use]
    pub fn array_of(item: ValueType) -> Self {
        ValueType::Array(Box::new(item))
    }

    /// `int`
    pub const INTEGER: ValueType = ValueType::Primitive(PrimitiveType::Integer);
    /// `long`
    pub const LONG: ValueType = ValueType::Primitive(PrimitiveType::Long);
    /// `double`
    pub const DOUBLE: ValueType = ValueType::Primitive(PrimitiveType::Double);
    /// `boolean`
    pub const BOOLEAN: ValueType = ValueType::Primitive(PrimitiveType::Boolean);

    /// Returns `true` for primitives and void.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, ValueType::Primitive(_) | ValueType::Void)
    }

    /// Returns `true` for object and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, ValueType::Object(_) | ValueType::Array(_))
    }

    /// Returns `true` for the 64-bit primitives, which occupy two parameter slots.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(
            self,
            ValueType::Primitive(PrimitiveType::Long | PrimitiveType::Double)
        )
    }

    /// Returns the item type of an array type.
    #[must_use]
    pub fn item_type(&self) -> Option<&ValueType> {
        match self {
            ValueType::Array(item) => Some(item),
            _ => None,
        }
    }

    /// Strips every array dimension, returning the innermost item type.
    #[must_use]
    pub fn innermost(&self) -> &ValueType {
        let mut current = self;
        while let ValueType::Array(item) = current {
            current = item;
        }
        current
    }

    /// Returns the class name of the innermost item type, if it is an object type.
    #[must_use]
    pub fn innermost_class(&self) -> Option<&str> {
        match self.innermost() {
            ValueType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the name used for this type in dependency type sets.
    ///
    /// Object types use the class name; arrays use `[` followed by the item
    /// descriptor. Primitive types have no runtime name.
    #[must_use]
    pub fn runtime_name(&self) -> Option<String> {
        match self {
            ValueType::Object(name) => Some(name.clone()),
            ValueType::Array(item) => Some(format!("[{item}")),
            _ => None,
        }
    }

    /// Inverse of [`ValueType::runtime_name`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an array name with an invalid item
    /// descriptor.
    pub fn from_runtime_name(name: &str) -> Result<Self> {
        match name.strip_prefix('[') {
            Some(item) => Ok(ValueType::array_of(ValueType::parse(item)?)),
            None => Ok(ValueType::Object(name.to_string())),
        }
    }

    /// Parses a single descriptor such as `I`, `[J` or `Ljava.lang.Object;`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the text is not exactly one descriptor.
    pub fn parse(text: &str) -> Result<Self> {
        let (value, rest) = Self::parse_prefix(text)?;
        if !rest.is_empty() {
            return Err(malformed_error!("trailing characters in type '{}'", text));
        }
        Ok(value)
    }

    /// Parses one descriptor from the start of `text`, returning it and the rest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no descriptor starts the text.
    pub fn parse_prefix(text: &str) -> Result<(Self, &str)> {
        let mut chars = text.chars();
        match chars.next() {
            Some('V') => Ok((ValueType::Void, chars.as_str())),
            Some('[') => {
                let (item, rest) = Self::parse_prefix(chars.as_str())?;
                Ok((ValueType::array_of(item), rest))
            }
            Some('L') => {
                let body = chars.as_str();
                let end = body
                    .find(';')
                    .ok_or_else(|| malformed_error!("unterminated class type in '{}'", text))?;
                Ok((ValueType::Object(body[..end].to_string()), &body[end + 1..]))
            }
            Some(c) => PrimitiveType::from_descriptor(c)
                .map(|p| (ValueType::Primitive(p), chars.as_str()))
                .ok_or_else(|| malformed_error!("invalid type descriptor '{}'", text)),
            None => Err(malformed_error!("empty type descriptor")),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "V"),
            ValueType::Primitive(p) => write!(f, "{}", p.descriptor()),
            ValueType::Object(name) => write!(f, "L{name};"),
            ValueType::Array(item) => write!(f, "[{item}"),
        }
    }
}

/// A method name with its parameter and result types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodDescriptor {
    /// Method name, `<init>` for constructors and `<clinit>` for class initializers
    pub name: String,
    /// Parameter types, excluding the receiver
    pub parameters: Vec<ValueType>,
    /// Result type, [`ValueType::Void`] for none
    pub result: ValueType,
}

impl MethodDescriptor {
    /// Creates a descriptor from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, parameters: Vec<ValueType>, result: ValueType) -> Self {
        MethodDescriptor {
            name: name.into(),
            parameters,
            result,
        }
    }

    /// Parses `name(params)result`, e.g. `valueOf(I)Ljava.lang.String;`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] when the text is not a method descriptor.
    pub fn parse(text: &str) -> Result<Self> {
        let open = text
            .find('(')
            .ok_or_else(|| malformed_error!("missing '(' in method descriptor '{}'", text))?;
        let name = &text[..open];
        let mut rest = &text[open + 1..];
        let mut parameters = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(malformed_error!("missing ')' in method descriptor '{}'", text));
            }
            let (param, after) = ValueType::parse_prefix(rest)?;
            parameters.push(param);
            rest = after;
        }
        let result = ValueType::parse(rest)?;
        Ok(MethodDescriptor::new(name, parameters, result))
    }

    /// Number of parameters, excluding the receiver.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Returns `true` for `<init>`.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for param in &self.parameters {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.result)
    }
}

/// A method of a specific class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodReference {
    /// Declaring or referencing class
    pub class_name: String,
    /// Name and signature
    pub descriptor: MethodDescriptor,
}

impl MethodReference {
    /// Creates a reference from its parts.
    #[must_use]
    pub fn new(class_name: impl Into<String>, descriptor: MethodDescriptor) -> Self {
        MethodReference {
            class_name: class_name.into(),
            descriptor,
        }
    }

    /// Parses `class.name(params)result`; the class is everything before the last
    /// `.` that precedes the `(`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for invalid text.
    pub fn parse(text: &str) -> Result<Self> {
        let open = text
            .find('(')
            .ok_or_else(|| malformed_error!("missing '(' in method reference '{}'", text))?;
        let dot = text[..open]
            .rfind('.')
            .ok_or_else(|| malformed_error!("missing class in method reference '{}'", text))?;
        Ok(MethodReference::new(
            &text[..dot],
            MethodDescriptor::parse(&text[dot + 1..])?,
        ))
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Number of parameters, excluding the receiver.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.descriptor.parameter_count()
    }

    /// Returns the same descriptor on another class.
    #[must_use]
    pub fn with_class(&self, class_name: &str) -> Self {
        MethodReference::new(class_name, self.descriptor.clone())
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.descriptor)
    }
}

/// A field of a specific class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldReference {
    /// Declaring or referencing class
    pub class_name: String,
    /// Field name
    pub field_name: String,
}

impl FieldReference {
    /// Creates a reference from its parts.
    #[must_use]
    pub fn new(class_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        FieldReference {
            class_name: class_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.field_name)
    }
}

/// A position in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextLocation {
    /// Source file name
    pub file: String,
    /// One-based line number
    pub line: u32,
}

impl TextLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        TextLocation {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for TextLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A method plus an optional position inside it, used to key diagnostics and
/// call-graph sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallLocation {
    /// The method containing the position
    pub method: MethodReference,
    /// Source position, when the front end recorded one
    pub location: Option<TextLocation>,
}

impl CallLocation {
    /// Creates a call location.
    #[must_use]
    pub fn new(method: MethodReference, location: Option<TextLocation>) -> Self {
        CallLocation { method, location }
    }
}

impl fmt::Display for CallLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.method, location),
            None => write!(f, "{}", self.method),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptors() -> Result<()> {
        assert_eq!(ValueType::parse("I")?, ValueType::INTEGER);
        assert_eq!(
            ValueType::parse("[[Ljava.lang.String;")?,
            ValueType::array_of(ValueType::array_of(ValueType::object("java.lang.String")))
        );
        assert!(ValueType::parse("Q").is_err());
        assert!(ValueType::parse("Ljava.lang.String").is_err());
        assert!(ValueType::parse("II").is_err());
        Ok(())
    }

    #[test]
    fn test_method_descriptor_text() -> Result<()> {
        let text = "compute(IJ[Ljava.lang.Object;)D";
        let desc = MethodDescriptor::parse(text)?;
        assert_eq!(desc.name, "compute");
        assert_eq!(desc.parameters.len(), 3);
        assert!(desc.parameters[1].is_wide());
        assert_eq!(desc.result, ValueType::DOUBLE);
        assert_eq!(desc.to_string(), text);
        Ok(())
    }

    #[test]
    fn test_method_reference_text() -> Result<()> {
        let method = MethodReference::parse("java.lang.Object.<init>()V")?;
        assert_eq!(method.class_name, "java.lang.Object");
        assert!(method.descriptor.is_constructor());
        assert_eq!(method.to_string(), "java.lang.Object.<init>()V");
        Ok(())
    }

    #[test]
    fn test_runtime_names() -> Result<()> {
        let array = ValueType::array_of(ValueType::object("A"));
        assert_eq!(array.runtime_name().as_deref(), Some("[LA;"));
        assert_eq!(ValueType::from_runtime_name("[LA;")?, array);
        assert_eq!(ValueType::from_runtime_name("A")?, ValueType::object("A"));
        assert_eq!(ValueType::INTEGER.runtime_name(), None);
        assert_eq!(array.innermost_class(), Some("A"));
        Ok(())
    }
}
