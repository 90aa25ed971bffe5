//! Class metadata and the class hierarchy oracle.
//!
//! The analysis never parses classes itself. A front end fills a [`ClassSet`]
//! with [`ClassHolder`]s, and every query about the hierarchy goes through the
//! [`ClassSource`] trait so alternative sources (lazy loaders, overlays) can be
//! plugged in.

use std::collections::{BTreeMap, VecDeque};

use bitflags::bitflags;
use rustc_hash::FxHashSet;

use crate::model::{
    program::Program,
    types::{FieldReference, MethodDescriptor, MethodReference, ValueType},
};

/// The root of the class hierarchy.
pub const OBJECT_CLASS: &str = "java.lang.Object";

bitflags! {
    /// Modifiers of classes, methods and fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ElementModifier: u32 {
        /// Belongs to the class rather than an instance
        const STATIC = 0x0001;
        /// Has no body and must be overridden
        const ABSTRACT = 0x0002;
        /// Implemented outside the program
        const NATIVE = 0x0004;
        /// Cannot be overridden or subclassed
        const FINAL = 0x0008;
        /// Runs with the monitor of its receiver (or class) held
        const SYNCHRONIZED = 0x0010;
        /// The class is an interface
        const INTERFACE = 0x0020;
    }
}

/// A method declared by a class.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodHolder {
    /// Declaring class
    pub owner_name: String,
    /// Name and signature
    pub descriptor: MethodDescriptor,
    /// Modifiers
    pub modifiers: ElementModifier,
    /// Body; `None` for abstract and native methods
    pub program: Option<Program>,
}

impl MethodHolder {
    /// Creates a method holder without body.
    #[must_use]
    pub fn new(owner_name: impl Into<String>, descriptor: MethodDescriptor, modifiers: ElementModifier) -> Self {
        MethodHolder {
            owner_name: owner_name.into(),
            descriptor,
            modifiers,
            program: None,
        }
    }

    /// Returns the reference naming this method.
    #[must_use]
    pub fn reference(&self) -> MethodReference {
        MethodReference::new(self.owner_name.clone(), self.descriptor.clone())
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(ElementModifier::STATIC)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.modifiers.contains(ElementModifier::ABSTRACT)
    }

    /// Returns the parameter types as seen by the body, including the receiver
    /// for instance methods.
    #[must_use]
    pub fn signature_with_receiver(&self) -> Vec<ValueType> {
        let mut types = Vec::with_capacity(self.descriptor.parameters.len() + 1);
        if !self.is_static() {
            types.push(ValueType::object(self.owner_name.clone()));
        }
        types.extend(self.descriptor.parameters.iter().cloned());
        types
    }
}

/// A field declared by a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldHolder {
    /// Declaring class
    pub owner_name: String,
    /// Field name
    pub name: String,
    /// Declared type
    pub field_type: ValueType,
    /// Modifiers
    pub modifiers: ElementModifier,
}

impl FieldHolder {
    /// Creates a field holder.
    #[must_use]
    pub fn new(
        owner_name: impl Into<String>,
        name: impl Into<String>,
        field_type: ValueType,
        modifiers: ElementModifier,
    ) -> Self {
        FieldHolder {
            owner_name: owner_name.into(),
            name: name.into(),
            field_type,
            modifiers,
        }
    }

    /// Returns the reference naming this field.
    #[must_use]
    pub fn reference(&self) -> FieldReference {
        FieldReference::new(self.owner_name.clone(), self.name.clone())
    }
}

/// A class with its members.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassHolder {
    /// Fully qualified name
    pub name: String,
    /// Superclass, `None` only for the hierarchy root
    pub parent: Option<String>,
    /// Implemented interfaces
    pub interfaces: Vec<String>,
    /// Modifiers
    pub modifiers: ElementModifier,
    /// Methods by descriptor
    pub methods: BTreeMap<MethodDescriptor, MethodHolder>,
    /// Fields by name
    pub fields: BTreeMap<String, FieldHolder>,
}

impl ClassHolder {
    /// Creates an empty class extending `parent`.
    #[must_use]
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        ClassHolder {
            name: name.into(),
            parent: parent.map(str::to_string),
            interfaces: Vec::new(),
            modifiers: ElementModifier::empty(),
            methods: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds or replaces a method, fixing its owner to this class.
    pub fn add_method(&mut self, mut method: MethodHolder) {
        method.owner_name.clone_from(&self.name);
        self.methods.insert(method.descriptor.clone(), method);
    }

    /// Adds or replaces a field, fixing its owner to this class.
    pub fn add_field(&mut self, mut field: FieldHolder) {
        field.owner_name.clone_from(&self.name);
        self.fields.insert(field.name.clone(), field);
    }

    /// Looks up a declared method.
    #[must_use]
    pub fn method(&self, descriptor: &MethodDescriptor) -> Option<&MethodHolder> {
        self.methods.get(descriptor)
    }

    /// Looks up a declared method mutably.
    pub fn method_mut(&mut self, descriptor: &MethodDescriptor) -> Option<&mut MethodHolder> {
        self.methods.get_mut(descriptor)
    }

    /// Looks up a declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldHolder> {
        self.fields.get(name)
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(ElementModifier::INTERFACE)
    }
}

/// Read access to the classes of the program being compiled.
///
/// Only [`ClassSource::get`] is required; the hierarchy queries have default
/// implementations built on it.
pub trait ClassSource {
    /// Returns the class with the given name.
    fn get(&self, name: &str) -> Option<&ClassHolder>;

    /// Returns the method with exactly this owner and descriptor.
    fn find_method(&self, method: &MethodReference) -> Option<&MethodHolder> {
        self.get(&method.class_name)?.method(&method.descriptor)
    }

    /// Returns the field with exactly this owner and name.
    fn find_field(&self, field: &FieldReference) -> Option<&FieldHolder> {
        self.get(&field.class_name)?.field(&field.field_name)
    }

    /// Decides whether `sub_type` is assignable to `super_type`, both given as
    /// runtime type names.
    ///
    /// Returns `None` when the answer depends on a class that is not available.
    fn is_super_type(&self, super_type: &str, sub_type: &str) -> Option<bool> {
        if super_type == sub_type || super_type == OBJECT_CLASS {
            return Some(true);
        }
        if let Some(sub_item) = sub_type.strip_prefix('[') {
            let Some(super_item) = super_type.strip_prefix('[') else {
                return Some(false);
            };
            return match (ValueType::parse(super_item), ValueType::parse(sub_item)) {
                (Ok(ValueType::Object(sup)), Ok(ValueType::Object(sub))) => {
                    self.is_super_type(&sup, &sub)
                }
                (Ok(sup), Ok(sub @ ValueType::Array(_))) if sup.is_reference() => {
                    match (sup.runtime_name(), sub.runtime_name()) {
                        (Some(a), Some(b)) => self.is_super_type(&a, &b),
                        _ => Some(false),
                    }
                }
                (Ok(sup), Ok(sub)) => Some(sup == sub),
                _ => Some(false),
            };
        }
        if super_type.starts_with('[') {
            return Some(false);
        }

        let mut unknown = false;
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::from([sub_type]);
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name) {
                continue;
            }
            let Some(class) = self.get(name) else {
                unknown = true;
                continue;
            };
            for next in class.parent.iter().chain(class.interfaces.iter()) {
                if next == super_type {
                    return Some(true);
                }
                queue.push_back(next);
            }
        }
        if unknown {
            None
        } else {
            Some(false)
        }
    }

    /// Finds the declaration a method reference denotes, looking at the class,
    /// then its superclasses, then all superinterfaces.
    fn resolve_method(&self, method: &MethodReference) -> Option<&MethodHolder> {
        let mut current = Some(method.class_name.as_str());
        while let Some(name) = current {
            let class = self.get(name)?;
            if let Some(found) = class.method(&method.descriptor) {
                return Some(found);
            }
            current = class.parent.as_deref();
        }
        self.find_in_interfaces(&method.class_name, &method.descriptor, false)
    }

    /// Finds the code that runs when `method` is invoked on an instance whose
    /// runtime class is `method.class_name`: the nearest non-abstract declaration
    /// in the superclass chain, else a default method of a superinterface.
    fn resolve_implementation(&self, method: &MethodReference) -> Option<&MethodHolder> {
        let mut current = Some(method.class_name.as_str());
        while let Some(name) = current {
            let Some(class) = self.get(name) else {
                break;
            };
            if let Some(found) = class.method(&method.descriptor) {
                if !found.is_abstract() {
                    return Some(found);
                }
            }
            current = class.parent.as_deref();
        }
        self.find_in_interfaces(&method.class_name, &method.descriptor, true)
    }

    /// Finds the declaration a field reference denotes, looking at the class,
    /// its interfaces, then its superclasses.
    fn resolve_field(&self, field: &FieldReference) -> Option<&FieldHolder> {
        let mut current = Some(field.class_name.as_str());
        while let Some(name) = current {
            let class = self.get(name)?;
            if let Some(found) = class.field(&field.field_name) {
                return Some(found);
            }
            for interface in &class.interfaces {
                if let Some(found) = self
                    .get(interface)
                    .and_then(|c| c.field(&field.field_name))
                {
                    return Some(found);
                }
            }
            current = class.parent.as_deref();
        }
        None
    }

    /// Breadth-first search of the superinterfaces of `class_name`.
    fn find_in_interfaces(
        &self,
        class_name: &str,
        descriptor: &MethodDescriptor,
        implementation_only: bool,
    ) -> Option<&MethodHolder> {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue: VecDeque<String> = VecDeque::from([class_name.to_string()]);
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(class) = self.get(&name) else {
                continue;
            };
            if class.is_interface() {
                if let Some(found) = class.method(descriptor) {
                    if !implementation_only || !found.is_abstract() {
                        return Some(found);
                    }
                }
            }
            queue.extend(class.interfaces.iter().cloned());
            queue.extend(class.parent.iter().cloned());
        }
        None
    }
}

/// An in-memory, mutable collection of classes.
#[derive(Debug, Clone, Default)]
pub struct ClassSet {
    classes: BTreeMap<String, ClassHolder>,
}

impl ClassSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a class.
    pub fn add(&mut self, class: ClassHolder) {
        self.classes.insert(class.name.clone(), class);
    }

    /// Removes a class.
    pub fn remove(&mut self, name: &str) -> Option<ClassHolder> {
        self.classes.remove(name)
    }

    /// Returns a class mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ClassHolder> {
        self.classes.get_mut(name)
    }

    /// Returns a method mutably.
    pub fn method_mut(&mut self, method: &MethodReference) -> Option<&mut MethodHolder> {
        self.classes
            .get_mut(&method.class_name)?
            .method_mut(&method.descriptor)
    }

    /// Iterates over all classes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassHolder> {
        self.classes.values()
    }

    /// Iterates mutably over all classes in name order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClassHolder> {
        self.classes.values_mut()
    }

    /// Names of all classes in order.
    #[must_use]
    pub fn class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    /// Number of classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` for an empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassSource for ClassSet {
    fn get(&self, name: &str) -> Option<&ClassHolder> {
        self.classes.get(name)
    }
}
