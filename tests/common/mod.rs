//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use aotflow::model::{
    ClassHolder, ClassSet, ElementModifier, MethodDescriptor, MethodHolder, MethodReference,
    Program, ValueType, OBJECT_CLASS,
};

pub const THROWABLE: &str = "java.lang.Throwable";
pub const EXCEPTION: &str = "java.lang.Exception";
pub const RUNTIME_EXCEPTION: &str = "java.lang.RuntimeException";

/// Shorthand for a method reference.
pub fn method(class_name: &str, name: &str, parameters: Vec<ValueType>, result: ValueType) -> MethodReference {
    MethodReference::new(class_name, MethodDescriptor::new(name, parameters, result))
}

/// `Object`, `Class`, `String` and the exception roots every build links against.
pub fn runtime_classes() -> ClassSet {
    let mut classes = ClassSet::new();
    let mut object = ClassHolder::new(OBJECT_CLASS, None);
    object.add_method(MethodHolder::new(
        OBJECT_CLASS,
        MethodDescriptor::new("<init>", vec![], ValueType::Void),
        ElementModifier::NATIVE,
    ));
    classes.add(object);
    classes.add(ClassHolder::new("java.lang.Class", Some(OBJECT_CLASS)));
    classes.add(ClassHolder::new("java.lang.String", Some(OBJECT_CLASS)));
    for (name, parent) in [
        (THROWABLE, OBJECT_CLASS),
        (EXCEPTION, THROWABLE),
        (RUNTIME_EXCEPTION, EXCEPTION),
        ("java.lang.NullPointerException", RUNTIME_EXCEPTION),
    ] {
        classes.add(ClassHolder::new(name, Some(parent)));
    }
    classes
}

/// Adds an empty class.
pub fn add_class(classes: &mut ClassSet, name: &str, parent: &str) {
    classes.add(ClassHolder::new(name, Some(parent)));
}

/// Adds a method to its class, which must exist.
pub fn add_method(
    classes: &mut ClassSet,
    reference: &MethodReference,
    modifiers: ElementModifier,
    program: Option<Program>,
) {
    let mut holder = MethodHolder::new(
        reference.class_name.clone(),
        reference.descriptor.clone(),
        modifiers,
    );
    holder.program = program;
    classes
        .get_mut(&reference.class_name)
        .expect("owner class exists")
        .add_method(holder);
}

/// A program with the receiver slot and `parameters` parameter variables allocated.
pub fn program_with_parameters(parameters: usize) -> Program {
    let mut program = Program::new();
    for _ in 0..=parameters {
        program.create_variable();
    }
    program
}
