//! Fixtures shared by the unit tests: a minimal runtime class library and
//! builders for methods and programs.

use crate::model::{
    ClassHolder, ClassSet, ElementModifier, MethodDescriptor, MethodHolder, MethodReference,
    PrimitiveType, Program, ValueType, OBJECT_CLASS,
};

pub const STRING: &str = "java.lang.String";
pub const CLASS: &str = "java.lang.Class";
pub const THROWABLE: &str = "java.lang.Throwable";
pub const RUNTIME_EXCEPTION: &str = "java.lang.RuntimeException";
pub const NULL_POINTER_EXCEPTION: &str = "java.lang.NullPointerException";

/// Shorthand for a method reference.
pub fn method(class_name: &str, name: &str, parameters: Vec<ValueType>, result: ValueType) -> MethodReference {
    MethodReference::new(class_name, MethodDescriptor::new(name, parameters, result))
}

/// The classes every analyzed program needs: `Object` with its monitor helpers,
/// `Class`, `String` and the exceptions raised by null checks.
pub fn runtime_classes() -> ClassSet {
    let mut classes = ClassSet::new();
    let native_static = ElementModifier::STATIC | ElementModifier::NATIVE;
    let native = ElementModifier::NATIVE;

    let mut object = ClassHolder::new(OBJECT_CLASS, None);
    object.add_method(MethodHolder::new(
        OBJECT_CLASS,
        MethodDescriptor::new("<init>", vec![], ValueType::Void),
        native,
    ));
    for helper in ["monitorEnter", "monitorEnterSync", "monitorExit", "monitorExitSync"] {
        object.add_method(MethodHolder::new(
            OBJECT_CLASS,
            MethodDescriptor::new(helper, vec![ValueType::object(OBJECT_CLASS)], ValueType::Void),
            native_static,
        ));
    }
    object.add_method(MethodHolder::new(
        OBJECT_CLASS,
        MethodDescriptor::new("getClass", vec![], ValueType::object(CLASS)),
        native,
    ));
    classes.add(object);
    classes.add(ClassHolder::new(CLASS, Some(OBJECT_CLASS)));

    let mut string = ClassHolder::new(STRING, Some(OBJECT_CLASS));
    string.add_method(MethodHolder::new(
        STRING,
        MethodDescriptor::new(
            "<init>",
            vec![ValueType::array_of(ValueType::Primitive(PrimitiveType::Character))],
            ValueType::Void,
        ),
        native,
    ));
    classes.add(string);

    for (name, parent) in [
        (THROWABLE, OBJECT_CLASS),
        (RUNTIME_EXCEPTION, THROWABLE),
        (NULL_POINTER_EXCEPTION, RUNTIME_EXCEPTION),
    ] {
        let mut class = ClassHolder::new(name, Some(parent));
        class.add_method(MethodHolder::new(
            name,
            MethodDescriptor::new("<init>", vec![], ValueType::Void),
            native,
        ));
        classes.add(class);
    }
    classes
}

/// Adds a class with the given members to `classes`.
pub fn add_class<'a>(classes: &'a mut ClassSet, name: &str, parent: &str) -> &'a mut ClassHolder {
    classes.add(ClassHolder::new(name, Some(parent)));
    classes
        .get_mut(name)
        .expect("class was just added")
}

/// Adds a method with a body to its class, which must exist.
pub fn add_method(classes: &mut ClassSet, reference: &MethodReference, modifiers: ElementModifier, program: Option<Program>) {
    let mut holder = MethodHolder::new(reference.class_name.clone(), reference.descriptor.clone(), modifiers);
    holder.program = program;
    classes
        .get_mut(&reference.class_name)
        .expect("owner class exists")
        .add_method(holder);
}

/// A program with the receiver slot and `parameters` parameter variables
/// allocated, as the SSA transformer leaves them.
pub fn program_with_parameters(parameters: usize) -> Program {
    let mut program = Program::new();
    for _ in 0..=parameters {
        program.create_variable();
    }
    program
}
