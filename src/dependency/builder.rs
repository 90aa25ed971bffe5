//! Interpretation of one method body into dependency graph edges.
//!
//! Bodies are in SSA form. Before interpretation, invoke-dynamic call sites are
//! replaced with the code a registered substitutor emits; the remaining
//! instructions are then visited block by block, each block getting an exception
//! consumer built from its try/catch regions.

use crate::{
    compiler::events::EventKind,
    model::{
        BasicBlock, BlockId, CallLocation, ClassSource, InstructionKind, InvocationType,
        MethodDescriptor, MethodReference, PrimitiveType, Program, ProgramEmitter, TextLocation,
        ValueType, Variable, OBJECT_CLASS,
    },
};

use super::{
    analyzer::DependencyAnalyzer,
    consumer::{ExceptionConsumer, VirtualCallConsumer},
    dataflow::build_node_mapping,
    node::{Consumer, DependencyNodeId, TypeFilter},
    plugin::DynamicCallSite,
};

const CLASS_CLASS: &str = "java.lang.Class";
const STRING_CLASS: &str = "java.lang.String";
const NULL_POINTER_EXCEPTION: &str = "java.lang.NullPointerException";

/// Runtime helper taking an object and returning nothing.
fn monitor_helper(name: &str) -> MethodReference {
    MethodReference::new(
        OBJECT_CLASS,
        MethodDescriptor::new(name, vec![ValueType::object(OBJECT_CLASS)], ValueType::Void),
    )
}

/// Links the monitor helpers of a `synchronized` method. Static methods lock
/// their class object, instance methods their receiver.
pub(crate) fn link_synchronized(analyzer: &mut DependencyAnalyzer<'_>, method: &MethodReference) {
    let Some(dependency) = analyzer.method_dependency(method) else {
        return;
    };
    let instance = (!dependency.is_static())
        .then(|| dependency.parameter(0))
        .flatten();
    let class_type = analyzer.type_for(CLASS_CLASS);

    for name in ["monitorEnter", "monitorEnterSync", "monitorExit", "monitorExitSync"] {
        let Some(helper) = analyzer.link_method(&monitor_helper(name), None) else {
            continue;
        };
        analyzer.use_method(&helper);
        let Some(parameter) = analyzer.method_dependency(&helper).and_then(|m| m.parameter(1)) else {
            continue;
        };
        match instance {
            Some(instance) => analyzer.connect(instance, parameter),
            None => analyzer.propagate(parameter, class_type),
        }
    }
}

/// Builds the dependency graph fragment of one method body.
pub(crate) fn build_method_graph(
    analyzer: &mut DependencyAnalyzer<'_>,
    method: &MethodReference,
    program: &mut Program,
) {
    if program.is_empty() {
        return;
    }
    substitute_invoke_dynamic(analyzer, method, program);

    let Some(dependency) = analyzer.method_dependency(method) else {
        return;
    };
    let significant: Vec<bool> = (0..dependency.parameter_slots())
        .map(|slot| dependency.parameter(slot).is_some())
        .collect();
    let parameters = dependency.parameters.clone();
    let result = dependency.result;
    let thrown = dependency.thrown;

    let mapping = build_node_mapping(program, &significant);
    let mut classes: Vec<DependencyNodeId> = Vec::with_capacity(mapping.class_count);
    for class in 0..mapping.class_count {
        let node = match parameters.get(class) {
            Some(Some(node)) => *node,
            _ => analyzer.create_node(),
        };
        analyzer.graph.set_tag(node, format!("{method}:{class}"));
        classes.push(node);
    }
    let nodes: Vec<Option<DependencyNodeId>> = mapping
        .classes
        .iter()
        .map(|class| class.map(|c| classes[c]))
        .collect();
    if let Some(dependency) = analyzer.methods.get_mut(method) {
        dependency.variables.clone_from(&nodes);
    }

    let mut builder = BodyBuilder {
        analyzer,
        method,
        nodes,
        result,
        thrown,
        location: None,
        exceptions: 0,
    };
    for block in program.blocks() {
        builder.location = None;
        builder.enter_block(block);
        for insn in &block.instructions {
            if insn.location.is_some() {
                builder.location.clone_from(&insn.location);
            }
            builder.visit(&insn.kind);
        }
        for phi in &block.phis {
            for incoming in &phi.incomings {
                builder.connect(incoming.value, phi.receiver);
            }
        }
        for try_catch in &block.try_catches {
            for joint in &try_catch.joints {
                for source in &joint.source_variables {
                    builder.connect(*source, joint.receiver);
                }
            }
        }
    }
}

/// Replaces every invoke-dynamic instruction.
///
/// With a substitutor, the block is split after the call site, the substitutor
/// emits its code at the end of the head block, the result is assigned to the
/// call site's receiver and the head jumps to the tail. Without one, the call site
/// becomes a null constant and an error is reported.
fn substitute_invoke_dynamic(
    analyzer: &mut DependencyAnalyzer<'_>,
    method: &MethodReference,
    program: &mut Program,
) {
    let mut substituted = false;
    let mut block_index = 0;
    while block_index < program.block_count() {
        let block = BlockId(block_index);
        block_index += 1;

        let mut position = 0;
        while position < program.block(block).instructions.len() {
            let insn = &program.block(block).instructions[position];
            let InstructionKind::InvokeDynamic {
                receiver,
                instance,
                method: descriptor,
                arguments,
                bootstrap,
                bootstrap_arguments,
            } = &insn.kind
            else {
                position += 1;
                continue;
            };
            let location = insn.location.clone();
            let receiver = *receiver;
            let bootstrap_method = bootstrap.method();
            let substitutor = bootstrap_method
                .as_ref()
                .and_then(|reference| analyzer.bootstrap.get(reference));

            let Some(substitutor) = substitutor else {
                let name = bootstrap_method.map_or_else(
                    || format!("{}.{}", bootstrap.class_name, bootstrap.name),
                    |reference| reference.to_string(),
                );
                analyzer.report(
                    Some(&CallLocation::new(method.clone(), location.clone())),
                    format!("Substitutor for bootstrap method {name} was not found"),
                );
                let insn = &mut program.block_mut(block).instructions[position];
                insn.kind = match receiver {
                    Some(receiver) => InstructionKind::NullConstant { receiver },
                    None => InstructionKind::Empty,
                };
                position += 1;
                continue;
            };

            let site = DynamicCallSite {
                caller: method.clone(),
                method: descriptor.clone(),
                instance: *instance,
                arguments: arguments.clone(),
                bootstrap: bootstrap.clone(),
                bootstrap_arguments: bootstrap_arguments.clone(),
            };

            let split = program.create_basic_block();
            let tail = program
                .block_mut(block)
                .instructions
                .split_off(position + 1);
            program.block_mut(block).instructions.truncate(position);
            program.block_mut(split).instructions = tail;
            for other in 0..split.index() {
                program.block_mut(BlockId(other)).redirect_phi_sources(block, split);
            }

            let mut emitter = ProgramEmitter::new(&mut *program, block);
            emitter.at(location.clone());
            let value = substitutor.substitute(&site, &mut emitter);
            match (receiver, value) {
                (Some(receiver), Some(value)) if receiver != value => {
                    emitter.emit(InstructionKind::Assign {
                        receiver,
                        assignee: value,
                    });
                }
                (Some(receiver), None) => emitter.emit(InstructionKind::NullConstant { receiver }),
                _ => {}
            }
            emitter.jump(split);
            substituted = true;

            analyzer
                .session
                .events
                .record(EventKind::BootstrapSubstituted)
                .at(&CallLocation::new(method.clone(), location))
                .message(format!("call site of {} substituted", site.method));
            // the rest of this block now lives in `split`
            break;
        }
    }

    if substituted {
        analyzer.session.mark_no_cache(method);
    }
}

struct BodyBuilder<'a, 's> {
    analyzer: &'a mut DependencyAnalyzer<'s>,
    method: &'a MethodReference,
    nodes: Vec<Option<DependencyNodeId>>,
    result: Option<DependencyNodeId>,
    thrown: DependencyNodeId,
    location: Option<TextLocation>,
    exceptions: usize,
}

impl BodyBuilder<'_, '_> {
    fn node(&self, variable: Variable) -> Option<DependencyNodeId> {
        self.nodes.get(variable.index()).copied().flatten()
    }

    fn call_location(&self) -> CallLocation {
        CallLocation::new(self.method.clone(), self.location.clone())
    }

    fn connect(&mut self, from: Variable, to: Variable) {
        if let (Some(from), Some(to)) = (self.node(from), self.node(to)) {
            self.analyzer.graph.connect(from, to, None);
        }
    }

    fn enter_block(&mut self, block: &BasicBlock) {
        let mut catches = Vec::with_capacity(block.try_catches.len());
        for try_catch in &block.try_catches {
            if let Some(exception_type) = &try_catch.exception_type {
                let location = self.call_location();
                self.analyzer.link_class(exception_type, Some(&location));
            }
            let node = try_catch.exception_variable.and_then(|v| self.node(v));
            catches.push((try_catch.exception_type.clone(), node));
        }
        self.exceptions = self.analyzer.add_exception_consumer(ExceptionConsumer {
            catches,
            thrown: self.thrown,
        });
    }

    fn link_innermost_class(&mut self, value_type: &ValueType) {
        if let Some(class_name) = value_type.innermost_class() {
            let location = self.call_location();
            self.analyzer.link_class(class_name, Some(&location));
        }
    }

    fn init_class(&mut self, class_name: &str) {
        let location = self.call_location();
        self.analyzer.init_class(class_name, Some(&location));
    }

    fn use_method(&mut self, method: &MethodReference) -> Option<MethodReference> {
        let location = self.call_location();
        let resolved = self.analyzer.link_method(method, Some(&location))?;
        self.analyzer.use_method(&resolved);
        Some(resolved)
    }

    fn seed(&mut self, variable: Variable, type_name: &str) {
        if let Some(node) = self.node(variable) {
            self.analyzer.add_type(node, type_name);
        }
    }

    fn visit(&mut self, kind: &InstructionKind) {
        match kind {
            InstructionKind::ClassConstant { receiver, constant } => {
                if let Some(node) = self.node(*receiver) {
                    self.analyzer.add_type(node, CLASS_CLASS);
                    if let Some(name) = constant.runtime_name() {
                        let value = self.analyzer.class_value(node);
                        self.analyzer.add_type(value, &name);
                    }
                }
                self.link_innermost_class(constant);
            }
            InstructionKind::StringConstant { receiver, .. } => {
                self.seed(*receiver, STRING_CLASS);
                self.use_method(&MethodReference::new(
                    STRING_CLASS,
                    MethodDescriptor::new(
                        "<init>",
                        vec![ValueType::array_of(ValueType::Primitive(PrimitiveType::Character))],
                        ValueType::Void,
                    ),
                ));
            }
            InstructionKind::Empty
            | InstructionKind::NullConstant { .. }
            | InstructionKind::IntegerConstant { .. }
            | InstructionKind::LongConstant { .. }
            | InstructionKind::FloatConstant { .. }
            | InstructionKind::DoubleConstant { .. }
            | InstructionKind::Binary { .. }
            | InstructionKind::Negate { .. }
            | InstructionKind::CastNumber { .. }
            | InstructionKind::CastInteger { .. }
            | InstructionKind::Branch { .. }
            | InstructionKind::BinaryBranch { .. }
            | InstructionKind::Jump { .. }
            | InstructionKind::Switch { .. }
            | InstructionKind::ArrayLength { .. }
            | InstructionKind::InvokeDynamic { .. } => {}
            InstructionKind::Assign { receiver, assignee } => self.connect(*assignee, *receiver),
            InstructionKind::UnwrapArray {
                receiver, array, ..
            } => self.connect(*array, *receiver),
            InstructionKind::Cast {
                receiver,
                value,
                target_type,
            } => self.cast(*receiver, *value, target_type),
            InstructionKind::Exit { value } => {
                if let (Some(value), Some(result)) = (value.and_then(|v| self.node(v)), self.result) {
                    self.analyzer.graph.connect(value, result, None);
                }
            }
            InstructionKind::Raise { exception } => {
                if let Some(node) = self.node(*exception) {
                    self.analyzer
                        .add_consumer(node, Consumer::Exception(self.exceptions));
                }
            }
            InstructionKind::Construct {
                receiver,
                class_name,
            } => {
                let location = self.call_location();
                self.analyzer.link_class(class_name, Some(&location));
                self.seed(*receiver, class_name);
            }
            InstructionKind::ConstructArray {
                receiver,
                item_type,
                ..
            } => {
                let array_type = ValueType::array_of(item_type.clone());
                if let Some(name) = array_type.runtime_name() {
                    self.seed(*receiver, &name);
                }
                self.link_innermost_class(item_type);
            }
            InstructionKind::ConstructMultiArray {
                receiver,
                item_type,
                dimensions,
            } => {
                let mut node = self.node(*receiver);
                let mut current = item_type;
                for _ in 0..dimensions.len() {
                    let (Some(target), Some(name)) = (node, current.runtime_name()) else {
                        break;
                    };
                    self.analyzer.add_type(target, &name);
                    let Some(item) = current.item_type() else {
                        break;
                    };
                    current = item;
                    node = Some(self.analyzer.array_item(target));
                }
                self.link_innermost_class(item_type);
            }
            InstructionKind::GetField {
                receiver,
                instance,
                field,
                field_type,
            } => {
                let location = self.call_location();
                let resolved = self.analyzer.link_field(field, Some(&location));
                if field_type.is_reference() {
                    let value = resolved
                        .as_ref()
                        .and_then(|f| self.analyzer.field_dependency(f))
                        .and_then(|f| f.value());
                    if let (Some(value), Some(receiver)) = (value, self.node(*receiver)) {
                        self.analyzer.graph.connect(value, receiver, None);
                    }
                }
                if instance.is_none() || field.class_name != self.method.class_name {
                    self.init_class(&field.class_name);
                }
            }
            InstructionKind::PutField {
                instance,
                field,
                value,
                field_type,
            } => {
                let location = self.call_location();
                let resolved = self.analyzer.link_field(field, Some(&location));
                if field_type.is_reference() {
                    let target = resolved
                        .as_ref()
                        .and_then(|f| self.analyzer.field_dependency(f))
                        .and_then(|f| f.value());
                    if let (Some(value), Some(target)) = (self.node(*value), target) {
                        self.analyzer.graph.connect(value, target, None);
                    }
                }
                if instance.is_none() || field.class_name != self.method.class_name {
                    self.init_class(&field.class_name);
                }
            }
            InstructionKind::CloneArray { receiver, array } => {
                if let (Some(array), Some(receiver)) = (self.node(*array), self.node(*receiver)) {
                    self.analyzer
                        .add_consumer(array, Consumer::Propagate(receiver));
                    let source_item = self.analyzer.array_item(array);
                    let target_item = self.analyzer.array_item(receiver);
                    self.analyzer.graph.connect(source_item, target_item, None);
                }
            }
            InstructionKind::GetElement {
                receiver, array, ..
            } => {
                if let (Some(array), Some(receiver)) = (self.node(*array), self.node(*receiver)) {
                    let item = self.analyzer.array_item(array);
                    if item != receiver {
                        self.analyzer.graph.connect(item, receiver, None);
                    }
                }
            }
            InstructionKind::PutElement { array, value, .. } => {
                if let (Some(array), Some(value)) = (self.node(*array), self.node(*value)) {
                    let item = self.analyzer.array_item(array);
                    if item != value {
                        self.analyzer.graph.connect(value, item, None);
                    }
                }
            }
            InstructionKind::Invoke {
                receiver,
                instance,
                method,
                arguments,
                invocation,
            } => {
                match (instance, invocation) {
                    (Some(instance), InvocationType::Virtual) => {
                        self.invoke_virtual(*receiver, *instance, method, arguments);
                    }
                    _ => self.invoke_special(*receiver, *instance, method, arguments),
                }
                if let (Some(instance), Some(receiver)) = (instance, receiver) {
                    if is_get_class(method) {
                        if let (Some(instance), Some(receiver)) =
                            (self.node(*instance), self.node(*receiver))
                        {
                            let value = self.analyzer.class_value(receiver);
                            self.analyzer.graph.connect(instance, value, None);
                        }
                    }
                }
            }
            InstructionKind::IsInstance { target_type, .. } => {
                self.link_innermost_class(target_type);
            }
            InstructionKind::InitClass { class_name } => self.init_class(class_name),
            InstructionKind::NullCheck { receiver, value } => {
                self.connect(*value, *receiver);
                self.use_method(&MethodReference::new(
                    NULL_POINTER_EXCEPTION,
                    MethodDescriptor::new("<init>", vec![], ValueType::Void),
                ));
                let exception = self.analyzer.type_for(NULL_POINTER_EXCEPTION);
                self.analyzer.throw(self.exceptions, exception);
            }
            InstructionKind::MonitorEnter { object } => {
                self.monitor(*object, &["monitorEnter", "monitorEnterSync"]);
            }
            InstructionKind::MonitorExit { object } => {
                self.monitor(*object, &["monitorExit", "monitorExitSync"]);
            }
        }
    }

    fn cast(&mut self, receiver: Variable, value: Variable, target_type: &ValueType) {
        let (Some(value), Some(receiver)) = (self.node(value), self.node(receiver)) else {
            return;
        };
        let filter = match target_type {
            ValueType::Object(class_name) if self.analyzer.classes.get(class_name).is_some() => {
                Some(TypeFilter::SubtypeOf(class_name.clone()))
            }
            _ => None,
        };
        self.analyzer.graph.connect(value, receiver, filter);
    }

    fn invoke_special(
        &mut self,
        receiver: Option<Variable>,
        instance: Option<Variable>,
        method: &MethodReference,
        arguments: &[Variable],
    ) {
        self.init_class(&method.class_name);
        let Some(resolved) = self.use_method(method) else {
            return;
        };
        let Some(callee) = self.analyzer.method_dependency(&resolved) else {
            return;
        };
        let formals = callee.parameters.clone();
        let result = callee.result;
        let thrown = callee.thrown;

        for (argument, formal) in arguments.iter().zip(formals.iter().skip(1)) {
            if let (Some(actual), Some(formal)) = (self.node(*argument), formal) {
                self.analyzer.graph.connect(actual, *formal, None);
            }
        }
        if let (Some(instance), Some(Some(formal))) = (instance.and_then(|i| self.node(i)), formals.first()) {
            self.analyzer.graph.connect(instance, *formal, None);
        }
        if let (Some(result), Some(receiver)) = (result, receiver.and_then(|r| self.node(r))) {
            self.analyzer.graph.connect(result, receiver, None);
        }
        self.analyzer
            .add_consumer(thrown, Consumer::Exception(self.exceptions));
    }

    fn invoke_virtual(
        &mut self,
        receiver: Option<Variable>,
        instance: Variable,
        method: &MethodReference,
        arguments: &[Variable],
    ) {
        let location = self.call_location();
        let Some(resolved) = self.analyzer.link_method(method, Some(&location)) else {
            return;
        };
        let Some(instance_node) = self.node(instance) else {
            return;
        };
        let mut parameters = Vec::with_capacity(arguments.len() + 1);
        parameters.push(Some(instance_node));
        parameters.extend(arguments.iter().map(|argument| self.node(*argument)));

        let consumer = VirtualCallConsumer {
            filter_class: resolved.class_name,
            descriptor: method.descriptor.clone(),
            parameters,
            result: receiver.and_then(|r| self.node(r)),
            location,
            exceptions: self.exceptions,
            known_methods: Default::default(),
        };
        self.analyzer.add_virtual_consumer(instance_node, consumer);
    }

    fn monitor(&mut self, object: Variable, helpers: &[&str]) {
        for name in helpers {
            let Some(helper) = self.analyzer.link_method(&monitor_helper(name), None) else {
                continue;
            };
            self.analyzer.use_method(&helper);
            let parameter = self
                .analyzer
                .method_dependency(&helper)
                .and_then(|m| m.parameter(1));
            if let (Some(object), Some(parameter)) = (self.node(object), parameter) {
                self.analyzer.graph.connect(object, parameter, None);
            }
        }
    }
}

fn is_get_class(method: &MethodReference) -> bool {
    method.name() == "getClass"
        && method.parameter_count() == 0
        && method.descriptor.result == ValueType::object(CLASS_CLASS)
}
