//! The whole-program dependency analyzer.
//!
//! [`DependencyAnalyzer`] owns the class set while the analysis runs and drives a
//! single worklist: nodes with undelivered types are flushed first, then queued
//! method bodies are interpreted. Linking a method, field or class only creates
//! its record; marking a method as used queues its body, so every body is
//! interpreted exactly once however often it is reached.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::{
    callgraph::CallGraph,
    compiler::{events::EventKind, Session},
    model::{
        CallLocation, ClassSet, ClassSource, ElementModifier, FieldReference, MethodDescriptor,
        MethodReference, ValueType, OBJECT_CLASS,
    },
};

use super::{
    builder,
    consumer::{ExceptionConsumer, VirtualCallConsumer},
    info::DependencyInfo,
    node::{Consumer, DependencyGraph, DependencyNodeId, DependencyType, TypeFilter},
    plugin::{BootstrapRegistry, DependencyPlugin, PluginRegistry, TypeCallback},
};

/// Name of the static initializer.
pub(crate) const CLASS_INITIALIZER: &str = "<clinit>";

/// Dependency record of a linked method.
#[derive(Debug, Clone)]
pub struct MethodDependency {
    pub(crate) reference: MethodReference,
    pub(crate) modifiers: ElementModifier,
    pub(crate) parameters: Vec<Option<DependencyNodeId>>,
    pub(crate) variables: Vec<Option<DependencyNodeId>>,
    pub(crate) result: Option<DependencyNodeId>,
    pub(crate) thrown: DependencyNodeId,
    pub(crate) used: bool,
}

impl MethodDependency {
    /// The declaration this record belongs to.
    #[must_use]
    pub fn reference(&self) -> &MethodReference {
        &self.reference
    }

    /// Node of parameter slot `index` (0 is the instance). `None` for primitive
    /// parameters and for the instance slot of static methods.
    #[must_use]
    pub fn parameter(&self, index: usize) -> Option<DependencyNodeId> {
        self.parameters.get(index).copied().flatten()
    }

    /// Number of parameter slots, including the instance slot.
    #[must_use]
    pub fn parameter_slots(&self) -> usize {
        self.parameters.len()
    }

    /// Node of a variable of the analyzed body.
    #[must_use]
    pub fn variable(&self, index: usize) -> Option<DependencyNodeId> {
        self.variables.get(index).copied().flatten()
    }

    /// Number of variables of the analyzed body; zero before analysis.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Node of the returned values, `None` for primitive or void results.
    #[must_use]
    pub fn result(&self) -> Option<DependencyNodeId> {
        self.result
    }

    /// Node of the exceptions escaping the method.
    #[must_use]
    pub fn thrown(&self) -> DependencyNodeId {
        self.thrown
    }

    /// Returns `true` once the method was reached.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(ElementModifier::STATIC)
    }
}

/// Dependency record of a linked field.
#[derive(Debug, Clone)]
pub struct FieldDependency {
    pub(crate) reference: FieldReference,
    pub(crate) field_type: ValueType,
    pub(crate) value: Option<DependencyNodeId>,
}

impl FieldDependency {
    /// The declaration this record belongs to.
    #[must_use]
    pub fn reference(&self) -> &FieldReference {
        &self.reference
    }

    /// Declared type.
    #[must_use]
    pub fn field_type(&self) -> &ValueType {
        &self.field_type
    }

    /// Node of the stored values, `None` for primitive fields.
    #[must_use]
    pub fn value(&self) -> Option<DependencyNodeId> {
        self.value
    }
}

/// Dependency record of a linked class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDependency {
    pub(crate) name: String,
    pub(crate) initialized: bool,
}

impl ClassDependency {
    /// Class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the class initializer is reachable.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Inclusion-based points-to analysis over a closed program.
pub struct DependencyAnalyzer<'s> {
    pub(crate) session: &'s Session,
    pub(crate) classes: ClassSet,
    pub(crate) graph: DependencyGraph,
    pub(crate) methods: FxHashMap<MethodReference, MethodDependency>,
    method_aliases: FxHashMap<MethodReference, Option<MethodReference>>,
    pub(crate) fields: FxHashMap<FieldReference, FieldDependency>,
    field_aliases: FxHashMap<FieldReference, Option<FieldReference>>,
    pub(crate) reached_classes: FxHashMap<String, ClassDependency>,
    missing_classes: FxHashSet<String>,
    pub(crate) call_graph: CallGraph,
    pub(crate) exception_consumers: Vec<ExceptionConsumer>,
    virtual_consumers: Vec<VirtualCallConsumer>,
    callbacks: Vec<TypeCallback>,
    tasks: VecDeque<MethodReference>,
    plugins: PluginRegistry,
    pub(crate) bootstrap: BootstrapRegistry,
}

impl<'s> DependencyAnalyzer<'s> {
    /// Creates an analyzer over `classes`, recording diagnostics in `session`.
    #[must_use]
    pub fn new(session: &'s Session, classes: ClassSet) -> Self {
        DependencyAnalyzer {
            session,
            classes,
            graph: DependencyGraph::new(),
            methods: FxHashMap::default(),
            method_aliases: FxHashMap::default(),
            fields: FxHashMap::default(),
            field_aliases: FxHashMap::default(),
            reached_classes: FxHashMap::default(),
            missing_classes: FxHashSet::default(),
            call_graph: CallGraph::new(),
            exception_consumers: Vec::new(),
            virtual_consumers: Vec::new(),
            callbacks: Vec::new(),
            tasks: VecDeque::new(),
            plugins: PluginRegistry::new(),
            bootstrap: BootstrapRegistry::new(),
        }
    }

    /// Replaces the plugin registry.
    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// Replaces the bootstrap substitutor registry.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: BootstrapRegistry) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Registers a plugin for a method without body.
    pub fn register_plugin(&mut self, method: MethodReference, plugin: impl DependencyPlugin + 'static) {
        self.plugins.register(method, plugin);
    }

    /// The session diagnostics are recorded in.
    #[must_use]
    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// The classes being analyzed.
    #[must_use]
    pub fn classes(&self) -> &ClassSet {
        &self.classes
    }

    /// The call graph discovered so far.
    #[must_use]
    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    /// Returns the interned type for a runtime type name.
    pub fn type_for(&self, name: &str) -> DependencyType {
        DependencyType(self.session.types.lookup(name))
    }

    /// Returns the runtime type name of an interned type.
    #[must_use]
    pub fn type_name(&self, ty: DependencyType) -> &'s str {
        self.session.types.at(ty.0).unwrap_or(OBJECT_CLASS)
    }

    /// Marks `method` as an entry point: links it, marks it used and queues its
    /// body. Calling this again for the same method has no effect.
    pub fn analyze_method(&mut self, method: &MethodReference) -> Option<MethodReference> {
        let resolved = self.link_method(method, None)?;
        self.use_method(&resolved);
        Some(resolved)
    }

    /// Links a method reference to its declaration and creates the dependency
    /// record of the declaration. A reference that cannot be resolved is reported
    /// once and yields `None`.
    pub fn link_method(
        &mut self,
        method: &MethodReference,
        location: Option<&CallLocation>,
    ) -> Option<MethodReference> {
        if let Some(location) = location {
            let caller = self.call_graph.node_for(&location.method);
            self.call_graph
                .add_call_site(caller, method, location.location.clone());
        }
        if let Some(resolved) = self.method_aliases.get(method) {
            return resolved.clone();
        }

        let resolved = self.classes.resolve_method(method).map(|m| m.reference());
        self.method_aliases.insert(method.clone(), resolved.clone());
        match &resolved {
            Some(resolved) => self.ensure_method(resolved),
            None => self.report(location, format!("Method {method} was not found")),
        }
        resolved
    }

    fn ensure_method(&mut self, method: &MethodReference) {
        if self.methods.contains_key(method) {
            return;
        }
        let Some(holder) = self.classes.find_method(method) else {
            return;
        };
        let modifiers = holder.modifiers;
        let descriptor = holder.descriptor.clone();

        let mut parameters = Vec::with_capacity(descriptor.parameter_count() + 1);
        parameters.push(
            (!modifiers.contains(ElementModifier::STATIC)).then(|| self.graph.create_node()),
        );
        for parameter in &descriptor.parameters {
            parameters.push(parameter.is_reference().then(|| self.graph.create_node()));
        }
        let result = descriptor
            .result
            .is_reference()
            .then(|| self.graph.create_node());
        let thrown = self.graph.create_node();
        trace!(method = %method, "linked method");

        self.methods.insert(
            method.clone(),
            MethodDependency {
                reference: method.clone(),
                modifiers,
                parameters,
                variables: Vec::new(),
                result,
                thrown,
                used: false,
            },
        );
        self.link_class(&method.class_name, None);
    }

    /// Marks a linked method as reachable and queues its body.
    pub fn use_method(&mut self, method: &MethodReference) {
        let Some(dependency) = self.methods.get_mut(method) else {
            return;
        };
        if dependency.used {
            return;
        }
        dependency.used = true;
        debug!(method = %method, "method reached");
        self.session
            .events
            .record(EventKind::MethodReached)
            .method(method);
        self.call_graph.node_for(method);
        self.tasks.push_back(method.clone());
    }

    /// Links a field reference to its declaration. The value node is shared by
    /// every reference resolving to the same field.
    pub fn link_field(
        &mut self,
        field: &FieldReference,
        location: Option<&CallLocation>,
    ) -> Option<FieldReference> {
        if let Some(location) = location {
            let method = self.call_graph.node_for(&location.method);
            self.call_graph
                .add_field_access(method, field, location.location.clone());
        }
        if let Some(resolved) = self.field_aliases.get(field) {
            return resolved.clone();
        }

        let resolved = self
            .classes
            .resolve_field(field)
            .map(|holder| (holder.reference(), holder.field_type.clone()));
        let reference = resolved.as_ref().map(|(reference, _)| reference.clone());
        self.field_aliases.insert(field.clone(), reference.clone());
        match resolved {
            Some((reference, field_type)) => {
                if !self.fields.contains_key(&reference) {
                    let value = field_type.is_reference().then(|| self.graph.create_node());
                    self.session
                        .events
                        .record(EventKind::FieldReached)
                        .message(format!("field {reference} reached"));
                    self.fields.insert(
                        reference.clone(),
                        FieldDependency {
                            reference: reference.clone(),
                            field_type,
                            value,
                        },
                    );
                    self.link_class(&reference.class_name, None);
                }
            }
            None => self.report(location, format!("Field {field} was not found")),
        }
        reference
    }

    /// Links a class and, transitively, its superclass and interfaces. Returns
    /// `false` for classes that do not exist.
    pub fn link_class(&mut self, class_name: &str, location: Option<&CallLocation>) -> bool {
        if let Some(location) = location {
            let method = self.call_graph.node_for(&location.method);
            self.call_graph
                .add_class_access(method, class_name, location.location.clone());
        }

        let mut pending = vec![(class_name.to_string(), location.cloned())];
        while let Some((name, location)) = pending.pop() {
            if self.reached_classes.contains_key(&name) || self.missing_classes.contains(&name) {
                continue;
            }
            let Some(class) = self.classes.get(&name) else {
                self.missing_classes.insert(name.clone());
                self.report(location.as_ref(), format!("Class {name} was not found"));
                continue;
            };
            pending.extend(class.parent.iter().map(|p| (p.clone(), None)));
            pending.extend(class.interfaces.iter().map(|i| (i.clone(), None)));
            self.session
                .events
                .record(EventKind::ClassReached)
                .message(format!("class {name} reached"));
            self.reached_classes.insert(
                name.clone(),
                ClassDependency {
                    name,
                    initialized: false,
                },
            );
        }
        !self.missing_classes.contains(class_name)
    }

    /// Makes the static initializers of `class_name` and its superclasses
    /// reachable.
    pub fn init_class(&mut self, class_name: &str, location: Option<&CallLocation>) {
        if !self.link_class(class_name, location) {
            return;
        }
        let mut current = Some(class_name.to_string());
        while let Some(name) = current.take() {
            let Some(dependency) = self.reached_classes.get_mut(&name) else {
                break;
            };
            if dependency.initialized {
                break;
            }
            dependency.initialized = true;

            let initializer = MethodReference::new(
                name.as_str(),
                MethodDescriptor::new(CLASS_INITIALIZER, vec![], ValueType::Void),
            );
            if self.classes.find_method(&initializer).is_some() {
                self.ensure_method(&initializer);
                self.use_method(&initializer);
            }
            current = self.classes.get(&name).and_then(|c| c.parent.clone());
        }
    }

    /// Returns the record of a linked method, looked up by declaration or by any
    /// reference that was linked to it.
    #[must_use]
    pub fn method_dependency(&self, method: &MethodReference) -> Option<&MethodDependency> {
        self.methods.get(method).or_else(|| {
            self.method_aliases
                .get(method)?
                .as_ref()
                .and_then(|resolved| self.methods.get(resolved))
        })
    }

    /// Returns the record of a linked field.
    #[must_use]
    pub fn field_dependency(&self, field: &FieldReference) -> Option<&FieldDependency> {
        self.fields.get(field).or_else(|| {
            self.field_aliases
                .get(field)?
                .as_ref()
                .and_then(|resolved| self.fields.get(resolved))
        })
    }

    /// Creates a free-standing node.
    pub fn create_node(&mut self) -> DependencyNodeId {
        self.graph.create_node()
    }

    /// Adds the type named `type_name` to `node`.
    pub fn add_type(&mut self, node: DependencyNodeId, type_name: &str) {
        let ty = self.type_for(type_name);
        self.graph.propagate(node, ty);
    }

    /// Adds an interned type to `node`.
    pub fn propagate(&mut self, node: DependencyNodeId, ty: DependencyType) {
        self.graph.propagate(node, ty);
    }

    /// Connects two nodes without filter.
    pub fn connect(&mut self, from: DependencyNodeId, to: DependencyNodeId) {
        self.graph.connect(from, to, None);
    }

    /// Connects two nodes, letting only subtypes of `class_name` through.
    pub fn connect_filtered(&mut self, from: DependencyNodeId, to: DependencyNodeId, class_name: &str) {
        self.graph
            .connect(from, to, Some(TypeFilter::SubtypeOf(class_name.to_string())));
    }

    /// The array item facet of `node`.
    pub fn array_item(&mut self, node: DependencyNodeId) -> DependencyNodeId {
        self.graph.array_item(node)
    }

    /// The class value facet of `node`.
    pub fn class_value(&mut self, node: DependencyNodeId) -> DependencyNodeId {
        self.graph.class_value(node)
    }

    /// Calls `callback` once for every type reaching `node`, including types that
    /// already reached it.
    pub fn add_callback(
        &mut self,
        node: DependencyNodeId,
        callback: impl Fn(&mut DependencyAnalyzer<'_>, DependencyType) + 'static,
    ) {
        let index = self.callbacks.len();
        self.callbacks.push(std::rc::Rc::new(callback));
        self.graph.add_consumer(node, Consumer::Callback(index));
    }

    /// Runtime type names that reached `node`, in arrival order.
    #[must_use]
    pub fn types(&self, node: DependencyNodeId) -> Vec<&'s str> {
        self.graph
            .types(node)
            .iter()
            .map(|&ty| self.type_name(ty))
            .collect()
    }

    /// Returns `true` if `type_name` reached `node`.
    #[must_use]
    pub fn has_type(&self, node: DependencyNodeId, type_name: &str) -> bool {
        self.session
            .types
            .find(type_name)
            .is_some_and(|index| self.graph.has_type(node, DependencyType(index)))
    }

    pub(crate) fn add_exception_consumer(&mut self, consumer: ExceptionConsumer) -> usize {
        self.exception_consumers.push(consumer);
        self.exception_consumers.len() - 1
    }

    pub(crate) fn add_virtual_consumer(&mut self, node: DependencyNodeId, consumer: VirtualCallConsumer) {
        self.virtual_consumers.push(consumer);
        let index = self.virtual_consumers.len() - 1;
        self.graph.add_consumer(node, Consumer::VirtualCall(index));
    }

    pub(crate) fn add_consumer(&mut self, node: DependencyNodeId, consumer: Consumer) {
        self.graph.add_consumer(node, consumer);
    }

    /// Sends `ty` through an exception consumer directly.
    pub(crate) fn throw(&mut self, exceptions: usize, ty: DependencyType) {
        let name = self.type_name(ty);
        if let Some(node) = self.exception_consumers[exceptions].route(&self.classes, name) {
            self.graph.propagate(node, ty);
        }
    }

    /// Runs the analysis until no node holds undelivered types and no method body
    /// is queued.
    pub fn process(&mut self) {
        loop {
            if let Some(node) = self.graph.pop_pending() {
                let classes = &self.classes;
                let session = self.session;
                let deliveries = self.graph.flush(node, |filter, ty| {
                    accepts(classes, session, filter, ty)
                });
                for (consumer, ty) in deliveries {
                    self.deliver(consumer, ty);
                }
                continue;
            }
            if let Some(method) = self.tasks.pop_front() {
                self.run_method(&method);
                continue;
            }
            break;
        }
    }

    fn deliver(&mut self, consumer: Consumer, ty: DependencyType) {
        match consumer {
            Consumer::Exception(index) => self.throw(index, ty),
            Consumer::VirtualCall(index) => self.dispatch_virtual(index, ty),
            Consumer::Propagate(target) => {
                self.graph.propagate(target, ty);
            }
            Consumer::Callback(index) => {
                let callback = self.callbacks[index].clone();
                callback(self, ty);
            }
        }
    }

    fn run_method(&mut self, method: &MethodReference) {
        if let Some(plugin) = self.plugins.get(method) {
            plugin.method_reached(self, method);
        }
        if self
            .methods
            .get(method)
            .is_some_and(|m| m.modifiers.contains(ElementModifier::SYNCHRONIZED))
        {
            builder::link_synchronized(self, method);
        }
        let Some(mut program) = self
            .classes
            .method_mut(method)
            .and_then(|holder| holder.program.take())
        else {
            return;
        };
        builder::build_method_graph(self, method, &mut program);
        if let Some(holder) = self.classes.method_mut(method) {
            holder.program = Some(program);
        }
    }

    /// Resolves the target of a virtual call for one receiver type and wires it.
    fn dispatch_virtual(&mut self, index: usize, ty: DependencyType) {
        let type_name = self.type_name(ty);
        let class_name = if type_name.starts_with('[') {
            OBJECT_CLASS
        } else {
            type_name
        };
        let consumer = &self.virtual_consumers[index];
        if !self
            .classes
            .is_super_type(&consumer.filter_class, class_name)
            .unwrap_or(false)
        {
            return;
        }

        let target = MethodReference::new(class_name, consumer.descriptor.clone());
        let location = consumer.location.clone();
        let caller = self.call_graph.node_for(&location.method);
        self.call_graph
            .add_call_site(caller, &target, location.location.clone());

        let Some(resolved) = self
            .classes
            .resolve_implementation(&target)
            .map(|m| m.reference())
        else {
            self.report(Some(&location), format!("Method {target} was not found"));
            return;
        };
        if !self.virtual_consumers[index]
            .known_methods
            .insert(resolved.clone())
        {
            return;
        }
        self.ensure_method(&resolved);
        self.use_method(&resolved);
        trace!(target = %resolved, caller = %location.method, "virtual call target");
        self.session
            .events
            .record(EventKind::VirtualTargetFound)
            .at(&location)
            .message(format!("{resolved} is a target of a virtual call"));

        let Some(target) = self.methods.get(&resolved) else {
            return;
        };
        let formals = target.parameters.clone();
        let result = target.result;
        let thrown = target.thrown;
        let consumer = &self.virtual_consumers[index];
        let actuals = consumer.parameters.clone();
        let receiver = consumer.result;
        let exceptions = consumer.exceptions;

        if let (Some(Some(actual)), Some(Some(formal))) = (actuals.first(), formals.first()) {
            self.graph.connect(
                *actual,
                *formal,
                Some(TypeFilter::SubtypeOf(resolved.class_name.clone())),
            );
        }
        for (actual, formal) in actuals.iter().zip(&formals).skip(1) {
            if let (Some(actual), Some(formal)) = (actual, formal) {
                self.graph.connect(*actual, *formal, None);
            }
        }
        if let (Some(result), Some(receiver)) = (result, receiver) {
            self.graph.connect(result, receiver, None);
        }
        self.graph.add_consumer(thrown, Consumer::Exception(exceptions));
    }

    pub(crate) fn report(&self, location: Option<&CallLocation>, message: String) {
        match location {
            Some(location) => self.session.events.error_at(location, message),
            None => {
                self.session.events.record(EventKind::Error).message(message);
            }
        }
    }

    /// Finishes the analysis and hands back the classes together with the
    /// collected results.
    #[must_use]
    pub fn finish(mut self) -> (ClassSet, DependencyInfo) {
        self.process();
        let type_names = self
            .session
            .types
            .iter()
            .map(|(_, name)| name.to_string())
            .collect();
        let info = DependencyInfo {
            graph: self.graph,
            type_names,
            methods: self.methods,
            method_aliases: self.method_aliases,
            fields: self.fields,
            field_aliases: self.field_aliases,
            classes: self.reached_classes,
            call_graph: self.call_graph,
        };
        (self.classes, info)
    }
}

fn accepts(classes: &ClassSet, session: &Session, filter: &TypeFilter, ty: DependencyType) -> bool {
    match filter {
        TypeFilter::SubtypeOf(class_name) => {
            if class_name == OBJECT_CLASS {
                return true;
            }
            session
                .types
                .at(ty.0)
                .and_then(|name| classes.is_super_type(class_name, name))
                .unwrap_or(false)
        }
    }
}

impl std::fmt::Debug for DependencyAnalyzer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyAnalyzer")
            .field("methods", &self.methods.len())
            .field("fields", &self.fields.len())
            .field("classes", &self.reached_classes.len())
            .field("nodes", &self.graph.len())
            .field("pending_tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
