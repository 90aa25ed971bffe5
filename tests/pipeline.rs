//! End-to-end builds through [`Pipeline`].

mod common;

use aotflow::{
    cache::CallGraphIO,
    compiler::{EventKind, Pipeline, PipelineConfig, Session},
    dependency::DependencyAnalyzer,
    model::{
        BlockId, ClassSet, ClassSource, ElementModifier, InstructionKind, MethodReference,
        ProgramEmitter, TryCatchBlock, ValueType, Variable, OBJECT_CLASS,
    },
    Error, Result,
};
use common::{add_class, add_method, method, program_with_parameters, runtime_classes, EXCEPTION};

const IO_EXCEPTION: &str = "java.io.IOException";
const FILE_NOT_FOUND: &str = "java.io.FileNotFoundException";

fn main_method() -> MethodReference {
    method("Main", "main", vec![], ValueType::Void)
}

fn risky_call() -> MethodReference {
    method("Main", "riskyCall", vec![], ValueType::Void)
}

/// `main` calls `riskyCall`, which throws `FileNotFoundException`, inside a try
/// with an `IOException` and an `Exception` handler.
fn guarded_program() -> ClassSet {
    let mut classes = runtime_classes();
    add_class(&mut classes, "Main", OBJECT_CLASS);
    add_class(&mut classes, IO_EXCEPTION, EXCEPTION);
    add_class(&mut classes, FILE_NOT_FOUND, IO_EXCEPTION);

    let mut body = program_with_parameters(0);
    let mut emitter = ProgramEmitter::create(&mut body);
    let exception = emitter.variable();
    emitter.emit(InstructionKind::Construct {
        receiver: exception,
        class_name: FILE_NOT_FOUND.into(),
    });
    emitter.raise(exception);
    add_method(&mut classes, &risky_call(), ElementModifier::STATIC, Some(body));

    let mut program = program_with_parameters(0);
    let mut emitter = ProgramEmitter::create(&mut program);
    let io_handler = emitter.create_block();
    let general_handler = emitter.create_block();
    emitter.invoke_static(&risky_call(), &[]);
    emitter.exit(None);
    emitter.enter(io_handler);
    emitter.exit(None);
    emitter.enter(general_handler);
    emitter.exit(None);
    let io_caught = program.create_variable();
    let general_caught = program.create_variable();
    program.block_mut(BlockId(0)).try_catches = vec![
        TryCatchBlock::new(Some(IO_EXCEPTION.into()), Some(io_caught), io_handler),
        TryCatchBlock::new(Some(EXCEPTION.into()), Some(general_caught), general_handler),
    ];
    add_method(&mut classes, &main_method(), ElementModifier::STATIC, Some(program));
    classes
}

#[test]
fn test_exceptions_are_lowered_in_handler_order() -> Result<()> {
    let session = Session::new();
    let output = Pipeline::new(PipelineConfig::default()).run(
        &session,
        guarded_program(),
        &[main_method()],
    )?;

    let main = output
        .classes
        .find_method(&main_method())
        .and_then(|holder| holder.program.as_ref())
        .expect("main survives linking");
    assert!(main.blocks().iter().all(|block| block.try_catches.is_empty()));

    let protected: Vec<_> = output
        .call_sites
        .iter()
        .filter(|site| site.method == main_method() && !site.handlers.is_empty())
        .collect();
    assert_eq!(protected.len(), 1);
    let handlers: Vec<_> = protected[0]
        .handlers
        .iter()
        .map(|handler| handler.class_name.as_deref())
        .collect();
    assert_eq!(handlers, [Some(IO_EXCEPTION), Some(EXCEPTION)]);

    let ids: Vec<i32> = output.call_sites.iter().map(|site| site.id).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(session.events.has(EventKind::ExceptionsLowered));
    assert!(!session.events.has_errors());
    Ok(())
}

#[test]
fn test_unknown_class_fails_the_build() {
    let mut classes = guarded_program();
    let mut program = program_with_parameters(0);
    let mut emitter = ProgramEmitter::create(&mut program);
    let value = emitter.variable();
    emitter.emit(InstructionKind::Construct {
        receiver: value,
        class_name: "Missing".into(),
    });
    emitter.exit(None);
    let broken = method("Main", "broken", vec![], ValueType::Void);
    add_method(&mut classes, &broken, ElementModifier::STATIC, Some(program));

    let session = Session::new();
    let result = Pipeline::new(PipelineConfig::analysis_only()).run(&session, classes, &[broken]);

    match result {
        Err(Error::BuildFailed(errors)) => {
            assert!(errors.iter().any(|error| error.contains("Missing")));
        }
        other => panic!("expected a build failure, got {other:?}"),
    }
    assert!(session.events.has_errors());
}

#[test]
fn test_plugin_supplies_native_results() -> Result<()> {
    let run = method("A", "run", vec![], ValueType::Void);
    let create = method("Native", "create", vec![], ValueType::object("A"));

    let mut classes = runtime_classes();
    add_class(&mut classes, "Main", OBJECT_CLASS);
    add_class(&mut classes, "Native", OBJECT_CLASS);
    add_method(
        &mut classes,
        &create,
        ElementModifier::STATIC | ElementModifier::NATIVE,
        None,
    );
    add_class(&mut classes, "A", OBJECT_CLASS);
    add_method(&mut classes, &run, ElementModifier::ABSTRACT, None);
    for name in ["B", "C"] {
        add_class(&mut classes, name, "A");
        let mut body = program_with_parameters(0);
        ProgramEmitter::create(&mut body).exit(None);
        add_method(&mut classes, &run.with_class(name), ElementModifier::empty(), Some(body));
    }

    let mut program = program_with_parameters(0);
    let mut emitter = ProgramEmitter::create(&mut program);
    let instance = emitter
        .invoke_static(&create, &[])
        .expect("create returns a value");
    emitter.invoke_virtual(instance, &run, &[]);
    emitter.exit(None);
    add_method(&mut classes, &main_method(), ElementModifier::STATIC, Some(program));

    let mut pipeline = Pipeline::new(PipelineConfig::analysis_only());
    pipeline.register_plugin(
        create.clone(),
        |analyzer: &mut DependencyAnalyzer<'_>, method: &MethodReference| {
            if let Some(result) = analyzer.method_dependency(method).and_then(|m| m.result()) {
                analyzer.add_type(result, "B");
            }
        },
    );
    let session = Session::new();
    let output = pipeline.run(&session, classes, &[main_method()])?;

    let reachable = output.info.reachable_methods();
    assert!(reachable.contains(&&run.with_class("B")));
    assert!(!reachable.contains(&&run.with_class("C")));
    assert!(output.classes.get("C").is_none());

    // variables were renamed by SSA construction, so find the call's receiver again
    let created = output
        .classes
        .find_method(&main_method())
        .and_then(|holder| holder.program.as_ref())
        .and_then(|program| {
            program
                .blocks()
                .iter()
                .flat_map(|block| &block.instructions)
                .find_map(|insn| match &insn.kind {
                    InstructionKind::Invoke {
                        receiver: Some(receiver),
                        method,
                        ..
                    } if *method == create => Some(*receiver),
                    _ => None,
                })
        })
        .expect("main still calls the native factory");
    assert_eq!(
        output.info.variable_types(&main_method(), created.index()),
        ["B"]
    );
    assert_eq!(output.info.result_types(&create), ["B"]);
    Ok(())
}

#[test]
fn test_cached_build_matches_fresh_build() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // sequential, so shadow stack ids are assigned in the same order both times
    let config = PipelineConfig {
        parallel: false,
        ..PipelineConfig::default()
    }
    .with_cache(dir.path());

    let first_session = Session::new();
    let first = Pipeline::new(config.clone()).run(&first_session, guarded_program(), &[main_method()])?;
    assert!(first_session.events.has(EventKind::CacheMiss));
    assert!(!first_session.events.has(EventKind::CacheHit));

    let second_session = Session::new();
    let second = Pipeline::new(config).run(&second_session, guarded_program(), &[main_method()])?;
    assert!(second_session.events.has(EventKind::CacheHit));
    assert!(!second_session.events.has(EventKind::CacheMiss));
    assert_eq!(second.cache_stats.map(|stats| stats.misses), Some(0));

    for reference in [main_method(), risky_call()] {
        let program = |output: &aotflow::compiler::BuildOutput| {
            output
                .classes
                .find_method(&reference)
                .and_then(|holder| holder.program.clone())
        };
        assert_eq!(program(&first), program(&second));
    }
    assert_eq!(first.call_sites.len(), second.call_sites.len());
    Ok(())
}

#[test]
fn test_call_graph_survives_encoding() -> Result<()> {
    let session = Session::new();
    let output = Pipeline::new(PipelineConfig::analysis_only()).run(
        &session,
        guarded_program(),
        &[main_method()],
    )?;
    assert_eq!(output.call_graph.callees(&main_method()), vec![risky_call()]);

    let io = CallGraphIO::new(&session.symbols, &session.files);
    let decoded = io.read(&io.write(&output.call_graph)?)?;

    assert_eq!(decoded.method_count(), output.call_graph.method_count());
    assert_eq!(decoded.call_sites(), output.call_graph.call_sites());
    assert_eq!(decoded.callers(&risky_call()), vec![main_method()]);
    assert!(!decoded.has_recursion());
    Ok(())
}

#[test]
fn test_unreached_method_is_removed() -> Result<()> {
    let mut classes = guarded_program();
    let unused = method("Main", "unused", vec![ValueType::INTEGER], ValueType::INTEGER);
    add_method(
        &mut classes,
        &unused,
        ElementModifier::STATIC,
        Some({
            let mut program = program_with_parameters(1);
            ProgramEmitter::create(&mut program).exit(Some(Variable(1)));
            program
        }),
    );

    let session = Session::new();
    let output = Pipeline::new(PipelineConfig::analysis_only()).run(&session, classes, &[main_method()])?;

    assert!(output.link_stats.methods_removed >= 1);
    assert!(output.classes.find_method(&unused).is_none());
    assert!(session
        .events
        .filter_kind(EventKind::MethodRemoved)
        .any(|event| event.method.as_ref() == Some(&unused)));
    assert!(output
        .classes
        .get("Main")
        .is_some_and(|main| main.methods.len() == 2));
    Ok(())
}
