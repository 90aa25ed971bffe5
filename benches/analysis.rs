//! Benchmarks for the per-method and whole-program analyses.
//!
//! - Dominator trees and frontiers on a ladder-shaped graph
//! - SSA construction of a program with nested loops
//! - Program cache encoding and decoding
//! - Dependency analysis of a wide class hierarchy

extern crate aotflow;

use aotflow::{
    analysis::SsaTransformer,
    cache::{ProgramIO, SymbolTable},
    compiler::Session,
    dependency::DependencyAnalyzer,
    model::{
        BinaryOperation, BranchingCondition, ClassHolder, ClassSet, ElementModifier,
        InstructionKind, MethodDescriptor, MethodHolder, MethodReference, NumericOperandType,
        Program, ProgramEmitter, ValueType, Variable, OBJECT_CLASS,
    },
    utils::graph::{
        algorithms::{compute_dominators, find_dominance_frontiers},
        Graph, GraphBuilder, NodeId,
    },
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

/// A chain of diamonds where every fourth rung jumps back to an earlier one.
fn ladder(rungs: usize) -> Graph {
    let mut builder = GraphBuilder::new(rungs * 3 + 1);
    for rung in 0..rungs {
        let top = rung * 3;
        builder.add_edge(top, top + 1);
        builder.add_edge(top, top + 2);
        builder.add_edge(top + 1, top + 3);
        builder.add_edge(top + 2, top + 3);
        if rung % 4 == 3 {
            builder.add_edge(top + 2, top.saturating_sub(6));
        }
    }
    builder.build()
}

/// `depth` nested counting loops over `width` accumulators, without phis.
fn nested_loops(depth: usize, width: usize) -> Program {
    let mut program = Program::new();
    let mut emitter = ProgramEmitter::create(&mut program);
    emitter.variable();
    let accumulators: Vec<Variable> = (0..width).map(|index| emitter.int(index as i32)).collect();
    let one = emitter.int(1);

    let mut exits = Vec::new();
    for _ in 0..depth {
        let header = emitter.create_block();
        let body = emitter.create_block();
        emitter.jump(header);
        emitter.enter(header);
        let exit = emitter.create_block();
        emitter.emit(InstructionKind::Branch {
            condition: BranchingCondition::NotEqual,
            operand: accumulators[0],
            consequent: body,
            alternative: exit,
        });
        emitter.enter(body);
        for &accumulator in &accumulators {
            emitter.emit(InstructionKind::Binary {
                receiver: accumulator,
                operation: BinaryOperation::Add,
                operand_type: NumericOperandType::Int,
                first: accumulator,
                second: one,
            });
        }
        exits.push((header, exit));
    }
    for (header, exit) in exits.into_iter().rev() {
        emitter.jump(header);
        emitter.enter(exit);
    }
    emitter.exit(Some(accumulators[0]));
    program
}

fn bench_dominators(c: &mut Criterion) {
    let graph = ladder(2_000);
    c.bench_function("dominators_ladder_6k", |b| {
        b.iter(|| {
            let dom = compute_dominators(black_box(&graph), NodeId::new(0));
            black_box(dom)
        });
    });
    c.bench_function("dominance_frontiers_ladder_6k", |b| {
        let dom = compute_dominators(&graph, NodeId::new(0));
        b.iter(|| black_box(find_dominance_frontiers(black_box(&graph), &dom)));
    });
}

fn bench_ssa(c: &mut Criterion) {
    let program = nested_loops(16, 24);
    c.bench_function("ssa_nested_loops", |b| {
        b.iter(|| {
            let mut program = program.clone();
            SsaTransformer::transform(&mut program, &[]).unwrap();
            black_box(program)
        });
    });
}

fn bench_program_io(c: &mut Criterion) {
    let mut program = nested_loops(16, 24);
    SsaTransformer::transform(&mut program, &[]).unwrap();
    let symbols = SymbolTable::new();
    let files = SymbolTable::new();
    let io = ProgramIO::new(&symbols, &files);
    let bytes = io.write(&program).unwrap();

    c.bench_function("program_io_write", |b| {
        b.iter(|| black_box(io.write(black_box(&program)).unwrap()));
    });
    c.bench_function("program_io_read", |b| {
        b.iter(|| black_box(io.read(black_box(&bytes)).unwrap()));
    });
}

/// `Main.main` instantiates `classes` subclasses of `Base` and calls the
/// overridden `run()` through a single variable.
fn hierarchy(classes: usize) -> (ClassSet, MethodReference) {
    let run = MethodReference::new(
        "Base",
        MethodDescriptor::new("run", vec![], ValueType::Void),
    );
    let mut set = ClassSet::new();
    set.add(ClassHolder::new(OBJECT_CLASS, None));
    let mut base = ClassHolder::new("Base", Some(OBJECT_CLASS));
    base.add_method(MethodHolder::new(
        "Base",
        run.descriptor.clone(),
        ElementModifier::ABSTRACT,
    ));
    set.add(base);

    let mut program = Program::new();
    let mut emitter = ProgramEmitter::create(&mut program);
    emitter.variable();
    let join = emitter.create_block();
    let mut incomings = Vec::new();
    for index in 0..classes {
        let name = format!("Impl{index}");
        let mut class = ClassHolder::new(name.clone(), Some("Base"));
        let mut body = Program::new();
        let mut body_emitter = ProgramEmitter::create(&mut body);
        body_emitter.variable();
        body_emitter.exit(None);
        let mut holder = MethodHolder::new(name.clone(), run.descriptor.clone(), ElementModifier::empty());
        holder.program = Some(body);
        class.add_method(holder);
        set.add(class);

        let block = emitter.current_block();
        let value = emitter.variable();
        emitter.emit(InstructionKind::Construct {
            receiver: value,
            class_name: name,
        });
        incomings.push((block, value));
        if index + 1 < classes {
            let next = emitter.create_block();
            let flag = emitter.int(index as i32);
            emitter.emit(InstructionKind::Branch {
                condition: BranchingCondition::NotEqual,
                operand: flag,
                consequent: join,
                alternative: next,
            });
            emitter.enter(next);
        } else {
            emitter.jump(join);
        }
    }
    emitter.enter(join);
    let instance = emitter.phi(join, &incomings);
    emitter.invoke_virtual(instance, &run, &[]);
    emitter.exit(None);

    let main = MethodReference::new(
        "Main",
        MethodDescriptor::new("main", vec![], ValueType::Void),
    );
    let mut holder = MethodHolder::new("Main", main.descriptor.clone(), ElementModifier::STATIC);
    holder.program = Some(program);
    let mut class = ClassHolder::new("Main", Some(OBJECT_CLASS));
    class.add_method(holder);
    set.add(class);
    (set, main)
}

fn bench_dependency(c: &mut Criterion) {
    let (classes, main) = hierarchy(200);
    c.bench_function("dependency_virtual_dispatch_200", |b| {
        b.iter(|| {
            let session = Session::new();
            let mut analyzer = DependencyAnalyzer::new(&session, classes.clone());
            analyzer.analyze_method(&main);
            let (_, info) = analyzer.finish();
            black_box(info.reachable_methods().len())
        });
    });
}

criterion_group!(
    benches,
    bench_dominators,
    bench_ssa,
    bench_program_io,
    bench_dependency
);
criterion_main!(benches);
