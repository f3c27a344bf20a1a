//! Benchmarks for layout recovery.
//!
//! Measures the engine end to end on small synthetic programs:
//! - Nested struct recovery through pointer chasing
//! - Array detection over a counting loop
//! - Whole-program analysis over a call graph, sequential and parallel

extern crate layoutscope;

use criterion::{criterion_group, criterion_main, Criterion};
use layoutscope::prelude::*;
use std::hint::black_box;

fn field(b: &mut ProgramBuilder, f: FunctionId, base: ValueId, offset: i64) -> ValueId {
    let offset = b.constant(f, offset, 8);
    b.op(f, Opcode::PtrSub, &[base, offset], 8).unwrap()
}

fn store_at(b: &mut ProgramBuilder, f: FunctionId, base: ValueId, offset: i64, size: u8) {
    let address = field(b, f, base, offset);
    let value = b.constant(f, offset, size);
    b.store(f, address, value).unwrap();
}

/// `o->buf`, `o->len` and two nested structs with a handful of stores each.
fn nested_structs() -> (Program, FunctionId) {
    let mut b = ProgramBuilder::new();
    let f = b.function("fill", &[8]);
    let o = b.param(f, 0).unwrap();

    let buf = b.load(f, o, 8).unwrap();
    let zero = b.constant(f, 0, 1);
    b.store(f, buf, zero).unwrap();
    let len = field(&mut b, f, o, 8);
    b.load(f, len, 8).unwrap();

    for slot in [0x10, 0x18, 0x20, 0x28] {
        let address = field(&mut b, f, o, slot);
        let inner = b.load(f, address, 8).unwrap();
        for offset in (0..32).step_by(4) {
            store_at(&mut b, f, inner, offset, 4);
        }
    }
    b.ret(f, &[]).unwrap();
    (b.build(), f)
}

/// `for (i = 0; ; i++) p[i] = 0;` over 4-byte elements.
fn counting_loop() -> (Program, FunctionId) {
    let mut b = ProgramBuilder::new();
    let f = b.function("clear", &[8]);
    let p = b.param(f, 0).unwrap();
    let zero = b.constant(f, 0, 8);
    let one = b.constant(f, 1, 8);
    let four = b.constant(f, 4, 8);
    let i = b.phi(f, 8).unwrap();
    let next = b.op(f, Opcode::Add, &[i, one], 8).unwrap();
    b.add_phi_input(i, zero).unwrap();
    b.add_phi_input(i, next).unwrap();
    let slot = b.op(f, Opcode::PtrAdd, &[p, i, four], 8).unwrap();
    let value = b.constant(f, 0, 4);
    b.store(f, slot, value).unwrap();
    (b.build(), f)
}

/// A setter, a chain of forwarding functions and many independent callers.
fn call_graph(callers: usize) -> Program {
    let mut b = ProgramBuilder::new();
    let set = b.function("set", &[8]);
    let q = b.param(set, 0).unwrap();
    let one = b.constant(set, 1, 4);
    b.store(set, q, one).unwrap();

    let mut previous = set;
    for depth in 0..4 {
        let f = b.function(format!("forward_{depth}"), &[8]);
        let p = b.param(f, 0).unwrap();
        let slot = field(&mut b, f, p, 8);
        b.call(f, Some(previous), &[slot], None).unwrap();
        previous = f;
    }

    for i in 0..callers {
        let f = b.function(format!("caller_{i}"), &[8]);
        let p = b.param(f, 0).unwrap();
        let slot = field(&mut b, f, p, (i as i64 % 16) * 8);
        b.call(f, Some(previous), &[slot], None).unwrap();
        b.call(f, Some(set), &[p], None).unwrap();
    }
    b.build()
}

fn bench_nested_structs(c: &mut Criterion) {
    let (program, f) = nested_structs();

    c.bench_function("recovery_nested_structs", |b| {
        b.iter(|| {
            let session = AnalysisSession::new(&program, EngineConfig::default());
            black_box(session.analyze_function(black_box(f)).unwrap())
        });
    });
}

fn bench_counting_loop(c: &mut Criterion) {
    let (program, f) = counting_loop();

    c.bench_function("recovery_counting_loop", |b| {
        b.iter(|| {
            let session = AnalysisSession::new(&program, EngineConfig::default());
            black_box(session.analyze_function(black_box(f)).unwrap())
        });
    });
}

fn bench_program_sequential(c: &mut Criterion) {
    let program = call_graph(256);

    c.bench_function("recovery_program_sequential", |b| {
        b.iter(|| {
            let config = EngineConfig::default().sequential();
            let session = AnalysisSession::new(black_box(&program), config);
            black_box(session.analyze_program().unwrap())
        });
    });
}

fn bench_program_parallel(c: &mut Criterion) {
    let program = call_graph(256);

    c.bench_function("recovery_program_parallel", |b| {
        b.iter(|| {
            let session = AnalysisSession::new(black_box(&program), EngineConfig::default());
            black_box(session.analyze_program().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_nested_structs,
    bench_counting_loop,
    bench_program_sequential,
    bench_program_parallel
);
criterion_main!(benches);
