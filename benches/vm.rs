//! Benchmarks for the compiler, the module loader and the VM.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use minis::{BuiltinTable, Module};
use std::sync::Arc;

const FIB_RECURSIVE: &str = r#"
func int fib(n) {
    if (n < 2) {
        return n;
    }
    return fib(n - 1) + fib(n - 2);
}
let result = fib(20);
"#;

const LOOP_SUM: &str = r#"
let int i = 0;
let int sum = 0;
while (i < 100000) {
    sum = sum + i;
    i = i + 1;
}
"#;

const TAIL_COUNT: &str = r#"
func tail int count(n, acc) {
    if (n == 0) {
        return acc;
    }
    return count(n - 1, acc + 1);
}
let result = count(100000, 0);
"#;

fn compile(source: &str) -> Arc<Module> {
    Arc::new(minis::compile(source).expect("compile error"))
}

fn run(module: &Arc<Module>) {
    minis::run(Arc::clone(module), BuiltinTable::new()).expect("vm runtime error");
}

fn execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");

    for (name, source) in [
        ("fib_recursive", FIB_RECURSIVE),
        ("loop_sum", LOOP_SUM),
        ("tail_count", TAIL_COUNT),
    ] {
        let module = compile(source);
        group.bench_function(name, |b| b.iter(|| run(black_box(&module))));
    }

    group.finish();
}

fn fib_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("fib_scaling");

    for n in [10, 15, 20].iter() {
        let source = format!(
            r#"
func int fib(n) {{
    if (n < 2) {{
        return n;
    }}
    return fib(n - 1) + fib(n - 2);
}}
let result = fib({});
"#,
            n
        );
        let module = compile(&source);

        group.bench_with_input(BenchmarkId::new("vm", n), &module, |b, module| {
            b.iter(|| run(black_box(module)))
        });
    }

    group.finish();
}

/// Compilation and loading alone (not execution).
fn toolchain_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("toolchain_overhead");

    group.bench_function("compile_fib", |b| {
        b.iter(|| minis::compile(black_box(FIB_RECURSIVE)).unwrap())
    });
    group.bench_function("compile_loop", |b| {
        b.iter(|| minis::compile(black_box(LOOP_SUM)).unwrap())
    });

    let image = compile(TAIL_COUNT).to_bytes();
    group.bench_function("load_module", |b| {
        b.iter(|| minis::load_module(black_box(&image)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, execution, fib_scaling, toolchain_overhead);
criterion_main!(benches);
