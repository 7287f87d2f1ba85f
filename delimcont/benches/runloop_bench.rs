//! Runloop benchmarks using criterion.
//!
//! Benchmarks for trampoline throughput, multi-shot replay cost and nested
//! delegation.
//!
//! Run with: cargo bench --bench runloop_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use delimcont::{
    reset, reset_multi_shot, reset_nested, Continuation, DelimContScope, DelimitedScope,
    LocalBoxFuture, MultiShotDelimContScope, NestedDelimContScope,
};

/// Benchmark sequential shifts in a single-shot scope
fn bench_trampoline(c: &mut Criterion) {
    let mut group = c.benchmark_group("trampoline");

    for shifts in [1u64, 100, 10_000] {
        group.throughput(Throughput::Elements(shifts));
        group.bench_with_input(BenchmarkId::new("sequential_shifts", shifts), &shifts, |b, &shifts| {
            b.iter(|| {
                reset(move |scope: DelimContScope<u64>| async move {
                    let mut total = 0u64;
                    for i in 0..shifts {
                        let x: u64 = scope.shift(move |k| async move { k.invoke(i).await }).await;
                        total += x;
                    }
                    black_box(total)
                })
            });
        });
    }

    // Handler that never resumes
    group.bench_function("short_circuit", |b| {
        b.iter(|| {
            reset(|scope: DelimContScope<i32>| async move {
                let x: i32 = scope.shift(|_k| async { black_box(1) }).await;
                x + 1
            })
        });
    });

    group.finish();
}

fn choose(k: Continuation<bool, u64>) -> LocalBoxFuture<u64> {
    Box::pin(async move { k.invoke(true).await + k.invoke(false).await })
}

/// Benchmark replay cost of multi-shot continuations
fn bench_multi_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_shot");

    for depth in [1usize, 4, 8] {
        group.throughput(Throughput::Elements(1 << depth));
        group.bench_with_input(BenchmarkId::new("enumerate_paths", depth), &depth, |b, &depth| {
            b.iter(|| {
                reset_multi_shot(move |scope: MultiShotDelimContScope<u64>| async move {
                    for _ in 0..depth {
                        let _: bool = scope.shift(choose).await;
                    }
                    1
                })
            });
        });
    }

    group.finish();
}

/// Benchmark delegation from child scopes to their ancestors
fn bench_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested");

    group.bench_function("outer_shift_through_child", |b| {
        b.iter(|| {
            reset_nested(|outer: NestedDelimContScope<i32>| async move {
                let shifted = outer.clone();
                let y: i32 = outer
                    .reset(move |_inner: NestedDelimContScope<i32>| {
                        let shifted = shifted.clone();
                        async move {
                            let x: i32 = shifted.shift(|k| async move { k.invoke(1).await * 2 }).await;
                            x + 1
                        }
                    })
                    .await;
                black_box(y + 10)
            })
        });
    });

    group.bench_function("local_child_shift", |b| {
        b.iter(|| {
            reset_nested(|outer: NestedDelimContScope<i32>| async move {
                let y: i32 = outer
                    .reset(|inner: NestedDelimContScope<i32>| async move {
                        let x: i32 = inner.shift(|k| async move { k.invoke(2).await * 3 }).await;
                        x
                    })
                    .await;
                black_box(y + 1)
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_trampoline, bench_multi_shot, bench_nested);
criterion_main!(benches);
