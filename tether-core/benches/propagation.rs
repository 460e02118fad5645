//! Propagation benchmarks
//!
//! Measures the cost of writes fanning out to reactions, of batched writes
//! inside an action, and of computed re-evaluation through a chain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tether_core::lifetime::Lifetime;
use tether_core::reactive::{Computed, ReactionOptions, Runtime};

// =============================================================================
// Fan-out
// =============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for reactions in [1usize, 16, 256] {
        let runtime = Runtime::new();
        let owner = Lifetime::new();
        let cell = runtime.observable(0u64);

        for _ in 0..reactions {
            let source = cell.clone();
            runtime.reaction(&owner, move || source.get(), ReactionOptions::DEFAULT, || {});
        }

        group.throughput(Throughput::Elements(reactions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(reactions), &reactions, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                black_box(cell.set(next))
            });
        });
    }

    group.finish();
}

// =============================================================================
// Batching
// =============================================================================

fn bench_action_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("action_batch");

    for cells in [4usize, 64] {
        let runtime = Runtime::new();
        let owner = Lifetime::new();
        let state: Vec<_> = (0..cells).map(|_| runtime.observable(0u64)).collect();

        let sources = state.clone();
        runtime.reaction(
            &owner,
            move || sources.iter().map(|cell| cell.get()).sum::<u64>(),
            ReactionOptions::DEFAULT,
            || {},
        );

        group.bench_with_input(BenchmarkId::from_parameter(cells), &cells, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                runtime.action(|| {
                    for cell in &state {
                        cell.set(next);
                    }
                });
            });
        });
    }

    group.finish();
}

// =============================================================================
// Computed chains
// =============================================================================

fn bench_computed_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("computed_chain");

    for depth in [1usize, 8, 32] {
        let runtime = Runtime::new();
        let lifetime = Lifetime::new();
        let root = runtime.observable(0u64);

        let source = root.clone();
        let mut tail: Computed<u64> = runtime.computed(&lifetime, move || source.get());
        for _ in 1..depth {
            let previous = tail.clone();
            tail = runtime.computed(&lifetime, move || previous.get() + 1);
        }

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            let mut next = 0u64;
            b.iter(|| {
                next += 1;
                root.set(next);
                black_box(tail.get())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_action_batch, bench_computed_chain);
criterion_main!(benches);
