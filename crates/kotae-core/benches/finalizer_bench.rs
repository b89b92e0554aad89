//! Benchmarks for the dependency-ordered finalizer and destroy cascade.
//!
//! Run with: cargo bench -p kotae-core --bench finalizer_bench

use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use kotae_core::{CleanupExecutor, Part, Runtime, RuntimeConfig};

fn runtime() -> Runtime {
    Runtime::new(
        RuntimeConfig::new()
            .with_strict_contracts(false)
            .with_report_unresolved(false),
    )
}

// =============================================================================
// Finalizer
// =============================================================================

fn bench_execute(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("finalizer/execute");

    for &n in &[64_usize, 1024, 8192] {
        group.throughput(Throughput::Elements(n as u64));

        // Registered in reverse so every node starts blocked.
        group.bench_with_input(BenchmarkId::new("chain", n), &n, |b, &n| {
            b.iter(|| {
                let cx = CleanupExecutor::<usize>::new(&rt);
                for node in (0..n).rev() {
                    let blocks = (node + 1 < n).then_some(node + 1);
                    cx.register(node, blocks, || Ok(())).unwrap();
                }
                black_box(cx.execute().unwrap())
            });
        });

        group.bench_with_input(BenchmarkId::new("fan_out", n), &n, |b, &n| {
            b.iter(|| {
                let cx = CleanupExecutor::<usize>::new(&rt);
                cx.register(0, 1..n, || Ok(())).unwrap();
                for node in 1..n {
                    cx.register(node, [], || Ok(())).unwrap();
                }
                black_box(cx.execute().unwrap())
            });
        });
    }
    group.finish();
}

// =============================================================================
// Destroy cascade
// =============================================================================

fn bench_destroy(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("part/destroy");

    for &width in &[16_usize, 128] {
        group.bench_with_input(BenchmarkId::new("two_levels", width), &width, |b, &width| {
            b.iter_batched(
                || {
                    let root = rt.part();
                    for _ in 0..width {
                        let child = Part::new(&root);
                        for _ in 0..width {
                            let _ = Part::new(&child);
                        }
                    }
                    root
                },
                |root| black_box(root.destroy()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_execute, bench_destroy);
criterion_main!(benches);
