use std::sync::Arc;

use anyhow::Result;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::prelude::*;

use tensor_graph::{
    DataType, GraphContainer, MemoryAllocator, Runtime, RuntimeOptions, SystemProvider, UnaryOp,
};

/// Transformer-style stack: every layer transposes its activations twice
/// and feeds a transposed weight into a matmul, so both rewrites fire
/// once per layer.
fn build_layer_stack(layers: usize, reuse: bool) -> Result<GraphContainer> {
    let options = RuntimeOptions::new().reuse_intermediate_buffers(reuse);
    let mut graph = GraphContainer::new(Runtime::cpu_with_options(options))?;
    let mut x = graph.add_tensor(vec![4, 64, 64], DataType::Float32);

    for _ in 0..layers {
        let w = graph.add_tensor(vec![64, 64], DataType::Float32);
        let t1 = graph.transpose(x, vec![0, 2, 1])?;
        let t1_out = graph.output(t1, 0).unwrap();
        let t2 = graph.transpose(t1_out, vec![0, 2, 1])?;
        let t2_out = graph.output(t2, 0).unwrap();
        let tw = graph.transpose(w, vec![1, 0])?;
        let w_t = graph.output(tw, 0).unwrap();
        let mm = graph.matmul(t2_out, w_t, false, false)?;
        let mm_out = graph.output(mm, 0).unwrap();
        let act = graph.unary(UnaryOp::Relu, mm_out)?;
        x = graph.output(act, 0).unwrap();
    }
    graph.unary(UnaryOp::Tanh, x)?;
    Ok(graph)
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    for layers in [8, 64, 256] {
        group.bench_with_input(BenchmarkId::new("layer_stack", layers), &layers, |b, &layers| {
            b.iter_batched(
                || {
                    let mut graph = build_layer_stack(layers, false).unwrap();
                    assert!(graph.topological_sort());
                    graph
                },
                |mut graph| black_box(graph.optimize()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    for reuse in [false, true] {
        group.bench_with_input(BenchmarkId::new("sort_optimize_malloc", reuse), &reuse, |b, &reuse| {
            b.iter_batched(
                || build_layer_stack(64, reuse).unwrap(),
                |mut graph| {
                    assert!(graph.topological_sort());
                    graph.optimize();
                    graph.shape_infer().unwrap();
                    black_box(graph.data_malloc().unwrap())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_allocator(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0);
    let requests: Vec<(bool, usize)> = (0..4096)
        .map(|_| (rng.gen_bool(0.6), rng.gen_range(1..4096)))
        .collect();

    c.bench_function("allocator/random_interleaving", |b| {
        b.iter(|| {
            let provider = Arc::new(SystemProvider::new(None));
            let mut allocator = MemoryAllocator::new(provider, 8).unwrap();
            let mut live = Vec::new();
            for &(alloc, size) in &requests {
                if alloc || live.is_empty() {
                    live.push((allocator.alloc(size).unwrap(), size));
                } else {
                    let (offset, size) = live.swap_remove(size % live.len());
                    allocator.free(offset, size).unwrap();
                }
            }
            black_box(allocator.report())
        });
    });
}

criterion_group!(benches, bench_optimizer, bench_pipeline, bench_allocator);
criterion_main!(benches);
