//! Basic benchmarks for the `span_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use span_pool::SpanPool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const BUFFER_LEN: usize = 64 * 1024;
const BLOCK_CAPACITY: usize = 256;
const BLOCK_LEN: usize = 128;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("span_pool_basic");

    let mut allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(SpanPool::new(BUFFER_LEN, BLOCK_CAPACITY)));
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("get_one");
    group.bench_function("get_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| SpanPool::new(BUFFER_LEN, BLOCK_CAPACITY))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.get(black_box(BLOCK_LEN)).unwrap());
            }

            start.elapsed()
        });
    });

    // Returning a block and taking a new one reuses the tracking list, so this allocates nothing.
    let mut allocs_op = allocs.operation("get_reserve_churn_half_full");
    group.bench_function("get_reserve_churn_half_full", |b| {
        b.iter_custom(|iters| {
            let mut pool = SpanPool::new(BUFFER_LEN, BLOCK_CAPACITY);

            let blocks = (0..BLOCK_CAPACITY / 2)
                .map(|_| pool.get(BLOCK_LEN).unwrap())
                .collect::<Vec<_>>();

            // Open a gap in the middle so every request has to search past half the blocks.
            let middle = blocks.get(blocks.len() / 2).copied().unwrap();
            pool.reserve(middle).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let block = pool.get(black_box(BLOCK_LEN)).unwrap();
                pool.reserve(black_box(block)).unwrap();
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("get_until_full");
    group.bench_function("get_until_full", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| SpanPool::new(BUFFER_LEN, BLOCK_CAPACITY))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                while let Some(block) = pool.try_get(BLOCK_LEN) {
                    _ = black_box(block);
                }
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("view_one");
    group.bench_function("view_one", |b| {
        b.iter_custom(|iters| {
            let mut pool = SpanPool::new(BUFFER_LEN, BLOCK_CAPACITY);
            let block = pool.get(BLOCK_LEN).unwrap();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                black_box(pool.view(black_box(&block)).unwrap().read::<u64>(0));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
