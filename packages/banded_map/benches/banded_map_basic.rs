//! Basic benchmarks for the `banded_map` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::collections::HashMap;
use std::hint::black_box;
use std::num::NonZero;

use banded_map::BandedMap;
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const INITIAL_CAPACITY: NonZero<usize> = NonZero::new(64).unwrap();
const KEY_COUNT: u64 = 1000;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("banded_map_basic");

    group.bench_function("add_1000", |b| {
        b.iter_batched_ref(
            || BandedMap::<u64, u64>::new(INITIAL_CAPACITY),
            |map| {
                for key in 0..KEY_COUNT {
                    map.add(black_box(key), key);
                }
            },
            BatchSize::SmallInput,
        );
    });

    let mut filled = BandedMap::<u64, u64>::new(INITIAL_CAPACITY);
    filled.extend((0..KEY_COUNT).map(|key| (key, key)));

    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(filled.get(black_box(&(KEY_COUNT / 2)))));
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(filled.get(black_box(&(KEY_COUNT * 2)))));
    });

    // Reference point for the lookups above.
    let std_map = (0..KEY_COUNT).map(|key| (key, key)).collect::<HashMap<_, _>>();

    group.bench_function("std_get_hit", |b| {
        b.iter(|| black_box(std_map.get(black_box(&(KEY_COUNT / 2)))));
    });

    group.finish();
}
