//! Example of filling many blocks from worker threads.
//!
//! The pool is borrowed exclusively while the workers run, so it cannot be resized or dropped
//! until every worker has finished.

use span_pool::{DropPolicy, FillPolicy, SpanPool};

fn main() {
    let mut pool = SpanPool::builder()
        .buffer_size(64 * 1024)
        .block_capacity(128)
        .block_alignment(8)
        .fill_policy(FillPolicy::Pattern(0xCD))
        .drop_policy(DropPolicy::MustNotDropBlocks)
        .build();

    let blocks = (8..=800)
        .step_by(8)
        .map(|len| pool.get(len).unwrap())
        .collect::<Vec<_>>();

    pool.for_each_block_parallel(&blocks, |block, bytes| {
        let seed = block.id().get();

        for (i, chunk) in bytes.chunks_exact_mut(8).enumerate() {
            let value = seed.wrapping_add(u64::try_from(i).unwrap());
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    })
    .unwrap();

    let checksum: u64 = blocks
        .iter()
        .map(|block| {
            let view = pool.view(block).unwrap();
            (0..view.element_count::<u64>())
                .map(|i| view.read::<u64>(i))
                .fold(0_u64, u64::wrapping_add)
        })
        .fold(0, u64::wrapping_add);

    println!("Filled {} blocks in parallel, checksum {checksum}", blocks.len());

    // The drop policy demands that every block is returned before the pool goes away.
    for block in blocks {
        pool.reserve(block).unwrap();
    }

    pool.dispose();
}
