//! Basic usage example for `SpanPool`.
//!
//! This example demonstrates obtaining and returning blocks, reuse of returned ranges and
//! caller-driven growth of the pool buffer.

use span_pool::{Error, SpanPool};

fn main() {
    // A 1 KB buffer that can track up to 4 blocks at a time.
    let mut pool = SpanPool::new(1024, 4);

    println!(
        "Created SpanPool with {} bytes and room for {} blocks",
        pool.buffer_len(),
        pool.block_capacity()
    );

    let greeting = pool.get(16).unwrap();
    let numbers = pool.get(64).unwrap();

    pool[&greeting][..5].copy_from_slice(b"hello");

    {
        let mut view = pool.view_mut(&numbers).unwrap();

        for i in 0..view.element_count::<u64>() {
            view.write::<u64>(i, u64::try_from(i).unwrap().wrapping_mul(1000));
        }
    }

    println!(
        "Block {} at offset {} holds {:?}",
        greeting.id(),
        greeting.offset(),
        std::str::from_utf8(&pool[&greeting][..5]).unwrap()
    );
    println!(
        "Block {} at offset {} holds {} u64 values, the last being {}",
        numbers.id(),
        numbers.offset(),
        pool.view(&numbers).unwrap().element_count::<u64>(),
        pool.view(&numbers).unwrap().read::<u64>(7)
    );

    // Returning a block makes its range available to the next request that fits.
    pool.reserve(greeting).unwrap();
    let reused = pool.get(8).unwrap();
    println!(
        "Returned block {}, new block {} reuses offset {}",
        greeting.id(),
        reused.id(),
        reused.offset()
    );

    // Returning the same block twice is detected.
    match pool.reserve(greeting) {
        Err(e) => println!("Second return rejected: {e}"),
        Ok(()) => unreachable!("a block cannot be returned twice"),
    }

    // Running out of space is reported and the caller decides whether to grow.
    match pool.get(2048) {
        Err(e @ Error::AddressSpaceExhausted { .. }) => {
            println!("Request failed: {e}");
            pool.resize_buffer(4096).unwrap();
            println!("Grew buffer to {} bytes ({})", pool.buffer_len(), pool.identity());
        }
        other => unreachable!("unexpected outcome: {other:?}"),
    }

    // Blocks issued before the resize must be refreshed through their identifier.
    let numbers = pool.get_by_id(numbers.id()).unwrap();
    println!(
        "Block {} still holds {} after the resize",
        numbers.id(),
        pool.view(&numbers).unwrap().read::<u64>(7)
    );

    let large = pool.get(2048).unwrap();
    println!("Obtained block {} of {} bytes", large.id(), large.len());

    for block in [reused, numbers, large] {
        pool.reserve(block).unwrap();
    }

    println!("Pool is empty again: {}", pool.is_empty());
}
