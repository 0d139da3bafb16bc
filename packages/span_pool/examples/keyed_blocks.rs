//! Example of looking up pool blocks by name.
//!
//! A `BandedMap` maps names to block identifiers. The identifiers stay valid when the pool
//! buffer is resized, so the names keep leading to the right bytes even though every
//! previously issued `Block` handle is invalidated by the resize.

use std::num::NonZero;

use banded_map::BandedMap;
use span_pool::{BlockId, SpanPool};

fn main() {
    let mut pool = SpanPool::new(256, 8);
    let mut by_name: BandedMap<&str, BlockId> = BandedMap::new(NonZero::new(4).unwrap());

    for (name, text) in [("greeting", "hello"), ("subject", "world"), ("mark", "!")] {
        let block = pool.get(text.len()).unwrap();
        pool[&block].copy_from_slice(text.as_bytes());
        by_name.add(name, block.id());
    }

    print_all(&pool, &by_name);

    pool.resize_buffer(1024).unwrap();
    println!("Resized pool buffer to {} bytes ({})", pool.buffer_len(), pool.identity());

    print_all(&pool, &by_name);

    // Return everything, using the map to find the blocks.
    for name in ["greeting", "subject", "mark"] {
        let id = by_name.remove(name).unwrap();
        let block = pool.get_by_id(id).unwrap();
        pool.reserve(block).unwrap();
    }

    println!("All blocks returned: {}", pool.is_empty());
}

fn print_all(pool: &SpanPool, by_name: &BandedMap<&str, BlockId>) {
    for (name, &id) in by_name {
        let block = pool.get_by_id(id).unwrap();
        let text = std::str::from_utf8(&pool[&block]).unwrap();

        println!("  {name:<8} -> block {id} at offset {}: {text}", block.offset());
    }
}
