#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A sub-allocating byte pool that hands out ownership-validated ranges of one growable buffer.
//!
//! This crate provides [`SpanPool`], which owns a single contiguous [`RawBuffer`] and carves
//! non-overlapping byte ranges ([`Block`]s) out of it on request. Returned ranges are reused by
//! later requests, with new blocks always placed at the lowest offset where they fit.
//!
//! # Key Features
//!
//! - **First-fit placement**: New blocks go into the earliest sufficient gap between live blocks
//! - **Ownership validation**: Blocks are stamped with the identity of the pool generation that
//!   issued them, so returning a block to the wrong pool or using it after a buffer resize is
//!   detected instead of silently corrupting memory
//! - **Stable identifiers**: Every block carries a [`BlockId`] that survives buffer resizes
//! - **Explicit growth**: The buffer and the block-tracking list are grown only when the owner
//!   asks, via [`SpanPool::resize_buffer()`] and [`SpanPool::resize_block_capacity()`]
//! - **Safe access**: Block contents are reached through bounds-checked slices and
//!   [views][BufferView]; raw pointers stay inside [`RawBuffer`]
//! - **Injectable allocator**: Buffers obtain memory from any [`std::alloc::GlobalAlloc`]
//! - **Parallel fill**: [`SpanPool::for_each_block_parallel()`] spreads work on block contents
//!   over threads and joins them before the pool can be touched again
//!
//! # Example
//!
//! ```
//! use span_pool::{Error, SpanPool};
//!
//! let mut pool = SpanPool::new(1024, 8);
//!
//! let header = pool.get(16).unwrap();
//! let body = pool.get(256).unwrap();
//!
//! pool.view_mut(&header).unwrap().write::<u32>(0, 256);
//! pool[&body].fill(0xFF);
//!
//! assert_eq!(pool.view(&header).unwrap().read::<u32>(0), 256);
//!
//! // Growing the buffer starts a new pool generation, invalidating issued blocks.
//! pool.resize_buffer(4096).unwrap();
//! assert!(matches!(pool.reserve(body), Err(Error::InvalidHandle { .. })));
//!
//! // The stable identifier leads to a current handle.
//! let body = pool.get_by_id(body.id()).unwrap();
//! assert_eq!(pool[&body][255], 0xFF);
//! pool.reserve(body).unwrap();
//! ```
//!
//! # Diagnostics
//!
//! Failed requests, rejected blocks and structural changes are reported through the
//! [`tracing`] facade. Install any subscriber to receive them.

mod block;
mod builder;
mod drop_policy;
mod error;
mod placement;
mod pool;
mod raw_buffer;
#[cfg(test)]
mod test_alloc;
#[cfg(test)]
mod test_subscriber;
mod view;

pub use block::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::{Error, Result};
pub use pool::{PoolState, SpanPool};
pub use raw_buffer::*;
pub use view::*;
