use std::ops::Range;

use thiserror::Error;

use crate::{BlockId, InvalidHandleReason, PoolIdentity};

/// Errors that can occur when allocating, validating or resizing through a
/// [`SpanPool`][crate::SpanPool].
///
/// Running out of system memory is not represented here. That is treated as fatal and
/// reported through [`std::alloc::handle_alloc_error()`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every slot of the block-tracking list is in use.
    ///
    /// Recoverable by calling [`SpanPool::resize_block_capacity()`][1] with a larger value.
    ///
    /// [1]: crate::SpanPool::resize_block_capacity
    #[error(
        "block tracking list is full: cannot track a block of {requested} bytes, all {capacity} slots are in use"
    )]
    CapacityExhausted {
        /// Length of the rejected request, in bytes.
        requested: usize,

        /// The number of blocks the pool can track concurrently.
        capacity: usize,
    },

    /// The pool buffer has no free gap that can hold the requested length.
    ///
    /// Recoverable by calling [`SpanPool::resize_buffer()`][1] with a larger value.
    ///
    /// [1]: crate::SpanPool::resize_buffer
    #[error(
        "no gap of {requested} bytes in pool buffer of {buffer_len} bytes holding {tracked} blocks"
    )]
    AddressSpaceExhausted {
        /// Length of the rejected request, in bytes.
        requested: usize,

        /// Current size of the pool buffer, in bytes.
        buffer_len: usize,

        /// Number of live blocks at the time of the request.
        tracked: usize,
    },

    /// A block handle was presented to a pool that did not issue it, was issued by an older
    /// generation of the pool, or has already been returned.
    #[error(
        "block {block} with identity {block_identity} rejected by pool {pool_identity}: {reason}"
    )]
    InvalidHandle {
        /// Identifier of the rejected block.
        block: BlockId,

        /// The identity stamped on the rejected block.
        block_identity: PoolIdentity,

        /// The identity of the pool that rejected it.
        pool_identity: PoolIdentity,

        /// Why the handle was rejected.
        reason: InvalidHandleReason,
    },

    /// No live block in the pool carries the given identifier.
    #[error("no live block with id {id} in pool {pool_identity}")]
    UnknownBlock {
        /// The identifier that was looked up.
        id: BlockId,

        /// The identity of the pool that was searched.
        pool_identity: PoolIdentity,
    },

    /// A buffer resize would cut off bytes that belong to live blocks.
    #[error(
        "cannot resize pool buffer to {requested} bytes, live blocks extend to byte {required}"
    )]
    WouldTruncateBlocks {
        /// The requested buffer size, in bytes.
        requested: usize,

        /// The end of the furthest live block, which is the smallest permitted buffer size.
        required: usize,
    },

    /// A block-capacity resize would leave less room than the number of live blocks.
    #[error("cannot resize block capacity to {requested}, {tracked} blocks are live")]
    CapacityBelowTracked {
        /// The requested block capacity.
        requested: usize,

        /// Number of live blocks.
        tracked: usize,
    },

    /// The same block was listed more than once where disjoint blocks are required.
    #[error("block {id} is listed more than once")]
    DuplicateBlock {
        /// The repeated block.
        id: BlockId,
    },
}

impl Error {
    /// Whether the caller can recover from this error by growing the pool, either its buffer
    /// or its block-tracking list.
    #[must_use]
    pub fn is_recoverable_by_growth(&self) -> bool {
        matches!(
            self,
            Self::CapacityExhausted { .. } | Self::AddressSpaceExhausted { .. }
        )
    }
}

/// A specialized `Result` type for span pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

// Used in diagnostics that refer to byte ranges of the buffer.
pub(crate) fn describe_range(range: &Range<usize>) -> String {
    format!("[{}, {})", range.start, range.end)
}
