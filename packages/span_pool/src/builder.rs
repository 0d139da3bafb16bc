use std::alloc::{GlobalAlloc, System};
use std::cell::Cell;
use std::marker::PhantomData;

use crate::placement::{DEFAULT_BLOCK_MARGIN, Spacing};
use crate::{DropPolicy, FillPolicy, RawBuffer, SpanPool};

/// Block capacity used when the builder is not given one.
const DEFAULT_BLOCK_CAPACITY: usize = 64;

/// Buffer alignment used when the builder is not given one.
const DEFAULT_BUFFER_ALIGNMENT: usize = 16;

/// Builder for creating an instance of [`SpanPool`].
///
/// The buffer size is mandatory when the pool allocates its own buffer via
/// [`build()`][Self::build]. It is ignored by [`build_from()`][Self::build_from], which adopts
/// an existing buffer. Other settings are optional.
///
/// # Examples
///
/// ```
/// use span_pool::{DropPolicy, FillPolicy, SpanPool};
///
/// let pool = SpanPool::builder()
///     .buffer_size(4096)
///     .block_capacity(16)
///     .block_margin(8)
///     .block_alignment(8)
///     .fill_policy(FillPolicy::Pattern(0xCD))
///     .drop_policy(DropPolicy::MustNotDropBlocks)
///     .build();
///
/// assert_eq!(pool.buffer_len(), 4096);
/// assert_eq!(pool.block_capacity(), 16);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) if its allocator is, but not thread-safe ([`Sync`]).
#[must_use]
pub struct SpanPoolBuilder<A: GlobalAlloc = System> {
    buffer_size: Option<usize>,
    buffer_alignment: usize,
    block_capacity: usize,
    block_margin: usize,
    block_alignment: usize,
    fill_policy: FillPolicy,
    drop_policy: DropPolicy,
    allocator: A,

    _not_sync: PhantomData<Cell<()>>,
}

impl SpanPoolBuilder<System> {
    pub(crate) fn new() -> Self {
        Self {
            buffer_size: None,
            buffer_alignment: DEFAULT_BUFFER_ALIGNMENT,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            block_margin: DEFAULT_BLOCK_MARGIN,
            block_alignment: 1,
            fill_policy: FillPolicy::default(),
            drop_policy: DropPolicy::default(),
            allocator: System,
            _not_sync: PhantomData,
        }
    }
}

impl<A: GlobalAlloc> SpanPoolBuilder<A> {
    /// Sets the initial size of the pool buffer, in bytes.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Sets the alignment of the start of the pool buffer. Defaults to 16 bytes.
    pub fn buffer_alignment(mut self, alignment: usize) -> Self {
        self.buffer_alignment = alignment;
        self
    }

    /// Sets how many blocks the pool can track before [`SpanPool::resize_block_capacity()`] must
    /// be called. Defaults to 64.
    pub fn block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    /// Sets the number of unused bytes kept between adjacent blocks. Defaults to 4.
    pub fn block_margin(mut self, margin: usize) -> Self {
        self.block_margin = margin;
        self
    }

    /// Sets the alignment of every block start. Defaults to 1 (no alignment).
    ///
    /// Must not exceed the buffer alignment, as block offsets are aligned relative to the start
    /// of the buffer.
    pub fn block_alignment(mut self, alignment: usize) -> Self {
        self.block_alignment = alignment;
        self
    }

    /// Sets how memory is initialized when the pool allocates or grows its buffer.
    pub fn fill_policy(mut self, policy: FillPolicy) -> Self {
        self.fill_policy = policy;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how to treat live blocks
    /// when the pool is disposed or dropped.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the allocator the pool obtains its buffer memory from.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::System;
    ///
    /// use span_pool::SpanPool;
    ///
    /// let pool = SpanPool::builder()
    ///     .buffer_size(256)
    ///     .allocator(System)
    ///     .build();
    /// ```
    pub fn allocator<B: GlobalAlloc>(self, allocator: B) -> SpanPoolBuilder<B> {
        SpanPoolBuilder {
            buffer_size: self.buffer_size,
            buffer_alignment: self.buffer_alignment,
            block_capacity: self.block_capacity,
            block_margin: self.block_margin,
            block_alignment: self.block_alignment,
            fill_policy: self.fill_policy,
            drop_policy: self.drop_policy,
            allocator,
            _not_sync: PhantomData,
        }
    }

    /// Builds the pool, allocating its buffer.
    ///
    /// # Panics
    ///
    /// Panics if no buffer size has been set, if the buffer size or block capacity is zero, if
    /// either alignment is not a power of two or if the block alignment exceeds the buffer
    /// alignment.
    #[must_use]
    pub fn build(self) -> SpanPool<A> {
        let size = self
            .buffer_size
            .expect("buffer size must be set using .buffer_size() before calling .build()");

        let buffer = RawBuffer::allocate_in(
            size,
            self.buffer_alignment,
            self.fill_policy,
            self.allocator,
        );

        SpanPool::new_inner(
            buffer,
            self.block_capacity,
            Spacing::new(self.block_margin, self.block_alignment),
            self.fill_policy,
            self.drop_policy,
        )
    }

    /// Builds the pool on top of an existing buffer, which may wrap
    /// [unmanaged][crate::AllocatorTag::Unmanaged] memory.
    ///
    /// The buffer size, buffer alignment and allocator configured on this builder are not used;
    /// the buffer already has its own.
    ///
    /// # Panics
    ///
    /// Panics if the block capacity is zero, if the block alignment is not a power of two or if
    /// it exceeds the alignment of `buffer`.
    #[must_use]
    pub fn build_from<B: GlobalAlloc>(self, buffer: RawBuffer<B>) -> SpanPool<B> {
        SpanPool::new_inner(
            buffer,
            self.block_capacity,
            Spacing::new(self.block_margin, self.block_alignment),
            self.fill_policy,
            self.drop_policy,
        )
    }
}

impl<A: GlobalAlloc> std::fmt::Debug for SpanPoolBuilder<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanPoolBuilder")
            .field("buffer_size", &self.buffer_size)
            .field("buffer_alignment", &self.buffer_alignment)
            .field("block_capacity", &self.block_capacity)
            .field("block_margin", &self.block_margin)
            .field("block_alignment", &self.block_alignment)
            .field("fill_policy", &self.fill_policy)
            .field("drop_policy", &self.drop_policy)
            .field(
                "allocator",
                &std::format_args!("{}", std::any::type_name::<A>()),
            )
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{AllocatorTag, test_alloc::CountingAllocator};

    assert_impl_all!(SpanPoolBuilder: Send, std::fmt::Debug);
    assert_not_impl_any!(SpanPoolBuilder: Sync);

    #[test]
    fn defaults() {
        let builder = SpanPoolBuilder::new();

        assert!(builder.buffer_size.is_none());
        assert_eq!(builder.block_capacity, DEFAULT_BLOCK_CAPACITY);
        assert_eq!(builder.block_margin, DEFAULT_BLOCK_MARGIN);
        assert_eq!(builder.block_alignment, 1);
        assert_eq!(builder.buffer_alignment, DEFAULT_BUFFER_ALIGNMENT);
        assert_eq!(builder.fill_policy, FillPolicy::Zero);
        assert_eq!(builder.drop_policy, DropPolicy::MayDropBlocks);
    }

    #[test]
    fn settings_reach_the_pool() {
        let pool = SpanPoolBuilder::new()
            .buffer_size(512)
            .buffer_alignment(64)
            .block_capacity(3)
            .block_margin(0)
            .block_alignment(32)
            .build();

        assert_eq!(pool.buffer_len(), 512);
        assert_eq!(pool.buffer().alignment(), 64);
        assert_eq!(pool.block_capacity(), 3);
        assert_eq!(pool.block_margin(), 0);
        assert_eq!(pool.block_alignment(), 32);
    }

    #[test]
    fn pattern_fill_reaches_the_buffer() {
        let pool = SpanPoolBuilder::new()
            .buffer_size(32)
            .fill_policy(FillPolicy::Pattern(0xEE))
            .build();

        assert!(pool.buffer().as_slice().iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn allocator_is_used_for_the_buffer() {
        let allocator = CountingAllocator::default();

        let pool = SpanPoolBuilder::new()
            .buffer_size(128)
            .allocator(allocator.clone())
            .build();

        assert_eq!(allocator.allocations(), 1);

        drop(pool);
        assert_eq!(allocator.deallocations(), 1);
    }

    #[test]
    fn build_from_adopts_buffer() {
        let buffer = RawBuffer::allocate(300, 8, FillPolicy::Zero);

        let pool = SpanPoolBuilder::new().block_capacity(2).build_from(buffer);

        assert_eq!(pool.buffer_len(), 300);
        assert_eq!(pool.buffer().tag(), AllocatorTag::Managed);
        assert_eq!(pool.block_capacity(), 2);
    }

    #[test]
    #[should_panic]
    fn build_without_size_panics() {
        _ = SpanPoolBuilder::new().build();
    }

    #[test]
    #[should_panic]
    fn zero_block_capacity_panics() {
        _ = SpanPoolBuilder::new()
            .buffer_size(64)
            .block_capacity(0)
            .build();
    }

    #[test]
    #[should_panic]
    fn block_alignment_above_buffer_alignment_panics() {
        _ = SpanPoolBuilder::new()
            .buffer_size(64)
            .buffer_alignment(8)
            .block_alignment(16)
            .build();
    }
}
