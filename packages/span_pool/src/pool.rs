use std::alloc::{GlobalAlloc, System};
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;
use std::ops::{Index, IndexMut, Range};
use std::ptr::NonNull;
use std::{fmt, mem, thread};

use tracing::{debug, error, warn};

use crate::placement::{self, Spacing};
use crate::{
    Block, BlockId, BufferView, BufferViewMut, DropPolicy, Error, FillPolicy, InvalidHandleReason,
    PoolIdentity, RawBuffer, Result, SpanPoolBuilder,
};

/// Occupancy of a [`SpanPool`]'s block-tracking list.
///
/// Running out of address space in the buffer is a separate condition, reported as
/// [`Error::AddressSpaceExhausted`] and not reflected here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum PoolState {
    /// No blocks are live.
    Empty,

    /// Some blocks are live and more can be tracked.
    Populated,

    /// As many blocks are live as the pool can track. New blocks can only be obtained after
    /// returning a block or calling [`SpanPool::resize_block_capacity()`].
    Full,
}

/// What the pool remembers about a live block. Offsets are relative to the start of the buffer,
/// which keeps them valid when the buffer moves.
#[derive(Clone, Copy, Debug)]
struct TrackedBlock {
    id: BlockId,
    offset: usize,
    len: usize,
}

impl TrackedBlock {
    fn end(&self) -> usize {
        self.offset
            .checked_add(self.len)
            .expect("tracked blocks always lie within the buffer, which fits in the address space")
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    fn matches(&self, block: &Block) -> bool {
        self.id == block.id() && self.offset == block.offset() && self.len == block.len()
    }

    fn to_block(self, identity: PoolIdentity) -> Block {
        Block::new(identity, self.id, self.offset, self.len)
    }
}

/// A sub-allocator that carves non-overlapping byte ranges out of one growable buffer.
///
/// The pool owns a single [`RawBuffer`] and a list of the ranges currently in use. Requesting
/// memory via [`get()`][Self::get] or [`try_get()`][Self::try_get] performs a first-fit search
/// over the gaps between live blocks and returns a [`Block`] describing the chosen range.
/// Returning the block via [`reserve()`][Self::reserve] makes its range available again. The
/// bytes of a returned block are not cleared.
///
/// # Ownership validation
///
/// A [`Block`] is a capability token, not a pointer. Every block carries the identity of the
/// pool generation that issued it, and every operation that accepts a block checks that
/// identity as well as that the block is still live. Presenting a block to the wrong pool, or
/// presenting a block issued before [`resize_buffer()`][Self::resize_buffer], is rejected with
/// [`Error::InvalidHandle`] and leaves the pool unchanged.
///
/// Blocks also carry a stable [`BlockId`]. After the buffer has been resized, owners use
/// [`get_by_id()`][Self::get_by_id] to obtain a current handle for their block.
///
/// # Spacing
///
/// Adjacent blocks are separated by a margin of unused bytes (4 by default). The start and end
/// of the buffer need no margin. Block starts can additionally be aligned; see
/// [`SpanPoolBuilder`].
///
/// # Capacity
///
/// The pool tracks at most [`block_capacity()`][Self::block_capacity] blocks at a time. It never
/// grows this limit or its buffer on its own. When either is exhausted, requests fail until the
/// owner calls [`resize_block_capacity()`][Self::resize_block_capacity] or
/// [`resize_buffer()`][Self::resize_buffer].
///
/// # Example
///
/// ```
/// use span_pool::SpanPool;
///
/// let mut pool = SpanPool::new(1024, 8);
///
/// let block = pool.get(100).unwrap();
/// pool[&block].copy_from_slice(&[7; 100]);
/// assert_eq!(pool[&block][99], 7);
///
/// pool.reserve(block).unwrap();
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if its allocator is, but not thread-safe ([`Sync`]).
/// Work on the contents of several blocks can be spread over threads with
/// [`for_each_block_parallel()`][Self::for_each_block_parallel].
pub struct SpanPool<A: GlobalAlloc = System> {
    buffer: RawBuffer<A>,

    /// Live blocks. Sorted by offset whenever `blocks_sorted` is set. New blocks are appended
    /// and the list is only re-sorted before the next search needs it.
    blocks: Vec<TrackedBlock>,

    block_capacity: usize,
    blocks_sorted: bool,

    identity: PoolIdentity,

    spacing: Spacing,
    fill_policy: FillPolicy,
    drop_policy: DropPolicy,

    _not_sync: PhantomData<Cell<()>>,
}

impl SpanPool<System> {
    /// Creates a pool with a buffer of `initial_size` bytes that can track up to
    /// `initial_block_capacity` blocks, using default settings for everything else.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    ///
    /// # Example
    ///
    /// ```
    /// use span_pool::{PoolState, SpanPool};
    ///
    /// let pool = SpanPool::new(4096, 16);
    ///
    /// assert_eq!(pool.buffer_len(), 4096);
    /// assert_eq!(pool.state(), PoolState::Empty);
    /// ```
    #[must_use]
    pub fn new(initial_size: usize, initial_block_capacity: usize) -> Self {
        Self::builder()
            .buffer_size(initial_size)
            .block_capacity(initial_block_capacity)
            .build()
    }

    /// Creates a builder for configuring and constructing a [`SpanPool`].
    pub fn builder() -> SpanPoolBuilder {
        SpanPoolBuilder::new()
    }
}

impl<A: GlobalAlloc> SpanPool<A> {
    /// Creates a pool on top of an existing buffer, using default settings for everything else.
    ///
    /// The buffer may wrap memory owned by someone else (see [`RawBuffer::from_raw_parts()`]),
    /// in which case the pool never releases that memory.
    ///
    /// # Panics
    ///
    /// Panics if `block_capacity` is zero.
    #[must_use]
    pub fn from_buffer(buffer: RawBuffer<A>, block_capacity: usize) -> Self {
        SpanPoolBuilder::new()
            .block_capacity(block_capacity)
            .build_from(buffer)
    }

    pub(crate) fn new_inner(
        buffer: RawBuffer<A>,
        block_capacity: usize,
        spacing: Spacing,
        fill_policy: FillPolicy,
        drop_policy: DropPolicy,
    ) -> Self {
        assert!(block_capacity > 0, "SpanPool must be able to track at least one block");

        assert!(
            spacing.alignment() <= buffer.alignment(),
            "block alignment {} cannot exceed buffer alignment {}",
            spacing.alignment(),
            buffer.alignment()
        );

        Self {
            buffer,
            blocks: Vec::with_capacity(block_capacity),
            block_capacity,
            blocks_sorted: true,
            identity: PoolIdentity::new_pool(),
            spacing,
            fill_policy,
            drop_policy,
            _not_sync: PhantomData,
        }
    }

    /// The identity of the current generation of this pool. Blocks issued from now on carry it.
    #[must_use]
    pub fn identity(&self) -> PoolIdentity {
        self.identity
    }

    /// Size of the pool buffer, in bytes.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// The buffer the pool sub-allocates from.
    #[must_use]
    pub fn buffer(&self) -> &RawBuffer<A> {
        &self.buffer
    }

    /// The number of blocks the pool can track concurrently.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Unused bytes kept between adjacent blocks.
    #[must_use]
    pub fn block_margin(&self) -> usize {
        self.spacing.margin()
    }

    /// Alignment of every block start, relative to the start of the buffer.
    #[must_use]
    pub fn block_alignment(&self) -> usize {
        self.spacing.alignment()
    }

    /// The number of live blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no blocks are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether the block-tracking list is full, in which case no more blocks can be obtained
    /// until one is returned or the capacity is increased.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.block_capacity
    }

    /// Occupancy of the block-tracking list.
    #[must_use]
    pub fn state(&self) -> PoolState {
        if self.is_empty() {
            PoolState::Empty
        } else if self.is_full() {
            PoolState::Full
        } else {
            PoolState::Populated
        }
    }

    /// Obtains a block of `len` bytes at the lowest offset where it fits.
    ///
    /// Failures are logged as warnings with the pool state needed to diagnose them. Use
    /// [`try_get()`][Self::try_get] where failure is an expected outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExhausted`] if the block-tracking list is full and
    /// [`Error::AddressSpaceExhausted`] if no gap in the buffer can hold `len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    pub fn get(&mut self, len: usize) -> Result<Block> {
        self.allocate(len).inspect_err(|e| {
            warn!(
                requested = len,
                buffer_len = self.buffer.len(),
                tracked = self.blocks.len(),
                block_capacity = self.block_capacity,
                pool = %self.identity,
                "failed to obtain block: {e}"
            );
        })
    }

    /// Obtains a block of `len` bytes at the lowest offset where it fits, or `None` if the
    /// block-tracking list is full or no gap in the buffer is large enough.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero.
    #[must_use]
    pub fn try_get(&mut self, len: usize) -> Option<Block> {
        self.allocate(len).ok()
    }

    fn allocate(&mut self, len: usize) -> Result<Block> {
        assert!(len > 0, "cannot obtain a zero-length block");

        if self.is_full() {
            return Err(Error::CapacityExhausted {
                requested: len,
                capacity: self.block_capacity,
            });
        }

        self.ensure_sorted();

        let offset = placement::first_fit(
            self.blocks.iter().map(TrackedBlock::range),
            len,
            self.buffer.len(),
            self.spacing,
        )
        .ok_or_else(|| Error::AddressSpaceExhausted {
            requested: len,
            buffer_len: self.buffer.len(),
            tracked: self.blocks.len(),
        })?;

        // A block placed into a gap lands between existing blocks and breaks the ordering.
        if self.blocks.last().is_some_and(|last| last.offset > offset) {
            self.blocks_sorted = false;
        }

        let tracked = TrackedBlock {
            id: BlockId::next(),
            offset,
            len,
        };

        self.blocks.push(tracked);

        Ok(tracked.to_block(self.identity))
    }

    /// Returns a block to the pool, making its range available for new blocks.
    ///
    /// The bytes of the block are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the block was issued by another pool or by an earlier
    /// generation of this pool, or if it has already been returned. The pool is not modified
    /// in that case.
    pub fn reserve(&mut self, block: Block) -> Result<()> {
        let index = self.locate(&block).inspect_err(|e| {
            error!(
                block = %block.id(),
                offset = block.offset(),
                len = block.len(),
                block_identity = %block.identity(),
                pool = %self.identity,
                tracked = self.blocks.len(),
                "rejected returned block: {e}"
            );
        })?;

        self.blocks.swap_remove(index);

        // The previously last block now sits at `index`, out of order unless it was removed.
        if index < self.blocks.len() {
            self.blocks_sorted = false;
        }

        Ok(())
    }

    /// Moves the pool contents into a new buffer of `new_size` bytes.
    ///
    /// Live blocks keep their identifiers, offsets and contents. Bytes added at the end are
    /// initialized according to the pool's [`FillPolicy`].
    ///
    /// The pool moves to a new generation: every previously issued [`Block`] is rejected from
    /// now on. Owners of live blocks obtain current handles via [`get_by_id()`][Self::get_by_id].
    /// Because resizing requires exclusive access to the pool, no view into the old buffer can
    /// outlive the resize.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldTruncateBlocks`] if `new_size` would cut off part of a live block.
    /// The pool is not modified in that case.
    ///
    /// # Panics
    ///
    /// Panics if `new_size` is zero. Allocation failure is reported via
    /// [`std::alloc::handle_alloc_error()`].
    pub fn resize_buffer(&mut self, new_size: usize) -> Result<()> {
        let required = self
            .blocks
            .iter()
            .map(TrackedBlock::end)
            .max()
            .unwrap_or(0);

        if new_size < required {
            return Err(Error::WouldTruncateBlocks {
                requested: new_size,
                required,
            });
        }

        let old_len = self.buffer.len();
        let old_identity = self.identity;

        self.buffer
            .resize(new_size, self.buffer.alignment(), self.fill_policy);
        self.identity = self.identity.next_generation();

        debug!(
            old_len,
            new_len = new_size,
            tracked = self.blocks.len(),
            old_identity = %old_identity,
            new_identity = %self.identity,
            "resized pool buffer"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Changes how many blocks the pool can track concurrently. The buffer is not touched and
    /// issued blocks remain valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityBelowTracked`] if more than `new_capacity` blocks are live.
    ///
    /// # Panics
    ///
    /// Panics if `new_capacity` is zero.
    pub fn resize_block_capacity(&mut self, new_capacity: usize) -> Result<()> {
        assert!(new_capacity > 0, "SpanPool must be able to track at least one block");

        let tracked = self.blocks.len();

        if new_capacity < tracked {
            return Err(Error::CapacityBelowTracked {
                requested: new_capacity,
                tracked,
            });
        }

        if new_capacity > self.blocks.capacity() {
            self.blocks.reserve_exact(
                new_capacity
                    .checked_sub(tracked)
                    .expect("guarded by the comparison with the tracked count above"),
            );
        } else {
            self.blocks.shrink_to(new_capacity);
        }

        debug!(
            old_capacity = self.block_capacity,
            new_capacity,
            tracked,
            pool = %self.identity,
            "resized block capacity"
        );

        self.block_capacity = new_capacity;

        Ok(())
    }

    /// Whether a live block carries the given identifier.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.iter().any(|tracked| tracked.id == id)
    }

    /// Returns a current handle to the live block with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBlock`] if no live block carries the identifier.
    pub fn get_by_id(&self, id: BlockId) -> Result<Block> {
        self.blocks
            .iter()
            .find(|tracked| tracked.id == id)
            .map(|tracked| tracked.to_block(self.identity))
            .ok_or(Error::UnknownBlock {
                id,
                pool_identity: self.identity,
            })
    }

    /// Whether any byte in `range` belongs to a live block.
    ///
    /// Owners use this to prove that everything they handed out has been returned before they
    /// dispose of or resize the pool.
    #[must_use]
    pub fn is_range_allocated(&self, range: Range<usize>) -> bool {
        !range.is_empty()
            && self
                .blocks
                .iter()
                .any(|tracked| tracked.offset < range.end && range.start < tracked.end())
    }

    /// Iterates over current handles to all live blocks, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Block> {
        self.blocks
            .iter()
            .map(|tracked| tracked.to_block(self.identity))
    }

    /// A shared view of the bytes of a block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the block is not a live block of the current
    /// generation of this pool.
    pub fn view(&self, block: &Block) -> Result<BufferView<'_>> {
        self.locate(block)?;

        Ok(self.buffer.view(block.range()))
    }

    /// An exclusive view of the bytes of a block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the block is not a live block of the current
    /// generation of this pool.
    pub fn view_mut(&mut self, block: &Block) -> Result<BufferViewMut<'_>> {
        self.locate(block)?;

        Ok(self.buffer.view_mut(block.range()))
    }

    /// The absolute address of the first byte of a block.
    ///
    /// The address is only meaningful until the buffer is next resized. It is valid for reads
    /// for as long as the pool is not mutated; use [`view_mut()`][Self::view_mut] to write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if the block is not a live block of the current
    /// generation of this pool.
    pub fn block_ptr(&self, block: &Block) -> Result<NonNull<u8>> {
        Ok(NonNull::from(self.view(block)?.as_bytes()).cast())
    }

    /// Calls `f` with the bytes of each listed block, spreading the calls over worker threads.
    ///
    /// Each call receives exclusive access to the bytes of one block. All workers have finished
    /// when this returns. As the pool is borrowed exclusively for the duration of the call, no
    /// resize or disposal can overlap with the work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] if any block is not a live block of the current
    /// generation of this pool and [`Error::DuplicateBlock`] if a block is listed twice.
    /// No calls are made in either case.
    ///
    /// # Panics
    ///
    /// If `f` panics on a worker thread, the panic is resumed on the calling thread after all
    /// workers have finished.
    ///
    /// # Example
    ///
    /// ```
    /// use span_pool::SpanPool;
    ///
    /// let mut pool = SpanPool::new(1024, 8);
    /// let blocks = [pool.get(10).unwrap(), pool.get(20).unwrap()];
    ///
    /// pool.for_each_block_parallel(&blocks, |block, bytes| {
    ///     bytes.fill(block.len() as u8);
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(pool[&blocks[1]][0], 20);
    /// ```
    pub fn for_each_block_parallel<F>(&mut self, blocks: &[Block], f: F) -> Result<()>
    where
        F: Fn(Block, &mut [u8]) + Sync,
    {
        for block in blocks {
            self.locate(block)?;
        }

        let mut ordered = blocks.to_vec();
        ordered.sort_unstable_by_key(Block::offset);

        // Live blocks never overlap, so only a repeated block can share an offset.
        for pair in ordered.windows(2) {
            if let [a, b] = pair {
                if a.id() == b.id() {
                    return Err(Error::DuplicateBlock { id: a.id() });
                }
            }
        }

        let mut work: Vec<(Block, &mut [u8])> = Vec::with_capacity(ordered.len());
        let mut remaining = self.buffer.as_mut_slice();
        let mut consumed = 0_usize;

        for block in ordered {
            let gap = block
                .offset()
                .checked_sub(consumed)
                .expect("blocks are sorted by offset and do not overlap");

            let (_, rest) = mem::take(&mut remaining).split_at_mut(gap);
            let (bytes, rest) = rest.split_at_mut(block.len());

            remaining = rest;
            consumed = block.end();
            work.push((block, bytes));
        }

        let workers = thread::available_parallelism().map_or(1, NonZero::get);
        let chunk_len = work.len().div_ceil(workers).max(1);
        let f = &f;

        thread::scope(|scope| {
            for chunk in work.chunks_mut(chunk_len) {
                scope.spawn(move || {
                    for (block, bytes) in chunk {
                        f(*block, &mut **bytes);
                    }
                });
            }
        });

        Ok(())
    }

    /// Releases the pool and its buffer.
    ///
    /// Equivalent to dropping the pool. If the pool was created with
    /// [`DropPolicy::MustNotDropBlocks`], this panics if any block is still live.
    pub fn dispose(self) {
        drop(self);
    }

    /// Finds the index of a block in the tracking list, validating its ownership first.
    fn locate(&self, block: &Block) -> Result<usize> {
        let reason = if !block.identity().is_same_pool(self.identity) {
            Some(InvalidHandleReason::ForeignPool)
        } else if block.identity() != self.identity {
            Some(InvalidHandleReason::StaleGeneration)
        } else {
            None
        };

        let index = match reason {
            Some(reason) => Err(reason),
            None => self
                .blocks
                .iter()
                .position(|tracked| tracked.matches(block))
                .ok_or(InvalidHandleReason::NotTracked),
        };

        index.map_err(|reason| Error::InvalidHandle {
            block: block.id(),
            block_identity: block.identity(),
            pool_identity: self.identity,
            reason,
        })
    }

    fn ensure_sorted(&mut self) {
        if !self.blocks_sorted {
            self.blocks.sort_unstable_by_key(|tracked| tracked.offset);
            self.blocks_sorted = true;
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.blocks.len() <= self.block_capacity,
            "{} live blocks exceed block capacity {}",
            self.blocks.len(),
            self.block_capacity
        );

        let mut ranges = self
            .blocks
            .iter()
            .map(TrackedBlock::range)
            .collect::<Vec<_>>();
        ranges.sort_unstable_by_key(|range| range.start);

        for range in &ranges {
            assert!(
                range.end <= self.buffer.len(),
                "block {} extends beyond buffer of {} bytes",
                crate::error::describe_range(range),
                self.buffer.len()
            );
        }

        for pair in ranges.windows(2) {
            if let [a, b] = pair {
                let required_start = a
                    .end
                    .checked_add(self.spacing.margin())
                    .expect("block ends are within the buffer");

                assert!(
                    required_start <= b.start,
                    "blocks {} and {} are closer than the margin of {} bytes",
                    crate::error::describe_range(a),
                    crate::error::describe_range(b),
                    self.spacing.margin()
                );
            }
        }

        if self.blocks_sorted {
            assert!(
                self.blocks.is_sorted_by_key(|tracked| tracked.offset),
                "block list is flagged as sorted but is not"
            );
        }
    }
}

impl<A: GlobalAlloc> Drop for SpanPool<A> {
    fn drop(&mut self) {
        if self.blocks.is_empty() {
            return;
        }

        match self.drop_policy {
            DropPolicy::MayDropBlocks => {
                debug!(
                    tracked = self.blocks.len(),
                    pool = %self.identity,
                    "dropping pool with live blocks"
                );
            }
            DropPolicy::MustNotDropBlocks => {
                // If we are already panicking, we do not want to panic again because that will
                // simply obscure whatever the original panic was, leading to debug difficulties.
                if !thread::panicking() {
                    panic!(
                        "dropped SpanPool {} with {} live blocks - this is forbidden by DropPolicy::MustNotDropBlocks",
                        self.identity,
                        self.blocks.len()
                    );
                }
            }
        }
    }
}

impl<A: GlobalAlloc> Index<&Block> for SpanPool<A> {
    type Output = [u8];

    /// # Panics
    ///
    /// Panics if the block is not a live block of the current generation of this pool.
    fn index(&self, block: &Block) -> &Self::Output {
        self.view(block)
            .unwrap_or_else(|e| panic!("cannot access block: {e}"))
            .as_bytes()
    }
}

impl<A: GlobalAlloc> IndexMut<&Block> for SpanPool<A> {
    /// # Panics
    ///
    /// Panics if the block is not a live block of the current generation of this pool.
    fn index_mut(&mut self, block: &Block) -> &mut Self::Output {
        self.view_mut(block)
            .unwrap_or_else(|e| panic!("cannot access block: {e}"))
            .into_bytes()
    }
}

impl<A: GlobalAlloc> fmt::Debug for SpanPool<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanPool")
            .field("identity", &self.identity)
            .field("buffer", &self.buffer)
            .field("tracked", &self.blocks.len())
            .field("block_capacity", &self.block_capacity)
            .field("spacing", &self.spacing)
            .field("fill_policy", &self.fill_policy)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use tracing::Level;

    use super::*;
    use crate::test_alloc::CountingAllocator;
    use crate::test_subscriber::capture_events;

    assert_impl_all!(SpanPool: Send, fmt::Debug);
    assert_not_impl_any!(SpanPool: Sync);

    fn offsets(pool: &SpanPool) -> Vec<usize> {
        let mut offsets = pool.iter().map(|block| block.offset()).collect::<Vec<_>>();
        offsets.sort_unstable();
        offsets
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = SpanPool::new(1024, 4);

        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.state(), PoolState::Empty);
        assert_eq!(pool.buffer_len(), 1024);
        assert_eq!(pool.block_capacity(), 4);
        assert_eq!(pool.block_margin(), 4);
        assert_eq!(pool.block_alignment(), 1);
        assert_eq!(pool.identity().generation(), 0);
    }

    #[test]
    fn blocks_are_placed_first_fit_with_margin() {
        let mut pool = SpanPool::new(1024, 4);

        let a = pool.get(100).unwrap();
        let b = pool.get(100).unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 104);
        assert_eq!(a.len(), 100);
        assert_eq!(a.identity(), pool.identity());
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.state(), PoolState::Populated);

        pool.integrity_check();
    }

    #[test]
    fn returned_range_is_reused() {
        let mut pool = SpanPool::new(1024, 4);

        let a = pool.get(100).unwrap();
        let _b = pool.get(100).unwrap();

        pool.reserve(a).unwrap();
        let c = pool.get(90).unwrap();

        assert_eq!(c.offset(), 0);
        assert_ne!(c.id(), a.id());

        pool.integrity_check();
    }

    #[test]
    fn gap_placement_keeps_later_searches_correct() {
        let mut pool = SpanPool::new(1024, 8);

        let a = pool.get(100).unwrap();
        let _b = pool.get(100).unwrap();
        let _c = pool.get(100).unwrap();

        pool.reserve(a).unwrap();

        // Lands in front of the others, leaving the list out of order until the next search.
        let d = pool.get(50).unwrap();
        assert_eq!(d.offset(), 0);

        let e = pool.get(40).unwrap();
        assert_eq!(e.offset(), 54);

        let f = pool.get(100).unwrap();
        assert_eq!(f.offset(), 312);

        assert_eq!(offsets(&pool), vec![0, 54, 104, 208, 312]);
        pool.integrity_check();
    }

    #[test]
    #[should_panic]
    fn zero_length_panics() {
        let mut pool = SpanPool::new(1024, 4);

        _ = pool.get(0);
    }

    #[test]
    fn full_tracking_list_is_reported() {
        let mut pool = SpanPool::new(1024, 2);

        _ = pool.get(10).unwrap();
        _ = pool.get(10).unwrap();

        assert!(pool.is_full());
        assert_eq!(pool.state(), PoolState::Full);
        assert!(pool.try_get(10).is_none());

        let error = pool.get(10).unwrap_err();
        assert!(matches!(
            error,
            Error::CapacityExhausted {
                requested: 10,
                capacity: 2
            }
        ));
        assert!(error.is_recoverable_by_growth());

        pool.resize_block_capacity(3).unwrap();

        assert_eq!(pool.state(), PoolState::Populated);
        assert!(pool.try_get(10).is_some());
        assert_eq!(pool.state(), PoolState::Full);
    }

    #[test]
    fn exhausted_address_space_is_reported() {
        let mut pool = SpanPool::new(100, 4);

        _ = pool.get(60).unwrap();

        let error = pool.get(40).unwrap_err();
        assert!(matches!(
            error,
            Error::AddressSpaceExhausted {
                requested: 40,
                buffer_len: 100,
                tracked: 1
            }
        ));
        assert!(error.is_recoverable_by_growth());

        // Exactly fills the tail after the margin.
        assert_eq!(pool.try_get(36).map(|b| b.offset()), Some(64));
        assert_eq!(pool.state(), PoolState::Populated);
    }

    #[test]
    fn block_from_other_pool_is_rejected() {
        let mut pool_a = SpanPool::new(1024, 4);
        let mut pool_b = SpanPool::new(1024, 4);

        let a = pool_a.get(10).unwrap();
        let b = pool_b.get(10).unwrap();

        let error = pool_b.reserve(a).unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidHandle {
                reason: InvalidHandleReason::ForeignPool,
                ..
            }
        ));
        assert!(!error.is_recoverable_by_growth());

        assert_eq!(pool_b.len(), 1);
        assert!(pool_b.contains(b.id()));
        assert!(pool_b.view(&a).is_err());
    }

    #[test]
    fn double_return_is_rejected() {
        let mut pool = SpanPool::new(1024, 4);

        let a = pool.get(10).unwrap();
        pool.reserve(a).unwrap();

        assert!(matches!(
            pool.reserve(a),
            Err(Error::InvalidHandle {
                reason: InvalidHandleReason::NotTracked,
                ..
            })
        ));
    }

    #[test]
    fn block_from_previous_generation_is_rejected() {
        let mut pool = SpanPool::new(1024, 4);

        let old = pool.get(10).unwrap();
        pool.resize_buffer(2048).unwrap();

        assert!(matches!(
            pool.reserve(old),
            Err(Error::InvalidHandle {
                reason: InvalidHandleReason::StaleGeneration,
                ..
            })
        ));
        assert_eq!(pool.len(), 1);

        let current = pool.get_by_id(old.id()).unwrap();
        assert_eq!(current.offset(), old.offset());
        assert_eq!(current.len(), old.len());
        assert_eq!(current.identity(), pool.identity());
        assert_ne!(current, old);

        pool.reserve(current).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn resize_preserves_contents_and_fills_tail() {
        let mut pool = SpanPool::builder()
            .buffer_size(200)
            .fill_policy(FillPolicy::Pattern(0xAB))
            .build();

        let block = pool.get(50).unwrap();
        pool[&block].fill(3);

        pool.resize_buffer(400).unwrap();

        let block = pool.get_by_id(block.id()).unwrap();
        assert!(pool[&block].iter().all(|&b| b == 3));
        assert!(pool.buffer().as_slice()[200..].iter().all(|&b| b == 0xAB));
        assert_eq!(pool.identity().generation(), 1);
    }

    #[test]
    fn resize_cannot_truncate_live_blocks() {
        let mut pool = SpanPool::new(1024, 4);

        let _a = pool.get(100).unwrap();
        let _b = pool.get(100).unwrap();
        let identity = pool.identity();

        assert!(matches!(
            pool.resize_buffer(203),
            Err(Error::WouldTruncateBlocks {
                requested: 203,
                required: 204
            })
        ));
        assert_eq!(pool.identity(), identity);
        assert_eq!(pool.buffer_len(), 1024);

        pool.resize_buffer(204).unwrap();
        assert_eq!(pool.buffer_len(), 204);
    }

    #[test]
    fn resize_goes_through_injected_allocator() {
        let allocator = CountingAllocator::default();

        let mut pool = SpanPool::builder()
            .buffer_size(64)
            .allocator(allocator.clone())
            .build();

        pool.resize_buffer(128).unwrap();
        assert_eq!(allocator.allocations(), 2);
        assert_eq!(allocator.deallocations(), 1);

        pool.dispose();
        assert_eq!(allocator.deallocations(), 2);
    }

    #[test]
    fn block_capacity_cannot_drop_below_tracked() {
        let mut pool = SpanPool::new(1024, 4);

        _ = pool.get(10).unwrap();
        _ = pool.get(10).unwrap();

        assert!(matches!(
            pool.resize_block_capacity(1),
            Err(Error::CapacityBelowTracked {
                requested: 1,
                tracked: 2
            })
        ));

        pool.resize_block_capacity(2).unwrap();
        assert_eq!(pool.block_capacity(), 2);
        assert!(pool.is_full());
    }

    #[test]
    fn capacity_resize_keeps_handles_valid() {
        let mut pool = SpanPool::new(1024, 1);

        let a = pool.get(10).unwrap();
        pool.resize_block_capacity(100).unwrap();

        assert!(pool.view(&a).is_ok());
        pool.reserve(a).unwrap();
    }

    #[test]
    fn lookup_by_id() {
        let mut pool = SpanPool::new(1024, 4);

        let a = pool.get(10).unwrap();

        assert!(pool.contains(a.id()));
        assert_eq!(pool.get_by_id(a.id()).unwrap(), a);

        pool.reserve(a).unwrap();

        assert!(!pool.contains(a.id()));
        assert!(matches!(
            pool.get_by_id(a.id()),
            Err(Error::UnknownBlock { .. })
        ));
    }

    #[test]
    fn range_allocation_query() {
        let mut pool = SpanPool::new(1024, 4);

        let _a = pool.get(10).unwrap();
        let _b = pool.get(10).unwrap();

        assert!(pool.is_range_allocated(0..1));
        assert!(pool.is_range_allocated(9..15));
        assert!(!pool.is_range_allocated(10..14));
        assert!(pool.is_range_allocated(13..15));
        assert!(!pool.is_range_allocated(24..1024));
        assert!(!pool.is_range_allocated(5..5));
    }

    #[test]
    fn views_cover_block_only() {
        let mut pool = SpanPool::new(64, 4);

        let a = pool.get(8).unwrap();
        let b = pool.get(8).unwrap();

        pool.view_mut(&a).unwrap().fill(1);
        pool.view_mut(&b).unwrap().write::<u32>(1, 0xDEAD_BEEF);

        assert_eq!(pool.view(&a).unwrap().len(), 8);
        assert_eq!(pool.view(&b).unwrap().read::<u32>(1), 0xDEAD_BEEF);
        assert!(pool.buffer().as_slice()[8..12].iter().all(|&x| x == 0));
    }

    #[test]
    fn block_ptr_is_base_plus_offset() {
        let mut pool = SpanPool::new(64, 4);

        let _a = pool.get(8).unwrap();
        let b = pool.get(8).unwrap();

        let ptr = pool.block_ptr(&b).unwrap();
        assert_eq!(ptr.as_ptr().cast_const(), pool.buffer().as_ptr().wrapping_add(12));
    }

    #[test]
    #[should_panic]
    fn indexing_with_returned_block_panics() {
        let mut pool = SpanPool::new(64, 4);

        let a = pool.get(8).unwrap();
        pool.reserve(a).unwrap();

        _ = pool[&a][0];
    }

    #[test]
    fn parallel_work_reaches_every_block() {
        let mut pool = SpanPool::new(4096, 64);
        let blocks = (1..=40)
            .map(|len| pool.get(len).unwrap())
            .collect::<Vec<_>>();

        let calls = AtomicUsize::new(0);

        pool.for_each_block_parallel(&blocks, |block, bytes| {
            assert_eq!(bytes.len(), block.len());
            bytes.fill(u8::try_from(block.len()).unwrap());
            calls.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 40);

        for block in &blocks {
            let expected = u8::try_from(block.len()).unwrap();
            assert!(pool[block].iter().all(|&b| b == expected));
        }

        pool.integrity_check();
    }

    #[test]
    fn parallel_work_with_no_blocks_does_nothing() {
        let mut pool = SpanPool::new(64, 4);

        pool.for_each_block_parallel(&[], |_, _| panic!("no blocks were listed"))
            .unwrap();
    }

    #[test]
    fn parallel_work_rejects_duplicates() {
        let mut pool = SpanPool::new(64, 4);
        let a = pool.get(8).unwrap();

        assert!(matches!(
            pool.for_each_block_parallel(&[a, a], |_, _| {}),
            Err(Error::DuplicateBlock { .. })
        ));
    }

    #[test]
    fn parallel_work_rejects_stale_blocks() {
        let mut pool = SpanPool::new(64, 4);
        let a = pool.get(8).unwrap();

        pool.resize_buffer(128).unwrap();

        assert!(matches!(
            pool.for_each_block_parallel(&[a], |_, _| {}),
            Err(Error::InvalidHandle {
                reason: InvalidHandleReason::StaleGeneration,
                ..
            })
        ));
    }

    #[test]
    fn may_drop_blocks_by_default() {
        let mut pool = SpanPool::new(64, 4);
        _ = pool.get(8).unwrap();

        drop(pool);
    }

    #[test]
    fn must_not_drop_blocks_allows_empty_drop() {
        let mut pool = SpanPool::builder()
            .buffer_size(64)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build();

        let a = pool.get(8).unwrap();
        pool.reserve(a).unwrap();

        pool.dispose();
    }

    #[test]
    #[should_panic]
    fn must_not_drop_blocks_panics_with_live_blocks() {
        let mut pool = SpanPool::builder()
            .buffer_size(64)
            .drop_policy(DropPolicy::MustNotDropBlocks)
            .build();

        _ = pool.get(8).unwrap();

        pool.dispose();
    }

    #[test]
    fn unmanaged_buffer_is_left_to_owner() {
        let allocator = CountingAllocator::default();
        let mut backing = vec![0_u8; 64].into_boxed_slice();
        let ptr = NonNull::from(&mut *backing).cast::<u8>();

        let buffer = unsafe { RawBuffer::from_raw_parts_in(ptr, 64, 1, allocator.clone()) };
        let mut pool = SpanPool::from_buffer(buffer, 4);

        let a = pool.get(4).unwrap();
        pool[&a].copy_from_slice(&[1, 2, 3, 4]);
        pool.dispose();

        assert_eq!(allocator.deallocations(), 0);
        assert_eq!(&backing[..5], &[1, 2, 3, 4, 0]);
    }

    #[test]
    fn aligned_blocks() {
        let mut pool = SpanPool::builder()
            .buffer_size(256)
            .block_alignment(16)
            .build();

        let a = pool.get(3).unwrap();
        let b = pool.get(3).unwrap();
        let c = pool.get(13).unwrap();

        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 16);
        assert_eq!(c.offset(), 32);
        assert_eq!(pool.block_ptr(&b).unwrap().as_ptr().addr() % 16, 0);
    }

    #[test]
    fn failed_get_logs_warning_with_request_context() {
        let mut pool = SpanPool::new(64, 4);
        _ = pool.get(20).unwrap();
        let identity = pool.identity().to_string();

        let (result, capture) = capture_events(|| pool.get(100));

        assert!(matches!(result, Err(Error::AddressSpaceExhausted { .. })));

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);

        let event = &warnings[0];
        assert_eq!(event.field("requested"), Some("100"));
        assert_eq!(event.field("buffer_len"), Some("64"));
        assert_eq!(event.field("tracked"), Some("1"));
        assert_eq!(event.field("block_capacity"), Some("4"));
        assert_eq!(event.field("pool"), Some(identity.as_str()));
        assert!(event.message().starts_with("failed to obtain block"));
    }

    #[test]
    fn exhausted_tracking_list_logs_warning_with_capacity() {
        let mut pool = SpanPool::new(1024, 1);
        _ = pool.get(8).unwrap();

        let (result, capture) = capture_events(|| pool.get(8));

        assert!(matches!(result, Err(Error::CapacityExhausted { .. })));

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field("requested"), Some("8"));
        assert_eq!(warnings[0].field("block_capacity"), Some("1"));
        assert_eq!(warnings[0].field("tracked"), Some("1"));
    }

    #[test]
    fn successful_get_and_try_get_log_nothing() {
        let mut pool = SpanPool::new(64, 4);

        let (blocks, capture) = capture_events(|| (pool.get(8), pool.try_get(100)));

        _ = blocks.0.unwrap();
        assert!(blocks.1.is_none());
        assert!(capture.events().is_empty());
    }

    #[test]
    fn rejected_reserve_logs_error_with_both_identities() {
        let mut pool_a = SpanPool::new(64, 4);
        let mut pool_b = SpanPool::new(64, 4);

        let foreign = pool_a.get(8).unwrap();
        let pool_identity = pool_b.identity().to_string();
        let block_identity = foreign.identity().to_string();

        let (result, capture) = capture_events(|| pool_b.reserve(foreign));

        assert!(matches!(
            result,
            Err(Error::InvalidHandle {
                reason: InvalidHandleReason::ForeignPool,
                ..
            })
        ));

        let errors = capture.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);

        let event = &errors[0];
        assert_eq!(event.field("pool"), Some(pool_identity.as_str()));
        assert_eq!(event.field("block_identity"), Some(block_identity.as_str()));
        assert_eq!(event.field("block"), Some(foreign.id().to_string().as_str()));
        assert_eq!(event.field("len"), Some("8"));
        assert_eq!(event.field("tracked"), Some("0"));
        assert!(event.message().starts_with("rejected returned block"));
    }

    #[test]
    fn accepted_reserve_logs_nothing() {
        let mut pool = SpanPool::new(64, 4);
        let block = pool.get(8).unwrap();

        let (result, capture) = capture_events(|| pool.reserve(block));

        result.unwrap();
        assert!(capture.events().is_empty());
    }

    #[test]
    fn buffer_resize_logs_generation_change() {
        let mut pool = SpanPool::new(64, 4);
        let old_identity = pool.identity().to_string();

        let (result, capture) = capture_events(|| pool.resize_buffer(128));
        result.unwrap();

        let debug = capture.at_level(Level::DEBUG);
        assert_eq!(debug.len(), 1);
        assert_eq!(debug[0].field("old_len"), Some("64"));
        assert_eq!(debug[0].field("new_len"), Some("128"));
        assert_eq!(debug[0].field("old_identity"), Some(old_identity.as_str()));
        assert_eq!(
            debug[0].field("new_identity"),
            Some(pool.identity().to_string().as_str())
        );
    }
}
