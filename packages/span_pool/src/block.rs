use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use derive_more::derive::Display;

/// A process-unique identifier of a block, independent of the block's position in the buffer.
///
/// The identifier stays the same when the pool buffer is resized, so an owner can hold on to it
/// and look up a fresh [`Block`] through [`SpanPool::get_by_id()`][1] after the pool moves
/// to a new generation.
///
/// [1]: crate::SpanPool::get_by_id
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{_0}")]
pub struct BlockId(u64);

impl BlockId {
    pub(crate) fn next() -> Self {
        // Starts at 1 so that a zeroed value is never a live identifier.
        static NEXT: AtomicU64 = AtomicU64::new(1);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw value of the identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// The identity of one generation of one pool.
///
/// Every block is stamped with the identity of the pool that issued it. The pool rejects blocks
/// whose stamp does not match its own, which catches blocks returned to the wrong pool as well as
/// blocks issued before the pool buffer was last reallocated.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[display("pool {pool} gen {generation}")]
pub struct PoolIdentity {
    pool: u64,
    generation: u32,
}

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

/// Takes the next number from a pool counter. A wrapped counter would hand out the number of a
/// live pool again, so exhaustion panics instead.
fn take_pool_number(counter: &AtomicU64) -> u64 {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
        .expect("pool numbers are never exhausted in any realistic scenario")
}

impl PoolIdentity {
    pub(crate) fn new_pool() -> Self {
        Self {
            pool: take_pool_number(&NEXT_POOL),
            generation: 0,
        }
    }

    /// Returns the identity of the next generation of the same pool.
    #[must_use]
    pub(crate) fn next_generation(self) -> Self {
        Self {
            pool: self.pool,
            generation: self
                .generation
                .checked_add(1)
                .expect("a pool cannot be reallocated 4 billion times in any realistic scenario"),
        }
    }

    /// The process-unique number of the pool this identity belongs to.
    #[must_use]
    pub fn pool(self) -> u64 {
        self.pool
    }

    /// How many times the pool buffer had been reallocated when this identity was current.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Whether both identities belong to the same pool, regardless of generation.
    #[must_use]
    pub fn is_same_pool(self, other: Self) -> bool {
        self.pool == other.pool
    }
}

/// Why a pool rejected a block handle.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum InvalidHandleReason {
    /// The block was issued by a different pool.
    #[display("block belongs to a different pool")]
    ForeignPool,

    /// The block was issued by this pool before its buffer was last reallocated.
    #[display("block was issued by an earlier generation of this pool")]
    StaleGeneration,

    /// The block is not (or no longer) tracked by this pool, typically because it was
    /// already returned.
    #[display("block is not tracked by this pool")]
    NotTracked,
}

/// A reserved range of bytes in a [`SpanPool`][crate::SpanPool] buffer.
///
/// A block is a capability token, not an owner. The memory stays owned by the pool and is only
/// reachable through the pool, which checks on every access that the block was issued by the
/// current generation of that pool and has not been returned yet.
///
/// The range is stored relative to the start of the pool buffer, so it is unaffected by the
/// buffer moving in memory. Use [`SpanPool::block_ptr()`][1] to obtain the absolute address.
///
/// Two blocks compare equal if they describe the same range of the same pool generation.
///
/// [1]: crate::SpanPool::block_ptr
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub struct Block {
    identity: PoolIdentity,
    id: BlockId,
    offset: usize,
    len: usize,
}

impl Block {
    pub(crate) fn new(identity: PoolIdentity, id: BlockId, offset: usize, len: usize) -> Self {
        Self {
            identity,
            id,
            offset,
            len,
        }
    }

    /// The identity of the pool generation that issued this block.
    #[must_use]
    pub fn identity(&self) -> PoolIdentity {
        self.identity
    }

    /// The stable identifier of the block.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Offset of the first byte of the block from the start of the pool buffer.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the block in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block has zero length. Pools never issue such blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset one past the last byte of the block.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset
            .checked_add(self.len)
            .expect("pool never issues a block that extends beyond the address space")
    }

    /// The byte range of the block, relative to the start of the pool buffer.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Whether the two blocks share at least one byte.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Block: Copy, Send, Sync);
    assert_impl_all!(BlockId: Copy, Send, Sync, Ord);
    assert_impl_all!(PoolIdentity: Copy, Send, Sync);

    #[test]
    fn block_ids_are_unique() {
        let a = BlockId::next();
        let b = BlockId::next();

        assert_ne!(a, b);
        assert!(a.get() > 0);
    }

    #[test]
    fn pools_get_distinct_identities() {
        let a = PoolIdentity::new_pool();
        let b = PoolIdentity::new_pool();

        assert_ne!(a, b);
        assert!(!a.is_same_pool(b));
        assert_eq!(a.generation(), 0);
    }

    #[test]
    fn pool_numbers_increase() {
        let counter = AtomicU64::new(7);

        assert_eq!(take_pool_number(&counter), 7);
        assert_eq!(take_pool_number(&counter), 8);
    }

    #[test]
    #[should_panic]
    fn exhausted_pool_numbers_panic_instead_of_wrapping() {
        let counter = AtomicU64::new(u64::MAX);

        take_pool_number(&counter);
    }

    #[test]
    fn next_generation_keeps_pool() {
        let first = PoolIdentity::new_pool();
        let second = first.next_generation();

        assert!(first.is_same_pool(second));
        assert_ne!(first, second);
        assert_eq!(second.generation(), 1);
    }

    #[test]
    fn range_and_end() {
        let block = Block::new(PoolIdentity::new_pool(), BlockId::next(), 100, 50);

        assert_eq!(block.end(), 150);
        assert_eq!(block.range(), 100..150);
        assert!(!block.is_empty());
    }

    #[test]
    fn overlap_is_symmetric_and_half_open() {
        let identity = PoolIdentity::new_pool();
        let a = Block::new(identity, BlockId::next(), 0, 10);
        let b = Block::new(identity, BlockId::next(), 10, 10);
        let c = Block::new(identity, BlockId::next(), 5, 10);

        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn display_formats() {
        let identity = PoolIdentity {
            pool: 7,
            generation: 2,
        };

        assert_eq!(identity.to_string(), "pool 7 gen 2");
        assert_eq!(BlockId(42).to_string(), "#42");
        assert_eq!(
            InvalidHandleReason::StaleGeneration.to_string(),
            "block was issued by an earlier generation of this pool"
        );
    }
}
