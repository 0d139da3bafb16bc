use std::alloc::{GlobalAlloc, Layout, System, handle_alloc_error};
use std::ops::{Index, IndexMut, Range};
use std::ptr::{self, NonNull};
use std::{fmt, mem, slice};

use tracing::{debug, warn};

use crate::error::describe_range;
use crate::{BufferView, BufferViewMut};

/// How newly allocated bytes are initialized before safe code can observe them.
///
/// Bytes are never handed out uninitialized. When the caller has no use for zeroes, a
/// recognizable pattern is written instead, which makes reads of never-written memory easy
/// to spot in a debugger.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum FillPolicy {
    /// New bytes are zero. This is the default.
    #[default]
    Zero,

    /// New bytes are set to the given value.
    Pattern(u8),
}

impl FillPolicy {
    /// The byte value that new memory is filled with.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Pattern(byte) => byte,
        }
    }
}

/// Who is responsible for releasing the memory of a [`RawBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum AllocatorTag {
    /// The buffer allocated the memory itself and releases it when disposed or dropped.
    Managed,

    /// The buffer wraps memory owned by someone else and never releases it.
    Unmanaged,
}

/// A single contiguous, fixed-size, aligned region of memory.
///
/// The buffer is the only place in this crate that works with raw pointers. Safe code reaches
/// the bytes through slices and [views][BufferView], all of which are bounds checked.
///
/// The memory comes from the allocator `A`, which is [`System`] unless another
/// [`GlobalAlloc`] is injected via [`allocate_in()`][Self::allocate_in].
///
/// # Resizing
///
/// [`resize()`][Self::resize] moves the contents into a new region and releases the old one.
/// The buffer is updated only after the new region has been obtained and populated, so a caller
/// never observes a half-resized buffer.
pub struct RawBuffer<A: GlobalAlloc = System> {
    ptr: NonNull<u8>,

    /// Size and alignment of the region at `ptr`. For managed buffers this is also the layout
    /// the region was allocated with, which `dealloc` requires us to repeat.
    layout: Layout,

    tag: AllocatorTag,

    allocator: A,
}

impl RawBuffer<System> {
    /// Allocates a buffer of `size` bytes aligned to `alignment` from the system allocator.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `alignment` is not a power of two.
    ///
    /// Allocation failure is reported via [`handle_alloc_error()`], which does not return.
    #[must_use]
    pub fn allocate(size: usize, alignment: usize, fill: FillPolicy) -> Self {
        Self::allocate_in(size, alignment, fill, System)
    }

    /// Wraps memory owned by someone else.
    ///
    /// The returned buffer is tagged [`AllocatorTag::Unmanaged`] and never releases the memory.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero, `alignment` is not a power of two or `ptr` is not aligned
    /// to `alignment`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is valid for reads and writes of `size` initialized
    /// bytes for as long as the buffer exists and that nothing else accesses that memory during
    /// that time.
    #[must_use]
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize, alignment: usize) -> Self {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { Self::from_raw_parts_in(ptr, size, alignment, System) }
    }
}

impl<A: GlobalAlloc> RawBuffer<A> {
    /// Allocates a buffer of `size` bytes aligned to `alignment` from `allocator`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `alignment` is not a power of two.
    ///
    /// Allocation failure is reported via [`handle_alloc_error()`], which does not return.
    #[must_use]
    pub fn allocate_in(size: usize, alignment: usize, fill: FillPolicy, allocator: A) -> Self {
        let layout = buffer_layout(size, alignment);
        let ptr = allocate_filled(&allocator, layout, fill);

        Self {
            ptr,
            layout,
            tag: AllocatorTag::Managed,
            allocator,
        }
    }

    /// Wraps memory owned by someone else. If the buffer is later resized, the new region is
    /// obtained from `allocator` and the buffer becomes managed.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero, `alignment` is not a power of two or `ptr` is not aligned
    /// to `alignment`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` is valid for reads and writes of `size` initialized
    /// bytes for as long as the buffer exists and that nothing else accesses that memory during
    /// that time.
    #[must_use]
    pub unsafe fn from_raw_parts_in(
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
        allocator: A,
    ) -> Self {
        let layout = buffer_layout(size, alignment);

        assert!(
            ptr.as_ptr().addr().checked_rem(layout.align()) == Some(0),
            "unmanaged memory at {ptr:p} is not aligned to {alignment} bytes"
        );

        Self {
            ptr,
            layout,
            tag: AllocatorTag::Unmanaged,
            allocator,
        }
    }

    /// Size of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always `false`, as buffers cannot be zero-sized. Present for API symmetry with `len()`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Alignment of the start of the buffer, in bytes.
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Whether this buffer releases its memory or leaves that to the memory's real owner.
    #[must_use]
    pub fn tag(&self) -> AllocatorTag {
        self.tag
    }

    /// Pointer to the first byte of the buffer. It changes when the buffer is resized.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// The entire contents of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: The region is valid for `len()` bytes and was initialized either on allocation
        // (see `allocate_filled`) or by the owner of unmanaged memory (a `from_raw_parts`
        // precondition). The shared borrow of `self` prevents concurrent mutation.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// The entire contents of the buffer, mutably.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: As in `as_slice()`, with the exclusive borrow of `self` guaranteeing that this
        // is the only reference into the region.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// A view over a range of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range is not within the buffer.
    #[must_use]
    pub fn view(&self, range: Range<usize>) -> BufferView<'_> {
        let len = self.len();

        let bytes = self
            .as_slice()
            .get(range.clone())
            .unwrap_or_else(|| {
                panic!(
                    "{} is out of bounds of a buffer of {len} bytes",
                    describe_range(&range)
                )
            });

        BufferView::new(bytes)
    }

    /// A mutable view over a range of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range is not within the buffer.
    #[must_use]
    pub fn view_mut(&mut self, range: Range<usize>) -> BufferViewMut<'_> {
        let len = self.len();

        let bytes = self
            .as_mut_slice()
            .get_mut(range.clone())
            .unwrap_or_else(|| {
                panic!(
                    "{} is out of bounds of a buffer of {len} bytes",
                    describe_range(&range)
                )
            });

        BufferViewMut::new(bytes)
    }

    /// Copies `bytes` into the buffer, starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the destination range is not within the buffer.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset
            .checked_add(bytes.len())
            .expect("write range cannot end beyond the address space");

        self.view_mut(offset..end).as_bytes_mut().copy_from_slice(bytes);
    }

    /// Sets every byte of the buffer to `value`.
    pub fn fill(&mut self, value: u8) {
        self.as_mut_slice().fill(value);
    }

    /// Sets every byte of the buffer to zero.
    pub fn clear(&mut self) {
        self.fill(0);
    }

    /// Moves the contents into a new region of `size` bytes aligned to `alignment`.
    ///
    /// The first `min(old_size, size)` bytes are preserved. If the buffer grows, the added tail
    /// is initialized according to `tail`. The old region is released unless the buffer was
    /// [unmanaged][AllocatorTag::Unmanaged], in which case it is left to its owner and the
    /// buffer becomes managed.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `alignment` is not a power of two.
    ///
    /// Allocation failure is reported via [`handle_alloc_error()`], which does not return.
    pub fn resize(&mut self, size: usize, alignment: usize, tail: FillPolicy) {
        let new_layout = buffer_layout(size, alignment);

        // SAFETY: `buffer_layout` guarantees a non-zero size.
        let new_ptr = NonNull::new(unsafe { self.allocator.alloc(new_layout) })
            .unwrap_or_else(|| handle_alloc_error(new_layout));

        let preserved = self.len().min(size);

        // Cannot underflow because `preserved` is at most `size`.
        let tail_len = size.wrapping_sub(preserved);

        // SAFETY: Both regions are valid for at least `preserved` bytes and belong to
        // different allocations, so they cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), preserved);
        }

        // SAFETY: `preserved + tail_len == size`, so the tail lies within the new region.
        unsafe {
            new_ptr
                .as_ptr()
                .add(preserved)
                .write_bytes(tail.byte(), tail_len);
        }

        let old_ptr = mem::replace(&mut self.ptr, new_ptr);
        let old_layout = mem::replace(&mut self.layout, new_layout);
        let old_tag = mem::replace(&mut self.tag, AllocatorTag::Managed);

        match old_tag {
            AllocatorTag::Managed => {
                // SAFETY: The old region was allocated by `self.allocator` with `old_layout`
                // and nothing refers to it anymore.
                unsafe {
                    self.allocator.dealloc(old_ptr.as_ptr(), old_layout);
                }
            }
            AllocatorTag::Unmanaged => {
                debug!(
                    old_len = old_layout.size(),
                    new_len = size,
                    "unmanaged buffer was resized into managed memory, the original memory is left to its owner"
                );
            }
        }
    }

    /// Releases the memory of the buffer.
    ///
    /// Disposing an [unmanaged][AllocatorTag::Unmanaged] buffer leaves the memory untouched and
    /// logs a warning, as the memory belongs to someone else.
    pub fn dispose(self) {
        if self.tag == AllocatorTag::Unmanaged {
            warn!(
                len = self.len(),
                ptr = ?self.ptr,
                "dispose() called on an unmanaged buffer, the memory is owned elsewhere and is left untouched"
            );
        }

        // Drop releases managed memory.
    }
}

impl<A: GlobalAlloc> Drop for RawBuffer<A> {
    fn drop(&mut self) {
        if self.tag == AllocatorTag::Managed {
            // SAFETY: The region was allocated by `self.allocator` with `self.layout` and is
            // released exactly once, here.
            unsafe {
                self.allocator.dealloc(self.ptr.as_ptr(), self.layout);
            }
        }
    }
}

impl<A: GlobalAlloc> Index<usize> for RawBuffer<A> {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        let len = self.len();

        self.as_slice()
            .get(index)
            .unwrap_or_else(|| panic!("index {index} is out of bounds of a buffer of {len} bytes"))
    }
}

impl<A: GlobalAlloc> IndexMut<usize> for RawBuffer<A> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        let len = self.len();

        self.as_mut_slice()
            .get_mut(index)
            .unwrap_or_else(|| panic!("index {index} is out of bounds of a buffer of {len} bytes"))
    }
}

impl<A: GlobalAlloc> fmt::Debug for RawBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .field("tag", &self.tag)
            .field("allocator", &std::any::type_name::<A>())
            .finish()
    }
}

// SAFETY: The buffer exclusively owns (or, if unmanaged, has exclusive use of) the memory behind
// its pointer and does not rely on thread-local state. Moving it to another thread moves that
// exclusive access along with it. The allocator must itself be `Send` to move with it.
unsafe impl<A: GlobalAlloc + Send> Send for RawBuffer<A> {}

fn buffer_layout(size: usize, alignment: usize) -> Layout {
    assert!(size > 0, "RawBuffer must have non-zero size");

    Layout::from_size_align(size, alignment).unwrap_or_else(|_| {
        panic!("RawBuffer of {size} bytes cannot have alignment {alignment}, which must be a power of two")
    })
}

fn allocate_filled<A: GlobalAlloc>(allocator: &A, layout: Layout, fill: FillPolicy) -> NonNull<u8> {
    let ptr = match fill {
        // SAFETY: `buffer_layout` guarantees a non-zero size.
        FillPolicy::Zero => unsafe { allocator.alloc_zeroed(layout) },
        // SAFETY: `buffer_layout` guarantees a non-zero size.
        FillPolicy::Pattern(_) => unsafe { allocator.alloc(layout) },
    };

    let ptr = NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout));

    if let FillPolicy::Pattern(byte) = fill {
        // SAFETY: The region was just allocated for `layout.size()` bytes.
        unsafe {
            ptr.as_ptr().write_bytes(byte, layout.size());
        }
    }

    ptr
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use tracing::Level;

    use super::*;
    use crate::test_alloc::CountingAllocator;
    use crate::test_subscriber::capture_events;

    assert_impl_all!(RawBuffer: Send, std::fmt::Debug);
    assert_not_impl_any!(RawBuffer: Sync);

    #[test]
    fn zero_fill_is_zero() {
        let buffer = RawBuffer::allocate(64, 16, FillPolicy::Zero);

        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.alignment(), 16);
        assert_eq!(buffer.tag(), AllocatorTag::Managed);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn pattern_fill_is_pattern() {
        let buffer = RawBuffer::allocate(33, 1, FillPolicy::Pattern(0xCD));

        assert!(buffer.as_slice().iter().all(|&b| b == 0xCD));
    }

    #[test]
    fn start_is_aligned() {
        let buffer = RawBuffer::allocate(10, 256, FillPolicy::Zero);

        assert_eq!(buffer.as_ptr().addr() % 256, 0);
    }

    #[test]
    fn write_then_index() {
        let mut buffer = RawBuffer::allocate(16, 8, FillPolicy::Zero);

        buffer.write(4, &[1, 2, 3]);
        buffer[15] = 9;

        assert_eq!(buffer[3], 0);
        assert_eq!(buffer[4], 1);
        assert_eq!(buffer[6], 3);
        assert_eq!(buffer[15], 9);
    }

    #[test]
    #[should_panic]
    fn index_out_of_bounds_panics() {
        let buffer = RawBuffer::allocate(16, 8, FillPolicy::Zero);

        _ = buffer[16];
    }

    #[test]
    #[should_panic]
    fn write_out_of_bounds_panics() {
        let mut buffer = RawBuffer::allocate(16, 8, FillPolicy::Zero);

        buffer.write(14, &[1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn zero_size_panics() {
        _ = RawBuffer::allocate(0, 8, FillPolicy::Zero);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        _ = RawBuffer::allocate(16, 12, FillPolicy::Zero);
    }

    #[test]
    fn grow_preserves_prefix_and_fills_tail() {
        let mut buffer = RawBuffer::allocate(8, 8, FillPolicy::Pattern(0xAA));
        buffer.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        buffer.resize(16, 8, FillPolicy::Zero);

        assert_eq!(buffer.len(), 16);
        assert_eq!(&buffer.as_slice()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(buffer.as_slice()[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn shrink_preserves_prefix() {
        let mut buffer = RawBuffer::allocate(8, 8, FillPolicy::Zero);
        buffer.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]);

        buffer.resize(3, 8, FillPolicy::Zero);

        assert_eq!(buffer.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn resize_can_change_alignment() {
        let mut buffer = RawBuffer::allocate(8, 1, FillPolicy::Zero);

        buffer.resize(8, 4096, FillPolicy::Zero);

        assert_eq!(buffer.alignment(), 4096);
        assert_eq!(buffer.as_ptr().addr() % 4096, 0);
    }

    #[test]
    fn injected_allocator_sees_every_allocation() {
        let allocator = CountingAllocator::default();

        let mut buffer = RawBuffer::allocate_in(32, 8, FillPolicy::Zero, allocator.clone());
        assert_eq!(allocator.allocations(), 1);
        assert_eq!(allocator.deallocations(), 0);

        buffer.resize(64, 8, FillPolicy::Zero);
        assert_eq!(allocator.allocations(), 2);
        assert_eq!(allocator.deallocations(), 1);

        buffer.dispose();
        assert_eq!(allocator.allocations(), 2);
        assert_eq!(allocator.deallocations(), 2);
    }

    #[test]
    fn unmanaged_memory_is_never_released() {
        let allocator = CountingAllocator::default();
        let mut backing = vec![7_u8; 16].into_boxed_slice();
        let ptr = NonNull::from(&mut *backing).cast::<u8>();

        let mut buffer = unsafe { RawBuffer::from_raw_parts_in(ptr, 16, 1, allocator.clone()) };
        assert_eq!(buffer.tag(), AllocatorTag::Unmanaged);
        assert_eq!(buffer[0], 7);

        buffer[0] = 1;
        buffer.dispose();

        assert_eq!(allocator.deallocations(), 0);
        assert_eq!(backing[0], 1);
    }

    #[test]
    fn disposing_unmanaged_buffer_logs_warning() {
        let mut backing = vec![0_u8; 32].into_boxed_slice();
        let ptr = NonNull::from(&mut *backing).cast::<u8>();

        let buffer = unsafe { RawBuffer::from_raw_parts(ptr, 32, 1) };

        let ((), capture) = capture_events(|| buffer.dispose());

        let warnings = capture.at_level(Level::WARN);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field("len"), Some("32"));
        assert!(warnings[0].message().contains("unmanaged buffer"));
    }

    #[test]
    fn disposing_managed_buffer_logs_nothing() {
        let buffer = RawBuffer::allocate(32, 16, FillPolicy::Zero);

        let ((), capture) = capture_events(|| buffer.dispose());

        assert!(capture.events().is_empty());
    }

    #[test]
    fn resized_unmanaged_buffer_becomes_managed() {
        let allocator = CountingAllocator::default();
        let mut backing = vec![5_u8; 4].into_boxed_slice();
        let ptr = NonNull::from(&mut *backing).cast::<u8>();

        let mut buffer = unsafe { RawBuffer::from_raw_parts_in(ptr, 4, 1, allocator.clone()) };
        buffer.resize(8, 1, FillPolicy::Pattern(9));

        assert_eq!(buffer.tag(), AllocatorTag::Managed);
        assert_eq!(buffer.as_slice(), &[5, 5, 5, 5, 9, 9, 9, 9]);
        // The original memory was not handed to our allocator.
        assert_eq!(allocator.deallocations(), 0);

        drop(buffer);
        assert_eq!(allocator.deallocations(), 1);
        assert_eq!(&*backing, &[5, 5, 5, 5]);
    }

    #[test]
    #[should_panic]
    fn misaligned_unmanaged_memory_panics() {
        let mut backing = vec![0_u64; 4].into_boxed_slice();
        let ptr = NonNull::from(&mut *backing).cast::<u8>();

        // One byte past an 8-aligned address cannot be 8-aligned.
        let misaligned = unsafe { ptr.add(1) };

        _ = unsafe { RawBuffer::from_raw_parts(misaligned, 8, 8) };
    }

    #[test]
    fn views_cover_requested_range() {
        let mut buffer = RawBuffer::allocate(16, 8, FillPolicy::Zero);

        buffer.view_mut(4..8).fill(3);

        let view = buffer.view(2..10);
        assert_eq!(view.len(), 8);
        assert_eq!(view.as_bytes(), &[0, 0, 3, 3, 3, 3, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn view_out_of_bounds_panics() {
        let buffer = RawBuffer::allocate(16, 8, FillPolicy::Zero);

        _ = buffer.view(8..17);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut buffer = RawBuffer::allocate(16, 8, FillPolicy::Pattern(1));

        buffer.clear();

        assert!(buffer.as_slice().iter().all(|&b| b == 0));
    }
}
