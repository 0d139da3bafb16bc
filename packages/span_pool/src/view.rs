use std::ops::{Index, IndexMut, Range};

use bytemuck::Pod;

/// A shared, non-owning window into buffer memory.
///
/// Views do not own or track anything; they borrow the bytes of a [`RawBuffer`][1] or of a
/// pool block for as long as the borrow checker permits. Besides byte indexing, a view can be
/// indexed in units of any plain-old-data type via [`read()`][Self::read].
///
/// [1]: crate::RawBuffer
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    bytes: &'a [u8],
}

impl<'a> BufferView<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Length of the view in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the view covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes covered by the view.
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Address of the first byte of the view.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// Returns a view that starts `count` bytes later.
    ///
    /// # Panics
    ///
    /// Panics if `count` is greater than the length of the view.
    #[must_use]
    pub fn offset(self, count: usize) -> Self {
        let len = self.len();

        Self {
            bytes: self.bytes.get(count..).unwrap_or_else(|| {
                panic!("cannot offset a view of {len} bytes by {count} bytes")
            }),
        }
    }

    /// The number of whole `T` elements that fit in the view.
    #[must_use]
    pub fn element_count<T: Pod>(&self) -> usize {
        element_count::<T>(self.len())
    }

    /// Reads the element at `index`, treating the view as an array of `T`.
    ///
    /// The view does not need to be aligned for `T`.
    ///
    /// # Panics
    ///
    /// Panics if the element is not entirely within the view.
    #[must_use]
    pub fn read<T: Pod>(&self, index: usize) -> T {
        let range = element_range::<T>(index, self.len());

        bytemuck::pod_read_unaligned(
            self.bytes
                .get(range)
                .expect("element_range() only returns ranges within the view"),
        )
    }
}

impl Index<usize> for BufferView<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        byte(self.bytes, index)
    }
}

/// An exclusive, non-owning window into buffer memory.
///
/// The mutable counterpart of [`BufferView`]. Besides byte indexing, a view can be read and
/// written in units of any plain-old-data type via [`read()`][Self::read] and
/// [`write()`][Self::write].
#[derive(Debug)]
pub struct BufferViewMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> BufferViewMut<'a> {
    pub(crate) fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Length of the view in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the view covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes covered by the view.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &*self.bytes
    }

    /// The bytes covered by the view, mutably.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Converts the view into the mutable byte slice it covers.
    #[must_use]
    pub fn into_bytes(self) -> &'a mut [u8] {
        self.bytes
    }

    /// Address of the first byte of the view.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// A shared view of the same bytes.
    #[must_use]
    pub fn as_view(&self) -> BufferView<'_> {
        BufferView::new(&*self.bytes)
    }

    /// A shorter-lived mutable view of the same bytes, leaving this one usable afterwards.
    #[must_use]
    pub fn reborrow(&mut self) -> BufferViewMut<'_> {
        BufferViewMut::new(&mut *self.bytes)
    }

    /// Returns a view that starts `count` bytes later.
    ///
    /// # Panics
    ///
    /// Panics if `count` is greater than the length of the view.
    #[must_use]
    pub fn offset(self, count: usize) -> Self {
        let len = self.len();
        let Self { bytes } = self;

        Self {
            bytes: bytes.get_mut(count..).unwrap_or_else(|| {
                panic!("cannot offset a view of {len} bytes by {count} bytes")
            }),
        }
    }

    /// The number of whole `T` elements that fit in the view.
    #[must_use]
    pub fn element_count<T: Pod>(&self) -> usize {
        element_count::<T>(self.len())
    }

    /// Reads the element at `index`, treating the view as an array of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the element is not entirely within the view.
    #[must_use]
    pub fn read<T: Pod>(&self, index: usize) -> T {
        self.as_view().read(index)
    }

    /// Writes the element at `index`, treating the view as an array of `T`.
    ///
    /// The view does not need to be aligned for `T`.
    ///
    /// # Panics
    ///
    /// Panics if the element is not entirely within the view.
    pub fn write<T: Pod>(&mut self, index: usize, value: T) {
        let range = element_range::<T>(index, self.len());

        self.bytes
            .get_mut(range)
            .expect("element_range() only returns ranges within the view")
            .copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Copies `source` into the view, starting `offset` bytes in.
    ///
    /// # Panics
    ///
    /// Panics if the destination is not entirely within the view.
    pub fn copy_from_slice(&mut self, offset: usize, source: &[u8]) {
        let len = self.len();
        let range = checked_range(offset, source.len(), len);

        self.bytes
            .get_mut(range)
            .expect("checked_range() only returns ranges within the view")
            .copy_from_slice(source);
    }

    /// Sets every byte of the view to `value`.
    pub fn fill(&mut self, value: u8) {
        self.bytes.fill(value);
    }
}

impl Index<usize> for BufferViewMut<'_> {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        byte(&*self.bytes, index)
    }
}

impl IndexMut<usize> for BufferViewMut<'_> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        let len = self.bytes.len();

        self.bytes
            .get_mut(index)
            .unwrap_or_else(|| panic!("index {index} is out of bounds of a view of {len} bytes"))
    }
}

fn byte(bytes: &[u8], index: usize) -> &u8 {
    bytes.get(index).unwrap_or_else(|| {
        panic!(
            "index {index} is out of bounds of a view of {} bytes",
            bytes.len()
        )
    })
}

fn element_count<T>(len: usize) -> usize {
    // Zero-sized elements would fit infinitely many times; we say none do.
    len.checked_div(size_of::<T>()).unwrap_or(0)
}

fn element_range<T>(index: usize, len: usize) -> Range<usize> {
    let start = index
        .checked_mul(size_of::<T>())
        .unwrap_or_else(|| panic!("element {index} lies beyond the address space"));

    checked_range(start, size_of::<T>(), len)
}

fn checked_range(start: usize, count: usize, len: usize) -> Range<usize> {
    let end = start
        .checked_add(count)
        .filter(|&end| end <= len)
        .unwrap_or_else(|| {
            panic!("{count} bytes at offset {start} are out of bounds of a view of {len} bytes")
        });

    start..end
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(clippy::indexing_slicing, reason = "panic is fine in tests")]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BufferView<'static>: Copy, Send, Sync);
    assert_impl_all!(BufferViewMut<'static>: Send, Sync);

    #[test]
    fn offset_moves_start() {
        let bytes = [1_u8, 2, 3, 4];
        let view = BufferView::new(&bytes).offset(1);

        assert_eq!(view.len(), 3);
        assert_eq!(view[0], 2);
        assert_eq!(view.as_ptr(), bytes[1..].as_ptr());
    }

    #[test]
    fn offset_to_end_is_empty() {
        let bytes = [1_u8, 2];
        let view = BufferView::new(&bytes).offset(2);

        assert!(view.is_empty());
    }

    #[test]
    #[should_panic]
    fn offset_beyond_end_panics() {
        let bytes = [1_u8, 2];
        _ = BufferView::new(&bytes).offset(3);
    }

    #[test]
    fn element_indexing_is_in_units_of_element() {
        let mut bytes = [0_u8; 12];
        let mut view = BufferViewMut::new(&mut bytes);

        view.write::<u32>(0, 0x0102_0304);
        view.write::<u32>(2, 0xAABB_CCDD);

        assert_eq!(view.read::<u32>(0), 0x0102_0304);
        assert_eq!(view.read::<u32>(1), 0);
        assert_eq!(view.read::<u32>(2), 0xAABB_CCDD);
        assert_eq!(view.element_count::<u32>(), 3);
    }

    #[test]
    fn unaligned_element_access_works() {
        let mut bytes = [0_u8; 9];
        let view = BufferViewMut::new(&mut bytes);

        // Shift by one byte so that the u64 cannot be aligned.
        let mut shifted = view.offset(1);
        shifted.write::<u64>(0, u64::MAX);

        assert_eq!(shifted.read::<u64>(0), u64::MAX);
        assert_eq!(bytes[0], 0);
    }

    #[test]
    #[should_panic]
    fn element_past_end_panics() {
        let bytes = [0_u8; 7];
        _ = BufferView::new(&bytes).read::<u64>(0);
    }

    #[test]
    fn copy_and_fill() {
        let mut bytes = [0_u8; 6];
        let mut view = BufferViewMut::new(&mut bytes);

        view.fill(9);
        view.copy_from_slice(2, &[1, 2]);

        assert_eq!(view.as_bytes(), &[9, 9, 1, 2, 9, 9]);
    }

    #[test]
    #[should_panic]
    fn copy_past_end_panics() {
        let mut bytes = [0_u8; 4];
        BufferViewMut::new(&mut bytes).copy_from_slice(3, &[1, 2]);
    }

    #[test]
    fn reborrow_leaves_view_usable() {
        let mut bytes = [0_u8; 4];
        let mut view = BufferViewMut::new(&mut bytes);

        view.reborrow()[1] = 5;
        view[2] = 6;

        assert_eq!(view.into_bytes(), &[0, 5, 6, 0]);
    }

    #[test]
    #[should_panic]
    fn byte_index_out_of_bounds_panics() {
        let bytes = [0_u8; 4];
        _ = BufferView::new(&bytes)[4];
    }
}
