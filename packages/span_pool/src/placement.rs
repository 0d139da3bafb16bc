//! First-fit placement of new blocks between the blocks already in a buffer.

use std::ops::Range;

/// The number of unused bytes kept between adjacent blocks unless configured otherwise.
pub(crate) const DEFAULT_BLOCK_MARGIN: usize = 4;

/// Rules for where a block may start relative to its neighbors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Spacing {
    /// Unused bytes required between the end of one block and the start of the next.
    /// The start and end of the buffer do not need a margin.
    margin: usize,

    /// Every block starts at an offset that is a multiple of this. Always a power of two.
    alignment: usize,
}

impl Spacing {
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    #[must_use]
    pub(crate) fn new(margin: usize, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "block alignment {alignment} must be a power of two"
        );

        Self { margin, alignment }
    }

    #[must_use]
    pub(crate) fn margin(&self) -> usize {
        self.margin
    }

    #[must_use]
    pub(crate) fn alignment(&self) -> usize {
        self.alignment
    }

    /// The first permitted start offset after a block that ends at `end`.
    fn start_after(&self, end: usize) -> Option<usize> {
        end.checked_add(self.margin)?
            .checked_next_multiple_of(self.alignment)
    }
}

impl Default for Spacing {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_MARGIN, 1)
    }
}

/// Finds the lowest offset at which a block of `len` bytes fits.
///
/// `occupied` must yield the ranges of the blocks already in the buffer, sorted by start offset.
/// Candidate gaps are visited strictly left to right, so of several sufficient gaps the one with
/// the lowest address wins, whatever its size:
///
/// 1. the gap between the start of the buffer and the first block,
/// 2. each gap between two adjacent blocks,
/// 3. the space between the last block and the end of the buffer.
///
/// Returns `None` if no gap is large enough.
#[must_use]
pub(crate) fn first_fit<I>(
    occupied: I,
    len: usize,
    buffer_len: usize,
    spacing: Spacing,
) -> Option<usize>
where
    I: IntoIterator<Item = Range<usize>>,
{
    // The start of the buffer needs no margin and is aligned for every block alignment.
    let mut candidate = Some(0_usize);

    for range in occupied {
        if let Some(start) = candidate {
            let fits_before = start
                .checked_add(len)
                .and_then(|end| end.checked_add(spacing.margin))
                .is_some_and(|required_end| required_end <= range.start);

            if fits_before {
                return Some(start);
            }
        }

        candidate = spacing.start_after(range.end);
    }

    // The end of the buffer needs no margin either.
    candidate.filter(|&start| {
        start
            .checked_add(len)
            .is_some_and(|end| end <= buffer_len)
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::iter;

    use super::*;

    const MARGIN_4: Spacing = Spacing {
        margin: 4,
        alignment: 1,
    };

    #[test]
    fn empty_buffer_places_at_start() {
        assert_eq!(first_fit(iter::empty(), 100, 1024, MARGIN_4), Some(0));
    }

    #[test]
    fn empty_buffer_rejects_oversized() {
        assert_eq!(first_fit(iter::empty(), 1025, 1024, MARGIN_4), None);
    }

    #[test]
    fn whole_buffer_fits_exactly() {
        assert_eq!(first_fit(iter::empty(), 1024, 1024, MARGIN_4), Some(0));
    }

    #[test]
    fn appends_after_last_block_with_margin() {
        assert_eq!(first_fit([0..256], 256, 1024, MARGIN_4), Some(260));
        assert_eq!(first_fit([0..256, 260..516], 256, 1024, MARGIN_4), Some(520));
    }

    #[test]
    fn tail_needs_no_margin_at_buffer_end() {
        assert_eq!(first_fit([0..100], 920, 1024, MARGIN_4), Some(104));
        assert_eq!(first_fit([0..100], 921, 1024, MARGIN_4), None);
    }

    #[test]
    fn front_gap_requires_margin_before_first_block() {
        assert_eq!(first_fit([516..1016], 512, 1024, MARGIN_4), Some(0));
        assert_eq!(first_fit([515..1015], 512, 1024, MARGIN_4), None);
    }

    #[test]
    fn middle_gap_is_reused() {
        // Gap between 256 and 520 is 264 bytes: margin + 256 + margin.
        assert_eq!(first_fit([0..256, 520..776], 256, 1024, MARGIN_4), Some(260));
    }

    #[test]
    fn middle_gap_one_byte_short_is_skipped() {
        assert_eq!(first_fit([0..256, 519..775], 256, 2048, MARGIN_4), Some(779));
    }

    #[test]
    fn earliest_of_equal_gaps_wins() {
        let occupied = [0..10, 30..40, 60..70];

        assert_eq!(first_fit(occupied, 12, 1024, MARGIN_4), Some(14));
    }

    #[test]
    fn first_sufficient_gap_wins_over_tighter_later_gap() {
        // The first gap is large, the second is an exact fit. First-fit takes the first.
        let occupied = [0..10, 100..110, 128..138];

        assert_eq!(first_fit(occupied, 10, 1024, MARGIN_4), Some(14));
    }

    #[test]
    fn alignment_rounds_start_up() {
        let spacing = Spacing::new(4, 16);

        assert_eq!(first_fit([0..10], 8, 1024, spacing), Some(16));
        assert_eq!(first_fit([0..12], 8, 1024, spacing), Some(16));
        assert_eq!(first_fit([0..13], 8, 1024, spacing), Some(32));
    }

    #[test]
    fn zero_margin_packs_tightly() {
        let spacing = Spacing::new(0, 1);

        assert_eq!(first_fit([0..10], 10, 20, spacing), Some(10));
        assert_eq!(first_fit([10..20], 10, 20, spacing), Some(0));
    }

    #[test]
    fn overflow_is_no_fit() {
        assert_eq!(
            first_fit([0..(usize::MAX - 2)], 8, usize::MAX, MARGIN_4),
            None
        );
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_alignment_panics() {
        _ = Spacing::new(4, 3);
    }
}
