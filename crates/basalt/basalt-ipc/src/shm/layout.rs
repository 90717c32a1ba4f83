//! Offset bookkeeping for segments made of consecutive arrays.

use crate::shm::checked_align_up;

/// `count` elements of `stride` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Region {
    pub(crate) offset: usize,
    pub(crate) stride: usize,
    pub(crate) count: usize,
}

impl Region {
    /// Byte offset of element `index`.
    #[inline]
    pub(crate) fn at(&self, index: usize) -> usize {
        debug_assert!(index < self.count, "region index out of range");
        self.offset + index * self.stride
    }

    pub(crate) fn end(&self) -> usize {
        self.offset + self.stride * self.count
    }
}

/// Appends fields one after another, honoring each field's alignment.
///
/// Used both for whole segments and for the composite element of an array
/// (e.g. a subscriber slot made of a port slot, a borrow list and a queue).
/// Every reservation returns `None` once the layout no longer fits a `usize`.
#[derive(Debug, Clone)]
pub(crate) struct LayoutBuilder {
    cursor: usize,
    align: usize,
}

impl LayoutBuilder {
    pub(crate) fn new() -> Self {
        Self::starting_at(0)
    }

    pub(crate) fn starting_at(offset: usize) -> Self {
        Self {
            cursor: offset,
            align: 8,
        }
    }

    /// Reserves `bytes` aligned to `align` and returns their offset.
    pub(crate) fn field(&mut self, bytes: usize, align: usize) -> Option<usize> {
        let offset = checked_align_up(self.cursor, align)?;
        self.cursor = offset.checked_add(bytes)?;
        self.align = self.align.max(align);
        Some(offset)
    }

    /// Reserves `count` elements of `stride` bytes.
    pub(crate) fn array(&mut self, stride: usize, count: usize, align: usize) -> Option<Region> {
        let offset = self.field(stride.checked_mul(count)?, align)?;
        Some(Region {
            offset,
            stride,
            count,
        })
    }

    /// Size of everything reserved so far, padded to the largest alignment so
    /// the result can serve as an array stride.
    pub(crate) fn size(&self) -> Option<usize> {
        checked_align_up(self.cursor, self.align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_aligned_and_sized() {
        let mut b = LayoutBuilder::new();
        assert_eq!(b.field(4, 4), Some(0));
        assert_eq!(b.field(8, 8), Some(8));
        let r = b.array(24, 3, 64).unwrap();
        assert_eq!(r.offset, 64);
        assert_eq!(r.at(2), 64 + 48);
        assert_eq!(r.end(), 136);
        assert_eq!(b.size(), Some(192));
    }

    #[test]
    fn empty_builder_has_zero_size() {
        assert_eq!(LayoutBuilder::new().size(), Some(0));
        assert_eq!(LayoutBuilder::starting_at(16).size(), Some(16));
    }

    #[test]
    fn layouts_beyond_the_address_space_are_rejected() {
        assert_eq!(LayoutBuilder::new().array(64, usize::MAX, 8), None);

        let mut b = LayoutBuilder::starting_at(64);
        assert_eq!(b.field(usize::MAX - 8, 8), None);

        let mut b = LayoutBuilder::new();
        b.field(usize::MAX - 3, 1).unwrap();
        assert_eq!(b.size(), None);
    }
}
