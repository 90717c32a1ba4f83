//! Building blocks placed inside shared-memory segments.
//!
//! Everything here is `#[repr(C)]`, made of atomics or plain integers, and
//! addressed through raw offsets from a mapping's base pointer. Views borrow
//! the mapping, so they cannot outlive it.

pub(crate) mod layout;
pub(crate) mod pool;
pub(crate) mod port_slot;
pub(crate) mod queue;
pub(crate) mod slot_list;

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline(always)]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] for sizes derived from user supplied limits.
#[inline]
pub(crate) const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
pub(crate) mod test_memory {
    #[repr(C, align(64))]
    #[derive(Clone, Copy)]
    struct Line([u8; 64]);

    /// Heap block with 64-byte alignment standing in for a mapping in unit tests.
    pub(crate) struct AlignedBlock {
        lines: Vec<Line>,
    }

    impl AlignedBlock {
        pub(crate) fn new(bytes: usize) -> Self {
            Self {
                lines: vec![Line([0; 64]); bytes.div_ceil(64).max(1)],
            }
        }

        pub(crate) fn ptr(&mut self) -> *mut u8 {
            self.lines.as_mut_ptr() as *mut u8
        }
    }
}
