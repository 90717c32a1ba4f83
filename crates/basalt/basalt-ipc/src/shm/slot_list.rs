//! Fixed-capacity set of pool slot indices owned by one port.
//!
//! Ports record every pool slot they hold here (loans not yet sent, samples
//! borrowed by the application). When the owning process dies, whoever
//! reclaims the port drains the list and releases the references.

use crate::shm::checked_align_up;
use std::mem::size_of;
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) const EMPTY_ENTRY: u32 = u32::MAX;

#[repr(C)]
struct SlotListHeader {
    capacity: u32,
    _reserved: u32,
}

/// Bytes needed by a list of `capacity` entries; `None` beyond a `u32` capacity.
pub(crate) fn bytes_for_slot_list(capacity: usize) -> Option<usize> {
    if u32::try_from(capacity).is_err() {
        return None;
    }
    let entries = capacity.checked_mul(size_of::<AtomicU32>())?;
    checked_align_up(size_of::<SlotListHeader>().checked_add(entries)?, 8)
}

pub(crate) struct SlotList<'a> {
    entries: &'a [AtomicU32],
}

impl<'a> SlotList<'a> {
    /// # Safety
    /// `ptr` must be 8-byte aligned and point to `bytes_for_slot_list(capacity)`
    /// writable bytes not yet in use.
    pub(crate) unsafe fn init(ptr: *mut u8, capacity: usize) {
        unsafe {
            (ptr as *mut SlotListHeader).write(SlotListHeader {
                capacity: capacity as u32,
                _reserved: 0,
            });
            let entries = ptr.add(size_of::<SlotListHeader>()) as *mut AtomicU32;
            for i in 0..capacity {
                entries.add(i).write(AtomicU32::new(EMPTY_ENTRY));
            }
        }
    }

    /// # Safety
    /// `ptr` must point to a list written by [`SlotList::init`] that stays
    /// mapped for `'a`.
    pub(crate) unsafe fn from_ptr(ptr: *mut u8) -> Self {
        unsafe {
            let header = &*(ptr as *const SlotListHeader);
            let entries = slice::from_raw_parts(
                ptr.add(size_of::<SlotListHeader>()) as *const AtomicU32,
                header.capacity as usize,
            );
            Self { entries }
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Records `index`; `false` if the list is full.
    pub(crate) fn insert(&self, index: u32) -> bool {
        self.entries.iter().any(|e| {
            e.compare_exchange(EMPTY_ENTRY, index, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    /// Forgets `index`; `false` if it was not recorded.
    pub(crate) fn remove(&self, index: u32) -> bool {
        self.entries.iter().any(|e| {
            e.compare_exchange(index, EMPTY_ENTRY, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.load(Ordering::Relaxed) != EMPTY_ENTRY)
            .count()
    }

    /// Empties the list, handing every recorded index to `f`.
    pub(crate) fn drain(&self, mut f: impl FnMut(u32)) {
        for e in self.entries {
            let index = e.swap(EMPTY_ENTRY, Ordering::AcqRel);
            if index != EMPTY_ENTRY {
                f(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::test_memory::AlignedBlock;

    #[test]
    fn insert_until_full_then_remove() {
        let mut block = AlignedBlock::new(bytes_for_slot_list(2).unwrap());
        let list = unsafe {
            SlotList::init(block.ptr(), 2);
            SlotList::from_ptr(block.ptr())
        };

        assert!(list.insert(4));
        assert!(list.insert(9));
        assert!(!list.insert(11));
        assert_eq!(list.len(), 2);

        assert!(list.remove(4));
        assert!(!list.remove(4));
        assert!(list.insert(11));

        let mut drained = vec![];
        list.drain(|i| drained.push(i));
        drained.sort();
        assert_eq!(drained, vec![9, 11]);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn zero_capacity_list_rejects_everything() {
        let mut block = AlignedBlock::new(bytes_for_slot_list(0).unwrap());
        let list = unsafe {
            SlotList::init(block.ptr(), 0);
            SlotList::from_ptr(block.ptr())
        };
        assert_eq!(list.capacity(), 0);
        assert!(!list.insert(0));
    }

    #[test]
    fn capacity_must_fit_the_header() {
        assert_eq!(bytes_for_slot_list(u32::MAX as usize + 1), None);
        assert_eq!(bytes_for_slot_list(usize::MAX), None);
    }
}
