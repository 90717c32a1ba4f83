//! Reference-counted payload slots shared by all ports of a service.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PoolHeader (slot_count, slot_stride, payload_offset, hint)   │
//! ├──────────────────────────────────────────────────────────────┤  slots_offset
//! │ slot 0: SlotHeader │ pad │ payload (payload_size bytes) │ pad │
//! ├──────────────────────────────────────────────────────────────┤
//! │ slot 1 ...                                                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A slot is free while its reference count is zero. Loaning moves it from 0
//! to 1 with a CAS; every receiver queue or borrowed handle that records the
//! slot holds one more reference; the last release makes it free again.

use crate::shm::{align_up, checked_align_up};
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Per-slot metadata written by the sender before the slot becomes visible.
#[repr(C)]
pub(crate) struct SlotHeader {
    refcount: AtomicU32,
    _reserved: u32,
    /// Number of payload elements initialized by the sender.
    pub(crate) len: AtomicU64,
    /// Port id of the sender.
    pub(crate) origin: AtomicU64,
    /// Pattern specific routing word (request channel, request id).
    pub(crate) route: AtomicU64,
}

#[repr(C)]
struct PoolHeader {
    slot_count: u64,
    slot_stride: u64,
    payload_offset: u64,
    slots_offset: u64,
    hint: AtomicU64,
}

/// Slot indices travel as `u32` and `u32::MAX` marks an empty list entry.
pub(crate) const MAX_POOL_SLOTS: usize = u32::MAX as usize - 1;

/// Geometry of a pool, derived from the static config of its service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolLayout {
    slot_count: usize,
    payload_size: usize,
    align: usize,
    slot_stride: usize,
    bytes: usize,
}

impl PoolLayout {
    /// `None` when the pool would hold more than [`MAX_POOL_SLOTS`] slots or
    /// its size does not fit a `usize`.
    pub(crate) fn new(slot_count: usize, payload_size: usize, payload_align: usize) -> Option<Self> {
        if slot_count > MAX_POOL_SLOTS {
            return None;
        }
        let align = payload_align.max(8);
        let payload_offset = align_up(size_of::<SlotHeader>(), align);
        let slot_stride = checked_align_up(payload_offset.checked_add(payload_size)?, align)?;
        let bytes = align_up(size_of::<PoolHeader>(), align)
            .checked_add(slot_count.checked_mul(slot_stride)?)?;
        Some(Self {
            slot_count,
            payload_size,
            align,
            slot_stride,
            bytes,
        })
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub(crate) fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn slots_offset(&self) -> usize {
        align_up(size_of::<PoolHeader>(), self.align)
    }

    fn payload_offset(&self) -> usize {
        align_up(size_of::<SlotHeader>(), self.align)
    }

    /// Alignment the pool's start offset must satisfy.
    pub(crate) fn required_alignment(&self) -> usize {
        self.align
    }

    /// Total bytes occupied by the pool.
    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }
}

pub(crate) struct SlotPool<'a> {
    header: &'a PoolHeader,
    slots: *mut u8,
    _mapping: PhantomData<&'a [u8]>,
}

impl<'a> SlotPool<'a> {
    /// # Safety
    /// `ptr` must be aligned to `layout.required_alignment()` and point to
    /// `layout.bytes()` zeroed, writable bytes not yet in use.
    pub(crate) unsafe fn init(ptr: *mut u8, layout: &PoolLayout) {
        unsafe {
            (ptr as *mut PoolHeader).write(PoolHeader {
                slot_count: layout.slot_count as u64,
                slot_stride: layout.slot_stride as u64,
                payload_offset: layout.payload_offset() as u64,
                slots_offset: layout.slots_offset() as u64,
                hint: AtomicU64::new(0),
            });

            let slots = ptr.add(layout.slots_offset());
            for i in 0..layout.slot_count {
                (slots.add(i * layout.slot_stride) as *mut SlotHeader).write(SlotHeader {
                    refcount: AtomicU32::new(0),
                    _reserved: 0,
                    len: AtomicU64::new(0),
                    origin: AtomicU64::new(0),
                    route: AtomicU64::new(0),
                });
            }
        }
    }

    /// # Safety
    /// `ptr` must point to a pool written by [`SlotPool::init`] that stays
    /// mapped for `'a`.
    pub(crate) unsafe fn from_ptr(ptr: *mut u8) -> Self {
        unsafe {
            let header = &*(ptr as *const PoolHeader);
            Self {
                header,
                slots: ptr.add(header.slots_offset as usize),
                _mapping: PhantomData,
            }
        }
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.header.slot_count as usize
    }

    #[inline]
    fn slot_ptr(&self, index: u32) -> *mut u8 {
        assert!((index as usize) < self.slot_count(), "slot index out of range");
        // SAFETY: in bounds of the pool region checked above.
        unsafe {
            self.slots
                .add(index as usize * self.header.slot_stride as usize)
        }
    }

    #[inline]
    pub(crate) fn header(&self, index: u32) -> &'a SlotHeader {
        // SAFETY: every slot starts with an initialized SlotHeader.
        unsafe { &*(self.slot_ptr(index) as *const SlotHeader) }
    }

    /// Start of the slot's payload, aligned for the payload type.
    #[inline]
    pub(crate) fn payload(&self, index: u32) -> *mut u8 {
        // SAFETY: payload_offset + payload_size <= slot_stride.
        unsafe { self.slot_ptr(index).add(self.header.payload_offset as usize) }
    }

    /// Claims a free slot with one reference held by the caller.
    pub(crate) fn allocate(&self) -> Option<u32> {
        let count = self.slot_count() as u64;
        if count == 0 {
            return None;
        }

        let start = self.header.hint.fetch_add(1, Ordering::Relaxed) % count;
        (0..count)
            .map(|k| ((start + k) % count) as u32)
            .find(|&i| {
                self.header(i)
                    .refcount
                    .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            })
    }

    pub(crate) fn retain(&self, index: u32) {
        self.header(index).refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference; `true` when the slot became free.
    pub(crate) fn release(&self, index: u32) -> bool {
        let previous = self.header(index).refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released a free slot");
        previous == 1
    }

    pub(crate) fn references(&self, index: u32) -> u32 {
        self.header(index).refcount.load(Ordering::Acquire)
    }

    pub(crate) fn free_slots(&self) -> usize {
        (0..self.slot_count() as u32)
            .filter(|&i| self.references(i) == 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::test_memory::AlignedBlock;

    fn pool(block: &mut AlignedBlock, layout: &PoolLayout) -> SlotPool<'static> {
        unsafe {
            SlotPool::init(block.ptr(), layout);
            SlotPool::from_ptr(block.ptr())
        }
    }

    #[test]
    fn slots_are_reused_only_after_last_release() {
        let layout = PoolLayout::new(2, 16, 8).unwrap();
        let mut block = AlignedBlock::new(layout.bytes());
        let p = pool(&mut block, &layout);

        let a = p.allocate().unwrap();
        let b = p.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(p.allocate(), None);

        p.retain(a);
        assert!(!p.release(a));
        assert_eq!(p.allocate(), None);
        assert!(p.release(a));
        assert_eq!(p.allocate(), Some(a));
        assert_eq!(p.free_slots(), 0);
    }

    #[test]
    fn payloads_honor_large_alignment() {
        let layout = PoolLayout::new(3, 100, 64).unwrap();
        let mut block = AlignedBlock::new(layout.bytes());
        let p = pool(&mut block, &layout);

        for i in 0..3 {
            assert_eq!(p.payload(i) as usize % 64, 0);
        }
        assert!(p.payload(1) as usize - p.payload(0) as usize >= 100);
    }

    #[test]
    fn empty_pool_never_allocates() {
        let layout = PoolLayout::new(0, 8, 8).unwrap();
        let mut block = AlignedBlock::new(layout.bytes());
        assert_eq!(pool(&mut block, &layout).allocate(), None);
    }

    #[test]
    fn oversized_pools_have_no_layout() {
        assert_eq!(PoolLayout::new(MAX_POOL_SLOTS + 1, 8, 8), None);
        assert_eq!(PoolLayout::new(4, usize::MAX, 8), None);
        assert_eq!(PoolLayout::new(1 << 30, 1 << 40, 8), None);
        assert!(PoolLayout::new(MAX_POOL_SLOTS, 0, 8).is_some());
    }
}
