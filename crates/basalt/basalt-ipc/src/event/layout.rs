//! Shared memory of an event service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SegmentHeader                                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ notifier PortSlot[0..max_notifiers]                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ listener[0]: PortSlot │ wake (u32) │ pending bits (u64 words) │
//! │ listener[1] ...                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A notifier sets the event's bit in every active listener, then bumps the
//! listener's wake word and wakes whoever sleeps on it.

use super::StaticConfig;
use crate::service::segment::PATTERN_OFFSET;
use crate::shm::layout::{LayoutBuilder, Region};
use crate::shm::port_slot::PortSlot;
use std::mem::size_of;
use std::slice;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

const BITS_PER_WORD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EventLayout {
    notifiers: Region,
    listeners: Region,
    wake_offset: usize,
    pending_offset: usize,
    pending_words: usize,
    size: usize,
}

impl EventLayout {
    /// `None` when the limits describe a segment larger than the address space.
    pub(crate) fn new(config: &StaticConfig) -> Option<Self> {
        let pending_words = config
            .event_id_max_value()
            .checked_add(1)?
            .div_ceil(BITS_PER_WORD);

        let mut listener = LayoutBuilder::new();
        listener.field(size_of::<PortSlot>(), 8)?;
        let wake_offset = listener.field(size_of::<AtomicU32>(), 4)?;
        let pending_offset =
            listener.field(pending_words.checked_mul(size_of::<AtomicU64>())?, 8)?;

        let mut segment = LayoutBuilder::starting_at(PATTERN_OFFSET);
        let notifiers = segment.array(size_of::<PortSlot>(), config.max_notifiers(), 8)?;
        let listeners = segment.array(listener.size()?, config.max_listeners(), 8)?;

        Some(Self {
            notifiers,
            listeners,
            wake_offset,
            pending_offset,
            pending_words,
            size: segment.size()?,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn max_notifiers(&self) -> usize {
        self.notifiers.count
    }

    pub(crate) fn max_listeners(&self) -> usize {
        self.listeners.count
    }
}

/// View of a mapped event segment.
pub(crate) struct EventSegment<'a> {
    base: *mut u8,
    layout: &'a EventLayout,
}

impl<'a> EventSegment<'a> {
    /// # Safety
    /// `base` must be the start of a mapping of at least `layout.size()`
    /// bytes that outlives `'a`. A zero-filled mapping is a valid segment.
    pub(crate) unsafe fn new(base: *mut u8, layout: &'a EventLayout) -> Self {
        Self { base, layout }
    }

    pub(crate) fn notifier(&self, index: usize) -> &'a PortSlot {
        // SAFETY: inside the notifier region of the mapping.
        unsafe { &*(self.base.add(self.layout.notifiers.at(index)) as *const PortSlot) }
    }

    pub(crate) fn listener(&self, index: usize) -> ListenerSlot<'a> {
        let layout = self.layout;
        // SAFETY: all three parts lie inside listener `index` of the mapping.
        unsafe {
            let slot = self.base.add(layout.listeners.at(index));
            ListenerSlot {
                port: &*(slot as *const PortSlot),
                wake: &*(slot.add(layout.wake_offset) as *const AtomicU32),
                pending: slice::from_raw_parts(
                    slot.add(layout.pending_offset) as *const AtomicU64,
                    layout.pending_words,
                ),
            }
        }
    }

    pub(crate) fn number_of_notifiers(&self) -> usize {
        (0..self.layout.max_notifiers())
            .filter(|&i| self.notifier(i).active_port().is_some())
            .count()
    }

    pub(crate) fn number_of_listeners(&self) -> usize {
        (0..self.layout.max_listeners())
            .filter(|&i| self.listener(i).port.active_port().is_some())
            .count()
    }

    /// Frees every port slot whose owner `is_dead`; returns how many.
    pub(crate) fn reclaim(&self, mut is_dead: impl FnMut(u64) -> bool) -> usize {
        let mut reclaimed = 0;
        for i in 0..self.layout.max_notifiers() {
            let port = self.notifier(i);
            if port.try_begin_reclaim_if(&mut is_dead) {
                port.vacate();
                reclaimed += 1;
            }
        }

        for i in 0..self.layout.max_listeners() {
            let listener = self.listener(i);
            if listener.port.try_begin_reclaim_if(&mut is_dead) {
                listener.clear();
                listener.port.vacate();
                reclaimed += 1;
            }
        }
        reclaimed
    }
}

pub(crate) struct ListenerSlot<'a> {
    pub(crate) port: &'a PortSlot,
    pub(crate) wake: &'a AtomicU32,
    pending: &'a [AtomicU64],
}

impl ListenerSlot<'_> {
    /// Marks `id` pending; `id` must not exceed the service's maximum.
    pub(crate) fn set(&self, id: usize) {
        self.pending[id / BITS_PER_WORD].fetch_or(1 << (id % BITS_PER_WORD), Ordering::Release);
        self.wake.fetch_add(1, Ordering::Release);
    }

    /// Takes the lowest pending id.
    pub(crate) fn take_one(&self) -> Option<usize> {
        for (w, word) in self.pending.iter().enumerate() {
            let mut bits = word.load(Ordering::Acquire);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                let mask = 1u64 << bit;
                let previous = word.fetch_and(!mask, Ordering::AcqRel);
                if previous & mask != 0 {
                    return Some(w * BITS_PER_WORD + bit);
                }
                bits = previous & !mask;
            }
        }
        None
    }

    /// Takes every pending id, handing them to `f` in ascending order.
    pub(crate) fn take_all(&self, mut f: impl FnMut(usize)) -> usize {
        let mut taken = 0;
        for (w, word) in self.pending.iter().enumerate() {
            let mut bits = word.swap(0, Ordering::AcqRel);
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                f(w * BITS_PER_WORD + bit);
                taken += 1;
            }
        }
        taken
    }

    pub(crate) fn clear(&self) {
        for word in self.pending {
            word.store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::test_memory::AlignedBlock;

    fn segment_of(block: &mut AlignedBlock, layout: &EventLayout) -> EventSegment<'static> {
        let layout: &'static EventLayout = Box::leak(Box::new(*layout));
        unsafe { EventSegment::new(block.ptr(), layout) }
    }

    #[test]
    fn ids_come_out_in_ascending_order_once() {
        let layout = EventLayout::new(&StaticConfig::new(1, 1, 130)).unwrap();
        let mut block = AlignedBlock::new(layout.size());
        let segment = segment_of(&mut block, &layout);
        let listener = segment.listener(0);

        for id in [129, 3, 64, 3] {
            listener.set(id);
        }
        assert_eq!(listener.wake.load(Ordering::Relaxed), 4);

        let mut ids = vec![];
        assert_eq!(listener.take_all(|id| ids.push(id)), 3);
        assert_eq!(ids, vec![3, 64, 129]);
        assert_eq!(listener.take_one(), None);
    }

    #[test]
    fn take_one_prefers_the_lowest_id() {
        let layout = EventLayout::new(&StaticConfig::new(1, 2, 255)).unwrap();
        let mut block = AlignedBlock::new(layout.size());
        let segment = segment_of(&mut block, &layout);
        let listener = segment.listener(1);

        listener.set(200);
        listener.set(7);
        assert_eq!(listener.take_one(), Some(7));
        assert_eq!(listener.take_one(), Some(200));
        assert_eq!(listener.take_one(), None);
        assert_eq!(segment.listener(0).take_one(), None);
    }

    #[test]
    fn dead_owners_lose_their_slots() {
        let layout = EventLayout::new(&StaticConfig::new(2, 1, 7)).unwrap();
        let mut block = AlignedBlock::new(layout.size());
        let segment = segment_of(&mut block, &layout);

        assert!(segment.notifier(0).try_claim(1));
        segment.notifier(0).activate(10);
        assert!(segment.notifier(1).try_claim(2));
        segment.notifier(1).activate(11);
        assert!(segment.listener(0).port.try_claim(2));
        segment.listener(0).port.activate(12);
        segment.listener(0).set(5);

        assert_eq!(segment.number_of_notifiers(), 2);
        assert_eq!(segment.reclaim(|owner| owner == 2), 2);
        assert_eq!(segment.number_of_notifiers(), 1);
        assert_eq!(segment.number_of_listeners(), 0);
        assert_eq!(segment.listener(0).take_one(), None);
    }

    #[test]
    fn unrepresentable_limits_have_no_layout() {
        assert_eq!(EventLayout::new(&StaticConfig::new(1, 1, usize::MAX)), None);
        assert_eq!(EventLayout::new(&StaticConfig::new(usize::MAX, 1, 7)), None);
        assert_eq!(EventLayout::new(&StaticConfig::new(1, usize::MAX / 2, 7)), None);
        assert_eq!(EventLayout::new(&StaticConfig::new(1, 16, usize::MAX - 1)), None);
    }
}
