//! Shared memory of a publish-subscribe service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ SegmentHeader                                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ publisher[i]:  PortSlot │ loan list                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ subscriber[i]: PortSlot │ borrow list │ index queue          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ sample pool                                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pool holds `max_publishers * publisher_max_loaned_samples +
//! max_subscribers * (subscriber_max_buffer_size +
//! subscriber_max_borrowed_samples)` slots: every slot is either loaned,
//! queued or borrowed somewhere, so well-behaved ports never run dry.

use super::StaticConfig;
use crate::service::segment::PATTERN_OFFSET;
use crate::shm::layout::{LayoutBuilder, Region};
use crate::shm::pool::{PoolLayout, SlotPool};
use crate::shm::port_slot::PortSlot;
use crate::shm::queue::{IndexQueue, bytes_for_queue};
use crate::shm::slot_list::{SlotList, bytes_for_slot_list};
use std::mem::size_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PublishSubscribeLayout {
    publishers: Region,
    publisher_loans: usize,
    loan_capacity: usize,
    subscribers: Region,
    subscriber_borrows: usize,
    subscriber_queue: usize,
    borrow_capacity: usize,
    buffer_size: usize,
    pool_offset: usize,
    pool: PoolLayout,
    size: usize,
}

impl PublishSubscribeLayout {
    /// `None` when the limits describe a segment larger than the address space.
    pub(crate) fn new(config: &StaticConfig) -> Option<Self> {
        let loan_capacity = config.publisher_max_loaned_samples();
        let borrow_capacity = config.subscriber_max_borrowed_samples();
        let buffer_size = config.subscriber_max_buffer_size();

        let mut publisher = LayoutBuilder::new();
        publisher.field(size_of::<PortSlot>(), 8)?;
        let publisher_loans = publisher.field(bytes_for_slot_list(loan_capacity)?, 8)?;

        let mut subscriber = LayoutBuilder::new();
        subscriber.field(size_of::<PortSlot>(), 8)?;
        let subscriber_borrows = subscriber.field(bytes_for_slot_list(borrow_capacity)?, 8)?;
        let subscriber_queue = subscriber.field(bytes_for_queue(buffer_size)?, 8)?;

        let slot_count = config
            .max_publishers()
            .checked_mul(loan_capacity)?
            .checked_add(
                config
                    .max_subscribers()
                    .checked_mul(buffer_size.checked_add(borrow_capacity)?)?,
            )?;
        let pool = PoolLayout::new(
            slot_count,
            config.payload_type().size().checked_mul(config.max_slice_len())?,
            config.payload_type().alignment(),
        )?;

        let mut segment = LayoutBuilder::starting_at(PATTERN_OFFSET);
        let publishers = segment.array(publisher.size()?, config.max_publishers(), 8)?;
        let subscribers = segment.array(subscriber.size()?, config.max_subscribers(), 8)?;
        let pool_offset = segment.field(pool.bytes(), pool.required_alignment())?;

        Some(Self {
            publishers,
            publisher_loans,
            loan_capacity,
            subscribers,
            subscriber_borrows,
            subscriber_queue,
            borrow_capacity,
            buffer_size,
            pool_offset,
            pool,
            size: segment.size()?,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn max_publishers(&self) -> usize {
        self.publishers.count
    }

    pub(crate) fn max_subscribers(&self) -> usize {
        self.subscribers.count
    }

    /// # Safety
    /// `base` must map `self.size()` zeroed bytes nobody else uses yet.
    pub(crate) unsafe fn init(&self, base: *mut u8) {
        unsafe {
            for i in 0..self.publishers.count {
                let slot = base.add(self.publishers.at(i));
                SlotList::init(slot.add(self.publisher_loans), self.loan_capacity);
            }
            for i in 0..self.subscribers.count {
                let slot = base.add(self.subscribers.at(i));
                SlotList::init(slot.add(self.subscriber_borrows), self.borrow_capacity);
                IndexQueue::init(slot.add(self.subscriber_queue), self.buffer_size);
            }
            SlotPool::init(base.add(self.pool_offset), &self.pool);
        }
    }
}

pub(crate) struct PublisherSlot<'a> {
    pub(crate) port: &'a PortSlot,
    pub(crate) loans: SlotList<'a>,
}

pub(crate) struct SubscriberSlot<'a> {
    pub(crate) port: &'a PortSlot,
    pub(crate) borrows: SlotList<'a>,
    pub(crate) queue: IndexQueue<'a>,
}

/// View of a mapped publish-subscribe segment.
pub(crate) struct PublishSubscribeSegment<'a> {
    base: *mut u8,
    layout: &'a PublishSubscribeLayout,
}

impl<'a> PublishSubscribeSegment<'a> {
    /// # Safety
    /// `base` must be the start of a mapping initialized by
    /// [`PublishSubscribeLayout::init`] with this layout that outlives `'a`.
    pub(crate) unsafe fn new(base: *mut u8, layout: &'a PublishSubscribeLayout) -> Self {
        Self { base, layout }
    }

    pub(crate) fn publisher(&self, index: usize) -> PublisherSlot<'a> {
        // SAFETY: inside publisher `index` of an initialized segment.
        unsafe {
            let slot = self.base.add(self.layout.publishers.at(index));
            PublisherSlot {
                port: &*(slot as *const PortSlot),
                loans: SlotList::from_ptr(slot.add(self.layout.publisher_loans)),
            }
        }
    }

    pub(crate) fn subscriber(&self, index: usize) -> SubscriberSlot<'a> {
        // SAFETY: inside subscriber `index` of an initialized segment.
        unsafe {
            let slot = self.base.add(self.layout.subscribers.at(index));
            SubscriberSlot {
                port: &*(slot as *const PortSlot),
                borrows: SlotList::from_ptr(slot.add(self.layout.subscriber_borrows)),
                queue: IndexQueue::from_ptr(slot.add(self.layout.subscriber_queue)),
            }
        }
    }

    pub(crate) fn pool(&self) -> SlotPool<'a> {
        // SAFETY: the pool region of an initialized segment.
        unsafe { SlotPool::from_ptr(self.base.add(self.layout.pool_offset)) }
    }

    pub(crate) fn number_of_publishers(&self) -> usize {
        (0..self.layout.max_publishers())
            .filter(|&i| self.publisher(i).port.active_port().is_some())
            .count()
    }

    pub(crate) fn number_of_subscribers(&self) -> usize {
        (0..self.layout.max_subscribers())
            .filter(|&i| self.subscriber(i).port.active_port().is_some())
            .count()
    }

    /// Hands every sample still referenced by the subscriber back to the pool.
    pub(crate) fn release_subscriber_samples(&self, subscriber: &SubscriberSlot<'_>) {
        let pool = self.pool();
        subscriber.queue.drain(|index| {
            pool.release(index as u32);
        });
        subscriber.borrows.drain(|index| {
            pool.release(index);
        });
    }

    pub(crate) fn release_publisher_loans(&self, publisher: &PublisherSlot<'_>) {
        let pool = self.pool();
        publisher.loans.drain(|index| {
            pool.release(index);
        });
    }

    /// Frees every port slot whose owner `is_dead`; returns how many.
    pub(crate) fn reclaim(&self, mut is_dead: impl FnMut(u64) -> bool) -> usize {
        let mut reclaimed = 0;
        for i in 0..self.layout.max_publishers() {
            let publisher = self.publisher(i);
            if publisher.port.try_begin_reclaim_if(&mut is_dead) {
                self.release_publisher_loans(&publisher);
                publisher.port.vacate();
                reclaimed += 1;
            }
        }

        for i in 0..self.layout.max_subscribers() {
            let subscriber = self.subscriber(i);
            if subscriber.port.try_begin_reclaim_if(&mut is_dead) {
                self.release_subscriber_samples(&subscriber);
                subscriber.port.vacate();
                reclaimed += 1;
            }
        }
        reclaimed
    }
}
