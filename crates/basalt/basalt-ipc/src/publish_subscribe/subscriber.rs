use super::layout::{PublishSubscribeLayout, PublishSubscribeSegment};
use super::{Sample, StaticConfig};
use crate::port::{ReceiveError, claim_port_slot};
use crate::port_id::UniqueSubscriberId;
use crate::service::ServiceState;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberCreateError {
    #[error("the service supports no further subscribers")]
    ExceedsMaxSupportedSubscribers,
}

pub struct SubscriberBuilder<T> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: PublishSubscribeLayout,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for SubscriberBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberBuilder")
            .field("service", self.state.name())
            .finish()
    }
}

impl<T: Copy + 'static> SubscriberBuilder<T> {
    pub(crate) fn new(
        state: Arc<ServiceState>,
        config: StaticConfig,
        layout: PublishSubscribeLayout,
    ) -> Self {
        Self {
            state,
            config,
            layout,
            _payload: PhantomData,
        }
    }

    pub fn create(self) -> Result<Subscriber<T>, SubscriberCreateError> {
        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { PublishSubscribeSegment::new(self.state.base(), &layout) };
            let slot = claim_port_slot(
                layout.max_subscribers(),
                |i| segment.subscriber(i).port,
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(SubscriberCreateError::ExceedsMaxSupportedSubscribers)?;
            // Entries pushed after the previous owner drained its queue.
            segment.release_subscriber_samples(&segment.subscriber(slot));
            slot
        };

        let id = UniqueSubscriberId::new(self.state.next_port_id());
        let subscriber = Subscriber {
            state: self.state,
            layout,
            slot,
            id,
            max_slice_len: self.config.max_slice_len(),
            _payload: PhantomData,
        };
        subscriber.segment().subscriber(slot).port.activate(id.value());

        debug!(service = %subscriber.state.name(), port = %id, "created subscriber");
        Ok(subscriber)
    }
}

pub struct Subscriber<T> {
    state: Arc<ServiceState>,
    layout: PublishSubscribeLayout,
    slot: usize,
    id: UniqueSubscriberId,
    max_slice_len: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("service", self.state.name())
            .field("id", &self.id)
            .finish()
    }
}

impl<T: Copy + 'static> Subscriber<T> {
    fn segment(&self) -> PublishSubscribeSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { PublishSubscribeSegment::new(self.state.base(), &self.layout) }
    }

    pub fn id(&self) -> UniqueSubscriberId {
        self.id
    }

    /// Whether samples are waiting in the queue.
    pub fn has_samples(&self) -> bool {
        !self.segment().subscriber(self.slot).queue.is_empty()
    }

    /// Takes the oldest queued sample, if any.
    pub fn receive(&self) -> Result<Option<Sample<'_, T>>, ReceiveError> {
        let segment = self.segment();
        let subscriber = segment.subscriber(self.slot);
        if subscriber.borrows.len() >= subscriber.borrows.capacity() {
            return Err(ReceiveError::ExceedsMaxBorrows);
        }

        let Some(index) = subscriber.queue.pop() else {
            return Ok(None);
        };
        let index = index as u32;
        let pool = segment.pool();
        if !subscriber.borrows.insert(index) {
            pool.release(index);
            return Err(ReceiveError::ExceedsMaxBorrows);
        }

        let header = pool.header(index);
        let len = (header.len.load(Ordering::Relaxed) as usize).min(self.max_slice_len);
        let origin = header.origin.load(Ordering::Relaxed);
        Ok(Some(Sample::new(
            self,
            index,
            pool.payload(index) as *const T,
            len,
            origin,
        )))
    }

    pub(super) fn release(&self, index: u32) {
        let segment = self.segment();
        if segment.subscriber(self.slot).borrows.remove(index) {
            segment.pool().release(index);
        }
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        // SAFETY: `state` keeps the validated segment mapped.
        let segment = unsafe { PublishSubscribeSegment::new(self.state.base(), &self.layout) };
        let subscriber = segment.subscriber(self.slot);
        subscriber.port.deactivate();
        segment.release_subscriber_samples(&subscriber);
        subscriber.port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped subscriber");
    }
}
