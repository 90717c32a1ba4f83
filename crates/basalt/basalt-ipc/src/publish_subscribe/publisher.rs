//! Sending side of a publish-subscribe service.
//!
//! Sending never copies the payload: the slot index is pushed into every
//! active subscriber queue and each queue entry holds one pool reference.

use super::layout::{PublishSubscribeLayout, PublishSubscribeSegment};
use super::{SampleMut, SampleMutUninit, StaticConfig};
use crate::port::{
    self, BLOCKED_PROBE_INTERVAL, Delivery, LoanError, SendError, UnableToDeliverStrategy,
    claim_port_slot,
};
use crate::port_id::UniquePublisherId;
use crate::service::ServiceState;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PublisherCreateError {
    #[error("the service supports no further publishers")]
    ExceedsMaxSupportedPublishers,

    #[error("the requested slice length exceeds the service's maximum")]
    ExceedsMaxSliceLen,
}

pub struct PublisherBuilder<T> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: PublishSubscribeLayout,
    max_slice_len: Option<usize>,
    strategy: Option<UnableToDeliverStrategy>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for PublisherBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherBuilder")
            .field("service", self.state.name())
            .field("max_slice_len", &self.max_slice_len)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<T: Copy + 'static> PublisherBuilder<T> {
    pub(crate) fn new(
        state: Arc<ServiceState>,
        config: StaticConfig,
        layout: PublishSubscribeLayout,
    ) -> Self {
        Self {
            state,
            config,
            layout,
            max_slice_len: None,
            strategy: None,
            _payload: PhantomData,
        }
    }

    /// Largest slice this publisher loans; defaults to the service's maximum.
    pub fn max_slice_len(mut self, value: usize) -> Self {
        self.max_slice_len = Some(value);
        self
    }

    /// What to do when a subscriber queue is full and safe overflow is off.
    pub fn unable_to_deliver_strategy(mut self, value: UnableToDeliverStrategy) -> Self {
        self.strategy = Some(value);
        self
    }

    pub fn create(self) -> Result<Publisher<T>, PublisherCreateError> {
        let max_slice_len = self.max_slice_len.unwrap_or(self.config.max_slice_len());
        if max_slice_len > self.config.max_slice_len() {
            return Err(PublisherCreateError::ExceedsMaxSliceLen);
        }
        let strategy = self.strategy.unwrap_or(
            self.state
                .node_config()
                .defaults
                .publish_subscribe
                .unable_to_deliver_strategy,
        );

        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { PublishSubscribeSegment::new(self.state.base(), &layout) };
            let slot = claim_port_slot(
                layout.max_publishers(),
                |i| segment.publisher(i).port,
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(PublisherCreateError::ExceedsMaxSupportedPublishers)?;
            segment.release_publisher_loans(&segment.publisher(slot));
            slot
        };

        let id = UniquePublisherId::new(self.state.next_port_id());
        let publisher = Publisher {
            state: self.state,
            layout,
            slot,
            id,
            max_slice_len,
            safe_overflow: self.config.has_safe_overflow(),
            strategy,
            _payload: PhantomData,
        };
        publisher.segment().publisher(slot).port.activate(id.value());

        debug!(service = %publisher.state.name(), port = %id, "created publisher");
        Ok(publisher)
    }
}

pub struct Publisher<T> {
    state: Arc<ServiceState>,
    layout: PublishSubscribeLayout,
    slot: usize,
    id: UniquePublisherId,
    max_slice_len: usize,
    safe_overflow: bool,
    strategy: UnableToDeliverStrategy,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("service", self.state.name())
            .field("id", &self.id)
            .field("max_slice_len", &self.max_slice_len)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<T: Copy + 'static> Publisher<T> {
    pub(super) fn segment(&self) -> PublishSubscribeSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { PublishSubscribeSegment::new(self.state.base(), &self.layout) }
    }

    pub fn id(&self) -> UniquePublisherId {
        self.id
    }

    pub fn max_slice_len(&self) -> usize {
        self.max_slice_len
    }

    pub fn unable_to_deliver_strategy(&self) -> UnableToDeliverStrategy {
        self.strategy
    }

    /// Loans a slot for a single `T`.
    pub fn loan_uninit(&self) -> Result<SampleMutUninit<'_, T>, LoanError> {
        self.loan_slice_uninit(1)
    }

    /// Loans a slot for `len` elements; their contents are unspecified.
    pub fn loan_slice_uninit(&self, len: usize) -> Result<SampleMutUninit<'_, T>, LoanError> {
        if len > self.max_slice_len {
            return Err(LoanError::ExceedsMaxLoanSize);
        }

        let segment = self.segment();
        let loans = segment.publisher(self.slot).loans;
        if loans.len() >= loans.capacity() {
            return Err(LoanError::ExceedsMaxLoans);
        }

        let pool = segment.pool();
        let index = pool.allocate().ok_or(LoanError::OutOfMemory)?;
        if !loans.insert(index) {
            pool.release(index);
            return Err(LoanError::ExceedsMaxLoans);
        }

        let header = pool.header(index);
        header.len.store(len as u64, Ordering::Relaxed);
        header.origin.store(self.id.value(), Ordering::Relaxed);
        header.route.store(0, Ordering::Relaxed);

        Ok(SampleMutUninit::new(self, index, pool.payload(index) as *mut T, len))
    }

    /// Loans a slice of `len` default values.
    pub fn loan_slice(&self, len: usize) -> Result<SampleMut<'_, T>, LoanError>
    where
        T: Default,
    {
        Ok(self.loan_slice_uninit(len)?.write_from_fn(|_| T::default()))
    }

    pub fn send_copy(&self, value: T) -> Result<usize, SendError> {
        self.send_slice_copy(std::slice::from_ref(&value))
    }

    /// Loans, copies `values` in and sends.
    pub fn send_slice_copy(&self, values: &[T]) -> Result<usize, SendError> {
        self.loan_slice_uninit(values.len())?
            .write_from_slice(values)
            .send()
    }

    /// Returns an unsent loan to the pool.
    pub(super) fn return_loan(&self, index: u32) {
        let segment = self.segment();
        if segment.publisher(self.slot).loans.remove(index) {
            segment.pool().release(index);
        }
    }

    /// Hands the loaned slot `index` to every active subscriber; returns how
    /// many were reached.
    pub(super) fn deliver(&self, index: u32) -> Result<usize, SendError> {
        let segment = self.segment();
        let pool = segment.pool();
        let mut delivered = 0;
        let mut undeliverable = false;

        for i in 0..self.layout.max_subscribers() {
            let subscriber = segment.subscriber(i);
            let Some(port_id) = subscriber.port.active_port() else {
                continue;
            };
            let owner = subscriber.port.owner();

            pool.retain(index);
            let outcome = port::deliver(
                &subscriber.queue,
                index as u64,
                self.safe_overflow,
                self.strategy,
                |evicted| {
                    pool.release(evicted as u32);
                },
                |attempt| {
                    subscriber.port.active_port() == Some(port_id)
                        && (attempt % BLOCKED_PROBE_INTERVAL != 0
                            || owner.is_none_or(|o| self.state.is_owner_alive(o)))
                },
            );

            match outcome {
                Delivery::Delivered => delivered += 1,
                Delivery::Discarded => {
                    pool.release(index);
                    undeliverable = true;
                    warn!(port = %self.id, subscriber = i, "subscriber queue full, sample discarded");
                }
                Delivery::Disconnected => {
                    pool.release(index);
                }
            }
        }

        segment.publisher(self.slot).loans.remove(index);
        pool.release(index);

        if delivered == 0 && undeliverable {
            return Err(SendError::UnableToDeliver);
        }
        Ok(delivered)
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        // SAFETY: `state` keeps the validated segment mapped.
        let segment = unsafe { PublishSubscribeSegment::new(self.state.base(), &self.layout) };
        let publisher = segment.publisher(self.slot);
        publisher.port.deactivate();
        segment.release_publisher_loans(&publisher);
        publisher.port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped publisher");
    }
}
