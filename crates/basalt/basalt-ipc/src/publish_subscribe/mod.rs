//! Zero-copy publish-subscribe.
//!
//! A publisher loans a slot from the service's shared pool, writes its
//! payload in place and sends only the slot index to every subscriber queue.
//! The slot returns to the pool once the last subscriber dropped it.

pub(crate) mod layout;
pub mod port_factory;
pub mod publisher;
pub mod sample;
pub mod sample_mut;
mod static_config;
pub mod subscriber;

pub use port_factory::{DynamicConfig, PortFactory};
pub use publisher::{Publisher, PublisherBuilder, PublisherCreateError};
pub use sample::Sample;
pub use sample_mut::{SampleMut, SampleMutUninit};
pub use static_config::StaticConfig;
pub use subscriber::{Subscriber, SubscriberBuilder, SubscriberCreateError};

use crate::service::builder::{ensure_overflow, ensure_supported, open_or_create};
use crate::service::{
    PatternConfig, ServiceBuilder, ServiceCreateError, ServiceOpenError, ServiceOpenOrCreateError,
    TypeDetail,
};
use std::fmt;
use std::marker::PhantomData;

/// Creates or opens a publish-subscribe service carrying `[T]`.
pub struct Builder<T> {
    base: ServiceBuilder,
    max_publishers: Option<usize>,
    max_subscribers: Option<usize>,
    subscriber_max_buffer_size: Option<usize>,
    subscriber_max_borrowed_samples: Option<usize>,
    publisher_max_loaned_samples: Option<usize>,
    max_slice_len: Option<usize>,
    enable_safe_overflow: Option<bool>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Builder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("publish_subscribe::Builder")
            .field("base", &self.base)
            .field("payload", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: Copy + 'static> Builder<T> {
    pub(crate) fn new(base: ServiceBuilder) -> Self {
        Self {
            base,
            max_publishers: None,
            max_subscribers: None,
            subscriber_max_buffer_size: None,
            subscriber_max_borrowed_samples: None,
            publisher_max_loaned_samples: None,
            max_slice_len: None,
            enable_safe_overflow: None,
            _payload: PhantomData,
        }
    }

    pub fn max_publishers(mut self, value: usize) -> Self {
        self.max_publishers = Some(value);
        self
    }

    pub fn max_subscribers(mut self, value: usize) -> Self {
        self.max_subscribers = Some(value);
        self
    }

    /// Samples a subscriber queue holds before overflow or back pressure.
    pub fn subscriber_max_buffer_size(mut self, value: usize) -> Self {
        self.subscriber_max_buffer_size = Some(value);
        self
    }

    pub fn subscriber_max_borrowed_samples(mut self, value: usize) -> Self {
        self.subscriber_max_borrowed_samples = Some(value);
        self
    }

    pub fn publisher_max_loaned_samples(mut self, value: usize) -> Self {
        self.publisher_max_loaned_samples = Some(value);
        self
    }

    /// Largest number of `T` one sample may carry.
    pub fn max_slice_len(mut self, value: usize) -> Self {
        self.max_slice_len = Some(value);
        self
    }

    /// With safe overflow a full subscriber queue drops its oldest sample
    /// instead of applying the publisher's delivery strategy.
    pub fn enable_safe_overflow(mut self, value: bool) -> Self {
        self.enable_safe_overflow = Some(value);
        self
    }

    fn static_config(&self) -> StaticConfig {
        let mut defaults = self.base.node().config().defaults.publish_subscribe.clone();
        if let Some(v) = self.max_publishers {
            defaults.max_publishers = v;
        }
        if let Some(v) = self.max_subscribers {
            defaults.max_subscribers = v;
        }
        if let Some(v) = self.subscriber_max_buffer_size {
            defaults.subscriber_max_buffer_size = v;
        }
        if let Some(v) = self.subscriber_max_borrowed_samples {
            defaults.subscriber_max_borrowed_samples = v;
        }
        if let Some(v) = self.publisher_max_loaned_samples {
            defaults.publisher_max_loaned_samples = v;
        }
        if let Some(v) = self.max_slice_len {
            defaults.max_slice_len = v;
        }
        if let Some(v) = self.enable_safe_overflow {
            defaults.enable_safe_overflow = v;
        }
        StaticConfig::from_defaults(&defaults, TypeDetail::of::<T>())
    }

    pub fn create(self) -> Result<PortFactory<T>, ServiceCreateError> {
        self.try_create()
    }

    pub fn open(self) -> Result<PortFactory<T>, ServiceOpenError> {
        self.try_open()
    }

    pub fn open_or_create(self) -> Result<PortFactory<T>, ServiceOpenOrCreateError> {
        open_or_create(|| self.try_open(), || self.try_create())
    }

    fn try_create(&self) -> Result<PortFactory<T>, ServiceCreateError> {
        let config = self.static_config();
        let state = self.base.create_state(PatternConfig::PublishSubscribe(config))?;
        let layout = state
            .layout()
            .publish_subscribe()
            .ok_or(ServiceCreateError::InternalFailure)?;
        Ok(PortFactory::new(state, config, layout))
    }

    fn try_open(&self) -> Result<PortFactory<T>, ServiceOpenError> {
        let (state, config) = self.base.open_state(
            |config| match config {
                PatternConfig::PublishSubscribe(c) => Some(*c),
                _ => None,
            },
            |existing| self.verify(existing),
        )?;
        let layout = state
            .layout()
            .publish_subscribe()
            .ok_or(ServiceOpenError::ServiceInCorruptedState)?;
        Ok(PortFactory::new(state, config, layout))
    }

    fn verify(&self, existing: &StaticConfig) -> Result<(), ServiceOpenError> {
        if *existing.payload_type() != TypeDetail::of::<T>() {
            return Err(ServiceOpenError::IncompatibleTypes);
        }

        ensure_supported(
            self.max_publishers,
            existing.max_publishers(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfPublishers,
        )?;
        ensure_supported(
            self.max_subscribers,
            existing.max_subscribers(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfSubscribers,
        )?;
        ensure_supported(
            self.subscriber_max_buffer_size,
            existing.subscriber_max_buffer_size(),
            ServiceOpenError::DoesNotSupportRequestedMinBufferSize,
        )?;
        ensure_supported(
            self.subscriber_max_borrowed_samples,
            existing.subscriber_max_borrowed_samples(),
            ServiceOpenError::DoesNotSupportRequestedMinSubscriberBorrowedSamples,
        )?;
        ensure_supported(
            self.publisher_max_loaned_samples,
            existing.publisher_max_loaned_samples(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfLoanedSamples,
        )?;
        ensure_supported(
            self.max_slice_len,
            existing.max_slice_len(),
            ServiceOpenError::DoesNotSupportRequestedMaxSliceLen,
        )?;
        ensure_overflow(self.enable_safe_overflow, existing.has_safe_overflow())
    }
}
