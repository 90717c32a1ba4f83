//! Event notification between processes.
//!
//! Notifiers signal small numeric [`EventId`]s; listeners sleep until one
//! arrives. Pending ids are a set per listener, so notifying the same id
//! twice before the listener drains it is delivered once.

pub(crate) mod layout;
pub mod listener;
pub mod notifier;
pub mod port_factory;
mod static_config;
pub(crate) mod wake;

pub use listener::{Listener, ListenerBuilder, ListenerCreateError, ListenerWaitError};
pub use notifier::{Notifier, NotifierBuilder, NotifierCreateError, NotifierNotifyError};
pub use port_factory::{DynamicConfig, PortFactory};
pub use static_config::StaticConfig;

use crate::service::builder::{ensure_supported, open_or_create};
use crate::service::{
    PatternConfig, ServiceBuilder, ServiceCreateError, ServiceOpenError, ServiceOpenOrCreateError,
};
use std::fmt;

/// Identifier carried by a notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(usize);

impl EventId {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn as_value(&self) -> usize {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

/// Creates or opens an event service.
#[derive(Debug)]
pub struct Builder {
    base: ServiceBuilder,
    max_notifiers: Option<usize>,
    max_listeners: Option<usize>,
    event_id_max_value: Option<usize>,
}

impl Builder {
    pub(crate) fn new(base: ServiceBuilder) -> Self {
        Self {
            base,
            max_notifiers: None,
            max_listeners: None,
            event_id_max_value: None,
        }
    }

    /// On create the limit itself, on open the minimum the service must offer.
    pub fn max_notifiers(mut self, value: usize) -> Self {
        self.max_notifiers = Some(value);
        self
    }

    pub fn max_listeners(mut self, value: usize) -> Self {
        self.max_listeners = Some(value);
        self
    }

    pub fn event_id_max_value(mut self, value: usize) -> Self {
        self.event_id_max_value = Some(value);
        self
    }

    fn static_config(&self) -> StaticConfig {
        let mut defaults = self.base.node().config().defaults.event.clone();
        if let Some(v) = self.max_notifiers {
            defaults.max_notifiers = v;
        }
        if let Some(v) = self.max_listeners {
            defaults.max_listeners = v;
        }
        if let Some(v) = self.event_id_max_value {
            defaults.event_id_max_value = v;
        }
        StaticConfig::from_defaults(&defaults)
    }

    pub fn create(self) -> Result<PortFactory, ServiceCreateError> {
        self.try_create()
    }

    pub fn open(self) -> Result<PortFactory, ServiceOpenError> {
        self.try_open()
    }

    pub fn open_or_create(self) -> Result<PortFactory, ServiceOpenOrCreateError> {
        open_or_create(|| self.try_open(), || self.try_create())
    }

    fn try_create(&self) -> Result<PortFactory, ServiceCreateError> {
        let config = self.static_config();
        let state = self.base.create_state(PatternConfig::Event(config))?;
        let layout = state.layout().event().ok_or(ServiceCreateError::InternalFailure)?;
        Ok(PortFactory::new(state, config, layout))
    }

    fn try_open(&self) -> Result<PortFactory, ServiceOpenError> {
        let (state, config) = self.base.open_state(
            |config| match config {
                PatternConfig::Event(c) => Some(*c),
                _ => None,
            },
            |existing| {
                ensure_supported(
                    self.max_notifiers,
                    existing.max_notifiers(),
                    ServiceOpenError::DoesNotSupportRequestedAmountOfNotifiers,
                )?;
                ensure_supported(
                    self.max_listeners,
                    existing.max_listeners(),
                    ServiceOpenError::DoesNotSupportRequestedAmountOfListeners,
                )?;
                ensure_supported(
                    self.event_id_max_value,
                    existing.event_id_max_value(),
                    ServiceOpenError::DoesNotSupportRequestedMaxEventId,
                )
            },
        )?;
        let layout = state
            .layout()
            .event()
            .ok_or(ServiceOpenError::ServiceInCorruptedState)?;
        Ok(PortFactory::new(state, config, layout))
    }
}
