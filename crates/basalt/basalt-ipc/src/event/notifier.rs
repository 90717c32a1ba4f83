use super::layout::{EventLayout, EventSegment};
use super::{EventId, StaticConfig, wake};
use crate::port::claim_port_slot;
use crate::port_id::UniqueNotifierId;
use crate::service::ServiceState;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NotifierCreateError {
    #[error("the service supports no further notifiers")]
    ExceedsMaxSupportedNotifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NotifierNotifyError {
    #[error("the event id exceeds the service's maximum event id")]
    EventIdOutOfBounds,
}

#[derive(Debug)]
pub struct NotifierBuilder {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: EventLayout,
    default_event_id: EventId,
}

impl NotifierBuilder {
    pub(crate) fn new(state: Arc<ServiceState>, config: StaticConfig, layout: EventLayout) -> Self {
        Self {
            state,
            config,
            layout,
            default_event_id: EventId::default(),
        }
    }

    /// Id signalled by [`Notifier::notify`].
    pub fn default_event_id(mut self, id: EventId) -> Self {
        self.default_event_id = id;
        self
    }

    pub fn create(self) -> Result<Notifier, NotifierCreateError> {
        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { EventSegment::new(self.state.base(), &layout) };
            claim_port_slot(
                layout.max_notifiers(),
                |i| segment.notifier(i),
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(NotifierCreateError::ExceedsMaxSupportedNotifiers)?
        };

        let id = UniqueNotifierId::new(self.state.next_port_id());
        let notifier = Notifier {
            state: self.state,
            layout,
            slot,
            id,
            default_event_id: self.default_event_id,
            event_id_max_value: self.config.event_id_max_value(),
        };
        notifier.segment().notifier(slot).activate(id.value());

        debug!(service = %notifier.state.name(), port = %id, "created notifier");
        Ok(notifier)
    }
}

/// Sending side of an event service.
pub struct Notifier {
    state: Arc<ServiceState>,
    layout: EventLayout,
    slot: usize,
    id: UniqueNotifierId,
    default_event_id: EventId,
    event_id_max_value: usize,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("service", self.state.name())
            .field("id", &self.id)
            .field("default_event_id", &self.default_event_id)
            .finish()
    }
}

impl Notifier {
    fn segment(&self) -> EventSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { EventSegment::new(self.state.base(), &self.layout) }
    }

    pub fn id(&self) -> UniqueNotifierId {
        self.id
    }

    /// Signals the default event id; returns how many listeners were reached.
    pub fn notify(&self) -> Result<usize, NotifierNotifyError> {
        self.notify_with_custom_event_id(self.default_event_id)
    }

    pub fn notify_with_custom_event_id(&self, id: EventId) -> Result<usize, NotifierNotifyError> {
        if id.as_value() > self.event_id_max_value {
            return Err(NotifierNotifyError::EventIdOutOfBounds);
        }

        let segment = self.segment();
        let mut notified = 0;
        for i in 0..self.layout.max_listeners() {
            let listener = segment.listener(i);
            if listener.port.active_port().is_none() {
                continue;
            }

            listener.set(id.as_value());
            wake::wake_all(listener.wake);
            notified += 1;
        }
        Ok(notified)
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let port = self.segment().notifier(self.slot);
        port.deactivate();
        port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped notifier");
    }
}
