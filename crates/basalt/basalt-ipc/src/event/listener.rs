use super::layout::{EventLayout, EventSegment, ListenerSlot};
use super::{EventId, wake};
use crate::port::claim_port_slot;
use crate::port_id::UniqueListenerId;
use crate::service::ServiceState;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ListenerCreateError {
    #[error("the service supports no further listeners")]
    ExceedsMaxSupportedListeners,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ListenerWaitError {
    #[error("a signal interrupted the wait")]
    InterruptSignal,

    #[error("internal failure while waiting for events")]
    InternalFailure,
}

impl From<io::Error> for ListenerWaitError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::Interrupted {
            return ListenerWaitError::InterruptSignal;
        }
        error!(error = %e, "waiting for events failed");
        ListenerWaitError::InternalFailure
    }
}

#[derive(Debug)]
pub struct ListenerBuilder {
    state: Arc<ServiceState>,
    layout: EventLayout,
}

impl ListenerBuilder {
    pub(crate) fn new(state: Arc<ServiceState>, layout: EventLayout) -> Self {
        Self { state, layout }
    }

    pub fn create(self) -> Result<Listener, ListenerCreateError> {
        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { EventSegment::new(self.state.base(), &layout) };
            claim_port_slot(
                layout.max_listeners(),
                |i| segment.listener(i).port,
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(ListenerCreateError::ExceedsMaxSupportedListeners)?
        };

        let id = UniqueListenerId::new(self.state.next_port_id());
        let listener = Listener {
            state: self.state,
            layout,
            slot,
            id,
        };
        let port = listener.listener_slot();
        port.clear();
        port.port.activate(id.value());

        debug!(service = %listener.state.name(), port = %id, "created listener");
        Ok(listener)
    }
}

/// Receiving side of an event service.
///
/// Every wait hands out ids that arrived since the previous one; an id
/// notified several times in between is seen once.
pub struct Listener {
    state: Arc<ServiceState>,
    layout: EventLayout,
    slot: usize,
    id: UniqueListenerId,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("service", self.state.name())
            .field("id", &self.id)
            .finish()
    }
}

impl Listener {
    fn listener_slot(&self) -> ListenerSlot<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { EventSegment::new(self.state.base(), &self.layout) }.listener(self.slot)
    }

    pub fn id(&self) -> UniqueListenerId {
        self.id
    }

    pub fn try_wait_one(&self) -> Result<Option<EventId>, ListenerWaitError> {
        Ok(self.listener_slot().take_one().map(EventId::new))
    }

    /// Waits at most `timeout` for one event; `None` when none arrived.
    pub fn timed_wait_one(&self, timeout: Duration) -> Result<Option<EventId>, ListenerWaitError> {
        self.wait_until(Some(Instant::now() + timeout), |slot| {
            slot.take_one().map(EventId::new)
        })
    }

    /// Waits until an event arrives; always `Some` on success.
    pub fn blocking_wait_one(&self) -> Result<Option<EventId>, ListenerWaitError> {
        self.wait_until(None, |slot| slot.take_one().map(EventId::new))
    }

    /// Hands every pending id to `callback` in ascending order.
    pub fn try_wait_all(&self, mut callback: impl FnMut(EventId)) -> Result<(), ListenerWaitError> {
        self.listener_slot()
            .take_all(|id| callback(EventId::new(id)));
        Ok(())
    }

    /// Like [`Listener::try_wait_all`], but first waits at most `timeout` for
    /// anything to become pending.
    pub fn timed_wait_all(
        &self,
        mut callback: impl FnMut(EventId),
        timeout: Duration,
    ) -> Result<(), ListenerWaitError> {
        self.wait_until(Some(Instant::now() + timeout), |slot| {
            (slot.take_all(|id| callback(EventId::new(id))) > 0).then_some(())
        })?;
        Ok(())
    }

    pub fn blocking_wait_all(&self, mut callback: impl FnMut(EventId)) -> Result<(), ListenerWaitError> {
        self.wait_until(None, |slot| {
            (slot.take_all(|id| callback(EventId::new(id))) > 0).then_some(())
        })?;
        Ok(())
    }

    /// Runs `take` until it yields something or `deadline` passes.
    ///
    /// The wake word is read before every attempt and the sleep only happens
    /// while it still holds that value, so a notification racing with the
    /// attempt cuts the sleep short.
    fn wait_until<R>(
        &self,
        deadline: Option<Instant>,
        mut take: impl FnMut(&ListenerSlot<'_>) -> Option<R>,
    ) -> Result<Option<R>, ListenerWaitError> {
        let slot = self.listener_slot();
        loop {
            let seen = slot.wake.load(Ordering::Acquire);
            if let Some(value) = take(&slot) {
                return Ok(Some(value));
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            wake::wait(slot.wake, seen, remaining)?;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let slot = self.listener_slot();
        slot.port.deactivate();
        slot.clear();
        slot.port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped listener");
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::event::EventId;
    use crate::node::NodeBuilder;
    use crate::service_name::ServiceName;
    use std::time::{Duration, Instant};

    #[test]
    fn timed_wait_all_returns_after_the_timeout_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let node = NodeBuilder::new()
            .config(&Config::default().with_root_path(dir.path()))
            .create()
            .unwrap();
        let service = node
            .service_builder(&ServiceName::new("idle").unwrap())
            .event()
            .create()
            .unwrap();
        let listener = service.listener_builder().create().unwrap();

        let timeout = Duration::from_millis(25);
        let start = Instant::now();
        let mut ids: Vec<EventId> = vec![];
        listener.timed_wait_all(|id| ids.push(id), timeout).unwrap();

        assert!(start.elapsed() >= timeout);
        assert!(ids.is_empty());
    }
}
