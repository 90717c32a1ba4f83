use super::layout::{EventLayout, EventSegment};
use super::{ListenerBuilder, NotifierBuilder, StaticConfig};
use crate::service::ServiceState;
use crate::service_name::ServiceName;
use std::sync::Arc;

/// Handle of an open event service; creates its ports.
///
/// The service stays registered while this handle or any port created from
/// it is alive.
#[derive(Debug)]
pub struct PortFactory {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: EventLayout,
}

impl PortFactory {
    pub(crate) fn new(state: ServiceState, config: StaticConfig, layout: EventLayout) -> Self {
        Self {
            state: Arc::new(state),
            config,
            layout,
        }
    }

    pub fn name(&self) -> &ServiceName {
        self.state.name()
    }

    /// Limits chosen by the service's creator.
    pub fn static_config(&self) -> &StaticConfig {
        &self.config
    }

    pub fn dynamic_config(&self) -> DynamicConfig {
        DynamicConfig {
            state: self.state.clone(),
            layout: self.layout,
        }
    }

    pub fn notifier_builder(&self) -> NotifierBuilder {
        NotifierBuilder::new(self.state.clone(), self.config, self.layout)
    }

    pub fn listener_builder(&self) -> ListenerBuilder {
        ListenerBuilder::new(self.state.clone(), self.layout)
    }
}

/// Live port counts of an event service.
#[derive(Debug)]
pub struct DynamicConfig {
    state: Arc<ServiceState>,
    layout: EventLayout,
}

impl DynamicConfig {
    fn segment(&self) -> EventSegment<'_> {
        // SAFETY: `state` keeps the segment mapped and it was validated
        // against this layout when the service was opened.
        unsafe { EventSegment::new(self.state.base(), &self.layout) }
    }

    pub fn number_of_notifiers(&self) -> usize {
        self.segment().number_of_notifiers()
    }

    pub fn number_of_listeners(&self) -> usize {
        self.segment().number_of_listeners()
    }
}
