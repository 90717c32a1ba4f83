use super::layout::{PublishSubscribeLayout, PublishSubscribeSegment};
use super::{PublisherBuilder, StaticConfig, SubscriberBuilder};
use crate::service::ServiceState;
use crate::service_name::ServiceName;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle of an open publish-subscribe service carrying `[T]`.
pub struct PortFactory<T> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: PublishSubscribeLayout,
    _payload: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for PortFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("publish_subscribe::PortFactory")
            .field("state", &self.state)
            .finish()
    }
}

impl<T: Copy + 'static> PortFactory<T> {
    pub(crate) fn new(state: ServiceState, config: StaticConfig, layout: PublishSubscribeLayout) -> Self {
        Self {
            state: Arc::new(state),
            config,
            layout,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &ServiceName {
        self.state.name()
    }

    pub fn static_config(&self) -> &StaticConfig {
        &self.config
    }

    pub fn dynamic_config(&self) -> DynamicConfig {
        DynamicConfig {
            state: self.state.clone(),
            layout: self.layout,
        }
    }

    pub fn publisher_builder(&self) -> PublisherBuilder<T> {
        PublisherBuilder::new(self.state.clone(), self.config, self.layout)
    }

    pub fn subscriber_builder(&self) -> SubscriberBuilder<T> {
        SubscriberBuilder::new(self.state.clone(), self.config, self.layout)
    }
}

/// Live port counts of a publish-subscribe service.
#[derive(Debug)]
pub struct DynamicConfig {
    state: Arc<ServiceState>,
    layout: PublishSubscribeLayout,
}

impl DynamicConfig {
    fn segment(&self) -> PublishSubscribeSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { PublishSubscribeSegment::new(self.state.base(), &self.layout) }
    }

    pub fn number_of_publishers(&self) -> usize {
        self.segment().number_of_publishers()
    }

    pub fn number_of_subscribers(&self) -> usize {
        self.segment().number_of_subscribers()
    }
}
