use super::layout::{RequestResponseLayout, RequestResponseSegment};
use super::{ClientBuilder, ServerBuilder, StaticConfig};
use crate::service::ServiceState;
use crate::service_name::ServiceName;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle of an open request-response service.
pub struct PortFactory<Req, Res> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: RequestResponseLayout,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for PortFactory<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("request_response::PortFactory")
            .field("state", &self.state)
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> PortFactory<Req, Res> {
    pub(crate) fn new(state: ServiceState, config: StaticConfig, layout: RequestResponseLayout) -> Self {
        Self {
            state: Arc::new(state),
            config,
            layout,
            _types: PhantomData,
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

    pub fn client_builder(&self) -> ClientBuilder<Req, Res> {
        ClientBuilder::new(self.state.clone(), self.config, self.layout)
    }

    pub fn server_builder(&self) -> ServerBuilder<Req, Res> {
        ServerBuilder::new(self.state.clone(), self.config, self.layout)
    }
}

/// Live port counts of a request-response service.
#[derive(Debug)]
pub struct DynamicConfig {
    state: Arc<ServiceState>,
    layout: RequestResponseLayout,
}

impl DynamicConfig {
    fn segment(&self) -> RequestResponseSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { RequestResponseSegment::new(self.state.base(), &self.layout) }
    }

    pub fn number_of_clients(&self) -> usize {
        self.segment().number_of_clients()
    }

    pub fn number_of_servers(&self) -> usize {
        self.segment().number_of_servers()
    }
}
