//! Zero-copy request-response.
//!
//! A client loans a request, sends it to every active server and keeps a
//! [`PendingResponse`] through which any number of responses stream back.
//! Each server sees the request as an [`ActiveRequest`] and answers by
//! loaning and sending responses into the request's channel.

pub mod active_request;
pub mod client;
pub(crate) mod layout;
pub mod pending_response;
pub mod port_factory;
pub mod request_mut;
pub mod response;
pub mod response_mut;
pub mod server;
mod static_config;

pub use active_request::ActiveRequest;
pub use client::{Client, ClientBuilder, ClientCreateError, RequestSendError};
pub use pending_response::PendingResponse;
pub use port_factory::{DynamicConfig, PortFactory};
pub use request_mut::{RequestMut, RequestMutUninit};
pub use response::Response;
pub use response_mut::{ResponseMut, ResponseMutUninit};
pub use server::{Server, ServerBuilder, ServerCreateError};
pub use static_config::StaticConfig;

use crate::service::builder::{ensure_overflow, ensure_supported, open_or_create};
use crate::service::{
    PatternConfig, ServiceBuilder, ServiceCreateError, ServiceOpenError, ServiceOpenOrCreateError,
    TypeDetail,
};
use std::fmt;
use std::marker::PhantomData;

/// Creates or opens a request-response service.
pub struct Builder<Req, Res> {
    base: ServiceBuilder,
    max_clients: Option<usize>,
    max_servers: Option<usize>,
    max_active_requests_per_client: Option<usize>,
    max_response_buffer_size: Option<usize>,
    max_borrowed_responses_per_pending_response: Option<usize>,
    max_loaned_requests: Option<usize>,
    server_max_loaned_responses: Option<usize>,
    enable_safe_overflow_for_requests: Option<bool>,
    enable_safe_overflow_for_responses: Option<bool>,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for Builder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("request_response::Builder")
            .field("base", &self.base)
            .field("request", &std::any::type_name::<Req>())
            .field("response", &std::any::type_name::<Res>())
            .finish_non_exhaustive()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Builder<Req, Res> {
    pub(crate) fn new(base: ServiceBuilder) -> Self {
        Self {
            base,
            max_clients: None,
            max_servers: None,
            max_active_requests_per_client: None,
            max_response_buffer_size: None,
            max_borrowed_responses_per_pending_response: None,
            max_loaned_requests: None,
            server_max_loaned_responses: None,
            enable_safe_overflow_for_requests: None,
            enable_safe_overflow_for_responses: None,
            _types: PhantomData,
        }
    }

    pub fn max_clients(mut self, value: usize) -> Self {
        self.max_clients = Some(value);
        self
    }

    pub fn max_servers(mut self, value: usize) -> Self {
        self.max_servers = Some(value);
        self
    }

    /// Requests a client may have in flight at the same time.
    pub fn max_active_requests_per_client(mut self, value: usize) -> Self {
        self.max_active_requests_per_client = Some(value);
        self
    }

    /// Responses queued per pending request before overflow or back pressure.
    pub fn max_response_buffer_size(mut self, value: usize) -> Self {
        self.max_response_buffer_size = Some(value);
        self
    }

    pub fn max_borrowed_responses_per_pending_response(mut self, value: usize) -> Self {
        self.max_borrowed_responses_per_pending_response = Some(value);
        self
    }

    pub fn max_loaned_requests(mut self, value: usize) -> Self {
        self.max_loaned_requests = Some(value);
        self
    }

    pub fn server_max_loaned_responses(mut self, value: usize) -> Self {
        self.server_max_loaned_responses = Some(value);
        self
    }

    pub fn enable_safe_overflow_for_requests(mut self, value: bool) -> Self {
        self.enable_safe_overflow_for_requests = Some(value);
        self
    }

    pub fn enable_safe_overflow_for_responses(mut self, value: bool) -> Self {
        self.enable_safe_overflow_for_responses = Some(value);
        self
    }

    fn static_config(&self) -> StaticConfig {
        let mut d = self.base.node().config().defaults.request_response.clone();
        d.max_clients = self.max_clients.unwrap_or(d.max_clients);
        d.max_servers = self.max_servers.unwrap_or(d.max_servers);
        d.max_active_requests_per_client = self
            .max_active_requests_per_client
            .unwrap_or(d.max_active_requests_per_client);
        d.max_response_buffer_size = self
            .max_response_buffer_size
            .unwrap_or(d.max_response_buffer_size);
        d.max_borrowed_responses_per_pending_response = self
            .max_borrowed_responses_per_pending_response
            .unwrap_or(d.max_borrowed_responses_per_pending_response);
        d.max_loaned_requests = self.max_loaned_requests.unwrap_or(d.max_loaned_requests);
        d.server_max_loaned_responses = self
            .server_max_loaned_responses
            .unwrap_or(d.server_max_loaned_responses);
        d.enable_safe_overflow_for_requests = self
            .enable_safe_overflow_for_requests
            .unwrap_or(d.enable_safe_overflow_for_requests);
        d.enable_safe_overflow_for_responses = self
            .enable_safe_overflow_for_responses
            .unwrap_or(d.enable_safe_overflow_for_responses);

        StaticConfig::from_defaults(&d, TypeDetail::of::<Req>(), TypeDetail::of::<Res>())
    }

    pub fn create(self) -> Result<PortFactory<Req, Res>, ServiceCreateError> {
        self.try_create()
    }

    pub fn open(self) -> Result<PortFactory<Req, Res>, ServiceOpenError> {
        self.try_open()
    }

    pub fn open_or_create(self) -> Result<PortFactory<Req, Res>, ServiceOpenOrCreateError> {
        open_or_create(|| self.try_open(), || self.try_create())
    }

    fn try_create(&self) -> Result<PortFactory<Req, Res>, ServiceCreateError> {
        let config = self.static_config();
        let state = self.base.create_state(PatternConfig::RequestResponse(config))?;
        let layout = state
            .layout()
            .request_response()
            .ok_or(ServiceCreateError::InternalFailure)?;
        Ok(PortFactory::new(state, config, layout))
    }

    fn try_open(&self) -> Result<PortFactory<Req, Res>, ServiceOpenError> {
        let (state, config) = self.base.open_state(
            |config| match config {
                PatternConfig::RequestResponse(c) => Some(*c),
                _ => None,
            },
            |existing| self.verify(existing),
        )?;
        let layout = state
            .layout()
            .request_response()
            .ok_or(ServiceOpenError::ServiceInCorruptedState)?;
        Ok(PortFactory::new(state, config, layout))
    }

    fn verify(&self, existing: &StaticConfig) -> Result<(), ServiceOpenError> {
        if *existing.request_type() != TypeDetail::of::<Req>()
            || *existing.response_type() != TypeDetail::of::<Res>()
        {
            return Err(ServiceOpenError::IncompatibleTypes);
        }

        ensure_supported(
            self.max_clients,
            existing.max_clients(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfClients,
        )?;
        ensure_supported(
            self.max_servers,
            existing.max_servers(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfServers,
        )?;
        ensure_supported(
            self.max_active_requests_per_client,
            existing.max_active_requests_per_client(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfActiveRequestsPerClient,
        )?;
        ensure_supported(
            self.max_response_buffer_size,
            existing.max_response_buffer_size(),
            ServiceOpenError::DoesNotSupportRequestedResponseBufferSize,
        )?;
        ensure_supported(
            self.max_borrowed_responses_per_pending_response,
            existing.max_borrowed_responses_per_pending_response(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfBorrowedResponsesPerPendingResponse,
        )?;
        ensure_supported(
            self.max_loaned_requests,
            existing.max_loaned_requests(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfLoanedRequests,
        )?;
        ensure_supported(
            self.server_max_loaned_responses,
            existing.server_max_loaned_responses(),
            ServiceOpenError::DoesNotSupportRequestedAmountOfLoanedResponses,
        )?;
        ensure_overflow(
            self.enable_safe_overflow_for_requests,
            existing.has_safe_overflow_for_requests(),
        )?;
        ensure_overflow(
            self.enable_safe_overflow_for_responses,
            existing.has_safe_overflow_for_responses(),
        )
    }
}
