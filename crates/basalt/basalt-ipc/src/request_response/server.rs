//! Answering side of a request-response service.

use super::layout::{RequestResponseLayout, RequestResponseSegment};
use super::{ActiveRequest, StaticConfig};
use crate::port::{ConnectionFailure, ReceiveError, UnableToDeliverStrategy, claim_port_slot};
use crate::port_id::UniqueServerId;
use crate::service::ServiceState;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServerCreateError {
    #[error("the service supports no further servers")]
    ExceedsMaxSupportedServers,
}

pub struct ServerBuilder<Req, Res> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: RequestResponseLayout,
    strategy: Option<UnableToDeliverStrategy>,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for ServerBuilder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("service", self.state.name())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> ServerBuilder<Req, Res> {
    pub(crate) fn new(
        state: Arc<ServiceState>,
        config: StaticConfig,
        layout: RequestResponseLayout,
    ) -> Self {
        Self {
            state,
            config,
            layout,
            strategy: None,
            _types: PhantomData,
        }
    }

    /// What to do when a response buffer is full and safe overflow is off.
    pub fn unable_to_deliver_strategy(mut self, value: UnableToDeliverStrategy) -> Self {
        self.strategy = Some(value);
        self
    }

    pub fn create(self) -> Result<Server<Req, Res>, ServerCreateError> {
        let strategy = self.strategy.unwrap_or(
            self.state
                .node_config()
                .defaults
                .request_response
                .server_unable_to_deliver_strategy,
        );

        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { RequestResponseSegment::new(self.state.base(), &layout) };
            let slot = claim_port_slot(
                layout.max_servers(),
                |i| segment.server(i).port,
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(ServerCreateError::ExceedsMaxSupportedServers)?;
            segment.release_server(&segment.server(slot));
            slot
        };

        let id = UniqueServerId::new(self.state.next_port_id());
        let server = Server {
            state: self.state,
            layout,
            slot,
            id,
            safe_overflow: self.config.has_safe_overflow_for_responses(),
            strategy,
            _types: PhantomData,
        };
        server.segment().server(slot).port.activate(id.value());

        debug!(service = %server.state.name(), port = %id, "created server");
        Ok(server)
    }
}

pub struct Server<Req, Res> {
    state: Arc<ServiceState>,
    layout: RequestResponseLayout,
    slot: usize,
    id: UniqueServerId,
    safe_overflow: bool,
    strategy: UnableToDeliverStrategy,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for Server<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("service", self.state.name())
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Server<Req, Res> {
    pub(super) fn segment(&self) -> RequestResponseSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { RequestResponseSegment::new(self.state.base(), &self.layout) }
    }

    pub(super) fn slot(&self) -> usize {
        self.slot
    }

    pub(super) fn state(&self) -> &ServiceState {
        &self.state
    }

    pub(super) fn safe_overflow(&self) -> bool {
        self.safe_overflow
    }

    pub fn id(&self) -> UniqueServerId {
        self.id
    }

    pub fn unable_to_deliver_strategy(&self) -> UnableToDeliverStrategy {
        self.strategy
    }

    /// Whether requests are queued.
    ///
    /// Client slots of dead nodes are reclaimed first. A client that died
    /// since the last call is reported once as
    /// [`ConnectionFailure::PeerTerminated`], whichever process reclaimed it.
    pub fn has_requests(&self) -> Result<bool, ConnectionFailure> {
        let segment = self.segment();
        let reclaimed = segment.reclaim_clients(&mut |owner| !self.state.is_owner_alive(owner));
        if reclaimed > 0 {
            warn!(port = %self.id, reclaimed, "reclaimed clients of dead nodes");
        }

        let server = segment.server(self.slot);
        let terminated = server.terminated_clients.swap(0, Ordering::AcqRel);
        if terminated > 0 {
            debug!(port = %self.id, terminated, "clients terminated");
            return Err(ConnectionFailure::PeerTerminated);
        }
        Ok(!server.requests.is_empty())
    }

    /// Takes the oldest queued request, if any.
    pub fn receive(&self) -> Result<Option<ActiveRequest<'_, Req, Res>>, ReceiveError> {
        let segment = self.segment();
        let server = segment.server(self.slot);
        if server.borrows.len() >= server.borrows.capacity() {
            return Err(ReceiveError::ExceedsMaxBorrows);
        }

        let Some(index) = server.requests.pop() else {
            return Ok(None);
        };
        let index = index as u32;
        if !server.borrows.insert(index) {
            segment.release_server_hold(index);
            return Err(ReceiveError::ExceedsMaxBorrows);
        }

        let pool = segment.request_pool();
        let header = pool.header(index);
        let origin = header.origin.load(Ordering::Relaxed);
        let route = header.route.load(Ordering::Acquire);
        // Our hold keeps the channel from being reopened, so the id is stable.
        let request_id = segment
            .channel_of_request(index)
            .map_or(0, |channel| channel.header.request_id.load(Ordering::Acquire));

        Ok(Some(ActiveRequest::new(
            self,
            index,
            pool.payload(index) as *const Req,
            origin,
            route,
            request_id,
        )))
    }

    pub(super) fn return_loan(&self, index: u32) {
        let segment = self.segment();
        if segment.server(self.slot).loans.remove(index) {
            segment.response_pool().release(index);
        }
    }

    /// Ends the server's hold on a received request.
    pub(super) fn finish(&self, index: u32) {
        let segment = self.segment();
        if segment.server(self.slot).borrows.remove(index) {
            segment.release_server_hold(index);
        }
    }
}

impl<Req, Res> Drop for Server<Req, Res> {
    fn drop(&mut self) {
        // SAFETY: `state` keeps the validated segment mapped.
        let segment = unsafe { RequestResponseSegment::new(self.state.base(), &self.layout) };
        let server = segment.server(self.slot);
        server.port.deactivate();
        segment.release_server(&server);
        server.port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped server");
    }
}
