//! Requesting side of a request-response service.
//!
//! Sending a request opens one of the client's channels. The channel keeps a
//! pool reference to the request for as long as the [`PendingResponse`]
//! lives, and every server holding the request counts in `server_refs`, so
//! the channel is only reused once both sides let go.

use super::layout::{RequestResponseLayout, RequestResponseSegment, route};
use super::{PendingResponse, RequestMut, RequestMutUninit, StaticConfig};
use crate::port::{
    self, BLOCKED_PROBE_INTERVAL, Delivery, LoanError, UnableToDeliverStrategy, claim_port_slot,
};
use crate::port_id::UniqueClientId;
use crate::service::ServiceState;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientCreateError {
    #[error("the service supports no further clients")]
    ExceedsMaxSupportedClients,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestSendError {
    #[error("the client already has its maximum number of requests in flight")]
    ExceedsMaxActiveRequests,

    #[error("no server could accept the request")]
    UnableToDeliver,

    #[error("cannot loan memory for the request: {0}")]
    Loan(#[from] LoanError),
}

pub struct ClientBuilder<Req, Res> {
    state: Arc<ServiceState>,
    config: StaticConfig,
    layout: RequestResponseLayout,
    strategy: Option<UnableToDeliverStrategy>,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for ClientBuilder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("service", self.state.name())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> ClientBuilder<Req, Res> {
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

    /// What to do when a server's request queue is full and safe overflow is off.
    pub fn unable_to_deliver_strategy(mut self, value: UnableToDeliverStrategy) -> Self {
        self.strategy = Some(value);
        self
    }

    pub fn create(self) -> Result<Client<Req, Res>, ClientCreateError> {
        let strategy = self.strategy.unwrap_or(
            self.state
                .node_config()
                .defaults
                .request_response
                .client_unable_to_deliver_strategy,
        );

        let layout = self.layout;
        let slot = {
            // SAFETY: `state` keeps the validated segment mapped.
            let segment = unsafe { RequestResponseSegment::new(self.state.base(), &layout) };
            let slot = claim_port_slot(
                layout.max_clients(),
                |i| segment.client(i).port,
                self.state.node_id(),
                || self.state.reclaim_dead_ports(),
            )
            .ok_or(ClientCreateError::ExceedsMaxSupportedClients)?;
            segment.release_client(&segment.client(slot));
            slot
        };

        let id = UniqueClientId::new(self.state.next_port_id());
        let client = Client {
            state: self.state,
            layout,
            slot,
            id,
            safe_overflow: self.config.has_safe_overflow_for_requests(),
            strategy,
            max_borrowed_responses: self.config.max_borrowed_responses_per_pending_response(),
            next_request_id: AtomicU64::new(1),
            _types: PhantomData,
        };
        client.segment().client(slot).port.activate(id.value());

        debug!(service = %client.state.name(), port = %id, "created client");
        Ok(client)
    }
}

pub struct Client<Req, Res> {
    state: Arc<ServiceState>,
    layout: RequestResponseLayout,
    slot: usize,
    id: UniqueClientId,
    safe_overflow: bool,
    strategy: UnableToDeliverStrategy,
    max_borrowed_responses: usize,
    next_request_id: AtomicU64,
    _types: PhantomData<fn() -> (Req, Res)>,
}

impl<Req, Res> fmt::Debug for Client<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", self.state.name())
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Client<Req, Res> {
    pub(super) fn segment(&self) -> RequestResponseSegment<'_> {
        // SAFETY: `state` keeps the validated segment mapped.
        unsafe { RequestResponseSegment::new(self.state.base(), &self.layout) }
    }

    pub(super) fn slot(&self) -> usize {
        self.slot
    }

    pub(super) fn max_borrowed_responses(&self) -> usize {
        self.max_borrowed_responses
    }

    pub fn id(&self) -> UniqueClientId {
        self.id
    }

    pub fn unable_to_deliver_strategy(&self) -> UnableToDeliverStrategy {
        self.strategy
    }

    pub fn loan_uninit(&self) -> Result<RequestMutUninit<'_, Req, Res>, LoanError> {
        let segment = self.segment();
        let loans = segment.client(self.slot).loans;
        if loans.len() >= loans.capacity() {
            return Err(LoanError::ExceedsMaxLoans);
        }

        let pool = segment.request_pool();
        let index = pool.allocate().ok_or(LoanError::OutOfMemory)?;
        if !loans.insert(index) {
            pool.release(index);
            return Err(LoanError::ExceedsMaxLoans);
        }

        let header = pool.header(index);
        header.len.store(1, Ordering::Relaxed);
        header.origin.store(self.id.value(), Ordering::Relaxed);
        header.route.store(0, Ordering::Relaxed);

        Ok(RequestMutUninit::new(self, index, pool.payload(index) as *mut Req))
    }

    /// Loans a request initialized with `Req::default()`.
    pub fn loan(&self) -> Result<RequestMut<'_, Req, Res>, LoanError>
    where
        Req: Default,
    {
        Ok(self.loan_uninit()?.write_payload(Req::default()))
    }

    pub fn send_copy(&self, value: Req) -> Result<PendingResponse<'_, Req, Res>, RequestSendError> {
        self.loan_uninit()?.write_payload(value).send()
    }

    pub(super) fn return_loan(&self, index: u32) {
        let segment = self.segment();
        if segment.client(self.slot).loans.remove(index) {
            segment.request_pool().release(index);
        }
    }

    /// Opens a channel for the loaned request `index` and hands the request
    /// to every active server.
    pub(super) fn deliver(&self, index: u32) -> Result<PendingResponse<'_, Req, Res>, RequestSendError> {
        let segment = self.segment();
        let client = segment.client(self.slot);
        let Some(channel_index) =
            (0..self.layout.max_active_requests()).find(|&c| client.channel(c).header.try_open())
        else {
            self.return_loan(index);
            return Err(RequestSendError::ExceedsMaxActiveRequests);
        };

        let channel = client.channel(channel_index);
        segment.drain_responses(&channel);
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        channel.header.request_id.store(request_id, Ordering::Release);
        channel.header.request_slot.store(index as u64, Ordering::Release);

        let pool = segment.request_pool();
        pool.header(index)
            .route
            .store(route(self.slot, channel_index), Ordering::Release);

        // The loan's reference now belongs to the channel.
        client.loans.remove(index);

        let mut delivered = 0;
        let mut undeliverable = false;
        for i in 0..self.layout.max_servers() {
            let server = segment.server(i);
            let Some(port_id) = server.port.active_port() else {
                continue;
            };
            let owner = server.port.owner();

            channel.header.server_refs.fetch_add(1, Ordering::AcqRel);
            pool.retain(index);
            let outcome = port::deliver(
                &server.requests,
                index as u64,
                self.safe_overflow,
                self.strategy,
                |evicted| segment.release_server_hold(evicted as u32),
                |attempt| {
                    server.port.active_port() == Some(port_id)
                        && (attempt % BLOCKED_PROBE_INTERVAL != 0
                            || owner.is_none_or(|o| self.state.is_owner_alive(o)))
                },
            );

            match outcome {
                Delivery::Delivered => delivered += 1,
                Delivery::Discarded | Delivery::Disconnected => {
                    if outcome == Delivery::Discarded {
                        undeliverable = true;
                        warn!(port = %self.id, server = i, "server queue full, request discarded");
                    }
                    channel.header.server_refs.fetch_sub(1, Ordering::AcqRel);
                    pool.release(index);
                }
            }
        }

        if delivered == 0 && undeliverable {
            segment.close_channel(&channel);
            return Err(RequestSendError::UnableToDeliver);
        }

        Ok(PendingResponse::new(
            self,
            channel_index,
            index,
            request_id,
            delivered,
        ))
    }
}

impl<Req, Res> Drop for Client<Req, Res> {
    fn drop(&mut self) {
        // SAFETY: `state` keeps the validated segment mapped.
        let segment = unsafe { RequestResponseSegment::new(self.state.base(), &self.layout) };
        let client = segment.client(self.slot);
        client.port.deactivate();
        segment.release_client(&client);
        client.port.vacate();
        debug!(service = %self.state.name(), port = %self.id, "dropped client");
    }
}
