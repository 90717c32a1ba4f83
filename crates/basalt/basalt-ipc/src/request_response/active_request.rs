use super::layout::{Channel, RequestResponseSegment, split_route};
use super::{ResponseMut, ResponseMutUninit, Server};
use crate::port::{self, BLOCKED_PROBE_INTERVAL, Delivery, LoanError, SendError};
use crate::port_id::UniqueClientId;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;
use tracing::warn;

/// A request taken by a server.
///
/// Responses sent through it stream to the client's pending response until
/// either side lets go. Dropping it ends the stream.
pub struct ActiveRequest<'a, Req: Copy + 'static, Res: Copy + 'static> {
    server: &'a Server<Req, Res>,
    index: u32,
    payload: *const Req,
    origin: u64,
    route: u64,
    request_id: u64,
}

impl<Req: Copy + fmt::Debug + 'static, Res: Copy + 'static> fmt::Debug
    for ActiveRequest<'_, Req, Res>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRequest")
            .field("origin", &self.origin())
            .field("request_id", &self.request_id)
            .field("payload", self.payload())
            .finish()
    }
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> ActiveRequest<'a, Req, Res> {
    pub(super) fn new(
        server: &'a Server<Req, Res>,
        index: u32,
        payload: *const Req,
        origin: u64,
        route: u64,
        request_id: u64,
    ) -> Self {
        Self {
            server,
            index,
            payload,
            origin,
            route,
            request_id,
        }
    }

    pub fn payload(&self) -> &Req {
        // SAFETY: the server's hold keeps the slot referenced and the client
        // never writes a sent request.
        unsafe { &*self.payload }
    }

    /// Client that sent the request.
    pub fn origin(&self) -> UniqueClientId {
        UniqueClientId::new(self.origin)
    }

    /// The request's channel while the client still waits on it.
    fn channel<'s>(&self, segment: &RequestResponseSegment<'s>) -> Option<Channel<'s>> {
        let channel = segment.channel_of_request(self.index)?;
        let (client, _) = split_route(self.route);
        let connected = segment.client(client).port.active_port() == Some(self.origin)
            && channel.header.is_open()
            && channel.header.request_id.load(Ordering::Acquire) == self.request_id;
        connected.then_some(channel)
    }

    /// Whether the client still waits for responses to this request.
    pub fn is_connected(&self) -> bool {
        self.channel(&self.server.segment()).is_some()
    }

    pub fn loan_uninit(&self) -> Result<ResponseMutUninit<'_, Req, Res>, LoanError> {
        let segment = self.server.segment();
        let loans = segment.server(self.server.slot()).loans;
        if loans.len() >= loans.capacity() {
            return Err(LoanError::ExceedsMaxLoans);
        }

        let pool = segment.response_pool();
        let index = pool.allocate().ok_or(LoanError::OutOfMemory)?;
        if !loans.insert(index) {
            pool.release(index);
            return Err(LoanError::ExceedsMaxLoans);
        }

        let header = pool.header(index);
        header.len.store(1, Ordering::Relaxed);
        header.origin.store(self.server.id().value(), Ordering::Relaxed);
        header.route.store(self.request_id, Ordering::Relaxed);

        Ok(ResponseMutUninit::new(self, index, pool.payload(index) as *mut Res))
    }

    /// Loans a response initialized with `Res::default()`.
    pub fn loan(&self) -> Result<ResponseMut<'_, Req, Res>, LoanError>
    where
        Res: Default,
    {
        Ok(self.loan_uninit()?.write_payload(Res::default()))
    }

    pub fn send_copy(&self, value: Res) -> Result<(), SendError> {
        self.loan_uninit()?.write_payload(value).send()
    }

    pub(super) fn return_loan(&self, index: u32) {
        self.server.return_loan(index);
    }

    /// Pushes the loaned response `index` into the request's channel.
    pub(super) fn deliver_response(&self, index: u32) -> Result<(), SendError> {
        let segment = self.server.segment();
        let Some(channel) = self.channel(&segment) else {
            self.return_loan(index);
            return Err(SendError::ConnectionClosed);
        };

        let state = self.server.state();
        let (client_slot, _) = split_route(self.route);
        let owner = segment.client(client_slot).port.owner();
        let pool = segment.response_pool();
        let outcome = port::deliver(
            &channel.responses,
            index as u64,
            self.server.safe_overflow(),
            self.server.unable_to_deliver_strategy(),
            |evicted| {
                pool.release(evicted as u32);
            },
            |attempt| {
                self.channel(&segment).is_some()
                    && (attempt % BLOCKED_PROBE_INTERVAL != 0
                        || owner.is_none_or(|o| state.is_owner_alive(o)))
            },
        );

        let loans = segment.server(self.server.slot()).loans;
        match outcome {
            Delivery::Delivered => {
                // The queue entry now owns the loan's reference.
                loans.remove(index);
                Ok(())
            }
            Delivery::Discarded => {
                self.return_loan(index);
                warn!(port = %self.server.id(), request_id = self.request_id, "response buffer full, response discarded");
                Err(SendError::UnableToDeliver)
            }
            Delivery::Disconnected => {
                self.return_loan(index);
                Err(SendError::ConnectionClosed)
            }
        }
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Deref for ActiveRequest<'_, Req, Res> {
    type Target = Req;

    fn deref(&self) -> &Req {
        self.payload()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Drop for ActiveRequest<'_, Req, Res> {
    fn drop(&mut self) {
        self.server.finish(self.index);
    }
}
