use super::{Client, Response};
use crate::port::ReceiveError;
use std::cell::Cell;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::Ordering;

/// A sent request waiting for responses.
///
/// Dropping it closes the channel; responses that arrive afterwards are
/// discarded.
pub struct PendingResponse<'a, Req: Copy + 'static, Res: Copy + 'static> {
    client: &'a Client<Req, Res>,
    channel: usize,
    request: *const Req,
    request_id: u64,
    connections: usize,
    borrowed: Cell<usize>,
}

impl<Req: Copy + fmt::Debug + 'static, Res: Copy + 'static> fmt::Debug
    for PendingResponse<'_, Req, Res>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .field("channel", &self.channel)
            .field("connections", &self.connections)
            .field("payload", self.payload())
            .finish()
    }
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> PendingResponse<'a, Req, Res> {
    pub(super) fn new(
        client: &'a Client<Req, Res>,
        channel: usize,
        request: u32,
        request_id: u64,
        connections: usize,
    ) -> Self {
        let payload = client.segment().request_pool().payload(request) as *const Req;
        Self {
            client,
            channel,
            request: payload,
            request_id,
            connections,
            borrowed: Cell::new(0),
        }
    }

    /// The request as it was sent.
    pub fn payload(&self) -> &Req {
        // SAFETY: the channel keeps the request slot referenced until `self`
        // is dropped and nobody writes a sent request.
        unsafe { &*self.request }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Servers the request was delivered to.
    pub fn number_of_server_connections(&self) -> usize {
        self.connections
    }

    /// Whether any server still holds the request, queued or active.
    pub fn is_connected(&self) -> bool {
        self.with_channel(|channel| channel.header.server_refs.load(Ordering::Acquire) > 0)
    }

    pub fn has_response(&self) -> bool {
        self.with_channel(|channel| !channel.responses.is_empty())
    }

    fn with_channel<R>(&self, f: impl FnOnce(&super::layout::Channel<'_>) -> R) -> R {
        let segment = self.client.segment();
        let channel = segment.client(self.client.slot()).channel(self.channel);
        f(&channel)
    }

    /// Takes the oldest response to this request, if any.
    pub fn receive(&self) -> Result<Option<Response<'_, Req, Res>>, ReceiveError> {
        if self.borrowed.get() >= self.client.max_borrowed_responses() {
            return Err(ReceiveError::ExceedsMaxBorrows);
        }

        let segment = self.client.segment();
        let client = segment.client(self.client.slot());
        let channel = client.channel(self.channel);
        let pool = segment.response_pool();
        loop {
            let Some(index) = channel.responses.pop() else {
                return Ok(None);
            };
            let index = index as u32;
            let header = pool.header(index);
            // Answer to an earlier request on this channel.
            if header.route.load(Ordering::Acquire) != self.request_id {
                pool.release(index);
                continue;
            }
            if !client.borrows.insert(index) {
                pool.release(index);
                return Err(ReceiveError::ExceedsMaxBorrows);
            }

            self.borrowed.set(self.borrowed.get() + 1);
            let origin = header.origin.load(Ordering::Relaxed);
            return Ok(Some(Response::new(
                self,
                index,
                pool.payload(index) as *const Res,
                origin,
            )));
        }
    }

    pub(super) fn release(&self, index: u32) {
        let segment = self.client.segment();
        if segment.client(self.client.slot()).borrows.remove(index) {
            segment.response_pool().release(index);
        }
        self.borrowed.set(self.borrowed.get().saturating_sub(1));
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Deref for PendingResponse<'_, Req, Res> {
    type Target = Req;

    fn deref(&self) -> &Req {
        self.payload()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Drop for PendingResponse<'_, Req, Res> {
    fn drop(&mut self) {
        let segment = self.client.segment();
        let channel = segment.client(self.client.slot()).channel(self.channel);
        segment.close_channel(&channel);
    }
}
