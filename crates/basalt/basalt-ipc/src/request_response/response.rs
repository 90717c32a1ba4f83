use super::PendingResponse;
use crate::port_id::UniqueServerId;
use std::fmt;
use std::ops::Deref;

/// Received response; a read-only view into shared memory.
pub struct Response<'a, Req: Copy + 'static, Res: Copy + 'static> {
    pending: &'a PendingResponse<'a, Req, Res>,
    index: u32,
    payload: *const Res,
    origin: u64,
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> Response<'a, Req, Res> {
    pub(super) fn new(
        pending: &'a PendingResponse<'a, Req, Res>,
        index: u32,
        payload: *const Res,
        origin: u64,
    ) -> Self {
        Self {
            pending,
            index,
            payload,
            origin,
        }
    }

    pub fn payload(&self) -> &Res {
        // SAFETY: the server initialized the value before sending it.
        unsafe { &*self.payload }
    }

    /// Server that sent the response.
    pub fn origin(&self) -> UniqueServerId {
        UniqueServerId::new(self.origin)
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Deref for Response<'_, Req, Res> {
    type Target = Res;

    fn deref(&self) -> &Res {
        self.payload()
    }
}

impl<Req: Copy + 'static, Res: Copy + fmt::Debug + 'static> fmt::Debug for Response<'_, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("origin", &self.origin())
            .field("payload", self.payload())
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Drop for Response<'_, Req, Res> {
    fn drop(&mut self) {
        self.pending.release(self.index);
    }
}
