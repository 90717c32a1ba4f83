use super::client::RequestSendError;
use super::{Client, PendingResponse};
use std::fmt;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};

struct Loan<'a, Req: Copy + 'static, Res: Copy + 'static> {
    client: &'a Client<Req, Res>,
    index: u32,
    payload: *mut Req,
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> Loan<'a, Req, Res> {
    fn into_parts(self) -> (&'a Client<Req, Res>, u32) {
        let this = ManuallyDrop::new(self);
        (this.client, this.index)
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Drop for Loan<'_, Req, Res> {
    fn drop(&mut self) {
        self.client.return_loan(self.index);
    }
}

/// Loaned request whose payload is not initialized yet.
pub struct RequestMutUninit<'a, Req: Copy + 'static, Res: Copy + 'static> {
    loan: Loan<'a, Req, Res>,
}

impl<Req: Copy + 'static, Res: Copy + 'static> fmt::Debug for RequestMutUninit<'_, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMutUninit")
            .field("slot", &self.loan.index)
            .finish()
    }
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> RequestMutUninit<'a, Req, Res> {
    pub(super) fn new(client: &'a Client<Req, Res>, index: u32, payload: *mut Req) -> Self {
        Self {
            loan: Loan {
                client,
                index,
                payload,
            },
        }
    }

    pub fn payload_mut(&mut self) -> &mut MaybeUninit<Req> {
        // SAFETY: the loan owns the slot exclusively.
        unsafe { &mut *(self.loan.payload as *mut MaybeUninit<Req>) }
    }

    pub fn write_payload(mut self, value: Req) -> RequestMut<'a, Req, Res> {
        self.payload_mut().write(value);
        // SAFETY: written above.
        unsafe { self.assume_init() }
    }

    /// # Safety
    /// [`RequestMutUninit::payload_mut`] must have been initialized.
    pub unsafe fn assume_init(self) -> RequestMut<'a, Req, Res> {
        RequestMut { loan: self.loan }
    }
}

/// Initialized request ready to be sent.
pub struct RequestMut<'a, Req: Copy + 'static, Res: Copy + 'static> {
    loan: Loan<'a, Req, Res>,
}

impl<Req: Copy + fmt::Debug + 'static, Res: Copy + 'static> fmt::Debug for RequestMut<'_, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMut")
            .field("slot", &self.loan.index)
            .field("payload", self.payload())
            .finish()
    }
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> RequestMut<'a, Req, Res> {
    pub fn payload(&self) -> &Req {
        // SAFETY: the loan owns an initialized value.
        unsafe { &*self.loan.payload }
    }

    pub fn payload_mut(&mut self) -> &mut Req {
        // SAFETY: as in `payload`, and the loan is exclusive.
        unsafe { &mut *self.loan.payload }
    }

    /// Sends the request to every active server.
    pub fn send(self) -> Result<PendingResponse<'a, Req, Res>, RequestSendError> {
        let (client, index) = self.loan.into_parts();
        client.deliver(index)
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Deref for RequestMut<'_, Req, Res> {
    type Target = Req;

    fn deref(&self) -> &Req {
        self.payload()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> DerefMut for RequestMut<'_, Req, Res> {
    fn deref_mut(&mut self) -> &mut Req {
        self.payload_mut()
    }
}
