use super::ActiveRequest;
use crate::port::SendError;
use std::fmt;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};

struct Loan<'a, Req: Copy + 'static, Res: Copy + 'static> {
    request: &'a ActiveRequest<'a, Req, Res>,
    index: u32,
    payload: *mut Res,
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> Loan<'a, Req, Res> {
    fn into_parts(self) -> (&'a ActiveRequest<'a, Req, Res>, u32) {
        let this = ManuallyDrop::new(self);
        (this.request, this.index)
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Drop for Loan<'_, Req, Res> {
    fn drop(&mut self) {
        self.request.return_loan(self.index);
    }
}

/// Loaned response whose payload is not initialized yet.
pub struct ResponseMutUninit<'a, Req: Copy + 'static, Res: Copy + 'static> {
    loan: Loan<'a, Req, Res>,
}

impl<Req: Copy + 'static, Res: Copy + 'static> fmt::Debug for ResponseMutUninit<'_, Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseMutUninit")
            .field("slot", &self.loan.index)
            .finish()
    }
}

impl<'a, Req: Copy + 'static, Res: Copy + 'static> ResponseMutUninit<'a, Req, Res> {
    pub(super) fn new(
        request: &'a ActiveRequest<'a, Req, Res>,
        index: u32,
        payload: *mut Res,
    ) -> Self {
        Self {
            loan: Loan {
                request,
                index,
                payload,
            },
        }
    }

    pub fn payload_mut(&mut self) -> &mut MaybeUninit<Res> {
        // SAFETY: the loan owns the slot exclusively.
        unsafe { &mut *(self.loan.payload as *mut MaybeUninit<Res>) }
    }

    pub fn write_payload(mut self, value: Res) -> ResponseMut<'a, Req, Res> {
        self.payload_mut().write(value);
        // SAFETY: written above.
        unsafe { self.assume_init() }
    }

    /// # Safety
    /// [`ResponseMutUninit::payload_mut`] must have been initialized.
    pub unsafe fn assume_init(self) -> ResponseMut<'a, Req, Res> {
        ResponseMut { loan: self.loan }
    }
}

/// Initialized response ready to be sent.
pub struct ResponseMut<'a, Req: Copy + 'static, Res: Copy + 'static> {
    loan: Loan<'a, Req, Res>,
}

impl<Req: Copy + 'static, Res: Copy + fmt::Debug + 'static> fmt::Debug
    for ResponseMut<'_, Req, Res>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseMut")
            .field("slot", &self.loan.index)
            .field("payload", self.payload())
            .finish()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> ResponseMut<'_, Req, Res> {
    pub fn payload(&self) -> &Res {
        // SAFETY: the loan owns an initialized value.
        unsafe { &*self.loan.payload }
    }

    pub fn payload_mut(&mut self) -> &mut Res {
        // SAFETY: as in `payload`, and the loan is exclusive.
        unsafe { &mut *self.loan.payload }
    }

    /// Sends the response to the client that issued the request.
    pub fn send(self) -> Result<(), SendError> {
        let (request, index) = self.loan.into_parts();
        request.deliver_response(index)
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> Deref for ResponseMut<'_, Req, Res> {
    type Target = Res;

    fn deref(&self) -> &Res {
        self.payload()
    }
}

impl<Req: Copy + 'static, Res: Copy + 'static> DerefMut for ResponseMut<'_, Req, Res> {
    fn deref_mut(&mut self) -> &mut Res {
        self.payload_mut()
    }
}
