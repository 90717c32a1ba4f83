use super::Publisher;
use crate::port::SendError;
use std::fmt;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::slice;

/// A loaned slot owned by the publisher until it is sent or dropped.
struct Loan<'a, T: Copy + 'static> {
    publisher: &'a Publisher<T>,
    index: u32,
    payload: *mut T,
    len: usize,
}

impl<'a, T: Copy + 'static> Loan<'a, T> {
    /// Gives up ownership without returning the slot.
    fn into_parts(self) -> (&'a Publisher<T>, u32) {
        let this = ManuallyDrop::new(self);
        (this.publisher, this.index)
    }
}

impl<T: Copy + 'static> Drop for Loan<'_, T> {
    fn drop(&mut self) {
        self.publisher.return_loan(self.index);
    }
}

/// Freshly loaned sample whose payload is not initialized yet.
pub struct SampleMutUninit<'a, T: Copy + 'static> {
    loan: Loan<'a, T>,
}

impl<T: Copy + 'static> fmt::Debug for SampleMutUninit<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleMutUninit")
            .field("slot", &self.loan.index)
            .field("len", &self.loan.len)
            .finish()
    }
}

impl<'a, T: Copy + 'static> SampleMutUninit<'a, T> {
    pub(super) fn new(publisher: &'a Publisher<T>, index: u32, payload: *mut T, len: usize) -> Self {
        Self {
            loan: Loan {
                publisher,
                index,
                payload,
                len,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.loan.len
    }

    pub fn is_empty(&self) -> bool {
        self.loan.len == 0
    }

    pub fn payload_mut(&mut self) -> &mut [MaybeUninit<T>] {
        // SAFETY: the loan owns `len` elements of pool memory exclusively.
        unsafe { slice::from_raw_parts_mut(self.loan.payload as *mut MaybeUninit<T>, self.loan.len) }
    }

    /// Initializes element `i` with `f(i)`.
    pub fn write_from_fn(mut self, mut f: impl FnMut(usize) -> T) -> SampleMut<'a, T> {
        for (i, element) in self.payload_mut().iter_mut().enumerate() {
            element.write(f(i));
        }
        // SAFETY: every element was written above.
        unsafe { self.assume_init() }
    }

    /// Copies `values` in; their length must equal the loaned length.
    pub fn write_from_slice(mut self, values: &[T]) -> SampleMut<'a, T> {
        assert_eq!(values.len(), self.loan.len, "slice length differs from the loan");
        for (element, value) in self.payload_mut().iter_mut().zip(values) {
            element.write(*value);
        }
        // SAFETY: every element was written above.
        unsafe { self.assume_init() }
    }

    /// Writes `value` into every element.
    pub fn write_payload(self, value: T) -> SampleMut<'a, T> {
        self.write_from_fn(|_| value)
    }

    /// # Safety
    /// Every element of [`SampleMutUninit::payload_mut`] must be initialized.
    pub unsafe fn assume_init(self) -> SampleMut<'a, T> {
        SampleMut { loan: self.loan }
    }
}

/// Initialized sample ready to be sent.
pub struct SampleMut<'a, T: Copy + 'static> {
    loan: Loan<'a, T>,
}

impl<T: Copy + fmt::Debug + 'static> fmt::Debug for SampleMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleMut")
            .field("slot", &self.loan.index)
            .field("payload", &self.payload())
            .finish()
    }
}

impl<T: Copy + 'static> SampleMut<'_, T> {
    pub fn payload(&self) -> &[T] {
        // SAFETY: the loan owns `len` initialized elements.
        unsafe { slice::from_raw_parts(self.loan.payload, self.loan.len) }
    }

    pub fn payload_mut(&mut self) -> &mut [T] {
        // SAFETY: as in `payload`, and the loan is exclusive.
        unsafe { slice::from_raw_parts_mut(self.loan.payload, self.loan.len) }
    }

    /// Delivers the sample to every subscriber; returns how many got it.
    pub fn send(self) -> Result<usize, SendError> {
        let (publisher, index) = self.loan.into_parts();
        publisher.deliver(index)
    }
}

impl<T: Copy + 'static> Deref for SampleMut<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.payload()
    }
}

impl<T: Copy + 'static> DerefMut for SampleMut<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.payload_mut()
    }
}
