use super::Subscriber;
use crate::port_id::UniquePublisherId;
use std::fmt;
use std::ops::Deref;
use std::slice;

/// Received sample; a read-only view into shared memory.
///
/// The slot stays reserved until the last subscriber holding it drops its
/// sample.
pub struct Sample<'a, T: Copy + 'static> {
    subscriber: &'a Subscriber<T>,
    index: u32,
    payload: *const T,
    len: usize,
    origin: u64,
}

impl<'a, T: Copy + 'static> Sample<'a, T> {
    pub(super) fn new(
        subscriber: &'a Subscriber<T>,
        index: u32,
        payload: *const T,
        len: usize,
        origin: u64,
    ) -> Self {
        Self {
            subscriber,
            index,
            payload,
            len,
            origin,
        }
    }

    pub fn payload(&self) -> &[T] {
        // SAFETY: the publisher initialized `len` elements before sending and
        // nobody writes the slot while references to it exist.
        unsafe { slice::from_raw_parts(self.payload, self.len) }
    }

    /// Publisher that sent the sample.
    pub fn origin(&self) -> UniquePublisherId {
        UniquePublisherId::new(self.origin)
    }
}

impl<T: Copy + 'static> Deref for Sample<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.payload()
    }
}

impl<T: Copy + fmt::Debug + 'static> fmt::Debug for Sample<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sample")
            .field("origin", &self.origin())
            .field("payload", &self.payload())
            .finish()
    }
}

impl<T: Copy + 'static> Drop for Sample<'_, T> {
    fn drop(&mut self) {
        self.subscriber.release(self.index);
    }
}
