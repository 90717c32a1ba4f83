//! Bounded multi-producer, multi-consumer FIFO of slot indices in shared memory.
//!
//! Receivers own one queue each; every sender pushes indices into it and the
//! receiver pops them. With safe overflow enabled a sender that finds the queue
//! full pops the oldest entry itself, so both ends may have several actors.
//!
//! # Protocol
//!
//! Each cell carries a sequence number next to its value, in the style of a
//! bounded MPMC queue:
//!
//! ```text
//!   position p maps to cell p % capacity
//!
//!   cell.seq == p          cell is free for the producer holding position p
//!   cell.seq == p + 1      cell holds the value for the consumer at position p
//!   cell.seq == p + cap    cell was consumed and awaits the producer of p + cap
//! ```
//!
//! Producers and consumers claim positions with a CAS on their cursor, then
//! publish by storing the next sequence number with `Release`. The cursors are
//! monotonically increasing `u64`s and never wrap in practice.

use std::mem::size_of;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(C)]
pub(crate) struct QueueHeader {
    capacity: u64,
    enqueue_pos: AtomicU64,
    dequeue_pos: AtomicU64,
    _reserved: u64,
}

#[repr(C)]
struct Cell {
    seq: AtomicU64,
    value: AtomicU64,
}

/// Bytes needed by a queue holding `capacity` entries.
pub(crate) fn bytes_for_queue(capacity: usize) -> Option<usize> {
    let cells = capacity.max(1).checked_mul(size_of::<Cell>())?;
    size_of::<QueueHeader>().checked_add(cells)
}

/// Maps a cursor position to its cell.
#[inline(always)]
fn position_to_index(pos: u64, capacity: u64) -> usize {
    (pos % capacity) as usize
}

pub(crate) struct IndexQueue<'a> {
    header: &'a QueueHeader,
    cells: &'a [Cell],
}

impl<'a> IndexQueue<'a> {
    /// Writes an empty queue of `capacity` entries at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be 8-byte aligned, point to `bytes_for_queue(capacity)`
    /// writable bytes, and no other actor may use the queue yet.
    pub(crate) unsafe fn init(ptr: *mut u8, capacity: usize) {
        let capacity = capacity.max(1);
        unsafe {
            (ptr as *mut QueueHeader).write(QueueHeader {
                capacity: capacity as u64,
                enqueue_pos: AtomicU64::new(0),
                dequeue_pos: AtomicU64::new(0),
                _reserved: 0,
            });

            let cells = ptr.add(size_of::<QueueHeader>()) as *mut Cell;
            for i in 0..capacity {
                cells.add(i).write(Cell {
                    seq: AtomicU64::new(i as u64),
                    value: AtomicU64::new(0),
                });
            }
        }
    }

    /// # Safety
    /// `ptr` must point to a queue written by [`IndexQueue::init`] that stays
    /// mapped for `'a`.
    pub(crate) unsafe fn from_ptr(ptr: *mut u8) -> Self {
        unsafe {
            let header = &*(ptr as *const QueueHeader);
            let cells = slice::from_raw_parts(
                ptr.add(size_of::<QueueHeader>()) as *const Cell,
                header.capacity as usize,
            );
            Self { header, cells }
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.header.capacity as usize
    }

    /// Appends `value`; hands it back when the queue is full.
    pub(crate) fn push(&self, value: u64) -> Result<(), u64> {
        let capacity = self.header.capacity;
        let mut pos = self.header.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[position_to_index(pos, capacity)];
            let seq = cell.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as i64;

            if diff == 0 {
                match self.header.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        cell.value.store(value, Ordering::Relaxed);
                        cell.seq.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.header.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Removes the oldest entry.
    pub(crate) fn pop(&self) -> Option<u64> {
        let capacity = self.header.capacity;
        let mut pos = self.header.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.cells[position_to_index(pos, capacity)];
            let seq = cell.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos + 1) as i64;

            if diff == 0 {
                match self.header.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = cell.value.load(Ordering::Relaxed);
                        cell.seq.store(pos + capacity, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.header.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of queued entries; exact when nobody is mid-operation.
    pub(crate) fn len(&self) -> usize {
        let tail = self.header.enqueue_pos.load(Ordering::Acquire);
        let head = self.header.dequeue_pos.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops every entry, handing each to `f`.
    pub(crate) fn drain(&self, mut f: impl FnMut(u64)) {
        while let Some(value) = self.pop() {
            f(value);
        }
    }
}
