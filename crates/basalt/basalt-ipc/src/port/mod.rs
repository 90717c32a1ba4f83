//! Errors and delivery logic shared by all zero-copy ports.

use crate::shm::port_slot::PortSlot;
use crate::shm::queue::IndexQueue;

pub use basalt_config::UnableToDeliverStrategy;

/// How many blocked delivery attempts pass between two liveness probes of
/// the receiving node.
pub(crate) const BLOCKED_PROBE_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LoanError {
    #[error("the requested number of elements exceeds the port's maximum slice length")]
    ExceedsMaxLoanSize,

    #[error("the port already holds its maximum number of loans")]
    ExceedsMaxLoans,

    #[error("the service's shared memory pool is exhausted")]
    OutOfMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("the receiving side is gone")]
    ConnectionClosed,

    #[error("no receiver could accept the data")]
    UnableToDeliver,

    #[error("cannot loan memory for the copy: {0}")]
    Loan(#[from] LoanError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    #[error("the port already holds its maximum number of borrowed items")]
    ExceedsMaxBorrows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionFailure {
    #[error("a connected peer terminated without closing its connection")]
    PeerTerminated,
}

/// Result of pushing one slot index into one receiver queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The queue was full and the strategy said to skip it.
    Discarded,
    /// The receiver went away while the sender was blocked.
    Disconnected,
}

/// Pushes `value` into `queue`, resolving a full queue per the overflow
/// setting and `strategy`.
///
/// `evict` receives entries dropped by safe overflow; `still_connected` is
/// asked with the attempt count while blocking.
pub(crate) fn deliver(
    queue: &IndexQueue<'_>,
    value: u64,
    safe_overflow: bool,
    strategy: UnableToDeliverStrategy,
    mut evict: impl FnMut(u64),
    mut still_connected: impl FnMut(u64) -> bool,
) -> Delivery {
    let mut value = value;
    let mut attempts = 0u64;
    loop {
        match queue.push(value) {
            Ok(()) => return Delivery::Delivered,
            Err(back) => value = back,
        }

        if safe_overflow {
            if let Some(oldest) = queue.pop() {
                evict(oldest);
            }
            continue;
        }

        match strategy {
            UnableToDeliverStrategy::DiscardSample => return Delivery::Discarded,
            UnableToDeliverStrategy::Block => {
                attempts += 1;
                if !still_connected(attempts) {
                    return Delivery::Disconnected;
                }
                std::thread::yield_now();
            }
        }
    }
}

/// Claims one of `count` port slots for `node_id`.
///
/// When every slot is taken, `reclaim` frees the slots of dead owners and the
/// search runs once more.
pub(crate) fn claim_port_slot<'a>(
    count: usize,
    slot: impl Fn(usize) -> &'a PortSlot,
    node_id: u64,
    reclaim: impl FnOnce() -> usize,
) -> Option<usize> {
    let find = || (0..count).find(|&i| slot(i).try_claim(node_id));
    find().or_else(|| if reclaim() > 0 { find() } else { None })
}
