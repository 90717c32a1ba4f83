//! Records SIGINT/SIGTERM so [`Node::wait`](super::Node::wait) can report them.

use super::NodeEvent;
use std::sync::Once;
use std::sync::atomic::{AtomicI32, Ordering};

static PENDING: AtomicI32 = AtomicI32::new(0);
static INSTALL: Once = Once::new();

extern "C" fn record(signal: libc::c_int) {
    PENDING.store(signal, Ordering::Relaxed);
}

/// Installs the handlers once per process.
pub(crate) fn install() {
    INSTALL.call_once(|| {
        let handler = record as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores into an atomic, which is
        // async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    });
}

/// Consumes the most recent signal, if any arrived.
pub(crate) fn take() -> Option<NodeEvent> {
    match PENDING.swap(0, Ordering::Relaxed) {
        libc::SIGINT => Some(NodeEvent::InterruptSignal),
        libc::SIGTERM => Some(NodeEvent::TerminationRequest),
        _ => None,
    }
}
