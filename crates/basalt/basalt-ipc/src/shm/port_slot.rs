//! Ownership word for one port position inside a service segment.
//!
//! `owner` holds the id of the node that claimed the position (0 when free),
//! `port_id` the unique id of the port once it is ready to be seen by peers
//! (0 while the port is being set up or torn down). Senders iterate the slots
//! of the opposite side and only touch those with a non-zero `port_id`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Owner value while a slot's resources are being handed back.
const RECLAIMING: u64 = u64::MAX;

#[repr(C)]
pub(crate) struct PortSlot {
    owner: AtomicU64,
    port_id: AtomicU64,
}

impl PortSlot {
    /// Claims a free slot for `node_id`.
    pub(crate) fn try_claim(&self, node_id: u64) -> bool {
        self.owner
            .compare_exchange(0, node_id, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Makes the port visible to its peers.
    pub(crate) fn activate(&self, port_id: u64) {
        self.port_id.store(port_id, Ordering::Release);
    }

    #[inline]
    pub(crate) fn active_port(&self) -> Option<u64> {
        match self.port_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Node currently owning the slot, if any.
    pub(crate) fn owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            0 | RECLAIMING => None,
            id => Some(id),
        }
    }

    /// Hides the port from peers; the slot stays owned.
    pub(crate) fn deactivate(&self) {
        self.port_id.store(0, Ordering::Release);
    }

    /// Releases the slot after its resources were handed back.
    pub(crate) fn vacate(&self) {
        self.port_id.store(0, Ordering::Release);
        self.owner.store(0, Ordering::Release);
    }

    /// Takes the slot away from `dead_owner` so exactly one caller reclaims it.
    ///
    /// On success the slot is deactivated and marked as being reclaimed; the
    /// caller drains its resources and then calls [`PortSlot::vacate`].
    pub(crate) fn try_begin_reclaim(&self, dead_owner: u64) -> bool {
        if dead_owner == 0 || dead_owner == RECLAIMING {
            return false;
        }

        let won = self
            .owner
            .compare_exchange(dead_owner, RECLAIMING, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok();
        if won {
            self.port_id.store(0, Ordering::Release);
        }
        won
    }

    /// [`PortSlot::try_begin_reclaim`] for an owner that `is_dead` confirms.
    pub(crate) fn try_begin_reclaim_if(&self, is_dead: &mut impl FnMut(u64) -> bool) -> bool {
        match self.owner() {
            Some(owner) if is_dead(owner) => self.try_begin_reclaim(owner),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> PortSlot {
        PortSlot {
            owner: AtomicU64::new(0),
            port_id: AtomicU64::new(0),
        }
    }

    #[test]
    fn claim_activate_vacate() {
        let s = slot();
        assert!(s.try_claim(7));
        assert!(!s.try_claim(8));
        assert_eq!(s.owner(), Some(7));
        assert_eq!(s.active_port(), None);

        s.activate(42);
        assert_eq!(s.active_port(), Some(42));

        s.vacate();
        assert_eq!(s.owner(), None);
        assert!(s.try_claim(8));
    }

    #[test]
    fn only_one_reclaimer_wins() {
        let s = slot();
        assert!(s.try_claim(3));
        s.activate(11);

        assert!(!s.try_begin_reclaim(4));
        assert!(s.try_begin_reclaim(3));
        assert!(!s.try_begin_reclaim(3));
        assert_eq!(s.active_port(), None);
        assert_eq!(s.owner(), None);
        assert!(!s.try_claim(5));

        s.vacate();
        assert!(s.try_claim(5));
    }
}
