//! Binary layout of the registry segment.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      RegistryHeader                            │
//! │  magic │ version │ max_services │ max_nodes_per_service │      │
//! │  next_node_id │ next_port_id │ next_generation  (atomics)      │
//! ├────────────────────────────────────────────────────────────────┤
//! │ ServiceRecord[0] │ ServiceRecord[1] │ ... [max_services-1]     │
//! ├────────────────────────────────────────────────────────────────┤
//! │ Holder[0][0..max_nodes_per_service]                            │
//! │ Holder[1][0..max_nodes_per_service]                            │
//! │ ...                                                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records and holders are plain integers mutated only while the registry
//! lock is held; the counters in the header are atomics so ids can be drawn
//! without it.

use crate::service::static_config::RawStaticConfig;
use crate::service_name::MAX_SERVICE_NAME_LENGTH;
use crate::shm::layout::{LayoutBuilder, Region};
use std::mem::{align_of, size_of};
use std::sync::atomic::AtomicU64;

/// ASCII "BASALTRG".
pub(crate) const REGISTRY_MAGIC: u64 = u64::from_be_bytes(*b"BASALTRG");

/// Bump on any incompatible change of the structures below.
pub(crate) const REGISTRY_VERSION: u64 = 1;

pub(crate) const RECORD_FREE: u64 = 0;
pub(crate) const RECORD_LIVE: u64 = 1;

#[repr(C)]
pub(crate) struct RegistryHeader {
    pub(crate) magic: u64,
    pub(crate) version: u64,
    pub(crate) max_services: u64,
    pub(crate) max_nodes_per_service: u64,
    pub(crate) next_node_id: AtomicU64,
    pub(crate) next_port_id: AtomicU64,
    pub(crate) next_generation: AtomicU64,
}

impl RegistryHeader {
    /// Checks a header written by another process.
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if self.magic != REGISTRY_MAGIC {
            return Err("bad magic");
        }
        if self.version != REGISTRY_VERSION {
            return Err("wrong version");
        }
        if self.max_services == 0 || self.max_nodes_per_service == 0 {
            return Err("empty registry");
        }

        Ok(())
    }
}

#[repr(C)]
pub(crate) struct ServiceRecord {
    pub(crate) state: u64,
    pub(crate) generation: u64,
    pub(crate) name_len: u64,
    pub(crate) name: [u8; MAX_SERVICE_NAME_LENGTH + 1],
    pub(crate) config: RawStaticConfig,
}

impl ServiceRecord {
    pub(crate) fn name_bytes(&self) -> &[u8] {
        &self.name[..(self.name_len as usize).min(MAX_SERVICE_NAME_LENGTH)]
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state == RECORD_LIVE
    }
}

/// One node's share of a record's reference count.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Holder {
    pub(crate) node_id: u64,
    pub(crate) count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegistryLayout {
    pub(crate) records: Region,
    pub(crate) holders: Region,
    pub(crate) max_nodes_per_service: usize,
    pub(crate) size: usize,
}

impl RegistryLayout {
    /// `None` when the tables cannot be addressed.
    pub(crate) fn new(max_services: usize, max_nodes_per_service: usize) -> Option<Self> {
        let mut builder = LayoutBuilder::new();
        builder.field(size_of::<RegistryHeader>(), align_of::<RegistryHeader>())?;
        let records = builder.array(
            size_of::<ServiceRecord>(),
            max_services,
            align_of::<ServiceRecord>(),
        )?;
        let holders = builder.array(
            size_of::<Holder>(),
            max_services.checked_mul(max_nodes_per_service)?,
            align_of::<Holder>(),
        )?;

        Some(Self {
            records,
            holders,
            max_nodes_per_service,
            size: builder.size()?,
        })
    }

    pub(crate) fn max_services(&self) -> usize {
        self.records.count
    }

    /// Offset of the first holder of record `index`.
    pub(crate) fn holders_of(&self, index: usize) -> usize {
        self.holders.at(index * self.max_nodes_per_service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_the_file_type() {
        assert_eq!(&REGISTRY_MAGIC.to_be_bytes(), b"BASALTRG");
    }

    #[test]
    fn holder_tables_follow_records() {
        let layout = RegistryLayout::new(4, 3).unwrap();
        assert_eq!(layout.records.offset, size_of::<RegistryHeader>());
        assert!(layout.holders.offset >= layout.records.end());
        assert_eq!(layout.holders.count, 12);
        assert_eq!(layout.holders_of(1), layout.holders.offset + 3 * size_of::<Holder>());
        assert_eq!(layout.size, layout.holders.end());
    }

    #[test]
    fn unaddressable_tables_have_no_layout() {
        assert!(RegistryLayout::new(usize::MAX, 1).is_none());
        assert!(RegistryLayout::new(1 << 40, 1 << 40).is_none());
        assert!(RegistryLayout::new(2, usize::MAX / 2).is_none());
    }
}
