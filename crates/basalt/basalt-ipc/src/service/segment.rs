//! The shared-memory file backing one service.
//!
//! Every segment starts with a [`SegmentHeader`]; the messaging pattern's own
//! structures follow at [`PATTERN_OFFSET`]. The file name carries the record's
//! generation, so a recreated service never maps the memory of its
//! predecessor.

use crate::event::layout::{EventLayout, EventSegment};
use crate::publish_subscribe::layout::{PublishSubscribeLayout, PublishSubscribeSegment};
use crate::request_response::layout::{RequestResponseLayout, RequestResponseSegment};
use crate::service::static_config::PatternConfig;
use crate::service_name::ServiceName;
use basalt_config::Config;
use basalt_mmap::MmapFileMut;
use std::fs;
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// ASCII "BASALTSG".
pub(crate) const SEGMENT_MAGIC: u64 = u64::from_be_bytes(*b"BASALTSG");
pub(crate) const SEGMENT_VERSION: u64 = 1;

/// Where pattern structures begin; leaves room for the header.
pub(crate) const PATTERN_OFFSET: usize = 64;

#[repr(C)]
struct SegmentHeader {
    magic: u64,
    version: u64,
    pattern: u64,
    generation: u64,
    size: u64,
}

const _: () = assert!(size_of::<SegmentHeader>() <= PATTERN_OFFSET);

impl SegmentHeader {
    fn validate(&self, pattern: u64, generation: u64, size: usize) -> Result<(), &'static str> {
        if self.magic != SEGMENT_MAGIC {
            return Err("bad magic");
        }
        if self.version != SEGMENT_VERSION {
            return Err("wrong version");
        }
        if self.pattern != pattern {
            return Err("messaging pattern mismatch");
        }
        if self.generation != generation {
            return Err("generation mismatch");
        }
        if self.size != size as u64 {
            return Err("size mismatch");
        }

        Ok(())
    }
}

/// Pattern specific geometry of a segment, derived from its static config.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PatternLayout {
    PublishSubscribe(PublishSubscribeLayout),
    Event(EventLayout),
    RequestResponse(RequestResponseLayout),
}

impl PatternLayout {
    /// `None` when the limits describe a segment larger than the address space.
    pub(crate) fn new(config: &PatternConfig) -> Option<Self> {
        Some(match config {
            PatternConfig::PublishSubscribe(c) => {
                PatternLayout::PublishSubscribe(PublishSubscribeLayout::new(c)?)
            }
            PatternConfig::Event(c) => PatternLayout::Event(EventLayout::new(c)?),
            PatternConfig::RequestResponse(c) => {
                PatternLayout::RequestResponse(RequestResponseLayout::new(c)?)
            }
        })
    }

    pub(crate) fn publish_subscribe(&self) -> Option<PublishSubscribeLayout> {
        match self {
            PatternLayout::PublishSubscribe(l) => Some(*l),
            _ => None,
        }
    }

    pub(crate) fn event(&self) -> Option<EventLayout> {
        match self {
            PatternLayout::Event(l) => Some(*l),
            _ => None,
        }
    }

    pub(crate) fn request_response(&self) -> Option<RequestResponseLayout> {
        match self {
            PatternLayout::RequestResponse(l) => Some(*l),
            _ => None,
        }
    }

    fn size(&self) -> usize {
        match self {
            PatternLayout::PublishSubscribe(l) => l.size(),
            PatternLayout::Event(l) => l.size(),
            PatternLayout::RequestResponse(l) => l.size(),
        }
    }

    /// # Safety
    /// `base` must map `self.size()` zeroed bytes nobody else uses yet.
    unsafe fn init(&self, base: *mut u8) {
        match self {
            // SAFETY: forwarded from the caller.
            PatternLayout::PublishSubscribe(l) => unsafe { l.init(base) },
            // A zeroed event segment is already valid.
            PatternLayout::Event(_) => {}
            // SAFETY: forwarded from the caller.
            PatternLayout::RequestResponse(l) => unsafe { l.init(base) },
        }
    }
}

pub(crate) struct ServiceSegment {
    path: PathBuf,
    layout: PatternLayout,
    mapping: MmapFileMut,
}

impl ServiceSegment {
    pub(crate) fn path_for(config: &Config, name: &ServiceName, generation: u64) -> PathBuf {
        config.global.root_path.join("services").join(format!(
            "{}{}_{generation}.service",
            config.global.prefix,
            name.hashed()
        ))
    }

    /// Creates and initializes the segment; the caller holds the registry lock.
    pub(crate) fn create(
        path: &Path,
        config: &PatternConfig,
        layout: PatternLayout,
        generation: u64,
    ) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let size = layout.size();
        let mapping = match MmapFileMut::create_new_rw(path, size as u64) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "replacing leftover service segment");
                fs::remove_file(path)?;
                MmapFileMut::create_new_rw(path, size as u64)?
            }
            other => other?,
        };

        // SAFETY: the file was just created with `size` zeroed bytes and is not
        // known to anybody before its registry record turns live.
        unsafe {
            layout.init(mapping.base());
            (mapping.base() as *mut SegmentHeader).write(SegmentHeader {
                magic: SEGMENT_MAGIC,
                version: SEGMENT_VERSION,
                pattern: config.messaging_pattern().as_raw(),
                generation,
                size: size as u64,
            });
        }

        debug!(path = %path.display(), size, "created service segment");
        Ok(Self {
            path: path.to_owned(),
            layout,
            mapping,
        })
    }

    pub(crate) fn open(
        path: &Path,
        config: &PatternConfig,
        layout: PatternLayout,
        generation: u64,
    ) -> io::Result<Self> {
        let mapping = MmapFileMut::open_rw(path)?;
        if mapping.len() < layout.size() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "segment is truncated"));
        }

        // SAFETY: the mapping is larger than the header.
        let header = unsafe { &*(mapping.base() as *const SegmentHeader) };
        header
            .validate(config.messaging_pattern().as_raw(), generation, layout.size())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(Self {
            path: path.to_owned(),
            layout,
            mapping,
        })
    }

    /// Deletes the segment file; mappings held elsewhere stay valid.
    pub(crate) fn remove(path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed service segment"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove service segment"),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn layout(&self) -> &PatternLayout {
        &self.layout
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.mapping.base()
    }

    /// Frees the port slots of every owner `is_dead` reports, together with
    /// the samples those ports still held; returns how many slots were freed.
    pub(crate) fn reclaim_ports(&self, is_dead: impl FnMut(u64) -> bool) -> usize {
        let base = self.base();
        // SAFETY: `open`/`create` checked that the mapping covers the layout.
        unsafe {
            match &self.layout {
                PatternLayout::PublishSubscribe(l) => {
                    PublishSubscribeSegment::new(base, l).reclaim(is_dead)
                }
                PatternLayout::Event(l) => EventSegment::new(base, l).reclaim(is_dead),
                PatternLayout::RequestResponse(l) => {
                    RequestResponseSegment::new(base, l).reclaim(is_dead)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;

    fn event_config(listeners: usize) -> PatternConfig {
        PatternConfig::Event(event::StaticConfig::new(2, listeners, 31))
    }

    #[test]
    fn open_validates_what_create_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services").join("s_1.service");
        let config = event_config(2);

        let layout = PatternLayout::new(&config).unwrap();
        let created = ServiceSegment::create(&path, &config, layout, 1).unwrap();
        assert_eq!(created.path(), path);
        assert!(created.layout().event().is_some());

        assert!(ServiceSegment::open(&path, &config, layout, 1).is_ok());
        assert!(ServiceSegment::open(&path, &config, layout, 2).is_err());
        let larger = event_config(50);
        let larger_layout = PatternLayout::new(&larger).unwrap();
        assert!(ServiceSegment::open(&path, &larger, larger_layout, 1).is_err());

        ServiceSegment::remove(&path);
        assert!(!path.exists());
        ServiceSegment::remove(&path);
    }

    #[test]
    fn segment_names_differ_per_generation() {
        let config = Config::default();
        let name = ServiceName::new("gen").unwrap();
        assert_ne!(
            ServiceSegment::path_for(&config, &name, 1),
            ServiceSegment::path_for(&config, &name, 2)
        );
    }
}
