//! System-wide table of services, shared by every attached process.
//!
//! The registry is one memory-mapped file under the configured root. Record
//! mutation is serialized by an exclusive `flock` on that file, which the
//! kernel releases if the holder dies, plus an in-process mutex because the
//! `flock` is shared by every thread using the same descriptor.

pub(crate) mod layout;

use crate::service::static_config::RawStaticConfig;
use crate::service_name::ServiceName;
use basalt_config::Config;
use basalt_mmap::{MmapFileMut, lock};
use layout::{
    Holder, RECORD_FREE, RECORD_LIVE, REGISTRY_MAGIC, REGISTRY_VERSION, RegistryHeader,
    RegistryLayout, ServiceRecord,
};
use parking_lot::{Mutex, MutexGuard};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub(crate) struct Registry {
    path: PathBuf,
    mapping: MmapFileMut,
    layout: RegistryLayout,
    mutex: Mutex<()>,
}

impl Registry {
    pub(crate) fn path_for(config: &Config) -> PathBuf {
        config
            .global
            .root_path
            .join(format!("{}registry.shm", config.global.prefix))
    }

    /// Attaches to the registry, creating it if this is the first process.
    pub(crate) fn attach(config: &Config) -> io::Result<Self> {
        fs::create_dir_all(&config.global.root_path)?;
        let path = Self::path_for(config);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        lock::lock_exclusive(&file)?;
        let registry = Self::map_locked(file, path, Some(config))?
            .ok_or_else(|| io::Error::other("registry could not be initialized"))?;
        lock::unlock(registry.mapping.file())?;
        Ok(registry)
    }

    /// Attaches to an already existing registry; `None` if there is none yet.
    pub(crate) fn open_existing(config: &Config) -> io::Result<Option<Self>> {
        let path = Self::path_for(config);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        lock::lock_exclusive(&file)?;
        let registry = Self::map_locked(file, path, None)?;
        if let Some(registry) = &registry {
            lock::unlock(registry.mapping.file())?;
        }
        Ok(registry)
    }

    /// Maps the locked registry file, initializing it when `init` is given and
    /// the file is still blank. Returns `None` for a blank file without `init`.
    fn map_locked(file: File, path: PathBuf, init: Option<&Config>) -> io::Result<Option<Self>> {
        let len = file.metadata()?.len() as usize;

        if len == 0 {
            let Some(config) = init else {
                return Ok(None);
            };
            let layout = layout_for(
                config.global.max_services,
                config.global.max_nodes_per_service,
            )?;
            file.set_len(layout.size as u64)?;
            let mapping = MmapFileMut::from_file(file)?;
            let registry = Self::initialize(mapping, path, layout);
            debug!(path = %registry.path.display(), "created service registry");
            return Ok(Some(registry));
        }

        if len < size_of::<RegistryHeader>() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "registry is truncated"));
        }
        let mapping = MmapFileMut::from_file(file)?;
        // SAFETY: the mapping covers at least one header.
        let header = unsafe { &*(mapping.base() as *const RegistryHeader) };

        let blank = header.magic == 0 && header.version == 0;
        if let (true, Some(config)) = (blank, init) {
            warn!(path = %path.display(), "re-initializing a registry left blank by a crashed creator");
            let layout = layout_for(
                config.global.max_services,
                config.global.max_nodes_per_service,
            )?;
            let mapping = if len < layout.size {
                mapping.file().set_len(layout.size as u64)?;
                MmapFileMut::from_file(mapping.file().try_clone()?)?
            } else {
                mapping
            };
            return Ok(Some(Self::initialize(mapping, path, layout)));
        }

        header
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let layout = layout_for(
            header.max_services as usize,
            header.max_nodes_per_service as usize,
        )?;
        if len < layout.size {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "registry is truncated"));
        }

        let differs = init.is_some_and(|config| {
            config.global.max_services != layout.max_services()
                || config.global.max_nodes_per_service != layout.max_nodes_per_service
        });
        if differs {
            debug!(
                max_services = layout.max_services(),
                max_nodes_per_service = layout.max_nodes_per_service,
                "existing registry dimensions take precedence over the configuration"
            );
        }

        Ok(Some(Self {
            path,
            mapping,
            layout,
            mutex: Mutex::new(()),
        }))
    }

    fn initialize(mapping: MmapFileMut, path: PathBuf, layout: RegistryLayout) -> Self {
        // SAFETY: the registry lock is held and the mapping spans `layout.size`
        // bytes, so nobody else reads the header while it is written.
        unsafe {
            std::ptr::write_bytes(mapping.base(), 0, layout.size);
            (mapping.base() as *mut RegistryHeader).write(RegistryHeader {
                magic: REGISTRY_MAGIC,
                version: REGISTRY_VERSION,
                max_services: layout.max_services() as u64,
                max_nodes_per_service: layout.max_nodes_per_service as u64,
                next_node_id: AtomicU64::new(1),
                next_port_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            });
        }

        Self {
            path,
            mapping,
            layout,
            mutex: Mutex::new(()),
        }
    }

    #[inline]
    fn header(&self) -> &RegistryHeader {
        // SAFETY: validated or written when the registry was mapped.
        unsafe { &*(self.mapping.base() as *const RegistryHeader) }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn max_services(&self) -> usize {
        self.layout.max_services()
    }

    pub(crate) fn next_node_id(&self) -> u64 {
        self.header().next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_port_id(&self) -> u64 {
        self.header().next_port_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.header().next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Takes the registry lock; held until the guard is dropped.
    pub(crate) fn lock(&self) -> io::Result<RegistryGuard<'_>> {
        let guard = self.mutex.lock();
        lock::lock_exclusive(self.mapping.file())?;
        Ok(RegistryGuard {
            registry: self,
            _guard: guard,
        })
    }
}

/// Exclusive access to the service records.
fn layout_for(max_services: usize, max_nodes_per_service: usize) -> io::Result<RegistryLayout> {
    RegistryLayout::new(max_services, max_nodes_per_service).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "registry limits exceed the address space",
        )
    })
}

pub(crate) struct RegistryGuard<'a> {
    registry: &'a Registry,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = lock::unlock(self.registry.mapping.file()) {
            warn!(error = %e, "failed to release the registry lock");
        }
    }
}

impl RegistryGuard<'_> {
    fn record_ptr(&self, index: usize) -> *mut ServiceRecord {
        let offset = self.registry.layout.records.at(index);
        // SAFETY: offset lies within the mapped records region.
        unsafe { self.registry.mapping.base().add(offset) as *mut ServiceRecord }
    }

    fn holders_ptr(&self, index: usize) -> *mut Holder {
        let offset = self.registry.layout.holders_of(index);
        // SAFETY: offset lies within the mapped holders region.
        unsafe { self.registry.mapping.base().add(offset) as *mut Holder }
    }

    pub(crate) fn record(&self, index: usize) -> &ServiceRecord {
        // SAFETY: the registry lock serializes every access to the records.
        unsafe { &*self.record_ptr(index) }
    }

    fn record_mut(&mut self, index: usize) -> &mut ServiceRecord {
        // SAFETY: see `record`; `&mut self` keeps this the only reference.
        unsafe { &mut *self.record_ptr(index) }
    }

    fn holders(&self, index: usize) -> &[Holder] {
        // SAFETY: see `record`.
        unsafe {
            slice::from_raw_parts(self.holders_ptr(index), self.registry.layout.max_nodes_per_service)
        }
    }

    fn holders_mut(&mut self, index: usize) -> &mut [Holder] {
        // SAFETY: see `record_mut`.
        unsafe {
            slice::from_raw_parts_mut(
                self.holders_ptr(index),
                self.registry.layout.max_nodes_per_service,
            )
        }
    }

    /// Index of the live record called `name`.
    pub(crate) fn find(&self, name: &ServiceName) -> Option<usize> {
        (0..self.registry.max_services()).find(|&i| {
            let record = self.record(i);
            record.is_live() && record.name_bytes() == name.as_str().as_bytes()
        })
    }

    pub(crate) fn live_records(&self) -> Vec<usize> {
        (0..self.registry.max_services())
            .filter(|&i| self.record(i).is_live())
            .collect()
    }

    pub(crate) fn free_index(&self) -> Option<usize> {
        (0..self.registry.max_services()).find(|&i| self.record(i).state == RECORD_FREE)
    }

    pub(crate) fn occupy(
        &mut self,
        index: usize,
        name: &ServiceName,
        config: &RawStaticConfig,
        generation: u64,
    ) {
        self.holders_mut(index).fill(Holder { node_id: 0, count: 0 });

        let bytes = name.as_str().as_bytes();
        let record = self.record_mut(index);
        record.name.fill(0);
        record.name[..bytes.len()].copy_from_slice(bytes);
        record.name_len = bytes.len() as u64;
        record.config = *config;
        record.generation = generation;
        record.state = RECORD_LIVE;
    }

    pub(crate) fn free(&mut self, index: usize) {
        self.holders_mut(index).fill(Holder { node_id: 0, count: 0 });
        let record = self.record_mut(index);
        record.state = RECORD_FREE;
        record.name_len = 0;
        record.config = RawStaticConfig::EMPTY;
    }

    /// Adds one reference held by `node_id`; `false` if the holder table is full.
    pub(crate) fn add_holder(&mut self, index: usize, node_id: u64) -> bool {
        let holders = self.holders_mut(index);
        if let Some(h) = holders.iter_mut().find(|h| h.node_id == node_id) {
            h.count += 1;
            return true;
        }
        match holders.iter_mut().find(|h| h.node_id == 0) {
            Some(h) => {
                *h = Holder { node_id, count: 1 };
                true
            }
            None => false,
        }
    }

    /// Drops one reference held by `node_id` and returns the remaining total.
    pub(crate) fn remove_holder(&mut self, index: usize, node_id: u64) -> u64 {
        if let Some(h) = self
            .holders_mut(index)
            .iter_mut()
            .find(|h| h.node_id == node_id && h.count > 0)
        {
            h.count -= 1;
            if h.count == 0 {
                h.node_id = 0;
            }
        }
        self.reference_count(index)
    }

    /// Drops every holder rejected by `keep` and returns the remaining total.
    pub(crate) fn retain_holders(&mut self, index: usize, mut keep: impl FnMut(u64) -> bool) -> u64 {
        for h in self.holders_mut(index) {
            if h.node_id != 0 && !keep(h.node_id) {
                *h = Holder { node_id: 0, count: 0 };
            }
        }
        self.reference_count(index)
    }

    pub(crate) fn reference_count(&self, index: usize) -> u64 {
        self.holders(index).iter().map(|h| h.count).sum()
    }

    pub(crate) fn holder_ids(&self, index: usize) -> Vec<u64> {
        self.holders(index)
            .iter()
            .filter(|h| h.node_id != 0)
            .map(|h| h.node_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use crate::service::static_config::PatternConfig;

    fn config(root: &Path) -> Config {
        let mut config = Config::default().with_root_path(root);
        config.global.max_services = 4;
        config.global.max_nodes_per_service = 2;
        config
    }

    #[test]
    fn second_attach_sees_the_first_ones_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let name = ServiceName::new("radar").unwrap();
        let raw = PatternConfig::Event(event::StaticConfig::new(1, 2, 3)).to_raw();

        let first = Registry::attach(&config).unwrap();
        {
            let mut guard = first.lock().unwrap();
            let index = guard.free_index().unwrap();
            guard.occupy(index, &name, &raw, first.next_generation());
            assert!(guard.add_holder(index, 7));
        }

        let second = Registry::attach(&config).unwrap();
        let guard = second.lock().unwrap();
        let index = guard.find(&name).unwrap();
        assert_eq!(guard.reference_count(index), 1);
        assert_eq!(guard.holder_ids(index), vec![7]);
        assert!(first.next_node_id() < second.next_node_id());
    }

    #[test]
    fn holder_table_counts_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::attach(&config(dir.path())).unwrap();
        let name = ServiceName::new("counted").unwrap();
        let mut guard = registry.lock().unwrap();
        guard.occupy(0, &name, &RawStaticConfig::EMPTY, 1);

        assert!(guard.add_holder(0, 1));
        assert!(guard.add_holder(0, 1));
        assert!(guard.add_holder(0, 2));
        assert!(!guard.add_holder(0, 3));
        assert_eq!(guard.reference_count(0), 3);

        assert_eq!(guard.remove_holder(0, 1), 2);
        assert_eq!(guard.retain_holders(0, |id| id != 2), 1);
        assert!(guard.add_holder(0, 3));
        assert_eq!(guard.remove_holder(0, 1), 1);
        assert_eq!(guard.holder_ids(0), vec![3]);

        guard.free(0);
        assert_eq!(guard.find(&name), None);
        assert_eq!(guard.free_index(), Some(0));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        fs::write(Registry::path_for(&config), vec![0xab; 4096]).unwrap();

        let err = Registry::attach(&config).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        assert!(Registry::open_existing(&config).unwrap().is_none());
        assert!(!Registry::path_for(&config).exists());

        let _created = Registry::attach(&config).unwrap();
        assert!(Registry::open_existing(&config).unwrap().is_some());
    }
}
