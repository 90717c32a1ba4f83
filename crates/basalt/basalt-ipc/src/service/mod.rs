//! Services: named, typed meeting points between ports of any process.
//!
//! A service is a live record in the registry plus a shared-memory segment.
//! Every node using the service holds a reference in the record; whoever drops
//! the last reference removes both. References of dead nodes are pruned the
//! next time somebody looks the service up.

pub mod builder;
pub mod error;
pub(crate) mod segment;
pub mod static_config;

pub use builder::ServiceBuilder;
pub use error::{
    ServiceCreateError, ServiceDoesExistError, ServiceListError, ServiceOpenError,
    ServiceOpenOrCreateError,
};
pub use static_config::{MessagingPattern, PatternConfig, TypeDetail};

use crate::monitor;
use crate::node::NodeShared;
use crate::registry::{Registry, RegistryGuard};
use crate::service_name::ServiceName;
use crate::CallbackProgression;
use basalt_config::Config;
use segment::{PatternLayout, ServiceSegment};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-only queries about services.
pub struct Service;

impl Service {
    /// Whether a service called `name` with the given pattern is in use by a
    /// running node.
    pub fn does_exist(
        name: &ServiceName,
        config: &Config,
        pattern: MessagingPattern,
    ) -> Result<bool, ServiceDoesExistError> {
        let Some(registry) = Registry::open_existing(config)? else {
            return Ok(false);
        };

        let guard = registry.lock()?;
        let Some(index) = guard.find(name) else {
            return Ok(false);
        };
        let matches = PatternConfig::from_raw(&guard.record(index).config)
            .is_some_and(|c| c.messaging_pattern() == pattern);

        Ok(matches && has_live_holder(&guard, index, config))
    }

    /// Reports every service in use by a running node.
    pub fn list(
        config: &Config,
        mut callback: impl FnMut(ServiceDetails) -> CallbackProgression,
    ) -> Result<(), ServiceListError> {
        let Some(registry) = Registry::open_existing(config)? else {
            return Ok(());
        };

        let services: Vec<ServiceDetails> = {
            let guard = registry.lock()?;
            guard
                .live_records()
                .into_iter()
                .filter(|&i| has_live_holder(&guard, i, config))
                .filter_map(|i| {
                    let record = guard.record(i);
                    let name = std::str::from_utf8(record.name_bytes()).ok()?;
                    Some(ServiceDetails {
                        name: ServiceName::new(name).ok()?,
                        static_config: PatternConfig::from_raw(&record.config)?,
                    })
                })
                .collect()
        };

        for details in services {
            if callback(details) == CallbackProgression::Stop {
                break;
            }
        }
        Ok(())
    }
}

fn has_live_holder(guard: &RegistryGuard<'_>, index: usize, config: &Config) -> bool {
    guard
        .holder_ids(index)
        .into_iter()
        .any(|id| monitor::is_alive(&config.global.root_path, id))
}

/// Name and static configuration of a listed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDetails {
    name: ServiceName,
    static_config: PatternConfig,
}

impl ServiceDetails {
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn static_config(&self) -> &PatternConfig {
        &self.static_config
    }

    pub fn messaging_pattern(&self) -> MessagingPattern {
        self.static_config.messaging_pattern()
    }
}

/// One node's reference to an open service, shared by its port factory and
/// every port created from it.
pub(crate) struct ServiceState {
    node: Arc<NodeShared>,
    name: ServiceName,
    record: usize,
    generation: u64,
    config: PatternConfig,
    segment: ServiceSegment,
}

impl fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceState")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("config", &self.config)
            .finish()
    }
}

impl ServiceState {
    pub(crate) fn name(&self) -> &ServiceName {
        &self.name
    }

    pub(crate) fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Geometry the segment was created or validated with.
    pub(crate) fn layout(&self) -> &PatternLayout {
        self.segment.layout()
    }

    pub(crate) fn node_config(&self) -> &Config {
        self.node.config()
    }

    pub(crate) fn node_id(&self) -> u64 {
        self.node.id().value()
    }

    pub(crate) fn next_port_id(&self) -> u64 {
        self.node.registry().next_port_id()
    }

    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.segment.base()
    }

    /// Whether the node owning a port slot still runs; the own node always does.
    pub(crate) fn is_owner_alive(&self, owner: u64) -> bool {
        owner == self.node_id() || monitor::is_alive(&self.node.config().global.root_path, owner)
    }

    /// Frees the port slots of dead nodes in this service.
    pub(crate) fn reclaim_dead_ports(&self) -> usize {
        let reclaimed = self.segment.reclaim_ports(|owner| !self.is_owner_alive(owner));
        if reclaimed > 0 {
            warn!(service = %self.name, reclaimed, "reclaimed ports of dead nodes");
        }
        reclaimed
    }
}

impl Drop for ServiceState {
    fn drop(&mut self) {
        let registry = self.node.registry();
        let mut guard = match registry.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(service = %self.name, error = %e, "cannot release service reference");
                return;
            }
        };

        let record = guard.record(self.record);
        if !record.is_live() || record.generation != self.generation {
            return;
        }

        if guard.remove_holder(self.record, self.node_id()) == 0 {
            guard.free(self.record);
            ServiceSegment::remove(self.segment.path());
            debug!(service = %self.name, "removed service");
        }
    }
}

/// Drops the references of dead nodes from a record; a record left without
/// references is freed together with its segment. Returns the remaining count.
pub(crate) fn prune_dead_holders(guard: &mut RegistryGuard<'_>, index: usize, config: &Config) -> u64 {
    let root = &config.global.root_path;
    let remaining = guard.retain_holders(index, |id| monitor::is_alive(root, id));
    if remaining == 0 {
        remove_record(guard, index, config);
        warn!(record = index, "reclaimed stale service");
    }
    remaining
}

fn remove_record(guard: &mut RegistryGuard<'_>, index: usize, config: &Config) {
    let record = guard.record(index);
    let generation = record.generation;
    let name = std::str::from_utf8(record.name_bytes())
        .ok()
        .and_then(|n| ServiceName::new(n).ok());

    guard.free(index);
    if let Some(name) = name {
        ServiceSegment::remove(&ServiceSegment::path_for(config, &name, generation));
    }
}

/// Releases everything the dead node `node_id` held in any service.
pub(crate) fn release_node_resources(
    registry: &Registry,
    config: &Config,
    node_id: u64,
) -> io::Result<()> {
    let mut guard = registry.lock()?;
    for index in guard.live_records() {
        if !guard.holder_ids(index).contains(&node_id) {
            continue;
        }

        if guard.retain_holders(index, |id| id != node_id) == 0 {
            remove_record(&mut guard, index, config);
            continue;
        }

        let record = guard.record(index);
        let generation = record.generation;
        let Some((pattern, layout)) = PatternConfig::from_raw(&record.config)
            .and_then(|pattern| Some((pattern, PatternLayout::new(&pattern)?)))
        else {
            warn!(record = index, "skipping service with corrupted configuration");
            continue;
        };
        let Some(name) = std::str::from_utf8(record.name_bytes())
            .ok()
            .and_then(|n| ServiceName::new(n).ok())
        else {
            continue;
        };

        let path = ServiceSegment::path_for(config, &name, generation);
        match ServiceSegment::open(&path, &pattern, layout, generation) {
            Ok(segment) => {
                let reclaimed = segment.reclaim_ports(|owner| owner == node_id);
                debug!(service = %name, reclaimed, "released ports of dead node");
            }
            Err(e) => warn!(service = %name, error = %e, "cannot open service of dead node"),
        }
    }
    Ok(())
}
