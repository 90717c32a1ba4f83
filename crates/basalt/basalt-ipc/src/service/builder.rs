//! Entry point for creating and opening services.
//!
//! [`ServiceBuilder`] picks the messaging pattern; the pattern builders
//! collect limits and then run the shared create/open logic below.

use super::error::{ServiceCreateError, ServiceOpenError, ServiceOpenOrCreateError};
use super::segment::{PatternLayout, ServiceSegment};
use super::static_config::PatternConfig;
use super::{ServiceState, prune_dead_holders};
use crate::node::NodeShared;
use crate::service_name::ServiceName;
use crate::{event, publish_subscribe, request_response};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ServiceBuilder {
    node: Arc<NodeShared>,
    name: ServiceName,
}

impl fmt::Debug for ServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBuilder")
            .field("node", &self.node.id())
            .field("name", &self.name)
            .finish()
    }
}

impl ServiceBuilder {
    pub(crate) fn new(node: Arc<NodeShared>, name: ServiceName) -> Self {
        Self { node, name }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn event(self) -> event::Builder {
        event::Builder::new(self)
    }

    /// Publish-subscribe service carrying samples of `[T]`.
    pub fn publish_subscribe<T: Copy + 'static>(self) -> publish_subscribe::Builder<T> {
        publish_subscribe::Builder::new(self)
    }

    pub fn request_response<Req: Copy + 'static, Res: Copy + 'static>(
        self,
    ) -> request_response::Builder<Req, Res> {
        request_response::Builder::new(self)
    }

    pub(crate) fn node(&self) -> &NodeShared {
        &self.node
    }

    /// Registers a new service with `config` and maps its fresh segment.
    pub(crate) fn create_state(&self, config: PatternConfig) -> Result<ServiceState, ServiceCreateError> {
        let layout = PatternLayout::new(&config).ok_or_else(|| {
            warn!(service = %self.name, ?config, "service limits overflow the segment size");
            ServiceCreateError::InvalidConfiguration
        })?;

        let node_config = self.node.config();
        let node_id = self.node.id().value();
        let registry = self.node.registry();
        let mut guard = registry.lock()?;

        if let Some(index) = guard.find(&self.name) {
            if prune_dead_holders(&mut guard, index, node_config) > 0 {
                return Err(ServiceCreateError::AlreadyExists);
            }
        }

        let index = guard
            .free_index()
            .ok_or(ServiceCreateError::ExceedsMaxNumberOfServices)?;
        let generation = registry.next_generation();
        let path = ServiceSegment::path_for(node_config, &self.name, generation);
        let segment = ServiceSegment::create(&path, &config, layout, generation)?;

        guard.occupy(index, &self.name, &config.to_raw(), generation);
        if !guard.add_holder(index, node_id) {
            guard.free(index);
            ServiceSegment::remove(&path);
            warn!(service = %self.name, "the registry admits no nodes per service");
            return Err(ServiceCreateError::InternalFailure);
        }

        debug!(service = %self.name, pattern = %config.messaging_pattern(), generation, "created service");
        Ok(ServiceState {
            node: self.node.clone(),
            name: self.name.clone(),
            record: index,
            generation,
            config,
            segment,
        })
    }

    /// Opens the existing service if `extract` accepts its configuration and
    /// `verify` accepts the extracted pattern config.
    pub(crate) fn open_state<C>(
        &self,
        extract: impl FnOnce(&PatternConfig) -> Option<C>,
        verify: impl FnOnce(&C) -> Result<(), ServiceOpenError>,
    ) -> Result<(ServiceState, C), ServiceOpenError> {
        let node_config = self.node.config();
        let mut guard = self.node.registry().lock()?;

        let index = guard.find(&self.name).ok_or(ServiceOpenError::DoesNotExist)?;
        if prune_dead_holders(&mut guard, index, node_config) == 0 {
            return Err(ServiceOpenError::DoesNotExist);
        }

        let record = guard.record(index);
        let generation = record.generation;
        let config =
            PatternConfig::from_raw(&record.config).ok_or(ServiceOpenError::ServiceInCorruptedState)?;
        let typed = extract(&config).ok_or(ServiceOpenError::IncompatibleMessagingPattern)?;
        verify(&typed)?;

        let layout = PatternLayout::new(&config).ok_or(ServiceOpenError::ServiceInCorruptedState)?;
        let path = ServiceSegment::path_for(node_config, &self.name, generation);
        let segment = ServiceSegment::open(&path, &config, layout, generation).map_err(|e| {
            warn!(service = %self.name, error = %e, "cannot map service segment");
            ServiceOpenError::ServiceInCorruptedState
        })?;

        if !guard.add_holder(index, self.node.id().value()) {
            return Err(ServiceOpenError::ExceedsMaxNumberOfNodes);
        }

        debug!(service = %self.name, pattern = %config.messaging_pattern(), generation, "opened service");
        Ok((
            ServiceState {
                node: self.node.clone(),
                name: self.name.clone(),
                record: index,
                generation,
                config,
                segment,
            },
            typed,
        ))
    }
}

/// Opens, creates if missing, and opens once more if another process won
/// the race to create.
pub(crate) fn open_or_create<T>(
    mut open: impl FnMut() -> Result<T, ServiceOpenError>,
    create: impl FnOnce() -> Result<T, ServiceCreateError>,
) -> Result<T, ServiceOpenOrCreateError> {
    match open() {
        Err(ServiceOpenError::DoesNotExist) => {}
        other => return Ok(other?),
    }

    match create() {
        Err(ServiceCreateError::AlreadyExists) => Ok(open()?),
        other => Ok(other?),
    }
}

/// Fails with `error` when a requested limit exceeds what the service offers.
pub(crate) fn ensure_supported(
    requested: Option<usize>,
    available: usize,
    error: ServiceOpenError,
) -> Result<(), ServiceOpenError> {
    match requested {
        Some(requested) if requested > available => Err(error),
        _ => Ok(()),
    }
}

pub(crate) fn ensure_overflow(requested: Option<bool>, configured: bool) -> Result<(), ServiceOpenError> {
    match requested {
        Some(requested) if requested != configured => {
            Err(ServiceOpenError::IncompatibleOverflowBehavior)
        }
        _ => Ok(()),
    }
}
