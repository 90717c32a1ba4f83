//! Process-local anchor for services and ports.
//!
//! A [`Node`] attaches the registry, owns a liveness token for as long as it
//! lives and creates service builders. Everything created through a node
//! keeps it alive, so the token disappears only after the last port is gone.

mod signal;

use crate::monitor::{self, Liveness, Token};
use crate::registry::Registry;
use crate::service::{self, ServiceBuilder};
use crate::service_name::ServiceName;
use crate::CallbackProgression;
use basalt_config::Config;
use basalt_mmap::lock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Longest accepted node name in bytes.
pub const MAX_NODE_NAME_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a node name must not exceed {MAX_NODE_NAME_LENGTH} bytes")]
pub struct NodeNameError;

/// Optional human readable label of a node; need not be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: &str) -> Result<Self, NodeNameError> {
        if name.len() > MAX_NODE_NAME_LENGTH {
            return Err(NodeNameError);
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for NodeName {
    type Error = NodeNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contents of a node's token file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeDetails {
    name: String,
    pid: u32,
    /// Seconds since the unix epoch.
    created_at: u64,
}

impl NodeDetails {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NodeCreationFailure {
    #[error("insufficient permissions to create the node")]
    InsufficientPermissions,

    #[error("internal failure while creating the node")]
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NodeListFailure {
    #[error("insufficient permissions to list nodes")]
    InsufficientPermissions,

    #[error("internal failure while listing nodes")]
    InternalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NodeCleanupFailure {
    #[error("insufficient permissions to remove the resources of a dead node")]
    InsufficientPermissions,

    #[error("internal failure while removing the resources of a dead node")]
    InternalError,
}

macro_rules! from_io_error {
    ($failure:ident, $what:literal) => {
        impl From<io::Error> for $failure {
            fn from(e: io::Error) -> Self {
                error!(error = %e, $what);
                match e.kind() {
                    io::ErrorKind::PermissionDenied => $failure::InsufficientPermissions,
                    _ => $failure::InternalError,
                }
            }
        }
    };
}

from_io_error!(NodeCreationFailure, "node creation failed");
from_io_error!(NodeListFailure, "listing nodes failed");
from_io_error!(NodeCleanupFailure, "dead node cleanup failed");

/// Outcome of one [`Node::wait`] cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Tick,
    /// SIGTERM arrived.
    TerminationRequest,
    /// SIGINT arrived.
    InterruptSignal,
}

pub(crate) struct NodeShared {
    id: NodeId,
    name: NodeName,
    config: Config,
    registry: Registry,
    _token: Token,
}

impl NodeShared {
    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}

pub struct Node {
    shared: Arc<NodeShared>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn name(&self) -> &NodeName {
        &self.shared.name
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Starts building the service called `name`.
    pub fn service_builder(&self, name: &ServiceName) -> ServiceBuilder {
        ServiceBuilder::new(self.shared.clone(), name.clone())
    }

    /// Sleeps for one cycle and reports a termination or interrupt signal
    /// received in the meantime.
    pub fn wait(&self, cycle_time: Duration) -> NodeEvent {
        signal::install();
        if let Some(event) = signal::take() {
            return event;
        }

        std::thread::sleep(cycle_time);
        signal::take().unwrap_or(NodeEvent::Tick)
    }

    /// Reports every node that left a token under the root of `config`.
    pub fn list(
        config: &Config,
        mut callback: impl FnMut(NodeState) -> CallbackProgression,
    ) -> Result<(), NodeListFailure> {
        let root = &config.global.root_path;
        let entries = match fs::read_dir(monitor::nodes_dir(root)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let Some(raw_id) = entry.file_name().to_str().and_then(monitor::parse_token_name)
            else {
                continue;
            };
            let id = NodeId(raw_id);
            let path = entry.path();

            let state = match monitor::probe(&path) {
                Ok(Liveness::Alive) => NodeState::Alive(AliveNodeView {
                    id,
                    details: read_details(&path),
                }),
                Ok(Liveness::Dead) => NodeState::Dead(DeadNodeView {
                    id,
                    details: read_details(&path),
                    config: config.clone(),
                }),
                Ok(Liveness::Gone) => continue,
                Err(e) => {
                    debug!(node = %id, error = %e, "node token is inaccessible");
                    NodeState::Inaccessible(id)
                }
            };

            if callback(state) == CallbackProgression::Stop {
                break;
            }
        }

        Ok(())
    }
}

fn read_details(path: &std::path::Path) -> Option<NodeDetails> {
    let text = fs::read_to_string(path).ok()?;
    toml::from_str(&text).ok()
}

#[derive(Debug)]
pub enum NodeState {
    Alive(AliveNodeView),
    Dead(DeadNodeView),
    /// The token exists but its state could not be determined.
    Inaccessible(NodeId),
}

#[derive(Debug, Clone)]
pub struct AliveNodeView {
    id: NodeId,
    details: Option<NodeDetails>,
}

impl AliveNodeView {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn details(&self) -> Option<&NodeDetails> {
        self.details.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct DeadNodeView {
    id: NodeId,
    details: Option<NodeDetails>,
    config: Config,
}

impl DeadNodeView {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn details(&self) -> Option<&NodeDetails> {
        self.details.as_ref()
    }

    /// Releases everything the dead node still held: its references to
    /// services, its port slots in live services and finally its token.
    ///
    /// Returns `false` when there was nothing to do, because the node turned
    /// out to be alive or another process is already cleaning up after it.
    pub fn remove_stale_resources(self) -> Result<bool, NodeCleanupFailure> {
        let path = monitor::token_path(&self.config.global.root_path, self.id.0);
        let token = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !lock::try_lock_exclusive(&token)? {
            return Ok(false);
        }

        if let Some(registry) = Registry::open_existing(&self.config)? {
            service::release_node_resources(&registry, &self.config, self.id.0)?;
        }

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        warn!(node = %self.id, "removed stale resources of dead node");
        Ok(true)
    }
}

/// Configures and creates a [`Node`].
#[derive(Debug, Default)]
pub struct NodeBuilder {
    name: NodeName,
    config: Option<Config>,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &NodeName) -> Self {
        self.name = name.clone();
        self
    }

    /// Uses `config` instead of [`Config::global_config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.config = Some(config.clone());
        self
    }

    pub fn create(self) -> Result<Node, NodeCreationFailure> {
        let config = self
            .config
            .unwrap_or_else(|| Config::global_config().clone());
        let registry = Registry::attach(&config)?;
        let id = NodeId(registry.next_node_id());

        let details = NodeDetails {
            name: self.name.as_str().to_owned(),
            pid: std::process::id(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let contents = toml::to_string(&details).map_err(|e| {
            error!(error = %e, "cannot encode node details");
            NodeCreationFailure::InternalError
        })?;
        let token = Token::create(&config.global.root_path, id.0, &contents)?;

        if config.node.cleanup_dead_nodes_on_creation {
            cleanup_dead_nodes(&config);
        }

        debug!(node = %id, name = %self.name, registry = %registry.path().display(), "created node");
        Ok(Node {
            shared: Arc::new(NodeShared {
                id,
                name: self.name,
                config,
                registry,
                _token: token,
            }),
        })
    }
}

fn cleanup_dead_nodes(config: &Config) {
    let listed = Node::list(config, |state| {
        if let NodeState::Dead(view) = state {
            let id = view.id();
            if let Err(e) = view.remove_stale_resources() {
                warn!(node = %id, error = %e, "could not clean up dead node");
            }
        }
        CallbackProgression::Continue
    });

    if let Err(e) = listed {
        warn!(error = %e, "could not look for dead nodes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(root: &std::path::Path, name: &str) -> Node {
        NodeBuilder::new()
            .name(&NodeName::new(name).unwrap())
            .config(&Config::default().with_root_path(root))
            .create()
            .unwrap()
    }

    #[test]
    fn nodes_get_distinct_ids_and_are_listed_alive() {
        let dir = tempfile::tempdir().unwrap();
        let a = node(dir.path(), "alpha");
        let b = node(dir.path(), "beta");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name().as_str(), "alpha");

        let mut alive = vec![];
        Node::list(a.config(), |state| {
            if let NodeState::Alive(view) = state {
                let name = view.details().map(|d| d.name().to_owned());
                alive.push((view.id(), name));
            }
            CallbackProgression::Continue
        })
        .unwrap();
        alive.sort();

        assert_eq!(
            alive,
            vec![
                (a.id(), Some("alpha".to_owned())),
                (b.id(), Some("beta".to_owned()))
            ]
        );
    }

    #[test]
    fn dropped_node_disappears_from_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_root_path(dir.path());
        drop(node(dir.path(), "short-lived"));

        let mut count = 0;
        Node::list(&config, |_| {
            count += 1;
            CallbackProgression::Continue
        })
        .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn list_stops_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let _nodes: Vec<_> = (0..3).map(|i| node(dir.path(), &format!("n{i}"))).collect();

        let mut seen = 0;
        Node::list(&Config::default().with_root_path(dir.path()), |_| {
            seen += 1;
            CallbackProgression::Stop
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn listing_an_empty_root_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_root_path(dir.path().join("nothing-here"));
        assert_eq!(Node::list(&config, |_| CallbackProgression::Continue), Ok(()));
    }

    #[test]
    fn node_names_are_bounded() {
        assert!(NodeName::new("").is_ok());
        assert_eq!(
            NodeName::new(&"n".repeat(MAX_NODE_NAME_LENGTH + 1)),
            Err(NodeNameError)
        );
    }
}
