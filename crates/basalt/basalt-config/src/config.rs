use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable naming a TOML file that [`Config::global_config`] loads.
pub const CONFIG_ENV_VAR: &str = "BASALT_CONFIG";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub node: NodeDefaults,
    #[serde(default)]
    pub defaults: Defaults,
}

/// Where shared resources live and how large the registry is.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Global {
    #[serde(default = "defaults::root_path")]
    pub root_path: PathBuf,
    #[serde(default = "defaults::prefix")]
    pub prefix: String,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::max_services")]
    pub max_services: usize,
    #[serde(default = "defaults::max_nodes_per_service")]
    pub max_nodes_per_service: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeDefaults {
    #[serde(default = "defaults::cleanup_dead_nodes_on_creation")]
    pub cleanup_dead_nodes_on_creation: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Defaults {
    #[serde(default)]
    pub publish_subscribe: PublishSubscribeDefaults,
    #[serde(default)]
    pub event: EventDefaults,
    #[serde(default)]
    pub request_response: RequestResponseDefaults,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PublishSubscribeDefaults {
    #[serde(default = "defaults::max_publishers")]
    pub max_publishers: usize,
    #[serde(default = "defaults::max_subscribers")]
    pub max_subscribers: usize,
    #[serde(default = "defaults::subscriber_max_buffer_size")]
    pub subscriber_max_buffer_size: usize,
    #[serde(default = "defaults::subscriber_max_borrowed_samples")]
    pub subscriber_max_borrowed_samples: usize,
    #[serde(default = "defaults::publisher_max_loaned_samples")]
    pub publisher_max_loaned_samples: usize,
    #[serde(default = "defaults::max_slice_len")]
    pub max_slice_len: usize,
    #[serde(default = "defaults::enable_safe_overflow")]
    pub enable_safe_overflow: bool,
    #[serde(default)]
    pub unable_to_deliver_strategy: UnableToDeliverStrategy,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EventDefaults {
    #[serde(default = "defaults::max_notifiers")]
    pub max_notifiers: usize,
    #[serde(default = "defaults::max_listeners")]
    pub max_listeners: usize,
    #[serde(default = "defaults::event_id_max_value")]
    pub event_id_max_value: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestResponseDefaults {
    #[serde(default = "defaults::max_clients")]
    pub max_clients: usize,
    #[serde(default = "defaults::max_servers")]
    pub max_servers: usize,
    #[serde(default = "defaults::max_active_requests_per_client")]
    pub max_active_requests_per_client: usize,
    #[serde(default = "defaults::max_response_buffer_size")]
    pub max_response_buffer_size: usize,
    #[serde(default = "defaults::max_borrowed_responses_per_pending_response")]
    pub max_borrowed_responses_per_pending_response: usize,
    #[serde(default = "defaults::max_loaned_requests")]
    pub max_loaned_requests: usize,
    #[serde(default = "defaults::server_max_loaned_responses")]
    pub server_max_loaned_responses: usize,
    #[serde(default = "defaults::enable_safe_overflow")]
    pub enable_safe_overflow_for_requests: bool,
    #[serde(default = "defaults::enable_safe_overflow")]
    pub enable_safe_overflow_for_responses: bool,
    #[serde(default)]
    pub client_unable_to_deliver_strategy: UnableToDeliverStrategy,
    #[serde(default)]
    pub server_unable_to_deliver_strategy: UnableToDeliverStrategy,
}

/// What a sender does when a receiver's queue is full and overflow is disabled.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnableToDeliverStrategy {
    /// Retry until the receiver has room or disconnects.
    #[default]
    Block,
    /// Skip the receiver and report the failure.
    DiscardSample,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    use std::path::PathBuf;

    pub fn root_path() -> PathBuf {
        "/tmp/basalt".into()
    }

    pub fn prefix() -> String {
        "basalt_".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn max_services() -> usize {
        64
    }

    pub fn max_nodes_per_service() -> usize {
        32
    }

    pub fn cleanup_dead_nodes_on_creation() -> bool {
        true
    }

    pub fn max_publishers() -> usize {
        2
    }

    pub fn max_subscribers() -> usize {
        8
    }

    pub fn subscriber_max_buffer_size() -> usize {
        2
    }

    pub fn subscriber_max_borrowed_samples() -> usize {
        2
    }

    pub fn publisher_max_loaned_samples() -> usize {
        2
    }

    pub fn max_slice_len() -> usize {
        1
    }

    pub fn enable_safe_overflow() -> bool {
        true
    }

    pub fn max_notifiers() -> usize {
        16
    }

    pub fn max_listeners() -> usize {
        16
    }

    pub fn event_id_max_value() -> usize {
        255
    }

    pub fn max_clients() -> usize {
        8
    }

    pub fn max_servers() -> usize {
        2
    }

    pub fn max_active_requests_per_client() -> usize {
        4
    }

    pub fn max_response_buffer_size() -> usize {
        2
    }

    pub fn max_borrowed_responses_per_pending_response() -> usize {
        2
    }

    pub fn max_loaned_requests() -> usize {
        2
    }

    pub fn server_max_loaned_responses() -> usize {
        2
    }
}

impl Default for Global {
    fn default() -> Self {
        Self {
            root_path: defaults::root_path(),
            prefix: defaults::prefix(),
            log_level: defaults::log_level(),
            max_services: defaults::max_services(),
            max_nodes_per_service: defaults::max_nodes_per_service(),
        }
    }
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            cleanup_dead_nodes_on_creation: defaults::cleanup_dead_nodes_on_creation(),
        }
    }
}

impl Default for PublishSubscribeDefaults {
    fn default() -> Self {
        Self {
            max_publishers: defaults::max_publishers(),
            max_subscribers: defaults::max_subscribers(),
            subscriber_max_buffer_size: defaults::subscriber_max_buffer_size(),
            subscriber_max_borrowed_samples: defaults::subscriber_max_borrowed_samples(),
            publisher_max_loaned_samples: defaults::publisher_max_loaned_samples(),
            max_slice_len: defaults::max_slice_len(),
            enable_safe_overflow: defaults::enable_safe_overflow(),
            unable_to_deliver_strategy: UnableToDeliverStrategy::default(),
        }
    }
}

impl Default for EventDefaults {
    fn default() -> Self {
        Self {
            max_notifiers: defaults::max_notifiers(),
            max_listeners: defaults::max_listeners(),
            event_id_max_value: defaults::event_id_max_value(),
        }
    }
}

impl Default for RequestResponseDefaults {
    fn default() -> Self {
        Self {
            max_clients: defaults::max_clients(),
            max_servers: defaults::max_servers(),
            max_active_requests_per_client: defaults::max_active_requests_per_client(),
            max_response_buffer_size: defaults::max_response_buffer_size(),
            max_borrowed_responses_per_pending_response:
                defaults::max_borrowed_responses_per_pending_response(),
            max_loaned_requests: defaults::max_loaned_requests(),
            server_max_loaned_responses: defaults::server_max_loaned_responses(),
            enable_safe_overflow_for_requests: defaults::enable_safe_overflow(),
            enable_safe_overflow_for_responses: defaults::enable_safe_overflow(),
            client_unable_to_deliver_strategy: UnableToDeliverStrategy::default(),
            server_unable_to_deliver_strategy: UnableToDeliverStrategy::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&toml_to_str)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Process-wide configuration, loaded on first use and read-only afterwards.
    ///
    /// Reads the file named by `BASALT_CONFIG` when the variable is set; a file
    /// that cannot be loaded is reported and replaced by the defaults.
    pub fn global_config() -> &'static Config {
        static GLOBAL: OnceLock<Config> = OnceLock::new();
        GLOBAL.get_or_init(|| match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Config::load(path.as_str()).unwrap_or_else(|e| {
                tracing::warn!(%path, error = %e, "falling back to default config");
                Config::default()
            }),
            Err(_) => Config::default(),
        })
    }

    /// Same configuration rooted somewhere else, e.g. in a test directory.
    pub fn with_root_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.global.root_path = root.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.defaults.event.max_listeners, 16);
        assert_eq!(config.global.root_path, PathBuf::from("/tmp/basalt"));
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [global]
            root_path = "/dev/shm/basalt"

            [defaults.event]
            max_notifiers = 3

            [defaults.publish_subscribe]
            unable_to_deliver_strategy = "discard_sample"
            "#,
        )
        .unwrap();

        assert_eq!(config.global.root_path, PathBuf::from("/dev/shm/basalt"));
        assert_eq!(config.global.prefix, "basalt_");
        assert_eq!(config.defaults.event.max_notifiers, 3);
        assert_eq!(config.defaults.event.max_listeners, 16);
        assert_eq!(
            config.defaults.publish_subscribe.unable_to_deliver_strategy,
            UnableToDeliverStrategy::DiscardSample
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[global\nroot_path = 1").unwrap();

        let err = Config::load(path.display().to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serialized_config_round_trips() {
        let config = Config::default().with_root_path("/tmp/elsewhere");
        let text = toml::to_string(&config).unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }
}
