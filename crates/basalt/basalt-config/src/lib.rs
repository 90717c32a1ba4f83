mod config;

pub use config::{
    Config, ConfigError, Defaults, EventDefaults, Global, NodeDefaults, PublishSubscribeDefaults,
    RequestResponseDefaults, UnableToDeliverStrategy, CONFIG_ENV_VAR,
};
