//! Configuration module.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, HubConfig, NewsSettings, ServerSettings, StreamSettings,
};
