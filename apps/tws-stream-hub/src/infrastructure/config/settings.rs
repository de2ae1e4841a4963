//! Hub Configuration
//!
//! All settings have defaults and can be overridden from the environment:
//!
//! - `STREAM_HUB_JOIN_TIMEOUT_SECS`: bound on waiting for a cancelled stream
//!   task to finish before aborting it (default: 5)
//! - `STREAM_HUB_BULLETIN_CAPACITY`: bulletin ring buffer size (default: 50)
//! - `STREAM_HUB_TICKER_NEWS_CAPACITY`: per-symbol news buffer size
//!   (default: 100)
//! - `STREAM_HUB_BROADTAPE_CAPACITY`: broadtape buffer size (default: 1000)
//! - `STREAM_HUB_AGGREGATE_READ_LIMIT`: max items served by a `*` read
//!   (default: 100)
//! - `STREAM_HUB_BROADCAST_CAPACITY`: per-family broadcast channel depth
//!   (default: 256)
//! - `STREAM_HUB_MARKET_BROADCAST_CAPACITY`: market-data channel depth
//!   (default: 1024)
//! - `STREAM_HUB_HEALTH_PORT`: health server port (default: 8082)

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::resource::Family;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Environment variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// A setting failed validation.
    #[error("invalid setting: {0}")]
    Validation(String),
}

/// Parse an environment variable, falling back to a default when unset.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Stream task lifecycle settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// How long `stop` waits for a cancelled task before aborting it.
    pub join_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// News buffer settings.
#[derive(Debug, Clone)]
pub struct NewsSettings {
    /// Bulletin ring buffer capacity.
    pub bulletins_capacity: usize,
    /// Per-symbol ticker news buffer capacity.
    pub ticker_capacity: usize,
    /// Broadtape buffer capacity.
    pub broadtape_capacity: usize,
    /// Maximum items returned by an aggregated `*` read.
    pub aggregate_read_limit: usize,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            bulletins_capacity: 50,
            ticker_capacity: 100,
            broadtape_capacity: 1000,
            aggregate_read_limit: 100,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Market data channel depth; ticks are the highest-volume category.
    pub market_data_capacity: usize,
    /// Channel depth for every other family.
    pub default_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            market_data_capacity: 1024,
            default_capacity: 256,
        }
    }
}

impl BroadcastSettings {
    /// Channel capacity for one family.
    #[must_use]
    pub const fn capacity_for(&self, family: Family) -> usize {
        match family {
            Family::MarketData => self.market_data_capacity,
            _ => self.default_capacity,
        }
    }
}

/// Health server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port the health endpoints listen on.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

// =============================================================================
// HubConfig
// =============================================================================

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Stream task lifecycle settings.
    pub streams: StreamSettings,
    /// News buffer settings.
    pub news: NewsSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Health server settings.
    pub server: ServerSettings,
}

impl HubConfig {
    /// Load configuration from the environment, validating the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable holds an unparseable value or
    /// a capacity is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            streams: StreamSettings {
                join_timeout: Duration::from_secs(env_parse(
                    "STREAM_HUB_JOIN_TIMEOUT_SECS",
                    defaults.streams.join_timeout.as_secs(),
                )?),
            },
            news: NewsSettings {
                bulletins_capacity: env_parse(
                    "STREAM_HUB_BULLETIN_CAPACITY",
                    defaults.news.bulletins_capacity,
                )?,
                ticker_capacity: env_parse(
                    "STREAM_HUB_TICKER_NEWS_CAPACITY",
                    defaults.news.ticker_capacity,
                )?,
                broadtape_capacity: env_parse(
                    "STREAM_HUB_BROADTAPE_CAPACITY",
                    defaults.news.broadtape_capacity,
                )?,
                aggregate_read_limit: env_parse(
                    "STREAM_HUB_AGGREGATE_READ_LIMIT",
                    defaults.news.aggregate_read_limit,
                )?,
            },
            broadcast: BroadcastSettings {
                market_data_capacity: env_parse(
                    "STREAM_HUB_MARKET_BROADCAST_CAPACITY",
                    defaults.broadcast.market_data_capacity,
                )?,
                default_capacity: env_parse(
                    "STREAM_HUB_BROADCAST_CAPACITY",
                    defaults.broadcast.default_capacity,
                )?,
            },
            server: ServerSettings {
                health_port: env_parse("STREAM_HUB_HEALTH_PORT", defaults.server.health_port)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate settings invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a capacity or limit is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("bulletins_capacity", self.news.bulletins_capacity),
            ("ticker_capacity", self.news.ticker_capacity),
            ("broadtape_capacity", self.news.broadtape_capacity),
            ("aggregate_read_limit", self.news.aggregate_read_limit),
            (
                "market_data_capacity",
                self.broadcast.market_data_capacity,
            ),
            ("default_capacity", self.broadcast.default_capacity),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} must be > 0")));
            }
        }
        if self.streams.join_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "join_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = HubConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.streams.join_timeout, Duration::from_secs(5));
        assert_eq!(config.news.bulletins_capacity, 50);
        assert_eq!(config.news.ticker_capacity, 100);
        assert_eq!(config.news.broadtape_capacity, 1000);
        assert_eq!(config.news.aggregate_read_limit, 100);
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn broadcast_capacity_per_family() {
        let settings = BroadcastSettings::default();
        assert_eq!(settings.capacity_for(Family::MarketData), 1024);
        assert_eq!(settings.capacity_for(Family::Portfolio), 256);
        assert_eq!(settings.capacity_for(Family::BroadtapeNews), 256);
    }

    #[test]
    fn zero_capacity_fails_validation() {
        let mut config = HubConfig::default();
        config.news.ticker_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_join_timeout_fails_validation() {
        let mut config = HubConfig::default();
        config.streams.join_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
