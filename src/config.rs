//! Application configuration.
//!
//! Configuration is layered the way the teacher's own configuration crate is: compiled-in
//! defaults, overlaid by an optional TOML file, overlaid by `MAGNETICO_`-prefixed environment
//! variables. There is no CLI flag parser here — the single tunable an operator usually needs
//! (the config file path) is read from `MAGNETICO_CONFIG_PATH`, with a built-in default.
use std::net::SocketAddr;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Default path to the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "data/magnetico.toml";

/// Default path to the embedded SQLite database.
pub const DEFAULT_DATABASE_PATH: &str = "data/magnetico.db";

/// Default bind address for the (out-of-core) HTTP interface.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: String,
    pub http_bind_address: String,
    pub dht: DhtConfig,
    pub metadata: MetadataConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            http_bind_address: DEFAULT_HTTP_BIND_ADDRESS.to_string(),
            dht: DhtConfig::default(),
            metadata: MetadataConfig::default(),
        }
    }
}

/// Configuration for the trawling manager (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    /// One UDP indexer is spawned per bind address.
    pub bind_addresses: Vec<SocketAddr>,
    /// Tick interval in seconds: how often each indexer re-queries its neighbours.
    pub tick_interval_secs: u64,
    /// Maximum size of an indexer's neighbour set before FIFO eviction kicks in.
    pub max_neighbors: usize,
    /// Outbound packets/second cap per indexer.
    pub rate_limit_per_sec: u32,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            bind_addresses: vec!["0.0.0.0:0".parse().expect("valid default bind address")],
            tick_interval_secs: 1,
            max_neighbors: 1000,
            rate_limit_per_sec: 200,
        }
    }
}

impl DhtConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Configuration for the metadata sink (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Per-session deadline in seconds.
    pub session_deadline_secs: u64,
    /// Maximum number of concurrent leech sessions.
    pub max_concurrent_sessions: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            session_deadline_secs: 5,
            max_concurrent_sessions: 50,
        }
    }
}

impl MetadataConfig {
    #[must_use]
    pub fn session_deadline(&self) -> Duration {
        Duration::from_secs(self.session_deadline_secs)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Loads configuration from compiled-in defaults, an optional TOML file at `path`
    /// (missing file is not an error), and `MAGNETICO_`-prefixed environment variables,
    /// in that order of increasing precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file is present but malformed, an environment
    /// variable has the wrong shape, or the resulting configuration fails validation.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MAGNETICO_").split("_"))
            .extract()?;

        config.validate()?;

        Ok(config)
    }

    /// Validates invariants that `serde`'s structural deserialization cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a value is structurally valid but
    /// operationally nonsensical (e.g. a zero-capacity neighbour set).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dht.bind_addresses.is_empty() {
            return Err(ConfigError::Invalid("dht.bind_addresses must not be empty".to_string()));
        }
        if self.dht.max_neighbors == 0 {
            return Err(ConfigError::Invalid("dht.max_neighbors must be greater than zero".to_string()));
        }
        if self.metadata.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "metadata.max_concurrent_sessions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.database_path, DEFAULT_DATABASE_PATH);
        assert_eq!(config.dht.max_neighbors, 1000);
        assert_eq!(config.dht.tick_interval_secs, 1);
        assert_eq!(config.metadata.max_concurrent_sessions, 50);
        assert_eq!(config.metadata.session_deadline_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_neighbor_capacity() {
        let mut config = Config::default();
        config.dht.max_neighbors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_bind_address_list() {
        let mut config = Config::default();
        config.dht.bind_addresses.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_is_absent() {
        let config = Config::load("data/this-file-does-not-exist.toml").unwrap();
        assert_eq!(config.database_path, DEFAULT_DATABASE_PATH);
    }
}
