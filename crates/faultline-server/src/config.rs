//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use thiserror::Error;

use faultline_broker::TopicConfig;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration.
    #[error("Configuration error: {0}")]
    Parse(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Faultline server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP API configuration.
    pub api: ApiSettings,
    /// Broker topic backend.
    pub broker: TopicConfig,
    /// Document store backend.
    pub store: StoreSettings,
    /// Recent-issue read cache.
    pub cache: CacheSettings,
    /// Fingerprint deduplication cache.
    pub dedup: DedupSettings,
    /// Consumer loop settings.
    pub consumer: ConsumerSettings,
}

impl ServerConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `faultline.toml` in the current directory (if present)
    /// 3. Specified config file path (if provided)
    /// 4. Environment variables with `FAULTLINE_` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Toml::file("faultline.toml"));

        if let Some(p) = path {
            figment = figment.merge(Toml::file(p));
        }

        figment
            .merge(Env::prefixed("FAULTLINE_").split("__"))
            .extract()
            .map_err(ConfigError::from)
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8090),
        }
    }
}

/// Document store backend selection.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreSettings {
    #[default]
    Memory,
    Postgres { url: String },
}

/// Read cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Snapshot and index TTL in seconds.
    pub ttl_secs: u64,
    /// Backend selection.
    pub backend: CacheBackend,
}

impl CacheSettings {
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            backend: CacheBackend::default(),
        }
    }
}

/// Cache backend selection, shared by the read and dedup caches.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Valkey {
        url: String,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

/// Deduplication cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    /// Deduplication window in seconds.
    pub ttl_secs: u64,
    /// Backend selection.
    pub backend: CacheBackend,
}

impl DedupSettings {
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            backend: CacheBackend::default(),
        }
    }
}

/// Consumer loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Whether to run the consumer in this process.
    pub enabled: bool,
    /// Consumer-group identity.
    pub group: String,
    /// Bounded poll wait per cycle, in seconds.
    pub poll_timeout_secs: u64,
    /// Maximum messages per batch.
    pub max_batch: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            group: "issuetracker-consumer".to_owned(),
            poll_timeout_secs: 1,
            max_batch: 10,
        }
    }
}

fn default_key_prefix() -> String {
    "faultline:".to_owned()
}

fn default_pool_size() -> usize {
    10
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.api.listen_addr.port(), 8090);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.dedup.ttl_secs, 86_400);
        assert!(config.consumer.enabled);
        assert_eq!(config.consumer.max_batch, 10);
    }

    #[test]
    fn backend_selection_from_toml() {
        let config: ServerConfig = figment::Figment::new()
            .merge(figment::providers::Toml::string(
                r#"
                [store]
                backend = "postgres"
                url = "postgres://localhost/faultline"

                [cache.backend]
                backend = "valkey"
                url = "redis://localhost:6379"
                "#,
            ))
            .extract()
            .unwrap();

        assert!(matches!(config.store, StoreSettings::Postgres { .. }));
        assert!(matches!(
            config.cache.backend,
            CacheBackend::Valkey { .. }
        ));
    }
}
