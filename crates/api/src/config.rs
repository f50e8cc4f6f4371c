//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use domain::StorageLocation;
use event_bus::CircuitBreakerConfig;
use saga::SagaConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `SERVICE_NAME`: name stamped on outgoing events (default: `"category"`)
/// - `PUBLISH_TIMEOUT_MS`: deadline for one event publish (default: `10000`)
/// - `BREAKER_COOL_DOWN_SECS`: time a tripped breaker stays open (default: `15`)
/// - `DATABASE_URL`: PostgreSQL url; in-memory repositories when unset
/// - `BLOB_ROOT`: directory for blob payloads; in-memory when unset
/// - `STORAGE_DOMAIN`: host used in public blob urls (default: `"cdn.example.com"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub service_name: String,
    pub publish_timeout: Duration,
    pub breaker_cool_down: Duration,
    pub database_url: Option<String>,
    pub blob_root: Option<PathBuf>,
    pub storage_domain: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable numbers fall back to their defaults, empty strings count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            service_name: var("SERVICE_NAME").unwrap_or(defaults.service_name),
            publish_timeout: var("PUBLISH_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            breaker_cool_down: var("BREAKER_COOL_DOWN_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.breaker_cool_down),
            database_url: var("DATABASE_URL"),
            blob_root: var("BLOB_ROOT").map(PathBuf::from),
            storage_domain: var("STORAGE_DOMAIN").unwrap_or(defaults.storage_domain),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            publish_timeout: self.publish_timeout,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default().with_cool_down(self.breaker_cool_down)
    }

    pub fn storage_location(&self) -> StorageLocation {
        StorageLocation {
            domain: self.storage_domain.clone(),
            ..StorageLocation::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            service_name: "category".to_string(),
            publish_timeout: SagaConfig::default().publish_timeout,
            breaker_cool_down: CircuitBreakerConfig::default().cool_down,
            database_url: None,
            blob_root: None,
            storage_domain: StorageLocation::default().domain,
        }
    }
}
