//! Configuration management for the offline sync server

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Tunables of the reconciliation core
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Retries allowed per failed batch
    pub max_retries: u32,
    /// Age after which completed/failed batches are purged
    pub batch_retention_days: i64,
    /// Lifetime of an offline session
    pub max_offline_hours: i64,
    /// TTL of a queued offline change
    pub queue_ttl_hours: u64,
    /// How long an expired session stays readable
    pub expired_retention_hours: u64,
    /// Records exported per kind in a data package
    pub package_export_limit: usize,
    /// Largest change feed page
    pub feed_page_size: usize,
    pub feed_cache_capacity: usize,
    pub feed_cache_ttl_secs: u64,
    /// Periodic expired-session sweep; lazy expiry only when unset
    pub sweep_interval_secs: Option<u64>,
    /// Periodic batch cleanup; manual only when unset
    pub cleanup_interval_secs: Option<u64>,
}

impl SyncConfig {
    pub fn queue_ttl(&self) -> Duration {
        Duration::from_secs(self.queue_ttl_hours * 3600)
    }

    pub fn expired_retention(&self) -> Duration {
        Duration::from_secs(self.expired_retention_hours * 3600)
    }

    pub fn feed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_cache_ttl_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_retries: 3,
            batch_retention_days: 30,
            max_offline_hours: 24,
            queue_ttl_hours: 168,
            expired_retention_hours: 24,
            package_export_limit: 1000,
            feed_page_size: 500,
            feed_cache_capacity: 256,
            feed_cache_ttl_secs: 30,
            sweep_interval_secs: None,
            cleanup_interval_secs: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./offline-sync.db".to_string(),
            },
            sync: SyncConfig::default(),
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed
fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn optional_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = SyncConfig::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("SERVER_PORT", 3000),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:./offline-sync.db".to_string()),
            },
            sync: SyncConfig {
                max_retries: var_or("SYNC_MAX_RETRIES", defaults.max_retries),
                batch_retention_days: var_or(
                    "SYNC_BATCH_RETENTION_DAYS",
                    defaults.batch_retention_days,
                ),
                max_offline_hours: var_or("OFFLINE_MAX_HOURS", defaults.max_offline_hours),
                queue_ttl_hours: var_or("OFFLINE_QUEUE_TTL_HOURS", defaults.queue_ttl_hours),
                expired_retention_hours: var_or(
                    "OFFLINE_EXPIRED_RETENTION_HOURS",
                    defaults.expired_retention_hours,
                ),
                package_export_limit: var_or(
                    "OFFLINE_PACKAGE_LIMIT",
                    defaults.package_export_limit,
                ),
                feed_page_size: var_or("SYNC_FEED_PAGE_SIZE", defaults.feed_page_size),
                feed_cache_capacity: var_or(
                    "SYNC_FEED_CACHE_CAPACITY",
                    defaults.feed_cache_capacity,
                ),
                feed_cache_ttl_secs: var_or(
                    "SYNC_FEED_CACHE_TTL_SECS",
                    defaults.feed_cache_ttl_secs,
                ),
                sweep_interval_secs: optional_var("OFFLINE_SWEEP_INTERVAL_SECS"),
                cleanup_interval_secs: optional_var("SYNC_CLEANUP_INTERVAL_SECS"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.queue_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert!(config.sync.sweep_interval_secs.is_none());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        assert_eq!(var_or("OFFLINE_SYNC_TEST_UNSET_VARIABLE", 42u32), 42);
        assert_eq!(optional_var::<u64>("OFFLINE_SYNC_TEST_UNSET_VARIABLE"), None);
    }
}
