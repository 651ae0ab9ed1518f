//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use lifecycle::LifecycleConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`, `REDIS_URL`: when both are set the server runs on
///   Postgres and Redis, otherwise on in-process backends
/// - `ORDER_TIMEOUT_SECS` (default: `1800`)
/// - `LOCK_TTL_SECS` (default: `5`)
/// - `SCHEDULER_TICK_MS` (default: `1000`)
/// - `SCHEDULER_BATCH_SIZE` (default: `10`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub order_timeout_secs: u64,
    pub lock_ttl_secs: u64,
    pub scheduler_tick_ms: u64,
    pub scheduler_batch_size: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: non_empty_var("DATABASE_URL"),
            redis_url: non_empty_var("REDIS_URL"),
            order_timeout_secs: env_or("ORDER_TIMEOUT_SECS", defaults.order_timeout_secs),
            lock_ttl_secs: env_or("LOCK_TTL_SECS", defaults.lock_ttl_secs),
            scheduler_tick_ms: env_or("SCHEDULER_TICK_MS", defaults.scheduler_tick_ms),
            scheduler_batch_size: env_or("SCHEDULER_BATCH_SIZE", defaults.scheduler_batch_size),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Both connection strings, if the shared backends are configured.
    pub fn shared_backends(&self) -> Option<(&str, &str)> {
        match (&self.database_url, &self.redis_url) {
            (Some(database), Some(redis)) => Some((database, redis)),
            _ => None,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            order_timeout: Duration::from_secs(self.order_timeout_secs),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            scheduler_tick: Duration::from_millis(self.scheduler_tick_ms.max(1)),
            scheduler_batch_size: self.scheduler_batch_size.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let lifecycle = LifecycleConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            redis_url: None,
            order_timeout_secs: lifecycle.order_timeout.as_secs(),
            lock_ttl_secs: lifecycle.lock_ttl.as_secs(),
            scheduler_tick_ms: lifecycle.scheduler_tick.as_millis() as u64,
            scheduler_batch_size: lifecycle.scheduler_batch_size,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
