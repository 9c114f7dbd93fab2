//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::ServiceSettings;
use worker::WorkerConfig;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: Postgres connection string; the in-memory store is used when unset
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `LOW_STOCK_THRESHOLD`, `CATEGORY_CACHE_TTL_SECS`, `PRODUCT_CACHE_TTL_SECS`
/// - `JOB_MAX_ATTEMPTS`, `JOB_RETRY_BACKOFF_MS`, `JOB_QUEUE_CAPACITY`
/// - `ADMIN_EMAIL`, `FROM_EMAIL`
/// - `ABANDONED_CART_HOURS`, `ABANDONED_CART_SWEEP_SECS`: abandoned cart sweep (24h, daily)
/// - `OLD_ORDER_DAYS`, `OLD_ORDER_SWEEP_SECS`: old order sweep (90 days, weekly)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub services: ServiceSettings,
    pub worker: WorkerConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let services = ServiceSettings {
            low_stock_threshold: parsed("LOW_STOCK_THRESHOLD")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.services.low_stock_threshold),
            category_cache_ttl: parsed("CATEGORY_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.services.category_cache_ttl),
            product_cache_ttl: parsed("PRODUCT_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.services.product_cache_ttl),
        };

        let worker = WorkerConfig {
            max_attempts: parsed("JOB_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.worker.max_attempts),
            retry_backoff: parsed("JOB_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.worker.retry_backoff),
            queue_capacity: parsed("JOB_QUEUE_CAPACITY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.worker.queue_capacity),
            admin_email: lookup("ADMIN_EMAIL").unwrap_or(defaults.worker.admin_email),
            from_email: lookup("FROM_EMAIL").unwrap_or(defaults.worker.from_email),
            abandoned_cart_hours: parsed("ABANDONED_CART_HOURS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.worker.abandoned_cart_hours),
            abandoned_cart_every: parsed("ABANDONED_CART_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker.abandoned_cart_every),
            old_order_days: parsed("OLD_ORDER_DAYS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.worker.old_order_days),
            old_order_every: parsed("OLD_ORDER_SWEEP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.worker.old_order_every),
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.database_max_connections),
            services,
            worker,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            services: ServiceSettings::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.services.low_stock_threshold, 5);
        assert_eq!(config.worker.max_attempts, 3);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://shop@localhost/shop"),
            ("LOW_STOCK_THRESHOLD", "2"),
            ("CATEGORY_CACHE_TTL_SECS", "60"),
            ("JOB_RETRY_BACKOFF_MS", "10"),
            ("ADMIN_EMAIL", "ops@example.com"),
            ("OLD_ORDER_DAYS", "30"),
            ("ABANDONED_CART_SWEEP_SECS", "3600"),
        ]);
        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://shop@localhost/shop")
        );
        assert_eq!(config.services.low_stock_threshold, 2);
        assert_eq!(config.services.category_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.worker.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.worker.admin_email, "ops@example.com");
        assert_eq!(config.worker.old_order_days, 30);
        assert_eq!(config.worker.abandoned_cart_every, Duration::from_secs(3600));
        assert_eq!(config.worker.abandoned_cart_hours, 24);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "eighty"),
            ("JOB_MAX_ATTEMPTS", "0"),
            ("DATABASE_URL", ""),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.worker.max_attempts, 3);
        assert!(config.database_url.is_none());
    }
}
