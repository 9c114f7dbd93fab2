use std::time::Duration;

pub const DEFAULT_LOW_STOCK_THRESHOLD: u32 = 5;

/// Tunables shared by the services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// A cart write or checkout that leaves a product at or below this stock
    /// enqueues a `low_stock_alert`.
    pub low_stock_threshold: u32,

    /// Lifetime of cached category lists and trees.
    pub category_cache_ttl: Duration,

    /// Lifetime of cached per-category product listings.
    pub product_cache_ttl: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            category_cache_ttl: Duration::from_secs(3600),
            product_cache_ttl: Duration::from_secs(600),
        }
    }
}
