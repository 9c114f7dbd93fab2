//! Time-bounded read caches.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{CategoryId, ProductId};
use store::model::Product;
use tokio::sync::RwLock;

/// A map whose entries expire `ttl` after insertion.
///
/// Expired entries are dropped whenever a new entry is inserted.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a fresh entry, if any.
    pub async fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|(inserted, _)| inserted.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (inserted, _)| inserted.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    /// Keeps only the entries for which `keep` returns true.
    pub async fn retain(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries
            .write()
            .await
            .retain(|key, (_, value)| keep(key, value));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Cached product listings per category.
///
/// Clones share one cache, so services that move stock can drop the
/// listings the catalog serves.
#[derive(Debug, Clone)]
pub struct ProductListings {
    cache: Arc<TtlCache<CategoryId, Vec<Product>>>,
}

impl ProductListings {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(TtlCache::new(ttl)),
        }
    }

    pub async fn get(&self, category: CategoryId) -> Option<Vec<Product>> {
        self.cache.get(&category).await
    }

    pub async fn insert(&self, category: CategoryId, products: Vec<Product>) {
        self.cache.insert(category, products).await;
    }

    pub async fn invalidate(&self, category: CategoryId) {
        self.cache.invalidate(&category).await;
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// Drops every listing that shows one of `products`.
    pub async fn forget_products(&self, products: &[ProductId]) {
        if products.is_empty() {
            return;
        }
        self.cache
            .retain(|_, listing| !listing.iter().any(|p| products.contains(&p.id)))
            .await;
    }

    pub async fn len(&self) -> usize {
        self.cache.len().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::Money;

    use super::*;

    fn product(name: &str) -> Product {
        let now = Utc::now();
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: String::new(),
            price: Money::from_minor(1_000),
            discount_price: None,
            stock: 3,
            is_active: true,
            is_featured: false,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn returns_fresh_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("tree", vec![1, 2, 3]).await;
        assert_eq!(cache.get(&"tree").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&"list").await, None);
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1, "value").await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn inserting_drops_expired_entries() {
        let cache = TtlCache::new(Duration::from_millis(20));
        for key in 0..50 {
            cache.insert(key, key).await;
        }
        assert_eq!(cache.len().await, 50);

        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.insert(100, 100).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&100).await, Some(100));
    }

    #[tokio::test]
    async fn invalidation_removes_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a").await;
        cache.insert(2, "b").await;

        cache.invalidate(&1).await;
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&2).await, Some("b"));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn listings_showing_a_product_are_forgotten() {
        let listings = ProductListings::new(Duration::from_secs(60));
        let shared = listings.clone();
        let (lamp, desk) = (product("Lamp"), product("Desk"));
        let (lighting, office) = (CategoryId::new(), CategoryId::new());
        listings.insert(lighting, vec![lamp.clone()]).await;
        listings.insert(office, vec![desk.clone()]).await;

        shared.forget_products(&[lamp.id]).await;
        assert_eq!(listings.get(lighting).await, None);
        assert_eq!(listings.get(office).await, Some(vec![desk]));
    }
}
