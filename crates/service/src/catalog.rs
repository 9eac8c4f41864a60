//! Product catalog seam and a bounded TTL cache over it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use domain::{Money, ProductId};

use crate::error::Result;

/// Live product data needed to snapshot an order line at placement time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub product_id: ProductId,
    pub slug: String,
    pub name: String,
    pub unit_price: Money,
}

/// Read access to the product catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Looks up a product, returning None if it does not exist.
    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductInfo>>;
}

/// In-memory catalog for testing and small deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<RwLock<HashMap<ProductId, ProductInfo>>>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a product.
    pub fn insert(&self, info: ProductInfo) {
        self.products
            .write()
            .expect("catalog lock poisoned")
            .insert(info.product_id.clone(), info);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductInfo>> {
        Ok(self
            .products
            .read()
            .expect("catalog lock poisoned")
            .get(product_id)
            .cloned())
    }
}

struct CacheEntry {
    info: ProductInfo,
    cached_at: Instant,
}

/// Bounded TTL cache in front of a catalog.
///
/// Entries expire after `ttl` and the map never grows past `capacity`;
/// when full, the oldest entry is evicted. Negative lookups are not
/// cached, so a product added to the catalog becomes visible immediately.
pub struct CachedCatalog<C> {
    inner: C,
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<ProductId, CacheEntry>>,
}

impl<C: Catalog> CachedCatalog<C> {
    /// Wraps a catalog with a cache of at most `capacity` entries living
    /// at most `ttl`.
    pub fn new(inner: C, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn fresh(&self, product_id: &ProductId) -> Option<ProductInfo> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .get(product_id)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.info.clone())
    }

    fn store(&self, info: ProductInfo) {
        let mut entries = self.entries.write().expect("cache lock poisoned");

        entries.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        if entries.len() >= self.capacity
            && !entries.contains_key(&info.product_id)
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.cached_at)
                .map(|(id, _)| id.clone())
        {
            entries.remove(&oldest);
        }

        entries.insert(
            info.product_id.clone(),
            CacheEntry {
                info,
                cached_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl<C: Catalog> Catalog for CachedCatalog<C> {
    async fn product(&self, product_id: &ProductId) -> Result<Option<ProductInfo>> {
        if let Some(info) = self.fresh(product_id) {
            return Ok(Some(info));
        }

        let fetched = self.inner.product(product_id).await?;
        if let Some(info) = &fetched {
            self.store(info.clone());
        }
        Ok(fetched)
    }
}
