//! In-process tier holding decoded thumbnails.
//!
//! Entries are evicted least-recently-used first under a budget expressed in
//! kilobytes of pixel memory. The cost of an entry is the size of its decoded
//! raster, not of the key or any metadata.

use std::sync::Arc;

use image::DynamicImage;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::trace;

use super::key::CacheKey;

/// Memory footprint of a decoded image in kilobytes (rounded up).
pub fn cost_kb(image: &DynamicImage) -> usize {
    image.as_bytes().len().div_ceil(1024)
}

struct Inner {
    entries: LruCache<CacheKey, Arc<DynamicImage>>,
    size_kb: usize,
}

/// LRU cache of decoded thumbnails with a pixel-memory budget.
///
/// # Thread Safety
///
/// Recency order and cost accounting live under a single lock, so concurrent
/// `get`/`put` calls cannot observe them out of step. The tier can be shared
/// across tasks via `Arc`.
pub struct MemoryTier {
    inner: RwLock<Inner>,
    capacity_kb: usize,
}

impl MemoryTier {
    /// Create a tier with a budget of `budget_bytes`.
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: LruCache::unbounded(),
                size_kb: 0,
            }),
            capacity_kb: budget_bytes / 1024,
        }
    }

    /// Get an image, marking it as most recently used.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut inner = self.inner.write().await;
        inner.entries.get(key).cloned()
    }

    /// Check residency without touching recency order.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let inner = self.inner.read().await;
        inner.entries.contains(key)
    }

    /// Store an image.
    ///
    /// Least-recently-used entries are evicted until the new entry fits, then it
    /// is inserted. An image whose cost alone exceeds the budget is not stored;
    /// the return value tells whether the entry was admitted.
    pub async fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> bool {
        let cost = cost_kb(&image);
        let mut inner = self.inner.write().await;

        if let Some(old) = inner.entries.pop(&key) {
            inner.size_kb = inner.size_kb.saturating_sub(cost_kb(&old));
        }

        if cost > self.capacity_kb {
            trace!(
                key = %key,
                cost_kb = cost,
                capacity_kb = self.capacity_kb,
                "Image exceeds memory budget"
            );
            return false;
        }

        while inner.size_kb + cost > self.capacity_kb {
            match inner.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    inner.size_kb = inner.size_kb.saturating_sub(cost_kb(&evicted));
                    trace!(key = %evicted_key, "Evicted from memory tier");
                }
                None => break,
            }
        }

        inner.entries.put(key, image);
        inner.size_kb += cost;
        true
    }

    /// Drop every entry.
    pub async fn evict_all(&self) {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.size_kb = 0;
    }

    /// Number of resident images.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the tier holds no images.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Resident cost in kilobytes.
    pub async fn size_kb(&self) -> usize {
        self.inner.read().await.size_kb
    }

    /// Budget in kilobytes.
    pub fn capacity_kb(&self) -> usize {
        self.capacity_kb
    }
}
