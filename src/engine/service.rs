//! Thumbnail engine orchestrating the cache tiers, decoding and prefetch.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ThumbnailEngine                          │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                  fetch_with_hit()                       │    │
//! │  │  1. Memory tier       4. Disk tier (decode stored JPEG) │    │
//! │  │  2. Join in-flight    5. Source + decode pipeline       │    │
//! │  │  3. Re-check memory   6. Store in both tiers, trim disk │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │        │               │                 │              │        │
//! │        ▼               ▼                 ▼              ▼        │
//! │  ┌──────────┐   ┌────────────┐   ┌──────────────┐  ┌──────────┐  │
//! │  │MemoryTier│   │InFlightMap │   │DecodePipeline│  │ DiskTier │  │
//! │  └──────────┘   └────────────┘   └──────────────┘  └──────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Steps 3-6 run in a task owned by the engine, so a caller that stops
//! waiting does not abort work other callers are sharing.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheKey, DiskTier, DiskUsage, MemoryTier};
use crate::config::EngineConfig;
use crate::decode::{DecodePipeline, ThumbnailEncoder};
use crate::error::{DecodeError, EngineError};
use crate::source::{ImageId, ImageSource};

use super::coalesce::{Claim, InFlightLease, InFlightMap};
use super::prefetch::PrefetchState;
use super::stats::{EngineStats, StatsSnapshot};

// =============================================================================
// Thumbnail
// =============================================================================

/// Where a fetch was satisfied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    /// Decoded image already resident in memory
    Memory,
    /// Compressed thumbnail read back from the disk tier
    Disk,
    /// Original image read and decoded
    Decode,
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HitSource::Memory => "memory",
            HitSource::Disk => "disk",
            HitSource::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// A resolved thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// Upright image whose longest side is at most the requested size
    pub image: Arc<DynamicImage>,

    /// Tier or stage that produced the image
    pub source: HitSource,
}

impl Thumbnail {
    fn new(image: Arc<DynamicImage>, source: HitSource) -> Self {
        Self { image, source }
    }
}

// =============================================================================
// ThumbnailEngine
// =============================================================================

/// Two-tier thumbnail cache with per-key coalescing and bounded prefetch.
///
/// Cloning is cheap; clones share all state.
///
/// # Type Parameters
///
/// * `S` - Source of original image bytes
///
/// # Example
///
/// ```ignore
/// use thumbnail_engine::{EngineConfig, FsImageSource, ImageId, ThumbnailEngine};
///
/// let engine = ThumbnailEngine::new(EngineConfig::default(), FsImageSource::new()).await?;
///
/// let id = ImageId::new("file:///photos/IMG_0042.jpg");
/// if let Some(thumb) = engine.fetch_with_hit(&id, Some(256)).await {
///     println!("{}x{} from {}", thumb.image.width(), thumb.image.height(), thumb.source);
/// }
///
/// engine.shutdown().await;
/// ```
pub struct ThumbnailEngine<S: ImageSource> {
    inner: Arc<EngineInner<S>>,
}

impl<S: ImageSource> Clone for ThumbnailEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<S: ImageSource> {
    config: EngineConfig,
    source: S,
    memory: MemoryTier,
    disk: DiskTier,
    pipeline: DecodePipeline,
    encoder: ThumbnailEncoder,
    in_flight: InFlightMap<Thumbnail>,
    prefetch: Arc<PrefetchState>,
    stats: EngineStats,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl<S: ImageSource> ThumbnailEngine<S> {
    /// Create an engine, preparing the cache directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the cache directory
    /// cannot be created.
    pub async fn new(config: EngineConfig, source: S) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;

        let disk = DiskTier::new(&config.cache_directory, config.disk_budget_bytes).await?;

        info!(
            cache_dir = %config.cache_directory.display(),
            memory_budget_bytes = config.memory_budget_bytes,
            disk_budget_bytes = config.disk_budget_bytes,
            default_size = config.default_thumbnail_size,
            max_prefetch = config.max_concurrent_prefetch,
            "Thumbnail engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                memory: MemoryTier::new(config.memory_budget_bytes),
                disk,
                pipeline: DecodePipeline::new(),
                encoder: ThumbnailEncoder::new(),
                in_flight: InFlightMap::new(),
                prefetch: PrefetchState::new(config.max_concurrent_prefetch),
                stats: EngineStats::new(),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
                source,
                config,
            }),
        })
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Cache key for `id` at `size` (`None` or 0 means the default size).
    pub fn cache_key(&self, id: &ImageId, size: Option<u32>) -> CacheKey {
        CacheKey::derive(id, self.resolve_size(size))
    }

    /// Fetch a thumbnail together with where it came from.
    ///
    /// Concurrent calls for the same image and size share a single disk read
    /// or decode, and all observe the same result. Returns `None` if the
    /// original cannot be read or decoded, or the engine has been shut down
    /// and the image is not in memory.
    pub async fn fetch_with_hit(&self, id: &ImageId, size: Option<u32>) -> Option<Thumbnail> {
        let size = self.resolve_size(size);
        let key = CacheKey::derive(id, size);
        self.fetch_key(key, id.clone(), size).await
    }

    /// Fetch a thumbnail, discarding the hit source.
    pub async fn fetch(&self, id: &ImageId, size: Option<u32>) -> Option<Arc<DynamicImage>> {
        self.fetch_with_hit(id, size).await.map(|thumb| thumb.image)
    }

    /// Whether the thumbnail is resident in memory. Does not affect eviction order.
    pub async fn has_in_memory(&self, id: &ImageId, size: Option<u32>) -> bool {
        self.inner.memory.contains(&self.cache_key(id, size)).await
    }

    /// Whether the thumbnail is stored on disk.
    pub async fn has_on_disk(&self, id: &ImageId, size: Option<u32>) -> bool {
        self.inner.disk.exists(&self.cache_key(id, size)).await
    }

    /// Whether a load for the thumbnail is currently running.
    pub fn is_loading(&self, id: &ImageId, size: Option<u32>) -> bool {
        self.inner.in_flight.contains(&self.cache_key(id, size))
    }

    /// Number of loads currently running.
    pub fn loads_in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Drop every decoded thumbnail held in memory.
    pub async fn clear_memory(&self) {
        self.inner.memory.evict_all().await;
        info!("Cleared memory cache");
    }

    /// Delete every thumbnail stored on disk.
    pub async fn clear_disk(&self) {
        self.inner.disk.evict_all().await;
    }

    /// File count and size of the disk tier.
    pub async fn disk_usage(&self) -> DiskUsage {
        self.inner.disk.usage().await
    }

    /// Resident memory tier cost in kilobytes.
    pub async fn memory_usage_kb(&self) -> usize {
        self.inner.memory.size_kb().await
    }

    /// Resolution counters since the engine was created.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    // =========================================================================
    // Prefetch
    // =========================================================================

    /// Start loading `items[index]` in the background.
    ///
    /// Does nothing if `index` is out of bounds, the thumbnail is already in
    /// memory or on disk, it is already being prefetched, or the configured
    /// number of prefetches is already running. Only the cheap residency
    /// checks are awaited; the load itself is never waited on.
    pub async fn prefetch(&self, index: isize, items: &[ImageId], size: Option<u32>) {
        let Some(id) = usize::try_from(index).ok().and_then(|i| items.get(i)) else {
            trace!(index, len = items.len(), "Prefetch index out of range");
            return;
        };

        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let size = self.resolve_size(size);
        let key = CacheKey::derive(id, size);

        if self.inner.memory.contains(&key).await || self.inner.disk.exists(&key).await {
            trace!(key = %key, "Prefetch target already cached");
            return;
        }

        let Some(slot) = self.inner.prefetch.try_acquire(&key) else {
            trace!(
                key = %key,
                queued = self.inner.prefetch.contains(&key),
                active = self.inner.prefetch.active(),
                cap = self.inner.prefetch.cap(),
                "Prefetch skipped"
            );
            return;
        };

        debug!(key = %key, index, "Prefetching thumbnail");

        let engine = self.clone();
        let id = id.clone();
        self.inner.tasks.spawn(async move {
            let _slot = slot;
            tokio::select! {
                _ = engine.inner.shutdown.cancelled() => {}
                _ = engine.fetch_key(key, id, size) => {}
            }
        });
    }

    /// Prefetch the grid cell directly below `position` in a grid of `columns`.
    pub async fn prefetch_next(
        &self,
        position: isize,
        columns: isize,
        items: &[ImageId],
        size: Option<u32>,
    ) {
        self.prefetch(position.saturating_add(columns), items, size).await;
    }

    /// Number of prefetches currently running.
    pub fn active_prefetch(&self) -> usize {
        self.inner.prefetch.active()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Cancel all outstanding work and wait for background tasks to finish.
    ///
    /// Afterwards only memory hits are served.
    pub async fn shutdown(&self) {
        info!(
            in_flight = self.inner.in_flight.len(),
            prefetching = self.inner.prefetch.active(),
            "Shutting down thumbnail engine"
        );
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn resolve_size(&self, size: Option<u32>) -> u32 {
        match size {
            Some(size) if size > 0 => size,
            _ => self.inner.config.default_thumbnail_size,
        }
    }

    async fn fetch_key(&self, key: CacheKey, id: ImageId, size: u32) -> Option<Thumbnail> {
        let inner = &self.inner;

        if let Some(image) = inner.memory.get(&key).await {
            let thumb = Thumbnail::new(image, HitSource::Memory);
            inner.record(&key, Some(&thumb));
            return Some(thumb);
        }

        if inner.shutdown.is_cancelled() {
            debug!(key = %key, "Engine shut down; not loading");
            inner.record(&key, None);
            return None;
        }

        let handle = match inner.in_flight.claim(&key) {
            Claim::Joined(handle) => {
                trace!(key = %key, "Joining in-flight load");
                handle
            }
            Claim::Leader(lease) => {
                let handle = lease.handle();
                self.spawn_load(lease, key.clone(), id, size);
                handle
            }
        };

        let outcome = handle.wait().await;
        inner.record(&key, outcome.as_ref());
        outcome
    }

    fn spawn_load(&self, lease: InFlightLease<Thumbnail>, key: CacheKey, id: ImageId, size: u32) {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            let outcome = tokio::select! {
                _ = inner.shutdown.cancelled() => {
                    debug!(key = %key, "Load cancelled by shutdown");
                    None
                }
                outcome = inner.load(&key, &id, size) => outcome,
            };
            lease.complete(outcome);
        });
    }
}

impl<S: ImageSource> EngineInner<S> {
    fn record(&self, key: &CacheKey, outcome: Option<&Thumbnail>) {
        match outcome {
            Some(thumb) => debug!(key = %key, source = %thumb.source, "Resolved thumbnail"),
            None => debug!(key = %key, "Thumbnail unavailable"),
        }
        self.stats.record(outcome.map(|thumb| thumb.source));
    }

    /// Memory, then disk, then the original. Runs once per key at a time.
    async fn load(&self, key: &CacheKey, id: &ImageId, size: u32) -> Option<Thumbnail> {
        // Another load may have finished between the caller's check and the claim
        if let Some(image) = self.memory.get(key).await {
            return Some(Thumbnail::new(image, HitSource::Memory));
        }

        if let Some(image) = self.load_from_disk(key).await {
            self.memory.put(key.clone(), Arc::clone(&image)).await;
            return Some(Thumbnail::new(image, HitSource::Disk));
        }

        let image = Arc::new(self.create(key, id, size).await?);
        self.memory.put(key.clone(), Arc::clone(&image)).await;
        self.store_on_disk(key, Arc::clone(&image)).await;
        Some(Thumbnail::new(image, HitSource::Decode))
    }

    /// Read and decode the original, bounded by the decode timeout if set.
    ///
    /// Only this step is timed. A decoded thumbnail is always put in memory
    /// and handed to the disk tier before waiters are answered.
    async fn create(&self, key: &CacheKey, id: &ImageId, size: u32) -> Option<DynamicImage> {
        self.stats.record_pipeline_run();

        let result = match self.config.decode_timeout {
            Some(limit) => {
                let decode = self.decode_from_source(id, size);
                match tokio::time::timeout(limit, decode).await {
                    Ok(result) => result,
                    Err(_) => {
                        let timeout_ms = limit.as_millis() as u64;
                        warn!(key = %key, id = %id, timeout_ms, "Thumbnail decode timed out");
                        return None;
                    }
                }
            }
            None => self.decode_from_source(id, size).await,
        };

        match result {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(key = %key, id = %id, error = %e, "Failed to create thumbnail");
                None
            }
        }
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let data = self.disk.read(key).await?;
        let encoder = self.encoder;

        match tokio::task::spawn_blocking(move || encoder.decode(&data)).await {
            Ok(Ok(image)) => Some(Arc::new(image)),
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Ignoring unreadable disk cache entry");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache decode task failed");
                None
            }
        }
    }

    async fn decode_from_source(
        &self,
        id: &ImageId,
        size: u32,
    ) -> Result<DynamicImage, DecodeError> {
        let encoded = self.source.read(id).await?;
        let pipeline = self.pipeline;

        tokio::task::spawn_blocking(move || pipeline.decode(&encoded, size))
            .await
            .map_err(|e| DecodeError::Decode {
                message: format!("decode task failed: {}", e),
            })?
    }

    async fn store_on_disk(&self, key: &CacheKey, image: Arc<DynamicImage>) {
        let encoder = self.encoder;
        let quality = self.config.disk_compression_quality;

        let task = tokio::task::spawn_blocking(move || encoder.encode(&image, quality));
        let encoded = match task.await {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to encode thumbnail for disk cache");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Thumbnail encode task failed");
                return;
            }
        };

        if self.disk.write(key, &encoded).await {
            self.disk.trim_if_needed().await;
        }
    }
}
