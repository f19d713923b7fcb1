//! # Thumbnail Engine
//!
//! A two-tier thumbnail cache for large photo collections.
//!
//! Callers ask for an image identifier at a pixel size and get back an upright,
//! downsampled image together with where it was found. Decoded thumbnails are
//! kept in memory under a pixel-memory budget; compressed copies are kept on
//! disk under a byte budget so they survive restarts.
//!
//! ## Features
//!
//! - **Two cache tiers**: LRU memory tier over an oldest-first disk tier
//! - **Request coalescing**: concurrent requests for one thumbnail share a single load
//! - **Orientation-aware decoding**: EXIF orientation applied after downsampling
//! - **Bounded prefetch**: background loads for nearby grid cells under a concurrency cap
//!
//! ## Architecture
//!
//! - [`source`] - Image identifiers and the source of original bytes
//! - [`cache`] - Cache keys, memory tier and disk tier
//! - [`decode`] - Decode pipeline, orientation, JPEG encoding for the disk tier
//! - [`engine`] - Coalescing, prefetch and the public engine
//! - [`config`] - Engine configuration and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use thumbnail_engine::{EngineConfig, FsImageSource, ImageId, ThumbnailEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::default().with_cache_directory("/var/cache/thumbs");
//!     let engine = ThumbnailEngine::new(config, FsImageSource::new()).await?;
//!
//!     let items: Vec<ImageId> = vec!["/photos/a.jpg".into(), "/photos/b.jpg".into()];
//!     if let Some(thumb) = engine.fetch_with_hit(&items[0], Some(256)).await {
//!         println!("{}x{} ({})", thumb.image.width(), thumb.image.height(), thumb.source);
//!     }
//!     engine.prefetch_next(0, 1, &items, Some(256)).await;
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod source;

// Re-export commonly used types
pub use cache::{CacheKey, DiskTier, DiskUsage, MemoryTier, TrimOutcome};
pub use config::{Cli, Command, EngineArgs, EngineConfig, OutputFormat, Profile};
pub use decode::{DecodePipeline, Orientation, ThumbnailEncoder};
pub use engine::{EngineStats, HitSource, StatsSnapshot, Thumbnail, ThumbnailEngine};
pub use error::{CacheError, DecodeError, EngineError, SourceError};
pub use source::{FsImageSource, ImageId, ImageSource};
