//! Thumbnail engine.
//!
//! - [`ThumbnailEngine`]: public entry point for fetches, prefetches and cache control
//! - [`Thumbnail`], [`HitSource`]: fetch results
//! - [`EngineStats`], [`StatsSnapshot`]: resolution counters

mod coalesce;
mod prefetch;
mod service;
mod stats;

pub use service::{HitSource, Thumbnail, ThumbnailEngine};
pub use stats::{EngineStats, StatsSnapshot};
