//! Resolution counters.
//!
//! Every caller's fetch is counted once by where it was resolved. Coalesced
//! callers share one load, so `pipeline_runs` counts how often the decode
//! pipeline actually ran on an original.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::service::HitSource;

/// Running counts of how fetches were resolved.
#[derive(Debug, Default)]
pub struct EngineStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    decode_resolutions: AtomicU64,
    failures: AtomicU64,
    pipeline_runs: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one resolution; `None` means the fetch produced no image.
    pub fn record(&self, source: Option<HitSource>) {
        let counter = match source {
            Some(HitSource::Memory) => &self.memory_hits,
            Some(HitSource::Disk) => &self.disk_hits,
            Some(HitSource::Decode) => &self.decode_resolutions,
            None => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one run of the decode pipeline on an original image.
    pub fn record_pipeline_run(&self) {
        self.pipeline_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            decode_resolutions: self.decode_resolutions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            pipeline_runs: self.pipeline_runs.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    /// Fetches resolved by a freshly decoded original, joined callers included
    pub decode_resolutions: u64,
    pub failures: u64,
    /// Decode pipeline runs; not part of [`total`](Self::total)
    pub pipeline_runs: u64,
}

impl StatsSnapshot {
    /// Total number of resolutions.
    pub fn total(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.decode_resolutions + self.failures
    }

    /// Fraction of resolutions served from either cache tier.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.memory_hits + self.disk_hits) as f64 / total as f64
    }
}
