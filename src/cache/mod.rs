//! Cache tiers.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          MemoryTier          │  decoded images, LRU by pixel KB
//! └──────────────┬───────────────┘
//!                │ miss
//!                ▼
//! ┌──────────────────────────────┐
//! │           DiskTier           │  JPEG files, oldest-modified evicted
//! └──────────────────────────────┘
//! ```
//!
//! Both tiers are addressed by the same [`CacheKey`].

mod disk;
mod key;
mod memory;

pub use disk::{DiskTier, DiskUsage, TrimOutcome};
pub use key::{CacheKey, THUMBNAIL_EXTENSION};
pub use memory::{cost_kb, MemoryTier};
