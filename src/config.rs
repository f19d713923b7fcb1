//! Configuration for the thumbnail engine.
//!
//! The engine takes an explicit [`EngineConfig`] at construction; nothing is
//! read from global state. Two presets are provided:
//!
//! | Setting                    | `default()` (release) | `development()` |
//! |----------------------------|-----------------------|-----------------|
//! | memory budget              | total RAM / 16        | total RAM / 4   |
//! | disk budget                | 300 MiB               | 150 MiB         |
//! | disk JPEG quality          | 88                    | 80              |
//! | max concurrent prefetches  | 40                    | 60              |
//! | default thumbnail size     | 256                   | 256             |
//!
//! The binary exposes every setting as a flag and a `THUMB_*` environment
//! variable:
//!
//! - `THUMB_CACHE_DIR` - Disk tier directory
//! - `THUMB_MEMORY_BUDGET` - Memory tier budget in bytes
//! - `THUMB_DISK_BUDGET` - Disk tier budget in bytes
//! - `THUMB_SIZE` - Default thumbnail size in pixels
//! - `THUMB_QUALITY` - Disk JPEG quality (1-100)
//! - `THUMB_MAX_PREFETCH` - Max concurrent prefetches
//! - `THUMB_DECODE_TIMEOUT_MS` - Per-load timeout in milliseconds
//! - `THUMB_PROFILE` - `release` or `development`

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::decode::is_valid_quality;

// =============================================================================
// Default Values
// =============================================================================

/// Default requested thumbnail size in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Release disk budget (300 MiB).
pub const RELEASE_DISK_BUDGET: u64 = 300 * 1024 * 1024;

/// Development disk budget (150 MiB).
pub const DEVELOPMENT_DISK_BUDGET: u64 = 150 * 1024 * 1024;

/// Release disk JPEG quality.
pub const RELEASE_QUALITY: u8 = 88;

/// Development disk JPEG quality.
pub const DEVELOPMENT_QUALITY: u8 = 80;

/// Release prefetch cap.
pub const RELEASE_MAX_PREFETCH: usize = 40;

/// Development prefetch cap.
pub const DEVELOPMENT_MAX_PREFETCH: usize = 60;

/// Release share of total memory given to the memory tier (1/16).
pub const RELEASE_MEMORY_DIVISOR: usize = 16;

/// Development share of total memory given to the memory tier (1/4).
pub const DEVELOPMENT_MEMORY_DIVISOR: usize = 4;

/// Default disk tier directory name, under the system temp directory.
pub const DEFAULT_CACHE_DIR_NAME: &str = "thumbnail-cache";

// =============================================================================
// EngineConfig
// =============================================================================

/// Construction-time settings, fixed for the engine's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Memory tier budget in bytes of decoded pixels
    pub memory_budget_bytes: usize,

    /// Disk tier budget in bytes of stored thumbnails
    pub disk_budget_bytes: u64,

    /// Size used when callers do not request one
    pub default_thumbnail_size: u32,

    /// JPEG quality for disk tier entries (1-100)
    pub disk_compression_quality: u8,

    /// Cap on simultaneously active prefetches
    pub max_concurrent_prefetch: usize,

    /// Directory holding disk tier files
    pub cache_directory: PathBuf,

    /// Upper bound on a single load; `None` waits indefinitely
    pub decode_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Release)
    }
}

impl EngineConfig {
    /// Preset for development builds: lower quality, smaller disk budget, more
    /// memory and more concurrent prefetches.
    pub fn development() -> Self {
        Self::for_profile(Profile::Development)
    }

    /// Preset for `profile`.
    pub fn for_profile(profile: Profile) -> Self {
        let total_memory = detect_total_memory();
        match profile {
            Profile::Release => Self {
                memory_budget_bytes: total_memory / RELEASE_MEMORY_DIVISOR,
                disk_budget_bytes: RELEASE_DISK_BUDGET,
                default_thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
                disk_compression_quality: RELEASE_QUALITY,
                max_concurrent_prefetch: RELEASE_MAX_PREFETCH,
                cache_directory: default_cache_directory(),
                decode_timeout: None,
            },
            Profile::Development => Self {
                memory_budget_bytes: total_memory / DEVELOPMENT_MEMORY_DIVISOR,
                disk_budget_bytes: DEVELOPMENT_DISK_BUDGET,
                default_thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
                disk_compression_quality: DEVELOPMENT_QUALITY,
                max_concurrent_prefetch: DEVELOPMENT_MAX_PREFETCH,
                cache_directory: default_cache_directory(),
                decode_timeout: None,
            },
        }
    }

    /// Use `dir` for the disk tier.
    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_budget_bytes == 0 {
            return Err("memory_budget_bytes must be greater than 0".to_string());
        }
        if self.disk_budget_bytes == 0 {
            return Err("disk_budget_bytes must be greater than 0".to_string());
        }
        if self.default_thumbnail_size == 0 {
            return Err("default_thumbnail_size must be greater than 0".to_string());
        }
        if !is_valid_quality(self.disk_compression_quality) {
            return Err("disk_compression_quality must be between 1 and 100".to_string());
        }
        if self.cache_directory.as_os_str().is_empty() {
            return Err("cache_directory must not be empty".to_string());
        }
        if self.decode_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err("decode_timeout must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}

fn default_cache_directory() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

/// Detect total system memory in bytes.
///
/// Parses `/proc/meminfo` on Linux; elsewhere, or if parsing fails, assumes 8 GiB.
#[cfg(target_os = "linux")]
pub fn detect_total_memory() -> usize {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| parse_meminfo_total(&content))
        .unwrap_or_else(fallback_memory)
}

#[cfg(not(target_os = "linux"))]
pub fn detect_total_memory() -> usize {
    fallback_memory()
}

/// Extract `MemTotal` in bytes from `/proc/meminfo` content.
fn parse_meminfo_total(content: &str) -> Option<usize> {
    // Format: "MemTotal:       16384000 kB"
    let line = content.lines().find(|line| line.starts_with("MemTotal:"))?;
    let kb: usize = line.split_whitespace().nth(1)?.parse().ok()?;
    kb.checked_mul(1024)
}

fn fallback_memory() -> usize {
    // 8 GiB, saturating on 32-bit targets
    usize::try_from(8u64 * 1024 * 1024 * 1024).unwrap_or(usize::MAX)
}

// =============================================================================
// CLI
// =============================================================================

/// Configuration preset selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Profile {
    /// Tuned for shipping builds
    #[default]
    Release,
    /// Larger memory share, smaller disk budget
    Development,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON object
    Json,
}

/// Thumbnail Engine - two-tier thumbnail cache.
///
/// Generates oriented, downsampled thumbnails and caches them in memory and
/// on disk.
#[derive(Parser, Debug, Clone)]
#[command(name = "thumbnail-engine")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate thumbnails for every image in a directory, walking it as a grid
    Warm(WarmConfig),

    /// Fetch one thumbnail and write it as JPEG
    Fetch(FetchConfig),

    /// Show disk cache usage
    Stats(StatsConfig),

    /// Delete every thumbnail from the disk cache
    Clear(ClearConfig),
}

/// Settings shared by every command.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Disk cache directory.
    #[arg(long, env = "THUMB_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Memory tier budget in bytes (defaults to a share of total RAM).
    #[arg(long, env = "THUMB_MEMORY_BUDGET")]
    pub memory_budget: Option<usize>,

    /// Disk tier budget in bytes.
    #[arg(long, env = "THUMB_DISK_BUDGET")]
    pub disk_budget: Option<u64>,

    /// Default thumbnail size in pixels.
    #[arg(long, env = "THUMB_SIZE")]
    pub size: Option<u32>,

    /// JPEG quality for disk entries (1-100).
    #[arg(long, env = "THUMB_QUALITY")]
    pub quality: Option<u8>,

    /// Maximum number of concurrent prefetches.
    #[arg(long, env = "THUMB_MAX_PREFETCH")]
    pub max_prefetch: Option<usize>,

    /// Abandon a single load after this many milliseconds.
    #[arg(long, env = "THUMB_DECODE_TIMEOUT_MS")]
    pub decode_timeout_ms: Option<u64>,

    /// Preset used for unspecified settings.
    #[arg(long, value_enum, default_value_t = Profile::Release, env = "THUMB_PROFILE")]
    pub profile: Profile,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl EngineArgs {
    /// Build an [`EngineConfig`] from the profile preset and any overrides.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_profile(self.profile);

        if let Some(ref dir) = self.cache_dir {
            config.cache_directory = dir.clone();
        }
        if let Some(budget) = self.memory_budget {
            config.memory_budget_bytes = budget;
        }
        if let Some(budget) = self.disk_budget {
            config.disk_budget_bytes = budget;
        }
        if let Some(size) = self.size {
            config.default_thumbnail_size = size;
        }
        if let Some(quality) = self.quality {
            config.disk_compression_quality = quality;
        }
        if let Some(cap) = self.max_prefetch {
            config.max_concurrent_prefetch = cap;
        }
        if let Some(ms) = self.decode_timeout_ms {
            config.decode_timeout = Some(Duration::from_millis(ms));
        }

        config
    }
}

/// Arguments for `warm`.
#[derive(Args, Debug, Clone)]
pub struct WarmConfig {
    /// Directory of original images.
    pub dir: PathBuf,

    /// Grid width used to pick the prefetch target below each item.
    #[arg(long, default_value_t = 4)]
    pub columns: usize,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Arguments for `fetch`.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    /// Image identifier (path or file:// URI).
    pub id: String,

    /// Where to write the thumbnail.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Output format for the result summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Arguments for `stats`.
#[derive(Args, Debug, Clone)]
pub struct StatsConfig {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Arguments for `clear`.
#[derive(Args, Debug, Clone)]
pub struct ClearConfig {
    #[command(flatten)]
    pub engine: EngineArgs,
}

impl Command {
    /// Shared engine arguments of the selected command.
    pub fn engine_args(&self) -> &EngineArgs {
        match self {
            Command::Warm(c) => &c.engine,
            Command::Fetch(c) => &c.engine,
            Command::Stats(c) => &c.engine,
            Command::Clear(c) => &c.engine,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
