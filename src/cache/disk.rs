//! On-disk tier holding compressed thumbnails.
//!
//! One file per cache key, named `<key>.jpg`, inside a dedicated directory.
//! There is no index file: residency is discovered from the filesystem.
//!
//! # Size Budget
//!
//! The budget is enforced reactively. After each successful write the engine
//! calls [`DiskTier::trim_if_needed`], which sums the directory and deletes the
//! oldest-modified files until the total is back under budget. Between a write
//! and its trim the directory may exceed the budget by at most that one file.
//!
//! # Failure Policy
//!
//! The tier is not authoritative. Write, read and delete failures are logged and
//! treated as cache misses; they never propagate to callers.
//!
//! A write interrupted between creating its temporary file and the rename
//! leaves a `.tmp` file behind. Those do not count towards the budget and are
//! removed when the tier is opened and when it is cleared.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, warn};

use super::key::{CacheKey, THUMBNAIL_EXTENSION};
use crate::error::CacheError;

/// Extension of in-progress writes.
const TEMP_EXTENSION: &str = "tmp";

/// Result of a trim pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    /// Number of files removed
    pub files_deleted: usize,
    /// Bytes reclaimed
    pub bytes_freed: u64,
    /// Directory size before trimming
    pub size_before: u64,
    /// Directory size after trimming
    pub size_after: u64,
}

/// Snapshot of the tier's directory contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiskUsage {
    /// Number of thumbnail files
    pub files: usize,
    /// Total size of thumbnail files in bytes
    pub bytes: u64,
}

/// Bounded directory of compressed thumbnails.
pub struct DiskTier {
    dir: PathBuf,
    budget_bytes: u64,
    /// Sequence for temporary file names
    tmp_counter: AtomicU64,
}

impl DiskTier {
    /// Open (creating if needed) a tier rooted at `dir`.
    pub async fn new(dir: impl Into<PathBuf>, budget_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| CacheError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let tier = Self {
            dir,
            budget_bytes,
            tmp_counter: AtomicU64::new(0),
        };
        tier.remove_temp_files().await;
        Ok(tier)
    }

    /// Directory holding the thumbnails.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured budget in bytes.
    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Path of the file for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Whether a file for `key` exists.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Read the stored bytes for `key`.
    pub async fn read(&self, key: &CacheKey) -> Option<Bytes> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Some(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Store `data` for `key`, replacing any previous entry.
    ///
    /// The bytes are written to a temporary file and renamed into place, so
    /// concurrent readers see either the old entry, the new one, or nothing.
    /// Returns `false` if the entry could not be stored.
    pub async fn write(&self, key: &CacheKey, data: &[u8]) -> bool {
        match self.write_inner(key, data).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write disk cache entry");
                false
            }
        }
    }

    async fn write_inner(&self, key: &CacheKey, data: &[u8]) -> std::io::Result<()> {
        // The directory may have been removed externally since construction
        fs::create_dir_all(&self.dir).await?;

        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!(".{}.{}.{}", key, seq, TEMP_EXTENSION));

        if let Err(e) = fs::write(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, self.path_for(key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    /// Delete every thumbnail file. Individual failures are ignored.
    pub async fn evict_all(&self) {
        let files = self.list_entries().await;
        let count = files.len();
        for entry in files {
            if let Err(e) = fs::remove_file(&entry.path).await {
                if e.kind() != ErrorKind::NotFound {
                    debug!(path = %entry.path.display(), error = %e, "Failed to delete cache file");
                }
            }
        }
        let stale = self.remove_temp_files().await;
        info!(dir = %self.dir.display(), files = count, stale, "Cleared disk cache");
    }

    /// Delete temporary files left by interrupted writes.
    ///
    /// A write still in progress loses its temporary file and fails, which
    /// the tier treats like any other write failure.
    async fn remove_temp_files(&self) -> usize {
        let Ok(mut dir) = fs::read_dir(&self.dir).await else {
            return 0;
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != TEMP_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to delete temporary file")
                }
            }
        }

        if removed > 0 {
            debug!(dir = %self.dir.display(), removed, "Removed stale temporary files");
        }
        removed
    }

    /// Current file count and total size.
    pub async fn usage(&self) -> DiskUsage {
        let files = self.list_entries().await;
        DiskUsage {
            files: files.len(),
            bytes: files.iter().map(|f| f.size).sum(),
        }
    }

    /// Delete oldest-modified files until the directory fits the budget.
    ///
    /// Files that disappear mid-scan (another task deleted or replaced them)
    /// are skipped without error.
    pub async fn trim_if_needed(&self) -> TrimOutcome {
        let mut files = self.list_entries().await;
        let size_before: u64 = files.iter().map(|f| f.size).sum();

        if size_before <= self.budget_bytes {
            return TrimOutcome {
                size_before,
                size_after: size_before,
                ..Default::default()
            };
        }

        files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

        let mut remaining = size_before;
        let mut outcome = TrimOutcome {
            size_before,
            ..Default::default()
        };

        for entry in files {
            if remaining <= self.budget_bytes {
                break;
            }

            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    remaining = remaining.saturating_sub(entry.size);
                    outcome.files_deleted += 1;
                    outcome.bytes_freed += entry.size;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    // Already gone; it no longer counts against the budget
                    remaining = remaining.saturating_sub(entry.size);
                }
                Err(e) => {
                    debug!(
                        path = %entry.path.display(),
                        error = %e,
                        "Failed to delete cache file during trim"
                    );
                }
            }
        }

        outcome.size_after = remaining;
        info!(
            files_deleted = outcome.files_deleted,
            bytes_freed = outcome.bytes_freed,
            size_before = outcome.size_before,
            size_after = outcome.size_after,
            budget_bytes = self.budget_bytes,
            "Trimmed disk cache"
        );
        outcome
    }

    /// List thumbnail files with size and modification time.
    async fn list_entries(&self) -> Vec<DiskEntry> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "Failed to list disk cache");
                }
                return entries;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Error while listing disk cache");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != THUMBNAIL_EXTENSION) {
                continue;
            }

            // Metadata may fail if the file was removed after listing
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }

            entries.push(DiskEntry {
                path,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        entries
    }
}

struct DiskEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}
