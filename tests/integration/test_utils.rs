//! Test utilities for integration tests.
//!
//! Provides an in-memory image source that records how it is used, and
//! helpers for generating JPEG originals, optionally carrying an EXIF
//! orientation tag.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use thumbnail_engine::error::SourceError;
use thumbnail_engine::source::{ImageId, ImageSource};
use thumbnail_engine::{EngineConfig, ThumbnailEngine};

// =============================================================================
// Mock Image Source with Request Tracking
// =============================================================================

/// In-memory image source that counts reads and can be slowed down or broken.
#[derive(Default)]
pub struct MockImageSource {
    images: HashMap<String, Bytes>,
    delay: Duration,
    failing: AtomicBool,
    reads: AtomicUsize,
    reads_by_id: Mutex<HashMap<String, usize>>,
    active_reads: AtomicUsize,
    max_active_reads: AtomicUsize,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image under `id`.
    pub fn with_image(mut self, id: &str, data: Vec<u8>) -> Self {
        self.images.insert(id.to_string(), Bytes::from(data));
        self
    }

    /// Add `count` distinct JPEG images named `img-000.jpg`, `img-001.jpg`, ...
    pub fn with_images(mut self, count: usize, width: u32, height: u32) -> Self {
        for i in 0..count {
            let data = create_test_jpeg(width, height, (i % 256) as u8, None);
            self.images.insert(image_name(i), Bytes::from(data));
        }
        self
    }

    /// Hold every read for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every read fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reads_of(&self, id: &str) -> usize {
        self.reads_by_id.lock().get(id).copied().unwrap_or(0)
    }

    /// Highest number of reads that were running at the same time.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_active_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn read(&self, id: &ImageId) -> Result<Bytes, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.reads_by_id.lock().entry(id.to_string()).or_insert(0) += 1;

        let active = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_reads.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.failing.load(Ordering::SeqCst) {
            Err(SourceError::Io {
                id: id.to_string(),
                message: "simulated failure".to_string(),
            })
        } else {
            self.images
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| SourceError::NotFound(id.to_string()))
        };

        self.active_reads.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Name of the `index`-th image added by [`MockImageSource::with_images`].
pub fn image_name(index: usize) -> String {
    format!("img-{:03}.jpg", index)
}

/// Identifiers for the first `count` images added by `with_images`.
pub fn image_ids(count: usize) -> Vec<ImageId> {
    (0..count).map(|i| ImageId::new(image_name(i))).collect()
}

// =============================================================================
// Engine Setup
// =============================================================================

/// Config with generous budgets and a cache directory inside `dir`.
pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        memory_budget_bytes: 32 * 1024 * 1024,
        disk_budget_bytes: 32 * 1024 * 1024,
        default_thumbnail_size: 128,
        disk_compression_quality: 85,
        max_concurrent_prefetch: 4,
        cache_directory: dir.path().join("thumbs"),
        decode_timeout: None,
    }
}

pub async fn create_engine(
    config: EngineConfig,
    source: MockImageSource,
) -> (ThumbnailEngine<Arc<MockImageSource>>, Arc<MockImageSource>) {
    let source = Arc::new(source);
    let engine = ThumbnailEngine::new(config, Arc::clone(&source))
        .await
        .expect("engine should start");
    (engine, source)
}

/// Poll until no prefetch is running, failing the test after `timeout`.
pub async fn wait_for_prefetch_idle<S: ImageSource>(
    engine: &ThumbnailEngine<S>,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    while engine.active_prefetch() > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "prefetches still running after {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Image Builders
// =============================================================================

/// Create a JPEG whose red channel follows x, green follows y and blue is `tint`.
///
/// With `orientation`, an EXIF APP1 segment carrying that orientation code is
/// inserted right after the SOI marker.
pub fn create_test_jpeg(width: u32, height: u32, tint: u8, orientation: Option<u16>) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, tint])
    });

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    encoder.encode_image(&img).unwrap();

    match orientation {
        Some(code) => insert_orientation(buf, code),
        None => buf,
    }
}

fn insert_orientation(jpeg: Vec<u8>, code: u16) -> Vec<u8> {
    // Big-endian TIFF with one IFD entry: Orientation (0x0112), SHORT, count 1
    let mut tiff = vec![
        0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08, // header, IFD at 8
        0x00, 0x01, // one entry
        0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01,
    ];
    tiff.extend_from_slice(&code.to_be_bytes());
    tiff.extend_from_slice(&[0x00, 0x00]);
    tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // no next IFD

    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Check if data starts with JPEG SOI marker.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// Set a file's modification time to `secs` after the epoch.
pub fn set_mtime(path: &Path, secs: u64) {
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

/// Total size of `*.jpg` files in `dir`.
pub fn jpg_bytes_in(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "jpg"))
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
