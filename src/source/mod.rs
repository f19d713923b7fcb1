//! Image source abstraction.
//!
//! The engine never opens files itself. It asks an [`ImageSource`] for the raw
//! bytes of an original image, identified by an opaque [`ImageId`]. This keeps
//! the cache independent of where photos actually live (local disk, a media
//! provider, an object store).
//!
//! # Example
//!
//! ```ignore
//! use thumbnail_engine::source::{ImageId, ImageSource};
//!
//! struct MySource { /* ... */ }
//!
//! #[async_trait]
//! impl ImageSource for MySource {
//!     async fn read(&self, id: &ImageId) -> Result<Bytes, SourceError> {
//!         // Fetch the original bytes for `id`
//!     }
//! }
//! ```

mod fs;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::SourceError;

pub use fs::FsImageSource;

// =============================================================================
// ImageId
// =============================================================================

/// Opaque identifier of an original image.
///
/// Identifiers are typically URIs (`content://media/external/images/media/42`,
/// `file:///photos/a.jpg`) or plain filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(Arc<str>);

impl ImageId {
    /// Create an identifier from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// The identifier as given by the caller.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Seed used for cache key derivation.
    ///
    /// For URIs with a path, this is the non-empty path segments joined with
    /// `_`. Authority and query are ignored so that re-issued URIs for the same
    /// media item map to the same cache entries. Anything else is used as-is.
    pub fn stable_seed(&self) -> String {
        let Ok(url) = Url::parse(&self.0) else {
            return self.0.to_string();
        };

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        if segments.is_empty() {
            self.0.to_string()
        } else {
            segments.join("_")
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// ImageSource Trait
// =============================================================================

/// Provider of original image bytes.
///
/// Implementations must be cheap to call concurrently; the engine guarantees at
/// most one in-flight read per cache key, but reads for different keys run in
/// parallel.
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    /// Read the complete encoded bytes of the original image.
    async fn read(&self, id: &ImageId) -> Result<Bytes, SourceError>;
}

#[async_trait]
impl<T: ImageSource> ImageSource for Arc<T> {
    async fn read(&self, id: &ImageId) -> Result<Bytes, SourceError> {
        self.as_ref().read(id).await
    }
}
