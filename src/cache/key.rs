use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::source::ImageId;

/// File extension used for disk tier entries.
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Cache key addressing one thumbnail in both tiers.
///
/// A lower-case hex SHA-256 digest of the identifier's stable seed and the
/// requested size. Identical inputs always produce identical keys, and
/// different sizes of the same image never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Derive the key for `id` at `size` pixels.
    pub fn derive(id: &ImageId, size: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.stable_seed().as_bytes());
        hasher.update(b"_");
        hasher.update(size.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()).into())
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the disk tier file holding this entry.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, THUMBNAIL_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
