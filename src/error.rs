use thiserror::Error;

/// Errors raised while reading an original image from its source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The identifier does not resolve to an existing image
    #[error("Image not found: {0}")]
    NotFound(String),

    /// The image exists but could not be read
    #[error("I/O error reading {id}: {message}")]
    Io { id: String, message: String },
}

/// Errors raised by the decode pipeline and the thumbnail encoder.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The original image could not be read
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Pixel data or header could not be decoded
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// Thumbnail could not be encoded for the disk tier
    #[error("Failed to encode thumbnail: {message}")]
    Encode { message: String },

    /// The source reports zero width or height
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// Errors from the on-disk cache tier.
///
/// Only directory setup surfaces this error; per-entry failures are absorbed
/// by the tier and treated as cache misses.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Filesystem error on the cache directory
    #[error("Cache I/O error at {path}: {message}")]
    Io { path: String, message: String },
}

/// Errors that prevent an engine from being constructed.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cache directory could not be prepared
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}
