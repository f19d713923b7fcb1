//! Image decoding.
//!
//! - [`DecodePipeline`]: original bytes to a downsampled, upright thumbnail
//! - [`Orientation`]: EXIF orientation codes and their pixel transforms
//! - [`ThumbnailEncoder`]: JPEG encode/decode for disk tier entries

mod encoder;
mod orientation;
mod pipeline;

pub use encoder::{
    clamp_quality, is_valid_quality, ThumbnailEncoder, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use orientation::Orientation;
pub use pipeline::{
    sample_factor, scale_to_fit, DecodePipeline, MAX_DECODE_ALLOC, MAX_SOURCE_DIMENSION,
};
