//! JPEG encoding of thumbnails for the disk tier.
//!
//! Thumbnails are stored already scaled and oriented, so reading one back is a
//! plain decode with no metadata handling.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::DecodeError;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Encoder/decoder for disk tier entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThumbnailEncoder {}

impl ThumbnailEncoder {
    /// Create a new thumbnail encoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Encode a thumbnail as JPEG at `quality` (clamped to 1-100).
    ///
    /// Images with an alpha channel or more than 8 bits per channel are
    /// converted to 8-bit RGB first; grayscale is kept as-is.
    pub fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Bytes, DecodeError> {
        let quality = clamp_quality(quality);

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);

        let result = match image {
            DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
            DynamicImage::ImageRgb8(rgb) => encoder.encode_image(rgb),
            other => encoder.encode_image(&other.to_rgb8()),
        };

        result.map_err(|e| DecodeError::Encode {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output))
    }

    /// Decode a stored thumbnail.
    pub fn decode(&self, data: &[u8]) -> Result<DynamicImage, DecodeError> {
        let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg);
        reader.decode().map_err(|e| DecodeError::Decode {
            message: e.to_string(),
        })
    }
}

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
