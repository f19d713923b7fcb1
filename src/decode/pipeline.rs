//! Decode pipeline: original bytes in, upright thumbnail out.
//!
//! # Stages
//!
//! ```text
//! orientation tag ─┐
//! header bounds ───┼─► sample factor ─► scaled decode ─► scale to fit ─► orient
//! ```
//!
//! Each stage takes its input image by value and returns a new one, so the
//! previous raster is released as soon as the next exists.
//!
//! # Scaled Decode
//!
//! JPEG originals are decoded with DCT scaling (down to 1/8), so the full
//! resolution raster is never built; any remaining factor is applied by
//! subsampling the already reduced image. JPEG data must carry an end-of-image
//! marker after its last scan: truncated files are rejected instead of being
//! returned with missing rows. Other formats are decoded in full under the
//! allocation limit and then subsampled.
//!
//! # Sample Factor
//!
//! A power of two chosen so the decoded raster is not needlessly larger than
//! the thumbnail: starting at 1, the factor doubles while both half-dimensions
//! divided by it still reach the requested size.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, ImageReader, Limits, Luma, RgbImage};
use jpeg_decoder::{CodingProcess, PixelFormat};
use tracing::trace;

use super::orientation::Orientation;
use crate::error::DecodeError;

/// Largest accepted width or height of an original image.
pub const MAX_SOURCE_DIMENSION: u32 = 65_535;

/// Upper bound on decoder allocations for a single image (512 MiB).
pub const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Power-of-two downsample factor for decoding `width`x`height` towards `requested`.
pub fn sample_factor(width: u32, height: u32, requested: u32) -> u32 {
    let requested = requested.max(1);
    let half_width = width / 2;
    let half_height = height / 2;

    let mut factor = 1u32;
    while half_width / factor >= requested && half_height / factor >= requested {
        factor *= 2;
    }
    factor
}

/// Resize so the longest side is at most `requested`, preserving aspect ratio.
///
/// Never upscales.
pub fn scale_to_fit(image: DynamicImage, requested: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let max_dim = width.max(height);
    if max_dim == 0 {
        return image;
    }

    let scale = requested as f32 / max_dim as f32;
    if scale >= 1.0 {
        return image;
    }

    let target_width = ((width as f32 * scale) as u32).max(1);
    let target_height = ((height as f32 * scale) as u32).max(1);
    image.resize_exact(target_width, target_height, FilterType::Triangle)
}

/// Turns original image bytes into oriented, downsampled thumbnails.
///
/// Stateless and `Copy`, so it can be moved into blocking tasks freely.
#[derive(Debug, Clone, Copy)]
pub struct DecodePipeline {
    max_dimension: u32,
    max_alloc: u64,
}

impl Default for DecodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodePipeline {
    /// Pipeline with the default decoder limits.
    pub fn new() -> Self {
        Self {
            max_dimension: MAX_SOURCE_DIMENSION,
            max_alloc: MAX_DECODE_ALLOC,
        }
    }

    /// Pipeline with custom decoder limits.
    pub fn with_limits(max_dimension: u32, max_alloc: u64) -> Self {
        Self {
            max_dimension,
            max_alloc,
        }
    }

    /// Produce a thumbnail whose longest side is at most `requested` pixels.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a decodable image, are truncated,
    /// or exceed the decoder limits. Orientation metadata problems are not
    /// errors.
    pub fn decode(&self, encoded: &[u8], requested: u32) -> Result<DynamicImage, DecodeError> {
        let requested = requested.max(1);
        let orientation = Orientation::read_from(encoded);

        let (width, height) = self.dimensions(encoded)?;
        if width == 0 || height == 0 {
            return Err(DecodeError::EmptyImage { width, height });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(DecodeError::Decode {
                message: format!(
                    "{}x{} exceeds the {} pixel dimension limit",
                    width, height, self.max_dimension
                ),
            });
        }

        let factor = sample_factor(width, height, requested);
        trace!(width, height, requested, factor, ?orientation, "Decoding thumbnail");

        let target = ((width / factor).max(1), (height / factor).max(1));
        let decoded = match image::guess_format(encoded) {
            Ok(ImageFormat::Jpeg) => self.decode_jpeg_scaled(encoded, target)?,
            _ => self.decode_full(encoded)?,
        };

        let sampled = if decoded.width() > target.0 || decoded.height() > target.1 {
            decoded.resize_exact(target.0, target.1, FilterType::Nearest)
        } else {
            decoded
        };

        let scaled = scale_to_fit(sampled, requested);
        Ok(orientation.apply(scaled))
    }

    /// Read native dimensions from the header without decoding pixels.
    pub fn dimensions(&self, encoded: &[u8]) -> Result<(u32, u32), DecodeError> {
        let reader = ImageReader::new(Cursor::new(encoded))
            .with_guessed_format()
            .map_err(|e| DecodeError::Decode {
                message: e.to_string(),
            })?;

        reader.into_dimensions().map_err(|e| DecodeError::Decode {
            message: e.to_string(),
        })
    }

    /// Decode a JPEG at the smallest DCT scale that still covers `target`.
    fn decode_jpeg_scaled(
        &self,
        encoded: &[u8],
        target: (u32, u32),
    ) -> Result<DynamicImage, DecodeError> {
        if !has_complete_scan(encoded) {
            return Err(DecodeError::Decode {
                message: "JPEG data ends before the end-of-image marker".to_string(),
            });
        }

        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(encoded));
        decoder.read_info().map_err(jpeg_error)?;
        // Native frame size; `info` reports the scaled size once `scale` ran
        let info = decoder.info().ok_or_else(|| DecodeError::Decode {
            message: "missing JPEG frame header".to_string(),
        })?;

        let requested_width = u16::try_from(target.0).unwrap_or(u16::MAX);
        let requested_height = u16::try_from(target.1).unwrap_or(u16::MAX);
        let (width, height) = decoder
            .scale(requested_width, requested_height)
            .map_err(jpeg_error)?;

        let needed = jpeg_decode_bytes(&info, u64::from(width), u64::from(height));
        if needed > self.max_alloc {
            return Err(DecodeError::Decode {
                message: format!("decoding needs {} bytes, limit is {}", needed, self.max_alloc),
            });
        }

        let pixels = decoder.decode().map_err(jpeg_error)?;
        jpeg_raster(info.pixel_format, u32::from(width), u32::from(height), pixels)
    }

    /// Decode every pixel under the configured limits.
    fn decode_full(&self, encoded: &[u8]) -> Result<DynamicImage, DecodeError> {
        let mut reader = ImageReader::new(Cursor::new(encoded))
            .with_guessed_format()
            .map_err(|e| DecodeError::Decode {
                message: e.to_string(),
            })?;
        reader.limits(self.limits());

        reader.decode().map_err(|e| DecodeError::Decode {
            message: e.to_string(),
        })
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Whether the last start-of-scan marker is followed by an end-of-image marker.
///
/// Entropy-coded data escapes every `0xFF` byte, so neither marker can appear
/// inside a scan.
fn has_complete_scan(encoded: &[u8]) -> bool {
    let last_marker = |code: u8| encoded.windows(2).rposition(|w| w[0] == 0xFF && w[1] == code);
    match (last_marker(0xDA), last_marker(0xD9)) {
        (Some(scan), Some(end)) => end > scan,
        _ => false,
    }
}

/// Bytes the decoder allocates for a `width`x`height` output.
///
/// Progressive images also keep full-resolution coefficients for every
/// component until the last scan.
fn jpeg_decode_bytes(info: &jpeg_decoder::ImageInfo, width: u64, height: u64) -> u64 {
    let output = width * height * info.pixel_format.pixel_bytes() as u64;
    match info.coding_process {
        CodingProcess::DctProgressive => {
            let components = info.pixel_format.pixel_bytes() as u64;
            output + u64::from(info.width) * u64::from(info.height) * components * 2
        }
        _ => output,
    }
}

fn jpeg_raster(
    format: PixelFormat,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
) -> Result<DynamicImage, DecodeError> {
    let image = match format {
        PixelFormat::L8 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        PixelFormat::L16 => {
            let samples = pixels
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, samples)
                .map(DynamicImage::ImageLuma16)
        }
        PixelFormat::RGB24 => {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        PixelFormat::CMYK32 => {
            RgbImage::from_raw(width, height, cmyk_to_rgb(&pixels)).map(DynamicImage::ImageRgb8)
        }
    };

    image.ok_or_else(|| DecodeError::Decode {
        message: format!("decoded JPEG buffer does not match {}x{}", width, height),
    })
}

/// Convert inverted CMYK samples, as stored by Adobe encoders, to RGB.
fn cmyk_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() / 4 * 3);
    for pixel in input.chunks_exact(4) {
        let k = 255 - u16::from(pixel[3]);
        for channel in &pixel[..3] {
            output.push(((255 - u16::from(*channel)) * k / 255) as u8);
        }
    }
    output
}

fn jpeg_error(e: jpeg_decoder::Error) -> DecodeError {
    DecodeError::Decode {
        message: e.to_string(),
    }
}
