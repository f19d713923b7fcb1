//! EXIF orientation handling.
//!
//! | Code | Orientation      | Transform                    |
//! |------|------------------|------------------------------|
//! | 1    | normal           | identity                     |
//! | 2    | flip-horizontal  | mirror X                     |
//! | 3    | rotate-180       | rotate 180°                  |
//! | 4    | flip-vertical    | rotate 180°, then mirror X   |
//! | 5    | transpose        | rotate 90°, then mirror X    |
//! | 6    | rotate-90        | rotate 90°                   |
//! | 7    | transverse       | rotate −90°, then mirror X   |
//! | 8    | rotate-270       | rotate 270°                  |
//!
//! Rotations are clockwise in image coordinates (y pointing down).

use std::io::Cursor;

use image::DynamicImage;
use tracing::trace;

/// Orientation tag of an original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Code 1, or tag absent/unknown
    #[default]
    Normal,
    /// Code 2
    FlipHorizontal,
    /// Code 3
    Rotate180,
    /// Code 4
    FlipVertical,
    /// Code 5
    Transpose,
    /// Code 6
    Rotate90,
    /// Code 7
    Transverse,
    /// Code 8
    Rotate270,
}

impl Orientation {
    /// Map an EXIF orientation code. Unknown codes are treated as normal.
    pub fn from_exif(code: u32) -> Self {
        match code {
            2 => Self::FlipHorizontal,
            3 => Self::Rotate180,
            4 => Self::FlipVertical,
            5 => Self::Transpose,
            6 => Self::Rotate90,
            7 => Self::Transverse,
            8 => Self::Rotate270,
            _ => Self::Normal,
        }
    }

    /// Read the orientation tag from an encoded image.
    ///
    /// Missing or unreadable metadata yields [`Orientation::Normal`].
    pub fn read_from(encoded: &[u8]) -> Self {
        let mut cursor = Cursor::new(encoded);
        let exif = match exif::Reader::new().read_from_container(&mut cursor) {
            Ok(exif) => exif,
            Err(e) => {
                trace!(error = %e, "No readable EXIF metadata");
                return Self::Normal;
            }
        };

        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .map(Self::from_exif)
            .unwrap_or_default()
    }

    /// Whether applying this orientation swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Rotate90 | Self::Transverse | Self::Rotate270
        )
    }

    /// Transform `image` so it displays upright. Consumes the input.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => image,
            Self::FlipHorizontal => image.fliph(),
            Self::Rotate180 => image.rotate180(),
            Self::FlipVertical => image.rotate180().fliph(),
            Self::Transpose => image.rotate90().fliph(),
            Self::Rotate90 => image.rotate90(),
            Self::Transverse => image.rotate270().fliph(),
            Self::Rotate270 => image.rotate270(),
        }
    }
}
