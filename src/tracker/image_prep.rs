//! Receipt image normalization.
//!
//! Gemini is only given JPEG. Whatever Telegram hands us (PNG screenshots
//! with transparency, palette GIFs, WebP) is decoded, flattened to opaque
//! RGB and re-encoded.

use std::fmt;
use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat};
use tracing::debug;

pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug)]
pub enum ImageError {
    Decode(image::ImageError),
    Encode(image::ImageError),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "failed to decode image: {e}"),
            Self::Encode(e) => write!(f, "failed to encode JPEG: {e}"),
        }
    }
}

impl std::error::Error for ImageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) | Self::Encode(e) => Some(e),
        }
    }
}

/// Decode `raw` and re-encode it as JPEG at [`JPEG_QUALITY`].
///
/// 8-bit grayscale stays grayscale; every other mode, alpha or palette
/// included, becomes RGB with the alpha channel dropped.
pub fn normalize_to_jpeg(raw: &[u8]) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory(raw).map_err(ImageError::Decode)?;
    debug!("Decoded image {:?} {}x{}", decoded.color(), decoded.width(), decoded.height());

    let flattened = match decoded {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => decoded,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };

    let mut out = Vec::new();
    flattened
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(ImageError::Encode)?;
    Ok(out)
}
