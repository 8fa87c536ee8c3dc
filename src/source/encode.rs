//! JPEG encoding of captured frames

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::types::ImagePayload;
use crate::{Result, StreamError};

/// JPEG quality in the 1-100 range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JpegQuality(u8);

impl JpegQuality {
    /// Same quality a browser canvas uses for `toDataURL('image/jpeg', 0.8)`
    pub const DEFAULT: JpegQuality = JpegQuality(80);

    /// Clamp into the valid range
    pub fn new(quality: u8) -> Self {
        Self(quality.clamp(1, 100))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for JpegQuality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Encode an RGB frame as a JPEG payload
pub fn encode_jpeg(frame: &RgbImage, quality: JpegQuality) -> Result<ImagePayload> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(StreamError::Encode {
            details: format!("cannot encode a {}x{} frame", width, height),
        });
    }

    // Rough starting size: a quarter of the raw buffer
    let mut buffer = Vec::with_capacity(frame.as_raw().len() / 4);
    JpegEncoder::new_with_quality(&mut buffer, quality.get()).write_image(
        frame.as_raw(),
        width,
        height,
        ExtendedColorType::Rgb8,
    )?;

    Ok(ImagePayload::jpeg(buffer))
}
