//! Image codec primitives
//!
//! Thin wrappers over `image` used by the capture pipeline, the motion
//! detector and the video writer.

use crate::camera::Frame;
use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GrayImage, ImageFormat, RgbImage};

/// Default JPEG quality for notifications and video pipes
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Decode a complete JPEG image
pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    Ok(image.into_rgb8())
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode_image(frame.image.as_ref())?;
    Ok(out)
}

/// Resize to exactly `width` x `height`
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// Resize then convert to 8-bit luma
pub fn resize_gray(image: &RgbImage, width: u32, height: u32) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    if gray.width() == width && gray.height() == height {
        return gray;
    }
    image::imageops::resize(&gray, width, height, FilterType::Triangle)
}
