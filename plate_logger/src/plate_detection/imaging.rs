use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageResult, RgbImage};

use super::BBox;

const JPEG_QUALITY: u8 = 90;

/// Largest factor `upscale` applies; larger requests are clamped.
pub const MAX_UPSCALE: u32 = 16;

/// Copies the part of `image` covered by `bbox`. `None` for empty crops.
pub fn crop(image: &RgbImage, bbox: &BBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.pixel_rect(image.width(), image.height())?;
    Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

/// Enlarges by an integer factor with bicubic interpolation. Returns a copy
/// when the enlarged size does not fit in `u32`.
pub fn upscale(image: &RgbImage, factor: u32) -> RgbImage {
    let factor = factor.min(MAX_UPSCALE);
    if factor <= 1 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let (Some(width), Some(height)) = (image.width().checked_mul(factor), image.height().checked_mul(factor)) else {
        return image.clone();
    };
    imageops::resize(image, width, height, FilterType::CatmullRom)
}

pub fn encode_jpeg(image: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    encoder.encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// JPEG bytes as standard base64 text, the form records are stored in.
pub fn encode_jpeg_base64(image: &RgbImage) -> ImageResult<String> {
    let jpeg = encode_jpeg(image)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}
