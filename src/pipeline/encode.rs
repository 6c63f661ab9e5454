//! Image encoding: `DynamicImage` → size-bounded JPEG → base64 `ImageData`.
//!
//! ## Why JPEG here?
//!
//! Vision APIs cap each image at a few megabytes. A plan sheet rendered at
//! 200 DPI is tens of megapixels; as PNG it blows that budget on the first
//! page. JPEG at quality 90–95 keeps small print legible while fitting the
//! cap, and tiling keeps each crop small enough that quality rarely has to
//! drop below 95.
//!
//! ## Why a quality floor of 90?
//!
//! Below ~90 ringing artefacts appear around thin line work and dimension
//! text. When even the floor does not fit, the caller gets the floor
//! encoding flagged `within_budget = false` and decides what to do with it.

use crate::error::TakeoffError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use tracing::{debug, warn};

/// First JPEG quality tried.
pub const JPEG_START_QUALITY: u8 = 95;

/// Lowest JPEG quality the encoder steps down to.
pub const JPEG_MIN_QUALITY: u8 = 90;

/// A JPEG encoding together with the quality it was produced at.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// False when even [`JPEG_MIN_QUALITY`] exceeded the budget.
    pub within_budget: bool,
}

impl EncodedImage {
    /// Wrap as base64 `ImageData` for a multimodal request.
    pub fn to_image_data(&self) -> ImageData {
        jpeg_image_data(&self.bytes)
    }
}

/// Base64-wrap JPEG bytes for a multimodal request.
///
/// `detail: "high"` keeps OpenAI-style providers from downsampling to a
/// single 512 px overview, which would erase dimension text.
pub fn jpeg_image_data(jpeg: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(jpeg);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/jpeg").with_detail("high")
}

/// Encode `img` as JPEG at exactly `quality`.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, TakeoffError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| TakeoffError::ImageEncoding(e.to_string()))?;
    Ok(buf)
}

/// Encode `img` as JPEG no larger than `max_bytes`, stepping quality down
/// from [`JPEG_START_QUALITY`] to [`JPEG_MIN_QUALITY`] one point at a time.
pub fn encode_within_budget(
    img: &DynamicImage,
    max_bytes: usize,
) -> Result<EncodedImage, TakeoffError> {
    let mut quality = JPEG_START_QUALITY;
    loop {
        let bytes = encode_jpeg(img, quality)?;
        let fits = bytes.len() <= max_bytes;
        if fits || quality <= JPEG_MIN_QUALITY {
            if !fits {
                warn!(
                    "Image {}x{} is {:.2} MB at quality {}, over the {:.2} MB budget",
                    img.width(),
                    img.height(),
                    bytes.len() as f64 / (1024.0 * 1024.0),
                    quality,
                    max_bytes as f64 / (1024.0 * 1024.0),
                );
            }
            return Ok(EncodedImage {
                bytes,
                quality,
                width: img.width(),
                height: img.height(),
                within_budget: fits,
            });
        }
        quality -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy(w: u32, h: u32) -> DynamicImage {
        // Deterministic high-frequency content so JPEG cannot compress it away.
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 7919 + y * 104_729) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), v.wrapping_mul(7)])
        }))
    }

    #[test]
    fn small_image_fits_at_start_quality() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([255, 255, 255])));
        let enc = encode_within_budget(&img, 1024 * 1024).unwrap();
        assert!(enc.within_budget);
        assert_eq!(enc.quality, JPEG_START_QUALITY);
        assert_eq!(&enc.bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
    }

    #[test]
    fn impossible_budget_returns_floor_encoding() {
        let enc = encode_within_budget(&noisy(64, 64), 10).unwrap();
        assert!(!enc.within_budget);
        assert_eq!(enc.quality, JPEG_MIN_QUALITY);
        assert!(!enc.bytes.is_empty());
    }

    #[test]
    fn image_data_is_base64_jpeg() {
        let enc = encode_within_budget(&noisy(8, 8), 1024 * 1024).unwrap();
        let data = enc.to_image_data();
        assert_eq!(data.mime_type, "image/jpeg");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, enc.bytes);
    }
}
