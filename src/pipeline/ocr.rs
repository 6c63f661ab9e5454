//! Optical character recognition through libtesseract.
//!
//! The OCR strategy only needs "image in, text out", so the engine sits
//! behind [`OcrEngine`]. [`Tesseract`] links libtesseract via `leptess` when
//! the crate is built with the `tesseract` feature; without it the engine
//! reports itself unavailable and the OCR strategy drops out of the chain.

use crate::error::TakeoffError;
use image::DynamicImage;
#[cfg(feature = "tesseract")]
use tracing::debug;

/// Recognises text in a rendered page.
pub trait OcrEngine: Send + Sync {
    /// Whether the engine can run right now. Probed on every call.
    fn is_available(&self) -> bool;

    /// Recognise all text in `image`. Blocking.
    fn recognize(&self, image: &DynamicImage) -> Result<String, TakeoffError>;
}

/// Tesseract bound for one language set.
///
/// A `LepTess` handle is not `Send`, so one is initialised per call.
#[derive(Debug, Clone)]
pub struct Tesseract {
    lang: String,
}

impl Tesseract {
    pub fn new(lang: impl Into<String>) -> Self {
        Self { lang: lang.into() }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for Tesseract {
    fn is_available(&self) -> bool {
        let ok = leptess::LepTess::new(None, &self.lang).is_ok();
        debug!("Tesseract init for '{}': available={}", self.lang, ok);
        ok
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, TakeoffError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(TakeoffError::OcrFailed(format!(
                "image dimensions must be non-zero (got {width}x{height})"
            )));
        }

        let mut lt = leptess::LepTess::new(None, &self.lang).map_err(|e| {
            TakeoffError::OcrUnavailable(format!(
                "failed to initialise tesseract with language '{}': {e}",
                self.lang
            ))
        })?;

        // leptess decodes the encoded image itself
        let mut png = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| TakeoffError::ImageEncoding(e.to_string()))?;
        lt.set_image_from_mem(png.get_ref())
            .map_err(|e| TakeoffError::OcrFailed(format!("failed to load page image: {e}")))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| TakeoffError::OcrFailed(format!("recognised text is not UTF-8: {e}")))?;
        debug!(
            "Tesseract recognised {} characters from {}x{} image",
            text.len(),
            width,
            height
        );
        Ok(text)
    }
}

#[cfg(not(feature = "tesseract"))]
impl OcrEngine for Tesseract {
    fn is_available(&self) -> bool {
        false
    }

    fn recognize(&self, _image: &DynamicImage) -> Result<String, TakeoffError> {
        Err(TakeoffError::OcrUnavailable(
            "built without the `tesseract` feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])))
    }

    #[cfg(not(feature = "tesseract"))]
    #[test]
    fn unavailable_without_feature() {
        let engine = Tesseract::new("eng");
        assert!(!engine.is_available());
        let err = engine.recognize(&blank(4, 4)).unwrap_err();
        assert!(matches!(err, TakeoffError::OcrUnavailable(_)), "got {err:?}");
    }

    #[cfg(feature = "tesseract")]
    #[test]
    fn unknown_language_is_unavailable() {
        let engine = Tesseract::new("definitely-not-a-traineddata");
        assert!(!engine.is_available());
        let err = engine.recognize(&blank(4, 4)).unwrap_err();
        assert!(matches!(err, TakeoffError::OcrUnavailable(_)), "got {err:?}");
    }

    #[cfg(feature = "tesseract")]
    #[test]
    fn zero_sized_image_is_rejected() {
        let engine = Tesseract::new("eng");
        let err = engine.recognize(&blank(0, 0)).unwrap_err();
        assert!(matches!(err, TakeoffError::OcrFailed(_)), "got {err:?}");
    }

    #[test]
    fn keeps_configured_language() {
        assert_eq!(Tesseract::new("eng+fra").lang(), "eng+fra");
    }
}
