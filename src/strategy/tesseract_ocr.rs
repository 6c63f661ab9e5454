//! Last-resort strategy: rasterise pages and run local OCR.
//!
//! Structure is heuristic. Every line that starts with a digit becomes a
//! candidate bid item carrying the whole line as its description, and the
//! full text is kept in `raw_text` for a human to read. Confidence is fixed
//! low so nothing downstream mistakes this for a model extraction.

use crate::config::ParsingConfig;
use crate::error::TakeoffError;
use crate::output::{ParseResult, StrategyType};
use crate::pipeline::analyze::DocumentMetrics;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::render::{run_blocking, PdfBackend};
use crate::strategy::{elapsed_ms, ParsingStrategy};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const MAX_CANDIDATE_ITEMS: usize = 50;
const CONFIDENCE_WITH_ITEMS: f64 = 0.3;
const CONFIDENCE_TEXT_ONLY: f64 = 0.2;

pub struct TesseractOcrStrategy {
    backend: Arc<dyn PdfBackend>,
    engine: Arc<dyn OcrEngine>,
    enabled: bool,
    dpi: u32,
}

impl TesseractOcrStrategy {
    pub fn new(config: &ParsingConfig, backend: Arc<dyn PdfBackend>, engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            backend,
            engine,
            enabled: config.enable_tesseract_parsing,
            dpi: config.ocr_dpi,
        }
    }

    async fn run(&self, path: &Path, max_pages: usize, start: Instant) -> Result<ParseResult, TakeoffError> {
        let backend = self.backend.clone();
        let engine = self.engine.clone();
        let owned = path.to_path_buf();
        let dpi = self.dpi;

        let pages = run_blocking("OCR", move || ocr_pages(&*backend, &*engine, &owned, max_pages, dpi)).await?;
        if pages.is_empty() {
            return Err(TakeoffError::OcrFailed("OCR failed to extract text from PDF".into()));
        }

        let text = pages.join("\n\n");
        let data = structure_text(&text);
        let confidence = if data["bid_items"].as_array().is_some_and(|a| !a.is_empty()) {
            CONFIDENCE_WITH_ITEMS
        } else {
            CONFIDENCE_TEXT_ONLY
        };
        let elapsed = elapsed_ms(start);
        info!(
            "Tesseract OCR complete: {} pages, {} chars, time={}ms",
            pages.len(),
            text.len(),
            elapsed
        );

        Ok(
            ParseResult::success(StrategyType::TesseractOcr, data, confidence, pages.len(), elapsed)
                .with_metadata("method", "ocr")
                .with_metadata("character_count", text.chars().count()),
        )
    }
}

/// OCR text per rendered page. A page that renders but fails recognition
/// contributes an empty string; a page that fails to render is skipped.
fn ocr_pages(
    backend: &dyn PdfBackend,
    engine: &dyn OcrEngine,
    path: &Path,
    max_pages: usize,
    dpi: u32,
) -> Result<Vec<String>, TakeoffError> {
    let total = backend.page_count(path)?;
    let wanted: Vec<usize> = (1..=max_pages.min(total)).collect();

    let mut texts = Vec::with_capacity(wanted.len());
    for (page, rendered) in backend.render_pages(path, &wanted, dpi) {
        let image = match rendered {
            Ok(img) => img,
            Err(e) => {
                warn!("OCR render failed for page {}: {}", page, e);
                continue;
            }
        };
        match engine.recognize(&image) {
            Ok(t) => texts.push(t),
            Err(e) => {
                warn!("OCR failed for page {}: {}", page, e);
                texts.push(String::new());
            }
        }
    }
    Ok(texts)
}

/// Heuristic structure over raw OCR text.
fn structure_text(text: &str) -> Value {
    let bid_items: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|l| l.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .take(MAX_CANDIDATE_ITEMS)
        .map(|l| json!({"item_number": null, "description": l}))
        .collect();

    json!({
        "bid_items": bid_items,
        "specifications": [],
        "project_info": {},
        "materials": [],
        "raw_text": text,
    })
}

#[async_trait]
impl ParsingStrategy for TesseractOcrStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::TesseractOcr
    }

    async fn parse(&self, path: &Path, max_pages: usize) -> ParseResult {
        let start = Instant::now();
        info!("Starting Tesseract OCR strategy for {}", path.display());
        match self.run(path, max_pages, start).await {
            Ok(result) => result,
            Err(e) => {
                error!("Tesseract OCR failed: {}", e);
                let message = match e {
                    TakeoffError::OcrFailed(m) => m,
                    other => other.to_string(),
                };
                ParseResult::failure(Some(StrategyType::TesseractOcr), message, elapsed_ms(start))
            }
        }
    }

    fn can_handle(&self, _metrics: &DocumentMetrics) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.enabled && self.engine.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Pages {
        count: usize,
        broken: Vec<usize>,
    }

    impl PdfBackend for Pages {
        fn page_count(&self, _: &Path) -> Result<usize, TakeoffError> {
            Ok(self.count)
        }

        fn render_page(&self, _: &Path, page: usize, _: u32) -> Result<DynamicImage, TakeoffError> {
            if self.broken.contains(&page) {
                return Err(TakeoffError::RasterisationFailed {
                    page,
                    detail: "bad xref".into(),
                });
            }
            // Page number encoded in the width so the OCR stub can tell pages apart.
            Ok(DynamicImage::ImageLuma8(GrayImage::new(page as u32, 1)))
        }

        fn page_text(&self, _: &Path, _: usize) -> Result<String, TakeoffError> {
            Ok(String::new())
        }
    }

    struct Reader {
        available: bool,
        fail_page: Option<u32>,
        calls: AtomicUsize,
    }

    impl OcrEngine for Reader {
        fn is_available(&self) -> bool {
            self.available
        }

        fn recognize(&self, image: &DynamicImage) -> Result<String, TakeoffError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(image.width()) == self.fail_page {
                return Err(TakeoffError::OcrFailed("tesseract exited 1".into()));
            }
            Ok(format!(
                "SHEET {}\n101 Clearing and Grubbing 1 LS\n  202 Excavation 350 CY\nGeneral notes",
                image.width()
            ))
        }
    }

    fn reader(fail_page: Option<u32>) -> Arc<Reader> {
        Arc::new(Reader {
            available: true,
            fail_page,
            calls: AtomicUsize::new(0),
        })
    }

    fn strategy(pages: Pages, engine: Arc<Reader>) -> TesseractOcrStrategy {
        TesseractOcrStrategy::new(&ParsingConfig::default(), Arc::new(pages), engine)
    }

    #[test]
    fn digit_lines_become_candidates() {
        let data = structure_text("Title\n12 Rebar #5\n\n3. Formwork\nA-101");
        let items = data["bid_items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["description"], "12 Rebar #5");
        assert!(items[0]["item_number"].is_null());
        assert_eq!(data["raw_text"], "Title\n12 Rebar #5\n\n3. Formwork\nA-101");
    }

    #[test]
    fn candidates_are_capped() {
        let text: String = (0..80).map(|i| format!("{} line\n", i)).collect();
        let data = structure_text(&text);
        assert_eq!(data["bid_items"].as_array().unwrap().len(), MAX_CANDIDATE_ITEMS);
    }

    #[tokio::test]
    async fn reads_up_to_max_pages() {
        let engine = reader(None);
        let s = strategy(Pages { count: 4, broken: vec![] }, engine.clone());
        let r = s.parse(Path::new("scan.pdf"), 2).await;

        assert!(r.success, "{:?}", r.error);
        assert_eq!(r.pages_processed, 2);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(r.confidence_score, CONFIDENCE_WITH_ITEMS);
        assert_eq!(r.metadata["method"], "ocr");
        let data = r.data.unwrap();
        assert_eq!(data["bid_items"].as_array().unwrap().len(), 4);
        let raw = data["raw_text"].as_str().unwrap();
        assert!(raw.contains("SHEET 1") && raw.contains("SHEET 2"));
        assert_eq!(r.metadata["character_count"], raw.chars().count());
    }

    #[tokio::test]
    async fn failed_recognition_contributes_empty_text() {
        let s = strategy(Pages { count: 2, broken: vec![] }, reader(Some(1)));
        let r = s.parse(Path::new("scan.pdf"), 5).await;
        assert!(r.success);
        assert_eq!(r.pages_processed, 2);
        let data = r.data.unwrap();
        assert!(data["raw_text"].as_str().unwrap().starts_with("\n\nSHEET 2"));
    }

    #[tokio::test]
    async fn no_text_only_yields_low_confidence() {
        let engine = Arc::new(Reader {
            available: true,
            fail_page: Some(1),
            calls: AtomicUsize::new(0),
        });
        let s = strategy(Pages { count: 1, broken: vec![] }, engine);
        let r = s.parse(Path::new("scan.pdf"), 1).await;
        assert!(r.success);
        assert_eq!(r.confidence_score, CONFIDENCE_TEXT_ONLY);
    }

    #[tokio::test]
    async fn nothing_rendered_is_a_failure() {
        let s = strategy(Pages { count: 2, broken: vec![1, 2] }, reader(None));
        let r = s.parse(Path::new("scan.pdf"), 2).await;
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("OCR failed to extract text from PDF"));
    }

    #[test]
    fn availability_follows_engine_and_toggle() {
        let off = Arc::new(Reader {
            available: false,
            fail_page: None,
            calls: AtomicUsize::new(0),
        });
        assert!(!strategy(Pages { count: 1, broken: vec![] }, off).is_available());

        let config = ParsingConfig::builder()
            .enable_tesseract_parsing(false)
            .build()
            .unwrap();
        let disabled = TesseractOcrStrategy::new(&config, Arc::new(Pages { count: 1, broken: vec![] }), reader(None));
        assert!(!disabled.is_available());
        assert!(strategy(Pages { count: 1, broken: vec![] }, reader(None)).is_available());
    }
}
