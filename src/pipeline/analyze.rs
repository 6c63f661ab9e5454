//! Document profiling: size, page count, resolution and scan detection.
//!
//! The selector profiles each document once and hands the resulting
//! [`DocumentMetrics`] to every strategy's `can_handle`. Profiling is a
//! best-effort heuristic: each probe falls back to a neutral default when the
//! PDF cannot be read, so [`PdfAnalyzer::analyze`] never fails.

use crate::pipeline::render::PdfBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pages sampled for the DPI estimate.
const DPI_SAMPLE_PAGES: usize = 3;

/// Pages sampled for scan detection.
const TEXT_SAMPLE_PAGES: usize = 2;

/// Fewer embedded characters per page than this means "scanned".
const SCANNED_TEXT_THRESHOLD: f64 = 100.0;

/// Letter paper, the reference size for the DPI estimate.
const LETTER_WIDTH_IN: f64 = 8.5;
const LETTER_HEIGHT_IN: f64 = 11.0;

/// Profile of one document, computed once per parse request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub file_path: PathBuf,
    pub file_size_mb: f64,
    pub page_count: usize,
    pub average_dpi: Option<u32>,
    /// Sum of the size, page, DPI and scan bands, capped at 1.0.
    pub complexity_score: f64,
    pub is_scanned: bool,
}

impl DocumentMetrics {
    pub fn new(
        file_path: impl Into<PathBuf>,
        file_size_mb: f64,
        page_count: usize,
        average_dpi: Option<u32>,
        is_scanned: bool,
    ) -> Self {
        let complexity_score =
            complexity_score(file_size_mb, page_count, average_dpi, is_scanned);
        Self {
            file_path: file_path.into(),
            file_size_mb,
            page_count,
            average_dpi,
            complexity_score,
            is_scanned,
        }
    }
}

/// Complexity in `[0, 1]` from four independently banded factors.
///
/// | Factor | Bands |
/// |--------|-------|
/// | size MB | <5 → 0, <20 → 0.1, <50 → 0.2, else 0.3 |
/// | pages | <5 → 0, <15 → 0.1, <30 → 0.2, else 0.3 |
/// | DPI (if known) | <150 → 0, <250 → 0.1, else 0.2 |
/// | scanned | +0.2 |
pub fn complexity_score(
    file_size_mb: f64,
    page_count: usize,
    average_dpi: Option<u32>,
    is_scanned: bool,
) -> f64 {
    let size = match file_size_mb {
        s if s < 5.0 => 0.0,
        s if s < 20.0 => 0.1,
        s if s < 50.0 => 0.2,
        _ => 0.3,
    };
    let pages = match page_count {
        0..=4 => 0.0,
        5..=14 => 0.1,
        15..=29 => 0.2,
        _ => 0.3,
    };
    let dpi = match average_dpi {
        None => 0.0,
        Some(d) if d < 150 => 0.0,
        Some(d) if d < 250 => 0.1,
        Some(_) => 0.2,
    };
    let scanned = if is_scanned { 0.2 } else { 0.0 };

    f64::min(size + pages + dpi + scanned, 1.0)
}

/// Computes [`DocumentMetrics`] through a [`PdfBackend`].
#[derive(Clone)]
pub struct PdfAnalyzer {
    backend: Arc<dyn PdfBackend>,
}

impl PdfAnalyzer {
    pub fn new(backend: Arc<dyn PdfBackend>) -> Self {
        Self { backend }
    }

    /// Profile the document at `path`. Blocking; never fails.
    pub fn analyze(&self, path: &Path) -> DocumentMetrics {
        info!("Analyzing document: {}", path.display());

        let file_size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        let (page_count, readable) = match self.backend.page_count(path) {
            Ok(0) => (1, true),
            Ok(n) => (n, true),
            Err(e) => {
                warn!("Error getting page count: {}", e);
                (1, false)
            }
        };

        let average_dpi = self.estimate_dpi(path, page_count.min(DPI_SAMPLE_PAGES));
        let is_scanned = readable && self.is_scanned(path, page_count.min(TEXT_SAMPLE_PAGES));

        let metrics = DocumentMetrics::new(path, file_size_mb, page_count, average_dpi, is_scanned);
        info!(
            "Document analysis complete: size={:.2}MB, pages={}, dpi={:?}, scanned={}, complexity={:.2}",
            metrics.file_size_mb,
            metrics.page_count,
            metrics.average_dpi,
            metrics.is_scanned,
            metrics.complexity_score
        );
        metrics
    }

    /// Mean of per-page `(w / 8.5 + h / 11) / 2` at a 72 DPI render.
    fn estimate_dpi(&self, path: &Path, sample_pages: usize) -> Option<u32> {
        let pages: Vec<usize> = (1..=sample_pages).collect();
        let estimates: Vec<f64> = self
            .backend
            .render_pages(path, &pages, 72)
            .into_iter()
            .filter_map(|(page, r)| match r {
                Ok(img) => Some(
                    (img.width() as f64 / LETTER_WIDTH_IN + img.height() as f64 / LETTER_HEIGHT_IN)
                        / 2.0,
                ),
                Err(e) => {
                    debug!("DPI probe skipped page {}: {}", page, e);
                    None
                }
            })
            .collect();

        if estimates.is_empty() {
            warn!("Could not estimate DPI for {}", path.display());
            return None;
        }
        Some((estimates.iter().sum::<f64>() / estimates.len() as f64) as u32)
    }

    /// True when the sampled pages carry little embedded text.
    fn is_scanned(&self, path: &Path, sample_pages: usize) -> bool {
        if sample_pages == 0 {
            return false;
        }
        let total: usize = (1..=sample_pages)
            .map(|p| {
                self.backend
                    .page_text(path, p)
                    .map(|t| t.trim().chars().count())
                    .unwrap_or(0)
            })
            .sum();
        let avg = total as f64 / sample_pages as f64;
        let scanned = avg < SCANNED_TEXT_THRESHOLD;
        debug!("Scanned detection: avg_text={:.0}, is_scanned={}", avg, scanned);
        scanned
    }
}
