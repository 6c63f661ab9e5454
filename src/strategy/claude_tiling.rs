//! Two-phase tiling strategy for large, dense plan sheets.
//!
//! ```text
//!  COARSE_SCAN ──(regions found)──▶ DETAIL_PASS ──▶ AGGREGATE ──▶ DONE
//!       │
//!       └──(no regions)──▶ FULL_PAGE_FALLBACK ──▶ DONE
//! ```
//!
//! ## Why two phases?
//!
//! A plan sheet is mostly line work. Tiling the whole sheet at 200 DPI would
//! send dozens of tiles of empty drawing per page. The coarse scan renders
//! each page small (100 DPI, 2 MB) and asks the model where the tables,
//! schedules and notes are; only those regions are re-rendered at detail
//! DPI and tiled.
//!
//! ## Why per-unit outcomes?
//!
//! A 429 on one tile, or one tile answered in prose, must not sink a page
//! that produced forty good tiles. Each tile resolves to a [`TileOutcome`];
//! omitted tiles are logged and counted, never propagated.

use crate::config::ParsingConfig;
use crate::error::{TakeoffError, UnitError};
use crate::output::{ParseResult, StrategyType};
use crate::pipeline::aggregate::{aggregate_results, calculate_confidence, ConfidenceWeights};
use crate::pipeline::analyze::DocumentMetrics;
use crate::pipeline::encode::jpeg_image_data;
use crate::pipeline::geometry::{
    filter_by_area, merge_overlapping_boxes, normalize_bbox, sort_boxes_reading_order, BoundingBox,
};
use crate::pipeline::llm::{parse_json_response, VisionModel, VisionRequest};
use crate::pipeline::render::{run_blocking, PdfBackend};
use crate::pipeline::tiling::{calculate_tile_size, ImageProcessor, TileInfo};
use crate::progress::ProgressCallback;
use crate::prompts::{FULL_DOCUMENT_PROMPT, ROI_PROMPT, TILE_EXTRACTION_PROMPT};
use crate::strategy::{elapsed_ms, ParsingStrategy};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The coarse scan never looks past this page.
const COARSE_SCAN_MAX_PAGES: usize = 5;

/// Byte budget of a coarse-scan page image.
const COARSE_TARGET_MB: f64 = 2.0;

/// Byte budget of each page image in the full-page fallback.
const FALLBACK_TARGET_MB: f64 = 3.0;

/// Token cap for the region-finding call.
const ROI_MAX_TOKENS: usize = 2048;

/// Regions smaller than this (px², coarse space) are noise.
const MIN_ROI_AREA: u64 = 100;

const DEFAULT_ROI_CONFIDENCE: f64 = 0.8;

/// Result of one tile.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    Extracted(Value),
    Omitted(UnitError),
}

/// Regions found on one coarse page, in that page's pixel space.
#[derive(Debug, Clone)]
struct PageRegions {
    page_number: usize,
    width: u32,
    height: u32,
    regions: Vec<BoundingBox>,
}

struct CoarseScan {
    pages_scanned: Vec<usize>,
    regions: Vec<PageRegions>,
}

impl CoarseScan {
    fn region_count(&self) -> usize {
        self.regions.iter().map(|p| p.regions.len()).sum()
    }
}

pub struct ClaudeTilingStrategy {
    model: Option<Arc<dyn VisionModel>>,
    processor: ImageProcessor,
    enabled: bool,
    coarse_dpi: u32,
    detail_dpi: u32,
    tile_overlap: f64,
    max_concurrent_tiles: usize,
    max_tokens: usize,
    temperature: f32,
    fuzzy_threshold: f64,
    merge_iou_threshold: f64,
    weights: ConfidenceWeights,
    progress: Option<ProgressCallback>,
}

impl ClaudeTilingStrategy {
    pub fn new(
        config: &ParsingConfig,
        model: Option<Arc<dyn VisionModel>>,
        backend: Arc<dyn PdfBackend>,
    ) -> Self {
        Self {
            model,
            processor: ImageProcessor::new(backend, config.max_image_size_mb),
            enabled: config.enable_claude_parsing,
            coarse_dpi: config.coarse_scan_dpi,
            detail_dpi: config.detail_scan_dpi,
            tile_overlap: config.tile_overlap_percent,
            max_concurrent_tiles: config.max_concurrent_tiles.max(1),
            max_tokens: config.claude_max_tokens,
            temperature: config.claude_temperature,
            fuzzy_threshold: config.fuzzy_match_threshold,
            merge_iou_threshold: config.merge_iou_threshold,
            weights: config.confidence_weights,
            progress: config.progress_callback.clone(),
        }
    }

    async fn run(&self, path: &Path, max_pages: usize, start: Instant) -> Result<ParseResult, TakeoffError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| TakeoffError::ProviderNotConfigured {
                provider: "anthropic".into(),
                hint: "Claude client not initialized".into(),
            })?;

        info!("Phase 1: Coarse scan for ROI detection");
        let scan = self.coarse_scan(model, path, max_pages).await;
        if scan.pages_scanned.is_empty() {
            return Err(TakeoffError::RasterisationFailed {
                page: 1,
                detail: "no page of the document could be rendered".into(),
            });
        }

        let roi_count = scan.region_count();
        let (data, tiles_total, tiles_succeeded) = if roi_count == 0 {
            warn!("No ROI detected, parsing entire pages");
            (self.full_page_fallback(model, path, &scan.pages_scanned).await, 0, 0)
        } else {
            info!("Phase 2: Detail pass on {} ROI regions", roi_count);
            let outcomes = self.detail_pass(model, path, &scan.regions).await;
            let total = outcomes.len();
            let payloads: Vec<Value> = outcomes
                .into_iter()
                .filter_map(|o| match o {
                    TileOutcome::Extracted(v) => Some(v),
                    TileOutcome::Omitted(_) => None,
                })
                .collect();
            let succeeded = payloads.len();

            info!("Phase 3: Aggregating and deduplicating results");
            (aggregate_results(&payloads, self.fuzzy_threshold), total, succeeded)
        };

        let confidence = calculate_confidence(&data, &self.weights);
        let elapsed = elapsed_ms(start);
        info!(
            "Claude tiling complete: {} regions, {}/{} tiles, confidence={:.2}, time={}ms",
            roi_count, tiles_succeeded, tiles_total, confidence, elapsed
        );

        Ok(ParseResult::success(
            StrategyType::ClaudeTiling,
            data,
            confidence,
            scan.pages_scanned.len(),
            elapsed,
        )
        .with_metadata("method", "tiling")
        .with_metadata("roi_regions", roi_count)
        .with_metadata("tiles_total", tiles_total)
        .with_metadata("tiles_succeeded", tiles_succeeded)
        .with_metadata("model", model.name()))
    }

    // ── Phase 1 ──────────────────────────────────────────────────────────

    async fn coarse_scan(&self, model: &Arc<dyn VisionModel>, path: &Path, max_pages: usize) -> CoarseScan {
        let mut scan = CoarseScan {
            pages_scanned: Vec::new(),
            regions: Vec::new(),
        };

        for page_number in 1..=max_pages.min(COARSE_SCAN_MAX_PAGES) {
            let processor = self.processor.clone();
            let owned: PathBuf = path.to_path_buf();
            let dpi = self.coarse_dpi;
            let page = match run_blocking("Coarse render", move || {
                processor.pdf_page_to_image(&owned, page_number, dpi, Some(COARSE_TARGET_MB))
            })
            .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to scan page {}: {}", page_number, e);
                    continue;
                }
            };
            scan.pages_scanned.push(page_number);

            let (width, height) = (page.image.width(), page.image.height());
            let request = VisionRequest {
                unit: format!("page {} coarse scan", page_number),
                prompt: ROI_PROMPT.to_string(),
                images: vec![page.encoded.to_image_data()],
                max_tokens: ROI_MAX_TOKENS,
                temperature: self.temperature,
            };
            let text = match model.complete(request).await {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to scan page {}: {}", page_number, e);
                    continue;
                }
            };

            let raw = parse_regions(&text, page_number, width, height);
            let found = raw.len();
            let regions = sort_boxes_reading_order(merge_overlapping_boxes(
                filter_by_area(raw, MIN_ROI_AREA, None),
                self.merge_iou_threshold,
            ));
            info!(
                "Page {}: Found {} ROI regions ({} after cleanup)",
                page_number,
                found,
                regions.len()
            );

            if !regions.is_empty() {
                scan.regions.push(PageRegions {
                    page_number,
                    width,
                    height,
                    regions,
                });
            }
        }

        info!("Coarse scan complete: {} total ROI regions", scan.region_count());
        scan
    }

    // ── Phase 2 ──────────────────────────────────────────────────────────

    async fn detail_pass(
        &self,
        model: &Arc<dyn VisionModel>,
        path: &Path,
        pages: &[PageRegions],
    ) -> Vec<TileOutcome> {
        let mut tiles: Vec<TileInfo> = Vec::new();

        for page in pages {
            info!(
                "Processing page {} with {} ROI regions",
                page.page_number,
                page.regions.len()
            );
            let processor = self.processor.clone();
            let owned = path.to_path_buf();
            let page = page.clone();
            let (dpi, overlap) = (self.detail_dpi, self.tile_overlap);
            let page_number = page.page_number;

            let cut = run_blocking("Detail render", move || {
                cut_page_tiles(&processor, &owned, &page, dpi, overlap)
            })
            .await;

            match cut {
                Ok(mut t) => tiles.append(&mut t),
                Err(e) => error!(
                    "{}",
                    UnitError::RenderFailed {
                        page: page_number,
                        detail: e.to_string(),
                    }
                ),
            }
        }

        let total = tiles.len();
        if let Some(cb) = &self.progress {
            cb.on_tiles_planned(total);
        }
        info!(
            "Submitting {} tiles ({} concurrent)",
            total, self.max_concurrent_tiles
        );

        let outcomes: Vec<TileOutcome> = stream::iter(tiles)
            .map(|tile| self.process_tile(model, tile))
            .buffer_unordered(self.max_concurrent_tiles)
            .collect()
            .await;

        for o in &outcomes {
            if let TileOutcome::Omitted(e) = o {
                warn!("Tile processing failed: {}", e);
            }
        }
        outcomes
    }

    async fn process_tile(&self, model: &Arc<dyn VisionModel>, tile: TileInfo) -> TileOutcome {
        let unit = tile.unit_name();
        let request = VisionRequest {
            unit: unit.clone(),
            prompt: TILE_EXTRACTION_PROMPT.to_string(),
            images: vec![jpeg_image_data(&tile.jpeg)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let outcome = match model.complete(request).await {
            Err(e) => TileOutcome::Omitted(UnitError::InferenceFailed {
                unit,
                detail: e.to_string(),
            }),
            Ok(text) => match parse_json_response(&text) {
                Some(v) => {
                    let count = |key: &str| v.get(key).and_then(|x| x.as_array()).map_or(0, Vec::len);
                    let (bid_items, materials) = (count("bid_items"), count("materials"));
                    debug!(
                        "{}: extracted {} bid items, {} materials",
                        unit, bid_items, materials
                    );
                    TileOutcome::Extracted(v)
                }
                None => {
                    debug!("{}: response text: {}", unit, text.chars().take(500).collect::<String>());
                    TileOutcome::Omitted(UnitError::NoJson { unit })
                }
            },
        };

        if let Some(cb) = &self.progress {
            cb.on_tile_complete(
                tile.page_number,
                tile.tile_number,
                tile.total_tiles,
                matches!(outcome, TileOutcome::Extracted(_)),
            );
        }
        outcome
    }

    // ── Fallback ─────────────────────────────────────────────────────────

    /// Send every scanned page at coarse resolution in one request.
    /// Any failure yields an empty payload.
    async fn full_page_fallback(&self, model: &Arc<dyn VisionModel>, path: &Path, pages: &[usize]) -> Value {
        let mut images = Vec::with_capacity(pages.len());
        for &page_number in pages {
            let processor = self.processor.clone();
            let owned = path.to_path_buf();
            let dpi = self.coarse_dpi;
            match run_blocking("Fallback render", move || {
                processor.pdf_page_to_image(&owned, page_number, dpi, Some(FALLBACK_TARGET_MB))
            })
            .await
            {
                Ok(p) => images.push(p.encoded.to_image_data()),
                Err(e) => warn!("Failed to add page {}: {}", page_number, e),
            }
        }
        if images.is_empty() {
            return json!({});
        }

        let request = VisionRequest {
            unit: "full-page fallback".into(),
            prompt: FULL_DOCUMENT_PROMPT.to_string(),
            images,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        match model.complete(request).await {
            Ok(text) => parse_json_response(&text).unwrap_or_else(|| {
                warn!("Could not parse JSON from full-page response");
                json!({})
            }),
            Err(e) => {
                error!("Failed to parse full pages: {}", e);
                json!({})
            }
        }
    }
}

/// Render one page at detail DPI and cut all its regions into tiles.
fn cut_page_tiles(
    processor: &ImageProcessor,
    path: &Path,
    page: &PageRegions,
    dpi: u32,
    overlap: f64,
) -> Result<Vec<TileInfo>, TakeoffError> {
    let image = processor.pdf_page_to_image(path, page.page_number, dpi, None)?.image;
    let mut tiles = Vec::new();

    for roi in &page.regions {
        let scaled = normalize_bbox(roi, page.width, page.height, image.width(), image.height());
        let tile_size = calculate_tile_size(
            scaled.width,
            scaled.height,
            processor.max_size_bytes(),
            dpi,
        );
        let mut cut = processor.create_tiles(&image, page.page_number, tile_size, overlap, Some(&scaled))?;
        info!(
            "Created {} tiles for ROI '{}'",
            cut.len(),
            roi.label.as_deref().unwrap_or("unknown")
        );
        tiles.append(&mut cut);
    }
    Ok(tiles)
}

/// Decode `{"regions": [...]}` into boxes, filling defaults per region.
fn parse_regions(text: &str, page_number: usize, width: u32, height: u32) -> Vec<BoundingBox> {
    let Some(doc) = parse_json_response(text) else {
        warn!("Page {}: could not parse ROI response", page_number);
        return Vec::new();
    };
    let px = |r: &Value, key: &str, default: u32| -> u32 {
        r.get(key)
            .and_then(Value::as_f64)
            .map_or(default, |v| v.max(0.0).min(u32::MAX as f64) as u32)
    };

    doc.get("regions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|r| r.is_object())
        .map(|r| BoundingBox {
            x: px(r, "x", 0),
            y: px(r, "y", 0),
            width: px(r, "width", width),
            height: px(r, "height", height),
            page_number,
            confidence: r
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_ROI_CONFIDENCE),
            label: Some(
                r.get("label")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            ),
        })
        .collect()
}

#[async_trait]
impl ParsingStrategy for ClaudeTilingStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::ClaudeTiling
    }

    async fn parse(&self, path: &Path, max_pages: usize) -> ParseResult {
        let start = Instant::now();
        info!("Starting Claude tiling strategy for {}", path.display());
        match self.run(path, max_pages, start).await {
            Ok(result) => result,
            Err(e) => {
                error!("Claude tiling strategy failed: {}", e);
                ParseResult::failure(Some(StrategyType::ClaudeTiling), e.to_string(), elapsed_ms(start))
            }
        }
    }

    fn can_handle(&self, _metrics: &DocumentMetrics) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.enabled && self.model.is_some()
    }
}
