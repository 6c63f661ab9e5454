//! Page images and tile geometry for the detail pass.
//!
//! ## Why tile at all?
//!
//! Vision APIs accept a few megabytes per image and downsample anything
//! larger, which erases the 6 pt dimension text that makes up most of a plan
//! sheet. Cutting the page (or a region of it) into overlapping tiles that
//! each fit the byte budget lets the model read every tile at full
//! resolution.
//!
//! ## Grid layout
//!
//! ```text
//!  region ┌──────┬─┬──────┬─┬────┐
//!         │ t0   │o│ t1   │o│ t2 │   step = tile × (1 − overlap)
//!         ├──────┼─┼──────┼─┼────┤   last tile on each axis ends on the
//!         │ t3   │ │ t4   │ │ t5 │   region edge (snapped back)
//!         └──────┴─┴──────┴─┴────┘
//! ```
//!
//! The last tile on an axis is shifted back so it ends on the region edge
//! instead of emitting a thin trailing strip. Every pixel of the region is
//! covered and no tile is narrower than the tile size or the region,
//! whichever is smaller.

use crate::error::TakeoffError;
use crate::pipeline::encode::{encode_within_budget, EncodedImage};
use crate::pipeline::geometry::BoundingBox;
use crate::pipeline::render::PdfBackend;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Conservative JPEG size estimate at quality 90–95.
const BYTES_PER_PIXEL: f64 = 0.7;

/// Fraction of the byte budget a tile is sized for.
const SAFETY_MARGIN: f64 = 0.8;

/// Longest tile edge.
pub const MAX_TILE_DIMENSION: u32 = 2000;

/// Shortest tile edge.
pub const MIN_TILE_DIMENSION: u32 = 500;

/// A rendered page and its budgeted JPEG encoding.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub page_number: usize,
    pub image: DynamicImage,
    pub encoded: EncodedImage,
}

/// One tile ready for inference.
///
/// `x`, `y`, `width`, `height` are in the pixel space of the rendered page
/// the tile was cut from.
#[derive(Debug, Clone)]
pub struct TileInfo {
    pub jpeg: Vec<u8>,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub page_number: usize,
    pub tile_number: usize,
    pub total_tiles: usize,
    pub within_budget: bool,
}

impl TileInfo {
    /// Short unit name for logs and [`crate::error::UnitError`].
    pub fn unit_name(&self) -> String {
        format!("page {} tile {}", self.page_number, self.tile_number)
    }
}

/// Renders pages and cuts them into size-bounded tiles.
///
/// All methods are blocking; callers run them inside
/// [`crate::pipeline::render::run_blocking`].
#[derive(Clone)]
pub struct ImageProcessor {
    backend: Arc<dyn PdfBackend>,
    max_size_bytes: usize,
}

impl ImageProcessor {
    pub fn new(backend: Arc<dyn PdfBackend>, max_size_mb: f64) -> Self {
        Self {
            backend,
            max_size_bytes: mb_to_bytes(max_size_mb),
        }
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    /// Render one page at `dpi` and encode it within `target_size_mb`
    /// (default: the processor's budget).
    pub fn pdf_page_to_image(
        &self,
        path: &Path,
        page_number: usize,
        dpi: u32,
        target_size_mb: Option<f64>,
    ) -> Result<PageImage, TakeoffError> {
        let target = target_size_mb.map_or(self.max_size_bytes, mb_to_bytes);
        debug!("Converting page {} at {} DPI", page_number, dpi);

        let image = self.backend.render_page(path, page_number, dpi)?;
        let encoded = encode_within_budget(&image, target)?;
        debug!(
            "Page {}: size={:.2}MB, dimensions={}x{}, quality={}",
            page_number,
            encoded.bytes.len() as f64 / (1024.0 * 1024.0),
            image.width(),
            image.height(),
            encoded.quality
        );

        Ok(PageImage {
            page_number,
            image,
            encoded,
        })
    }

    /// Cut `image` (or the `roi` part of it) into encoded tiles.
    pub fn create_tiles(
        &self,
        image: &DynamicImage,
        page_number: usize,
        tile_size: (u32, u32),
        overlap_percent: f64,
        roi: Option<&BoundingBox>,
    ) -> Result<Vec<TileInfo>, TakeoffError> {
        let (rx, ry, rw, rh) = clamp_region(image.width(), image.height(), roi);
        let cells = plan_tiles(rw, rh, tile_size, overlap_percent);
        let total = cells.len();

        let mut tiles = Vec::with_capacity(total);
        for (n, (cx, cy, cw, ch)) in cells.into_iter().enumerate() {
            let (x, y) = (rx + cx, ry + cy);
            let crop = image.crop_imm(x, y, cw, ch);
            let encoded = encode_within_budget(&crop, self.max_size_bytes)?;
            tiles.push(TileInfo {
                jpeg: encoded.bytes,
                x,
                y,
                width: cw,
                height: ch,
                page_number,
                tile_number: n,
                total_tiles: total,
                within_budget: encoded.within_budget,
            });
        }

        info!("Created {} tiles for page {}", tiles.len(), page_number);
        Ok(tiles)
    }
}

/// Tile dimensions that should encode under `target_bytes`.
///
/// Keeps the source aspect ratio, then clamps the longest edge to
/// [`MAX_TILE_DIMENSION`] and the shortest to [`MIN_TILE_DIMENSION`].
pub fn calculate_tile_size(
    image_width: u32,
    image_height: u32,
    target_bytes: usize,
    dpi: u32,
) -> (u32, u32) {
    let aspect = image_width.max(1) as f64 / image_height.max(1) as f64;
    let max_pixels = target_bytes as f64 * SAFETY_MARGIN / BYTES_PER_PIXEL;

    let mut h = (max_pixels / aspect).sqrt();
    let mut w = h * aspect;

    let longest = w.max(h);
    if longest > MAX_TILE_DIMENSION as f64 {
        let scale = MAX_TILE_DIMENSION as f64 / longest;
        w *= scale;
        h *= scale;
    }

    let shortest = w.min(h).max(1.0);
    if shortest < MIN_TILE_DIMENSION as f64 {
        let scale = MIN_TILE_DIMENSION as f64 / shortest;
        w *= scale;
        h *= scale;
    }

    let (w, h) = ((w.round() as u32).max(1), (h.round() as u32).max(1));
    debug!(
        "Calculated tile size at {} DPI: {}x{} (estimated {:.2}MB, target {:.2}MB)",
        dpi,
        w,
        h,
        w as f64 * h as f64 * BYTES_PER_PIXEL / (1024.0 * 1024.0),
        target_bytes as f64 / (1024.0 * 1024.0)
    );
    (w, h)
}

/// Grid cells `(x, y, w, h)` relative to a `region_w × region_h` region.
///
/// Row-major order. Empty for an empty region.
pub fn plan_tiles(
    region_w: u32,
    region_h: u32,
    tile_size: (u32, u32),
    overlap_percent: f64,
) -> Vec<(u32, u32, u32, u32)> {
    if region_w == 0 || region_h == 0 {
        return Vec::new();
    }
    let overlap = overlap_percent.clamp(0.0, 0.5);
    let xs = axis_spans(region_w, tile_size.0.max(1), overlap);
    let ys = axis_spans(region_h, tile_size.1.max(1), overlap);

    ys.iter()
        .flat_map(|&(y, h)| xs.iter().map(move |&(x, w)| (x, y, w, h)))
        .collect()
}

/// Offsets and lengths along one axis.
fn axis_spans(len: u32, tile: u32, overlap: f64) -> Vec<(u32, u32)> {
    if len <= tile {
        return vec![(0, len)];
    }
    let step = ((tile as f64 * (1.0 - overlap)) as u32).max(1);
    let last = len - tile;

    let mut spans = Vec::new();
    let mut pos = 0u32;
    while pos < last {
        spans.push((pos, tile));
        pos = pos.saturating_add(step);
    }
    spans.push((last, tile));
    spans
}

/// Clamp an optional ROI to the image; `None` means the whole image.
fn clamp_region(img_w: u32, img_h: u32, roi: Option<&BoundingBox>) -> (u32, u32, u32, u32) {
    match roi {
        None => (0, 0, img_w, img_h),
        Some(r) => {
            let x = r.x.min(img_w);
            let y = r.y.min(img_h);
            let w = (r.right().min(img_w as u64) as u32).saturating_sub(x);
            let h = (r.bottom().min(img_h as u64) as u32).saturating_sub(y);
            (x, y, w, h)
        }
    }
}

fn mb_to_bytes(mb: f64) -> usize {
    (mb * 1024.0 * 1024.0) as usize
}
