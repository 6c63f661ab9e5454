//! Bounding boxes and the coordinate helpers used by the tiling pipeline.
//!
//! All coordinates are integer pixels in the space of one rendered page
//! image. The coarse scan and the detail pass render the same page at
//! different DPIs, so boxes move between the two spaces with
//! [`normalize_bbox`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Reading-order row height: boxes whose top edges fall in the same 20 px
/// band are ordered left to right.
const READING_ORDER_BAND_PX: u32 = 20;

/// A rectangular page region with an optional label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub page_number: usize,
    pub confidence: f64,
    pub label: Option<String>,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32, page_number: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            page_number,
            confidence: 1.0,
            label: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Intersection over union with `other`.
    ///
    /// Zero for boxes on different pages, for boxes that do not overlap or
    /// only touch along an edge, and when the union is empty.
    pub fn intersection_over_union(&self, other: &BoundingBox) -> f64 {
        if self.page_number != other.page_number {
            return 0.0;
        }

        let x1 = self.x.max(other.x) as u64;
        let y1 = self.y.max(other.y) as u64;
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// Whether the point lies inside the box, edges included.
    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        let (x, y) = (x as u64, y as u64);
        self.x as u64 <= x && x <= self.right() && self.y as u64 <= y && y <= self.bottom()
    }

    /// Grow the box by `margin` on every side; the origin stops at 0.
    pub fn expand(&self, margin: u32) -> BoundingBox {
        BoundingBox {
            x: self.x.saturating_sub(margin),
            y: self.y.saturating_sub(margin),
            width: self.width.saturating_add(margin.saturating_mul(2)),
            height: self.height.saturating_add(margin.saturating_mul(2)),
            ..self.clone()
        }
    }
}

/// Rescale a box from a `src_w × src_h` image to a `dst_w × dst_h` image.
///
/// A zero source dimension is treated as 1.
pub fn normalize_bbox(
    bbox: &BoundingBox,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
) -> BoundingBox {
    let sx = dst_w as f64 / src_w.max(1) as f64;
    let sy = dst_h as f64 / src_h.max(1) as f64;
    BoundingBox {
        x: (bbox.x as f64 * sx) as u32,
        y: (bbox.y as f64 * sy) as u32,
        width: (bbox.width as f64 * sx) as u32,
        height: (bbox.height as f64 * sy) as u32,
        ..bbox.clone()
    }
}

/// Translate a box found inside a tile to page coordinates.
pub fn tile_to_page_coordinates(bbox: &BoundingBox, tile_x: u32, tile_y: u32) -> BoundingBox {
    BoundingBox {
        x: bbox.x.saturating_add(tile_x),
        y: bbox.y.saturating_add(tile_y),
        ..bbox.clone()
    }
}

/// Keep boxes with `min_area <= area <= max_area`.
pub fn filter_by_area(
    boxes: Vec<BoundingBox>,
    min_area: u64,
    max_area: Option<u64>,
) -> Vec<BoundingBox> {
    let before = boxes.len();
    let kept: Vec<_> = boxes
        .into_iter()
        .filter(|b| b.area() >= min_area && max_area.is_none_or(|max| b.area() <= max))
        .collect();
    debug!("Filtered {} boxes to {} by area", before, kept.len());
    kept
}

/// Order boxes by page, then top-to-bottom in 20 px bands, then left to right.
pub fn sort_boxes_reading_order(boxes: Vec<BoundingBox>) -> Vec<BoundingBox> {
    let mut by_page: BTreeMap<usize, Vec<BoundingBox>> = BTreeMap::new();
    for b in boxes {
        by_page.entry(b.page_number).or_default().push(b);
    }

    by_page
        .into_values()
        .flat_map(|mut page| {
            page.sort_by_key(|b| (b.y / READING_ORDER_BAND_PX, b.x));
            page
        })
        .collect()
}

/// Merge boxes whose IoU reaches `iou_threshold`.
///
/// Greedy: boxes are visited by descending confidence and each unconsumed
/// seed absorbs every later unconsumed box that overlaps it enough. A group
/// becomes its enclosing rectangle with the mean confidence and the seed's
/// label. Passes repeat until nothing merges, so the output is stable under
/// a second call with the same threshold.
pub fn merge_overlapping_boxes(boxes: Vec<BoundingBox>, iou_threshold: f64) -> Vec<BoundingBox> {
    let before = boxes.len();
    let mut current = boxes;
    loop {
        let (merged, changed) = merge_pass(current, iou_threshold);
        current = merged;
        if !changed {
            break;
        }
    }
    debug!("Merged {} boxes into {}", before, current.len());
    current
}

fn merge_pass(mut boxes: Vec<BoundingBox>, iou_threshold: f64) -> (Vec<BoundingBox>, bool) {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut used = vec![false; boxes.len()];
    let mut out = Vec::with_capacity(boxes.len());
    let mut changed = false;

    for i in 0..boxes.len() {
        if used[i] {
            continue;
        }
        let mut group = vec![&boxes[i]];
        for j in (i + 1)..boxes.len() {
            if !used[j] && boxes[i].intersection_over_union(&boxes[j]) >= iou_threshold {
                used[j] = true;
                group.push(&boxes[j]);
            }
        }
        if group.len() == 1 {
            out.push(boxes[i].clone());
        } else {
            changed = true;
            out.push(enclosing(&group));
        }
    }
    (out, changed)
}

fn enclosing(group: &[&BoundingBox]) -> BoundingBox {
    let seed = group[0];
    let min_x = group.iter().map(|b| b.x).min().unwrap_or(seed.x);
    let min_y = group.iter().map(|b| b.y).min().unwrap_or(seed.y);
    let max_x = group.iter().map(|b| b.right()).max().unwrap_or(seed.right());
    let max_y = group.iter().map(|b| b.bottom()).max().unwrap_or(seed.bottom());
    let confidence = group.iter().map(|b| b.confidence).sum::<f64>() / group.len() as f64;

    BoundingBox {
        x: min_x,
        y: min_y,
        width: (max_x - min_x as u64).min(u32::MAX as u64) as u32,
        height: (max_y - min_y as u64).min(u32::MAX as u64) as u32,
        page_number: seed.page_number,
        confidence,
        label: seed.label.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x: u32, y: u32, w: u32, h: u32) -> BoundingBox {
        BoundingBox::new(x, y, w, h, 1)
    }

    #[test]
    fn iou_of_box_with_itself_is_one() {
        let a = bx(10, 10, 50, 40);
        assert!((a.intersection_over_union(&a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn iou_is_symmetric_and_bounded() {
        let a = bx(0, 0, 100, 100);
        let b = bx(50, 50, 100, 100);
        let ab = a.intersection_over_union(&b);
        let ba = b.intersection_over_union(&a);
        assert_eq!(ab, ba);
        assert!(ab > 0.0 && ab < 1.0);
        // 2500 / (10000 + 10000 - 2500)
        assert!((ab - 2500.0 / 17500.0).abs() < 1e-12);
    }

    #[test]
    fn iou_zero_for_touching_or_other_page() {
        let a = bx(0, 0, 10, 10);
        assert_eq!(a.intersection_over_union(&bx(10, 0, 10, 10)), 0.0);
        let mut other_page = a.clone();
        other_page.page_number = 2;
        assert_eq!(a.intersection_over_union(&other_page), 0.0);
        let empty = bx(0, 0, 0, 0);
        assert_eq!(empty.intersection_over_union(&empty), 0.0);
    }

    #[test]
    fn contains_point_includes_edges() {
        let a = bx(10, 10, 10, 10);
        assert!(a.contains_point(10, 10));
        assert!(a.contains_point(20, 20));
        assert!(!a.contains_point(21, 15));
    }

    #[test]
    fn expand_clamps_origin() {
        let e = bx(3, 20, 10, 10).expand(5);
        assert_eq!((e.x, e.y, e.width, e.height), (0, 15, 20, 20));
    }

    #[test]
    fn normalize_scales_between_resolutions() {
        let b = bx(100, 50, 200, 100);
        let n = normalize_bbox(&b, 850, 1100, 1700, 2200);
        assert_eq!((n.x, n.y, n.width, n.height), (200, 100, 400, 200));
    }

    #[test]
    fn tile_offsets_translate_to_page() {
        let b = tile_to_page_coordinates(&bx(5, 6, 7, 8), 100, 200);
        assert_eq!((b.x, b.y, b.width, b.height), (105, 206, 7, 8));
    }

    #[test]
    fn filter_by_area_applies_both_bounds() {
        let kept = filter_by_area(vec![bx(0, 0, 5, 5), bx(0, 0, 10, 10), bx(0, 0, 100, 100)], 100, Some(5000));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].width, 10);
    }

    #[test]
    fn reading_order_bands_rows() {
        let mut p2 = bx(0, 0, 10, 10);
        p2.page_number = 2;
        let sorted = sort_boxes_reading_order(vec![
            p2,
            bx(300, 5, 10, 10),
            bx(10, 15, 10, 10),
            bx(0, 400, 10, 10),
        ]);
        let order: Vec<_> = sorted.iter().map(|b| (b.page_number, b.x, b.y)).collect();
        assert_eq!(order, vec![(1, 10, 15), (1, 300, 5), (1, 0, 400), (2, 0, 0)]);
    }

    #[test]
    fn merge_groups_into_enclosing_rectangle() {
        let a = bx(0, 0, 100, 100).with_confidence(0.9).with_label("bid_items_table");
        let b = bx(10, 10, 100, 100).with_confidence(0.5).with_label("notes");
        let c = bx(500, 500, 50, 50).with_confidence(0.7);
        let merged = merge_overlapping_boxes(vec![b, c, a], 0.5);

        assert_eq!(merged.len(), 2);
        let big = merged.iter().find(|m| m.x == 0).unwrap();
        assert_eq!((big.width, big.height), (110, 110));
        assert!((big.confidence - 0.7).abs() < 1e-12);
        assert_eq!(big.label.as_deref(), Some("bid_items_table"));
    }

    #[test]
    fn merge_is_idempotent() {
        let boxes = vec![
            bx(0, 0, 100, 100).with_confidence(0.9),
            bx(20, 0, 100, 100).with_confidence(0.8),
            bx(60, 0, 100, 100).with_confidence(0.7),
            bx(400, 400, 30, 30).with_confidence(0.6),
        ];
        let once = merge_overlapping_boxes(boxes, 0.5);
        let twice = merge_overlapping_boxes(once.clone(), 0.5);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_of_empty_is_empty() {
        assert!(merge_overlapping_boxes(Vec::new(), 0.5).is_empty());
    }
}
