//! Building blocks shared by the parsing strategies.
//!
//! Each submodule does one job and knows nothing about strategy selection,
//! so each can be tested in isolation and the strategies read as plain
//! compositions of these stages.
//!
//! ## Data Flow (tiling strategy)
//!
//! ```text
//! input ──▶ analyze ──▶ render ──▶ tiling ──▶ encode ──▶ llm ──▶ aggregate ──▶ normalize
//! (URL/path) (metrics)  (pdfium)   (grid,     (JPEG     (VLM)   (fuzzy       (schema)
//!                                   geometry)  budget)           dedup)
//! ```
//!
//! 1. [`input`]: canonicalise the path, URL or byte buffer to a local file
//! 2. [`analyze`]: size, page count, DPI and scan detection for selection
//! 3. [`render`]: the [`render::PdfBackend`] seam over pdfium; CPU-bound
//!    work runs in `spawn_blocking`
//! 4. [`tiling`]: page images and size-bounded overlapping tiles
//! 5. [`geometry`]: bounding boxes, IoU merging, coordinate rescaling
//! 6. [`encode`]: JPEG with a quality floor under a byte budget
//! 7. [`llm`]: the [`llm::VisionModel`] seam with retry/backoff and
//!    JSON recovery; the only stage with network I/O
//! 8. [`ocr`]: the [`ocr::OcrEngine`] seam over libtesseract
//! 9. [`aggregate`]: merge tile payloads, fuzzy dedup, confidence
//! 10. [`normalize`]: canonical output schema

pub mod aggregate;
pub mod analyze;
pub mod encode;
pub mod geometry;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod ocr;
pub mod render;
pub mod tiling;
