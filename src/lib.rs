//! # takeoff-parser
//!
//! Extract bid items, specifications, materials and project information from
//! construction-plan PDFs.
//!
//! ## Why several strategies?
//!
//! Plan sets range from a three-page addendum to fifty ARCH D sheets of
//! scanned drawings. No single method handles both: sending the PDF whole is
//! cheapest but providers cap file size and page count; tiling is robust but
//! slow; OCR works offline but only yields raw text. The crate profiles each
//! document, ranks the strategies that can handle it, and falls back down the
//! chain until one succeeds.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / URL
//!  │
//!  ├─ 1. Input     resolve local file or download; check %PDF magic
//!  ├─ 2. Analyze   size, pages, DPI, scanned? → complexity
//!  ├─ 3. Select    available → capable → priority → OCR last
//!  ├─ 4. Strategy  OpenAI native │ Claude tiling │ Tesseract OCR
//!  ├─ 5. Aggregate fuzzy dedup of tile payloads, confidence
//!  └─ 6. Normalize canonical {bid_items, specifications, project_info, materials}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use takeoff_parser::{parse_document, ParsingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys and toggles from ANTHROPIC_API_KEY, OPENAI_API_KEY, ENABLE_* …
//!     let config = ParsingConfig::from_env();
//!     let result = parse_document("plans.pdf", None, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `takeoff` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod selector;
pub mod strategy;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ParsingConfig, ParsingConfigBuilder};
pub use error::{TakeoffError, UnitError};
pub use output::{
    BidItem, ExtractedData, Material, ParseResult, ProjectInfo, Specification, StrategyInfo,
    StrategyType,
};
pub use parse::{inspect, parse_document, parse_document_from_bytes, parse_document_sync};
pub use pipeline::aggregate::ConfidenceWeights;
pub use pipeline::analyze::{DocumentMetrics, PdfAnalyzer};
pub use pipeline::geometry::BoundingBox;
pub use pipeline::llm::{VisionModel, VisionRequest};
pub use pipeline::normalize::{normalize, validate_schema};
pub use pipeline::render::PdfBackend;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use selector::StrategySelector;
pub use strategy::{ParsingStrategy, Strategy};
