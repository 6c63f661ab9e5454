//! Parsing strategies and the contract the selector drives them through.
//!
//! | Strategy | Priority | Handles | Needs |
//! |----------|----------|---------|-------|
//! | [`OpenAiNativeStrategy`] | 1 | < 50 MB, ≤ 10 pages, < 300 DPI | OpenAI model |
//! | *(Document AI, reserved)* | 2 | | |
//! | [`ClaudeTilingStrategy`] | 3 | anything | Anthropic model |
//! | [`TesseractOcrStrategy`] | 4 | anything | `tesseract` binary |
//!
//! Rank [`OCR_PRIORITY`] is always tried last regardless of sort order: OCR
//! output is raw text with heuristic structure and only worth having when
//! every model-based strategy failed.
//!
//! A strategy never returns `Err`: everything that goes wrong inside
//! `parse` ends up as a failed [`ParseResult`] carrying the error text, so the
//! selector can record it and move on.

pub mod claude_tiling;
pub mod openai_native;
pub mod tesseract_ocr;

pub use claude_tiling::{ClaudeTilingStrategy, TileOutcome};
pub use openai_native::OpenAiNativeStrategy;
pub use tesseract_ocr::TesseractOcrStrategy;

use crate::output::{ParseResult, StrategyType};
use crate::pipeline::analyze::DocumentMetrics;
use async_trait::async_trait;
use std::path::Path;
use std::time::Instant;

/// Priority rank reserved for OCR; forced to the end of every chain.
pub const OCR_PRIORITY: u8 = 4;

/// One way of turning a PDF into an extraction payload.
#[async_trait]
pub trait ParsingStrategy: Send + Sync {
    fn strategy_type(&self) -> StrategyType;

    /// Display name used in logs and failure messages.
    fn name(&self) -> &str {
        self.strategy_type().display_name()
    }

    /// Parse up to `max_pages` pages. Always returns a result.
    async fn parse(&self, path: &Path, max_pages: usize) -> ParseResult;

    /// Whether the document is within this strategy's limits. Pure.
    fn can_handle(&self, metrics: &DocumentMetrics) -> bool;

    /// Lower is tried first.
    fn priority(&self) -> u8 {
        self.strategy_type().default_priority()
    }

    /// Whether the strategy is enabled and its collaborators are reachable.
    fn is_available(&self) -> bool;
}

/// The production strategy set.
pub enum Strategy {
    OpenAiNative(OpenAiNativeStrategy),
    ClaudeTiling(ClaudeTilingStrategy),
    TesseractOcr(TesseractOcrStrategy),
}

impl Strategy {
    fn inner(&self) -> &dyn ParsingStrategy {
        match self {
            Strategy::OpenAiNative(s) => s,
            Strategy::ClaudeTiling(s) => s,
            Strategy::TesseractOcr(s) => s,
        }
    }
}

#[async_trait]
impl ParsingStrategy for Strategy {
    fn strategy_type(&self) -> StrategyType {
        self.inner().strategy_type()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn parse(&self, path: &Path, max_pages: usize) -> ParseResult {
        self.inner().parse(path, max_pages).await
    }

    fn can_handle(&self, metrics: &DocumentMetrics) -> bool {
        self.inner().can_handle(metrics)
    }

    fn priority(&self) -> u8 {
        self.inner().priority()
    }

    fn is_available(&self) -> bool {
        self.inner().is_available()
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
