//! Public entry points.
//!
//! These are the only functions that return `Err`, and only for problems
//! with the input itself (missing file, not a PDF, failed download). Once a
//! local PDF exists, every outcome including total failure of the strategy
//! chain is reported through [`ParseResult`].

use crate::config::ParsingConfig;
use crate::error::TakeoffError;
use crate::output::ParseResult;
use crate::pipeline::analyze::DocumentMetrics;
use crate::pipeline::input::{self, ResolvedInput};
use crate::selector::StrategySelector;
use tracing::info;

/// Parse a local PDF or HTTP(S) URL.
///
/// `max_pages` defaults to `config.default_max_pages`.
///
/// # Example
/// ```rust,no_run
/// use takeoff_parser::{parse_document, ParsingConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ParsingConfig::from_env();
/// let result = parse_document("plans/A-101.pdf", Some(3), &config).await?;
/// if let Some(data) = result.extracted() {
///     println!("{} bid items", data.bid_items.len());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn parse_document(
    input_str: impl AsRef<str>,
    max_pages: Option<usize>,
    config: &ParsingConfig,
) -> Result<ParseResult, TakeoffError> {
    let input_str = input_str.as_ref();
    info!("Starting parse: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    Ok(run(&resolved, max_pages, config).await)
}

/// Synchronous wrapper around [`parse_document`].
///
/// Creates a temporary tokio runtime internally; do not call from inside one.
pub fn parse_document_sync(
    input_str: impl AsRef<str>,
    max_pages: Option<usize>,
    config: &ParsingConfig,
) -> Result<ParseResult, TakeoffError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TakeoffError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse_document(input_str, max_pages, config))
}

/// Parse a PDF held in memory.
///
/// The bytes are written to a temp directory that is removed on return.
/// `file_name` only names the temp file.
pub async fn parse_document_from_bytes(
    bytes: &[u8],
    file_name: &str,
    max_pages: Option<usize>,
    config: &ParsingConfig,
) -> Result<ParseResult, TakeoffError> {
    let resolved = input::resolve_bytes(bytes, file_name)?;
    Ok(run(&resolved, max_pages, config).await)
}

/// Profile a document without parsing it. No model or API key needed.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ParsingConfig,
) -> Result<DocumentMetrics, TakeoffError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let selector = StrategySelector::new(config);
    Ok(selector.analyze(resolved.path()).await)
}

async fn run(resolved: &ResolvedInput, max_pages: Option<usize>, config: &ParsingConfig) -> ParseResult {
    let max_pages = max_pages.unwrap_or(config.default_max_pages).max(1);
    StrategySelector::new(config)
        .parse_with_fallback(resolved.path(), max_pages)
        .await
}
