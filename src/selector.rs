//! Strategy selection and the fallback chain.
//!
//! ```text
//!  analyze ──▶ available? ──▶ can_handle? ──▶ sort by priority ──▶ OCR last
//!                                │
//!                 (none capable) └──▶ every available strategy
//! ```
//!
//! The chain is tried strictly in order, each strategy at most once. The first
//! successful result is normalized and returned; every failure is recorded so
//! that a total failure explains itself in one message.
//!
//! ## Why catch panics?
//!
//! Strategies call into pdfium, the image codecs and third-party clients. A
//! panic in one of them should cost that strategy, not the whole request, so
//! each `parse` future runs under `catch_unwind` and a panic is recorded as
//! "<name> exception: …" like any other failure.

use crate::config::ParsingConfig;
use crate::output::{ParseResult, StrategyInfo};
use crate::pipeline::analyze::{DocumentMetrics, PdfAnalyzer};
use crate::pipeline::llm::{LlmVisionModel, VisionModel};
use crate::pipeline::normalize::normalize_value;
use crate::pipeline::ocr::Tesseract;
use crate::pipeline::render::{run_blocking, PdfBackend, PdfiumBackend};
use crate::strategy::{
    elapsed_ms, ClaudeTilingStrategy, OpenAiNativeStrategy, ParsingStrategy, Strategy,
    TesseractOcrStrategy, OCR_PRIORITY,
};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Routes a document through the strategy chain.
pub struct StrategySelector<S: ParsingStrategy = Strategy> {
    config: ParsingConfig,
    analyzer: PdfAnalyzer,
    strategies: Vec<S>,
}

impl StrategySelector<Strategy> {
    /// Build the production strategy set from `config`.
    ///
    /// Models come from the pre-built providers when set, otherwise from the
    /// configured API key, otherwise from the provider factory reading the
    /// environment. A model that cannot be built leaves its strategy
    /// unavailable.
    pub fn new(config: &ParsingConfig) -> Self {
        let backend: Arc<dyn PdfBackend> = Arc::new(PdfiumBackend::from_config(config));

        let claude = vision_model(
            config,
            "anthropic",
            &config.claude_model,
            config.claude_provider.clone(),
            config.anthropic_api_key.as_deref(),
        );
        let openai = vision_model(
            config,
            "openai",
            &config.openai_model,
            config.openai_provider.clone(),
            config.openai_api_key.as_deref(),
        );
        let ocr = Arc::new(Tesseract::new(&config.tesseract_lang));

        let strategies = vec![
            Strategy::OpenAiNative(OpenAiNativeStrategy::new(config, openai)),
            Strategy::ClaudeTiling(ClaudeTilingStrategy::new(config, claude, backend.clone())),
            Strategy::TesseractOcr(TesseractOcrStrategy::new(config, backend.clone(), ocr)),
        ];

        Self::with_strategies(config, PdfAnalyzer::new(backend), strategies)
    }
}

impl<S: ParsingStrategy> StrategySelector<S> {
    /// Use an explicit strategy set, in declaration order.
    pub fn with_strategies(config: &ParsingConfig, analyzer: PdfAnalyzer, strategies: Vec<S>) -> Self {
        if config.log_strategy_selection {
            info!("Initialized strategy selector with strategies:");
            for s in &strategies {
                info!(
                    "  - {}: available={}, priority={}",
                    s.name(),
                    s.is_available(),
                    s.priority()
                );
            }
        }
        Self {
            config: config.clone(),
            analyzer,
            strategies,
        }
    }

    /// Profile the document on the blocking pool.
    pub async fn analyze(&self, path: &Path) -> DocumentMetrics {
        let analyzer = self.analyzer.clone();
        let owned = path.to_path_buf();
        run_blocking("Analysis", move || Ok(analyzer.analyze(&owned)))
            .await
            .unwrap_or_else(|e| {
                warn!("Document analysis failed, using defaults: {}", e);
                DocumentMetrics::new(path, 0.0, 1, None, false)
            })
    }

    /// Ordered strategies to try for this document.
    pub async fn analyze_and_select(&self, path: &Path, metrics: Option<DocumentMetrics>) -> Vec<&S> {
        let metrics = match metrics {
            Some(m) => m,
            None => self.analyze(path).await,
        };
        self.select(&metrics)
    }

    fn select(&self, metrics: &DocumentMetrics) -> Vec<&S> {
        let available: Vec<&S> = self.strategies.iter().filter(|s| s.is_available()).collect();
        if available.is_empty() {
            warn!("No strategies available");
            return Vec::new();
        }

        let mut chain: Vec<&S> = available
            .iter()
            .copied()
            .filter(|s| s.can_handle(metrics))
            .collect();
        if chain.is_empty() {
            warn!("No strategies can handle document, using all available");
            chain = available;
        }

        chain.sort_by_key(|s| s.priority());
        let (mut chain, ocr): (Vec<&S>, Vec<&S>) =
            chain.into_iter().partition(|s| s.priority() != OCR_PRIORITY);
        chain.extend(ocr);

        if self.config.log_strategy_selection {
            info!(
                "Document metrics: size={:.2}MB, pages={}, dpi={:?}, complexity={:.2}",
                metrics.file_size_mb, metrics.page_count, metrics.average_dpi, metrics.complexity_score
            );
            info!(
                "Strategy chain ({}): {}",
                chain.len(),
                chain.iter().map(|s| s.name()).collect::<Vec<_>>().join(" -> ")
            );
        }
        chain
    }

    /// Analyze, select and run the chain until one strategy succeeds.
    pub async fn parse_with_fallback(&self, path: &Path, max_pages: usize) -> ParseResult {
        let start = Instant::now();
        info!("Analyzing document: {}", path.display());
        let metrics = self.analyze(path).await;
        if let Some(cb) = &self.config.progress_callback {
            cb.on_analysis_complete(&metrics);
        }

        let chain = self.select(&metrics);
        if chain.is_empty() {
            error!("No strategies available");
            return self.finish(ParseResult::failure(
                None,
                "No parsing strategies available",
                elapsed_ms(start),
            ));
        }

        let mut errors = Vec::new();
        for (i, strategy) in chain.iter().enumerate() {
            let name = strategy.name();
            info!("Attempting strategy {}/{}: {}", i + 1, chain.len(), name);
            if let Some(cb) = &self.config.progress_callback {
                cb.on_strategy_start(name, i + 1, chain.len());
            }

            let message = match AssertUnwindSafe(strategy.parse(path, max_pages))
                .catch_unwind()
                .await
            {
                Ok(mut result) if result.success => {
                    result.data = result.data.as_ref().map(normalize_value);
                    info!(
                        "Success with {}: confidence={:.2}, time={}ms",
                        name, result.confidence_score, result.processing_time_ms
                    );
                    return self.finish(result);
                }
                Ok(result) => {
                    let msg = format!(
                        "{} failed: {}",
                        name,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                    warn!("{}", msg);
                    msg
                }
                Err(panic) => {
                    let msg = format!("{} exception: {}", name, panic_message(&*panic));
                    error!("{}", msg);
                    msg
                }
            };

            if let Some(cb) = &self.config.progress_callback {
                cb.on_strategy_failed(name, &message);
            }
            errors.push(message);
        }

        error!("All strategies failed");
        self.finish(ParseResult::failure(
            None,
            format!("All parsing strategies failed. {}", errors.join("; ")),
            elapsed_ms(start),
        ))
    }

    fn finish(&self, result: ParseResult) -> ParseResult {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_parse_complete(
                result.success,
                result.strategy_used.map(|t| t.display_name()),
            );
        }
        result
    }

    /// Names of the strategies that are currently available.
    pub fn available_strategies(&self) -> Vec<String> {
        self.strategies
            .iter()
            .filter(|s| s.is_available())
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn strategy_info(&self) -> Vec<StrategyInfo> {
        self.strategies
            .iter()
            .map(|s| StrategyInfo {
                name: s.name().to_string(),
                strategy_type: s.strategy_type(),
                available: s.is_available(),
                priority: s.priority(),
            })
            .collect()
    }
}

fn vision_model(
    config: &ParsingConfig,
    provider_name: &str,
    model: &str,
    provider: Option<Arc<dyn edgequake_llm::LLMProvider>>,
    api_key: Option<&str>,
) -> Option<Arc<dyn VisionModel>> {
    if let Some(p) = provider {
        return Some(Arc::new(LlmVisionModel::new(
            p,
            model,
            config.max_retries,
            config.retry_backoff_ms,
        )));
    }
    let (retries, backoff) = (config.max_retries, config.retry_backoff_ms);
    match api_key {
        Some(key) => match LlmVisionModel::with_api_key(provider_name, key, model, retries, backoff) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                warn!("Failed to initialize {} client: {}", provider_name, e);
                None
            }
        },
        // no key in the config: the factory may still find one in the environment
        None => match LlmVisionModel::from_factory(provider_name, model, retries, backoff) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                debug!("No {} client: {}", provider_name, e);
                None
            }
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
