//! Single-shot strategy: the whole PDF goes to the model as one attachment.
//!
//! Cheapest and fastest when the document is small enough for the provider
//! to ingest natively, which is why it ranks first. It never rasterises
//! anything itself.

use crate::config::ParsingConfig;
use crate::error::TakeoffError;
use crate::output::{ParseResult, StrategyType};
use crate::pipeline::aggregate::{calculate_confidence, ConfidenceWeights};
use crate::pipeline::analyze::DocumentMetrics;
use crate::pipeline::llm::{parse_json_response, VisionModel, VisionRequest};
use crate::prompts::FULL_DOCUMENT_PROMPT;
use crate::strategy::{elapsed_ms, ParsingStrategy};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const MAX_FILE_SIZE_MB: f64 = 50.0;
const MAX_PAGES: usize = 10;
const MAX_DPI: u32 = 300;

pub struct OpenAiNativeStrategy {
    model: Option<Arc<dyn VisionModel>>,
    enabled: bool,
    max_tokens: usize,
    temperature: f32,
    weights: ConfidenceWeights,
}

impl OpenAiNativeStrategy {
    pub fn new(config: &ParsingConfig, model: Option<Arc<dyn VisionModel>>) -> Self {
        Self {
            model,
            enabled: config.enable_openai_parsing,
            max_tokens: config.openai_max_tokens,
            temperature: config.openai_temperature,
            weights: config.confidence_weights,
        }
    }

    async fn run(&self, path: &Path, max_pages: usize, start: Instant) -> Result<ParseResult, TakeoffError> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| TakeoffError::ProviderNotConfigured {
                provider: "openai".into(),
                hint: "OpenAI client not initialized".into(),
            })?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TakeoffError::Internal(format!("Failed to read PDF: {e}")))?;
        let attachment = ImageData::new(STANDARD.encode(&bytes), "application/pdf");

        let text = model
            .complete(VisionRequest {
                unit: "document".into(),
                prompt: FULL_DOCUMENT_PROMPT.to_string(),
                images: vec![attachment],
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;

        let data = parse_json_response(&text).ok_or(TakeoffError::UnparseableResponse)?;
        let confidence = calculate_confidence(&data, &self.weights);
        let elapsed = elapsed_ms(start);
        info!(
            "OpenAI native parsing complete: confidence={:.2}, time={}ms",
            confidence, elapsed
        );

        Ok(
            ParseResult::success(StrategyType::OpenAiNative, data, confidence, max_pages, elapsed)
                .with_metadata("method", "native_pdf")
                .with_metadata("model", model.name()),
        )
    }
}

#[async_trait]
impl ParsingStrategy for OpenAiNativeStrategy {
    fn strategy_type(&self) -> StrategyType {
        StrategyType::OpenAiNative
    }

    async fn parse(&self, path: &Path, max_pages: usize) -> ParseResult {
        let start = Instant::now();
        info!("Starting OpenAI native strategy for {}", path.display());
        match self.run(path, max_pages, start).await {
            Ok(result) => result,
            Err(e) => {
                error!("OpenAI native parsing failed: {}", e);
                ParseResult::failure(Some(StrategyType::OpenAiNative), e.to_string(), elapsed_ms(start))
            }
        }
    }

    fn can_handle(&self, metrics: &DocumentMetrics) -> bool {
        metrics.file_size_mb < MAX_FILE_SIZE_MB
            && metrics.page_count <= MAX_PAGES
            && metrics.average_dpi.is_none_or(|d| d < MAX_DPI)
    }

    fn is_available(&self) -> bool {
        self.enabled && self.model.is_some()
    }
}
