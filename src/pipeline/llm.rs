//! Vision-model calls and response decoding.
//!
//! Strategies talk to models through the [`VisionModel`] trait: one prompt,
//! any number of images, raw text back. [`LlmVisionModel`] is the production
//! implementation over an `edgequake_llm` provider; tests substitute scripted
//! models.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient and frequent when a dozen tiles are
//! in flight. Exponential backoff (`retry_backoff_ms * 2^(attempt-1)`, saturating) with a
//! 500 ms base and 3 retries waits 500 ms → 1 s → 2 s per call.
//!
//! ## Response decoding
//!
//! Models asked for "ONLY JSON" still wrap it in Markdown fences now and
//! then. [`parse_json_response`] tries the bare text first, then the first
//! fenced block; anything else counts as no JSON.

use crate::error::TakeoffError;
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, ImageData, LLMProvider, OpenAIProvider,
    ProviderFactory,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// One multimodal request.
pub struct VisionRequest {
    /// Unit name for logs, e.g. `"page 2 tile 7"`.
    pub unit: String,
    pub prompt: String,
    pub images: Vec<ImageData>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A model that reads images and answers in text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier reported in result metadata.
    fn name(&self) -> &str;

    /// Send `request` and return the response text.
    async fn complete(&self, request: VisionRequest) -> Result<String, TakeoffError>;
}

/// [`VisionModel`] over an `edgequake_llm` provider, with retries.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmVisionModel {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            max_retries,
            retry_backoff_ms,
        }
    }

    /// Build an Anthropic or OpenAI provider around an explicit API key.
    pub fn with_api_key(
        provider_name: &str,
        api_key: &str,
        model: &str,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, TakeoffError> {
        let provider: Arc<dyn LLMProvider> = match provider_name {
            "anthropic" => Arc::new(AnthropicProvider::new(api_key).with_model(model)),
            "openai" => Arc::new(OpenAIProvider::new(api_key).with_model(model)),
            other => {
                return Err(TakeoffError::ProviderNotConfigured {
                    provider: other.to_string(),
                    hint: "no keyed constructor; pass a pre-built provider".into(),
                })
            }
        };
        Ok(Self::new(provider, model, max_retries, retry_backoff_ms))
    }

    /// Build a provider by name (`"anthropic"`, `"openai"`, …).
    ///
    /// The factory reads the provider's API key from the environment.
    pub fn from_factory(
        provider_name: &str,
        model: &str,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self, TakeoffError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            TakeoffError::ProviderNotConfigured {
                provider: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, model, max_retries, retry_backoff_ms))
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: VisionRequest) -> Result<String, TakeoffError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user_with_images(
            &request.prompt,
            request.images,
        )];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    request.unit, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        request.unit,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!(
                        "{}: attempt {} failed: {}",
                        request.unit,
                        attempt + 1,
                        err_msg
                    );
                    last_err = Some(err_msg);
                }
            }
        }

        Err(TakeoffError::LlmApiError {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

// ── Response decoding ────────────────────────────────────────────────────

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?[ \t]*\r?\n?(.*?)```").expect("valid regex"));

/// Recover a JSON object from a model response.
///
/// Tries the whole text, then the first fenced block (```` ```json ```` or
/// bare ```` ``` ````). Returns `None` when neither decodes to an object.
pub fn parse_json_response(text: &str) -> Option<Value> {
    let as_object = |s: &str| match serde_json::from_str::<Value>(s.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    };

    as_object(text).or_else(|| {
        FENCED_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| as_object(m.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 80), u64::MAX);
        assert_eq!(backoff_ms(0, 200), 0);
    }

    #[test]
    fn keyed_constructor_uses_requested_model() {
        let claude = LlmVisionModel::with_api_key("anthropic", "sk-ant-test", "claude-test", 0, 0).unwrap();
        assert_eq!(claude.name(), "claude-test");
        let openai = LlmVisionModel::with_api_key("openai", "sk-test", "gpt-test", 0, 0).unwrap();
        assert_eq!(openai.name(), "gpt-test");
        let err = LlmVisionModel::with_api_key("gemini", "k", "m", 0, 0).err().unwrap();
        assert!(matches!(err, TakeoffError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn decodes_bare_object() {
        let v = parse_json_response(r#"{"regions": []}"#).unwrap();
        assert_eq!(v, json!({"regions": []}));
    }

    #[test]
    fn decodes_json_fence_with_prose() {
        let text = "Here is what I found:\n```json\n{\"bid_items\": [{\"item_number\": \"1\"}]}\n```\nLet me know!";
        let v = parse_json_response(text).unwrap();
        assert_eq!(v["bid_items"][0]["item_number"], "1");
    }

    #[test]
    fn decodes_bare_fence() {
        let text = "```\n{\"materials\": []}\n```";
        assert_eq!(parse_json_response(text), Some(json!({"materials": []})));
    }

    #[test]
    fn rejects_non_objects_and_prose() {
        assert_eq!(parse_json_response("[1, 2, 3]"), None);
        assert_eq!(parse_json_response("I could not read this tile."), None);
        assert_eq!(parse_json_response("```json\nnot json\n```"), None);
        assert_eq!(parse_json_response(""), None);
    }
}
