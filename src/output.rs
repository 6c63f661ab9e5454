//! Result and schema types returned to callers.
//!
//! [`ParseResult`] is what every strategy and the selector hand back.
//! Once a result leaves the selector its `data` follows the normalized
//! [`ExtractedData`] schema; inside the engine it may still carry the raw
//! model payload.

use crate::error::TakeoffError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

// ── Strategy identity ────────────────────────────────────────────────────

/// The closed set of parsing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyType {
    #[serde(rename = "openai_native")]
    OpenAiNative,
    /// Reserved rank; no implementation is ever constructed.
    #[serde(rename = "document_ai")]
    DocumentAi,
    #[serde(rename = "claude_tiling")]
    ClaudeTiling,
    #[serde(rename = "tesseract_ocr")]
    TesseractOcr,
}

impl StrategyType {
    /// Stable snake_case identifier, identical to the serialised form.
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyType::OpenAiNative => "openai_native",
            StrategyType::DocumentAi => "document_ai",
            StrategyType::ClaudeTiling => "claude_tiling",
            StrategyType::TesseractOcr => "tesseract_ocr",
        }
    }

    /// Human-readable name used in logs and failure messages.
    pub fn display_name(self) -> &'static str {
        match self {
            StrategyType::OpenAiNative => "OpenAI Native",
            StrategyType::DocumentAi => "Document AI",
            StrategyType::ClaudeTiling => "Claude Tiling",
            StrategyType::TesseractOcr => "Tesseract OCR",
        }
    }

    /// Position in the preference order; lower is tried first.
    pub fn default_priority(self) -> u8 {
        match self {
            StrategyType::OpenAiNative => 1,
            StrategyType::DocumentAi => 2,
            StrategyType::ClaudeTiling => 3,
            StrategyType::TesseractOcr => 4,
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Introspection record from [`crate::selector::StrategySelector::strategy_info`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    pub available: bool,
    pub priority: u8,
}

// ── ParseResult ──────────────────────────────────────────────────────────

/// Outcome of one strategy or of a whole fallback chain.
///
/// `success == false` always means `data` is `None` and `error` is set;
/// the constructors are the only way this crate builds one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(rename = "strategy")]
    pub strategy_used: Option<StrategyType>,
    #[serde(rename = "confidence")]
    pub confidence_score: f64,
    #[serde(rename = "pages_analyzed")]
    pub pages_processed: usize,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ParseResult {
    /// A successful result. Confidence is clamped to `[0, 1]`.
    pub fn success(
        strategy: StrategyType,
        data: Value,
        confidence: f64,
        pages_processed: usize,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            strategy_used: Some(strategy),
            confidence_score: confidence.clamp(0.0, 1.0),
            pages_processed,
            processing_time_ms,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// A failed result. `strategy` is `None` for chain-level failures.
    pub fn failure(
        strategy: Option<StrategyType>,
        error: impl Into<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            strategy_used: strategy,
            confidence_score: 0.0,
            pages_processed: 0,
            processing_time_ms,
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Decode `data` into the normalized schema.
    ///
    /// Returns `None` for failed results or when `data` does not follow the
    /// schema (e.g. a raw payload that has not been through the normalizer).
    pub fn extracted(&self) -> Option<ExtractedData> {
        self.data
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Write the result as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), TakeoffError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TakeoffError::Internal(format!("Failed to serialise result: {e}")))?;
        std::fs::write(path, json).map_err(|source| TakeoffError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Normalized schema ────────────────────────────────────────────────────

/// Canonical extraction payload handed to downstream estimating code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub bid_items: Vec<BidItem>,
    pub specifications: Vec<Specification>,
    pub project_info: ProjectInfo,
    pub materials: Vec<Material>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.bid_items.is_empty()
            && self.specifications.is_empty()
            && self.materials.is_empty()
            && self.project_info == ProjectInfo::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidItem {
    pub item_number: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub code: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: Option<String>,
    pub location: Option<String>,
    pub bid_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub unit: Option<String>,
    pub specification: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_has_no_data() {
        let r = ParseResult::failure(Some(StrategyType::ClaudeTiling), "boom", 12);
        assert!(!r.success);
        assert!(r.data.is_none());
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.confidence_score, 0.0);
    }

    #[test]
    fn success_clamps_confidence() {
        let r = ParseResult::success(StrategyType::OpenAiNative, json!({}), 1.7, 2, 5);
        assert!(r.success);
        assert!(r.error.is_none());
        assert_eq!(r.confidence_score, 1.0);
    }

    #[test]
    fn serialises_with_public_key_names() {
        let r = ParseResult::success(StrategyType::TesseractOcr, json!({}), 0.3, 4, 9)
            .with_metadata("method", "ocr");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["strategy"], "tesseract_ocr");
        assert_eq!(v["confidence"], 0.3);
        assert_eq!(v["pages_analyzed"], 4);
        assert_eq!(v["metadata"]["method"], "ocr");
        assert!(v.get("timestamp").is_some());
    }

    #[test]
    fn strategy_priorities_are_ordered() {
        let mut all = [
            StrategyType::TesseractOcr,
            StrategyType::ClaudeTiling,
            StrategyType::DocumentAi,
            StrategyType::OpenAiNative,
        ];
        all.sort_by_key(|s| s.default_priority());
        assert_eq!(all[0], StrategyType::OpenAiNative);
        assert_eq!(all[3], StrategyType::TesseractOcr);
    }

    #[test]
    fn extracted_decodes_normalized_payload() {
        let data = ExtractedData {
            bid_items: vec![BidItem {
                item_number: Some("101".into()),
                description: Some("Clearing and Grubbing".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let r = ParseResult::success(
            StrategyType::ClaudeTiling,
            serde_json::to_value(&data).unwrap(),
            0.6,
            1,
            1,
        );
        assert_eq!(r.extracted(), Some(data));
    }

    #[test]
    fn raw_text_only_serialised_when_present() {
        let v = serde_json::to_value(ExtractedData::default()).unwrap();
        assert!(v.get("raw_text").is_none());
        assert!(v["project_info"]["name"].is_null());
    }
}
