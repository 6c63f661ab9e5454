//! Configuration for the multi-strategy parsing engine.
//!
//! All engine behaviour is controlled through one [`ParsingConfig`], built
//! once at process start (via [`ParsingConfig::from_env`] or the
//! [`ParsingConfigBuilder`]) and passed by reference into the selector and
//! every strategy constructor. Nothing in the crate reads the environment on
//! its own.

use crate::error::TakeoffError;
use crate::pipeline::aggregate::ConfidenceWeights;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default Anthropic model for the tiling strategy.
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Default OpenAI model for the single-shot strategy.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Configuration for document parsing.
///
/// # Example
/// ```rust
/// use takeoff_parser::ParsingConfig;
///
/// let config = ParsingConfig::builder()
///     .detail_scan_dpi(300)
///     .max_concurrent_tiles(8)
///     .fuzzy_match_threshold(90.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.detail_scan_dpi, 300);
/// ```
#[derive(Clone)]
pub struct ParsingConfig {
    // ── Credentials ──────────────────────────────────────────────────────
    /// Anthropic API key. Its presence makes the tiling strategy available.
    pub anthropic_api_key: Option<String>,

    /// OpenAI API key. Its presence makes the single-shot strategy available.
    pub openai_api_key: Option<String>,

    /// Pre-constructed provider for the tiling strategy. Takes precedence
    /// over building one from `claude_model`.
    pub claude_provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed provider for the single-shot strategy.
    pub openai_provider: Option<Arc<dyn LLMProvider>>,

    // ── Strategy toggles ─────────────────────────────────────────────────
    pub enable_openai_parsing: bool,
    pub enable_claude_parsing: bool,
    pub enable_tesseract_parsing: bool,

    // ── Image processing ─────────────────────────────────────────────────
    /// Per-image payload budget in MB. Default: 4.5 (the Anthropic ceiling is
    /// 5 MB per image; the rest is headroom for base64 framing).
    pub max_image_size_mb: f64,

    /// Overlap between neighbouring tiles, 0.0–0.5. Default: 0.1.
    ///
    /// Text straddling a tile seam would otherwise be cut in half on both
    /// sides; the duplicate reads this causes are removed by fuzzy dedup.
    pub tile_overlap_percent: f64,

    /// DPI for the coarse ROI scan. Default: 100.
    pub coarse_scan_dpi: u32,

    /// DPI for the detail pass. Default: 200.
    pub detail_scan_dpi: u32,

    /// DPI for OCR rasterisation. Default: 200.
    pub ocr_dpi: u32,

    /// Longest rendered edge in pixels. Default: 12 000.
    ///
    /// A 36×48 in sheet at 300 DPI is 10 800 × 14 400 px; the cap keeps a
    /// single render under ~600 MB of RGBA.
    pub max_rendered_pixels: u32,

    // ── Limits ───────────────────────────────────────────────────────────
    /// Tiles in flight at once during the detail pass. Default: 5.
    pub max_concurrent_tiles: usize,

    /// Pages parsed when the caller does not say. Default: 5.
    pub default_max_pages: usize,

    // ── Models ───────────────────────────────────────────────────────────
    pub claude_model: String,
    pub claude_max_tokens: usize,
    pub claude_temperature: f32,
    pub openai_model: String,
    pub openai_max_tokens: usize,
    pub openai_temperature: f32,

    /// Retries per inference call on transient failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in ms, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    // ── Dedup ────────────────────────────────────────────────────────────
    /// Similarity (0–100) at or above which two extracted items merge. Default: 85.
    pub fuzzy_match_threshold: f64,

    /// IoU at or above which two ROIs on a page merge. Default: 0.5.
    pub merge_iou_threshold: f64,

    /// Weights for the advisory confidence score.
    pub confidence_weights: ConfidenceWeights,

    // ── Collaborators ────────────────────────────────────────────────────
    /// Path to a pdfium shared library. None binds the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// PDF user password for encrypted plan sets.
    pub password: Option<String>,

    /// Tesseract language codes, e.g. "eng" or "eng+fra". Default: "eng".
    pub tesseract_lang: String,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    // ── Logging / events ─────────────────────────────────────────────────
    /// Log document metrics and the chosen chain. Default: true.
    pub log_strategy_selection: bool,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            openai_api_key: None,
            claude_provider: None,
            openai_provider: None,
            enable_openai_parsing: true,
            enable_claude_parsing: true,
            enable_tesseract_parsing: true,
            max_image_size_mb: 4.5,
            tile_overlap_percent: 0.1,
            coarse_scan_dpi: 100,
            detail_scan_dpi: 200,
            ocr_dpi: 200,
            max_rendered_pixels: 12_000,
            max_concurrent_tiles: 5,
            default_max_pages: 5,
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            claude_max_tokens: 16_000,
            claude_temperature: 0.0,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_max_tokens: 16_000,
            openai_temperature: 0.0,
            max_retries: 3,
            retry_backoff_ms: 500,
            fuzzy_match_threshold: 85.0,
            merge_iou_threshold: 0.5,
            confidence_weights: ConfidenceWeights::default(),
            pdfium_library_path: None,
            password: None,
            tesseract_lang: "eng".to_string(),
            download_timeout_secs: 120,
            log_strategy_selection: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParsingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = |k: &Option<String>| k.as_ref().map(|_| "<set>");
        f.debug_struct("ParsingConfig")
            .field("anthropic_api_key", &secret(&self.anthropic_api_key))
            .field("openai_api_key", &secret(&self.openai_api_key))
            .field(
                "claude_provider",
                &self.claude_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field(
                "openai_provider",
                &self.openai_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .field("enable_openai_parsing", &self.enable_openai_parsing)
            .field("enable_claude_parsing", &self.enable_claude_parsing)
            .field("enable_tesseract_parsing", &self.enable_tesseract_parsing)
            .field("max_image_size_mb", &self.max_image_size_mb)
            .field("tile_overlap_percent", &self.tile_overlap_percent)
            .field("coarse_scan_dpi", &self.coarse_scan_dpi)
            .field("detail_scan_dpi", &self.detail_scan_dpi)
            .field("ocr_dpi", &self.ocr_dpi)
            .field("max_concurrent_tiles", &self.max_concurrent_tiles)
            .field("default_max_pages", &self.default_max_pages)
            .field("claude_model", &self.claude_model)
            .field("openai_model", &self.openai_model)
            .field("fuzzy_match_threshold", &self.fuzzy_match_threshold)
            .field("merge_iou_threshold", &self.merge_iou_threshold)
            .field("tesseract_lang", &self.tesseract_lang)
            .finish()
    }
}

impl ParsingConfig {
    /// Create a new builder starting from the defaults.
    pub fn builder() -> ParsingConfigBuilder {
        ParsingConfigBuilder {
            config: Self::default(),
        }
    }

    /// Continue adjusting an existing configuration, e.g. one from [`Self::from_env`].
    pub fn into_builder(self) -> ParsingConfigBuilder {
        ParsingConfigBuilder { config: self }
    }

    /// Load the configuration from process environment variables.
    ///
    /// Unset or unparseable variables keep their defaults. Call this once at
    /// start-up and share the result.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: bool| {
            non_empty(key)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(default)
        };
        fn parsed<T: FromStr>(raw: Option<String>, default: T) -> T {
            raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }

        Self {
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            enable_openai_parsing: flag("ENABLE_OPENAI_PARSING", d.enable_openai_parsing),
            enable_claude_parsing: flag("ENABLE_CLAUDE_PARSING", d.enable_claude_parsing),
            enable_tesseract_parsing: flag("ENABLE_TESSERACT_PARSING", d.enable_tesseract_parsing),
            max_image_size_mb: parsed(non_empty("MAX_IMAGE_SIZE_MB"), d.max_image_size_mb),
            tile_overlap_percent: parsed(non_empty("TILE_OVERLAP_PERCENT"), d.tile_overlap_percent)
                .clamp(0.0, 0.5),
            coarse_scan_dpi: parsed(non_empty("COARSE_SCAN_DPI"), d.coarse_scan_dpi),
            detail_scan_dpi: parsed(non_empty("DETAIL_SCAN_DPI"), d.detail_scan_dpi),
            max_concurrent_tiles: parsed(non_empty("MAX_CONCURRENT_TILES"), d.max_concurrent_tiles)
                .max(1),
            default_max_pages: parsed(non_empty("DEFAULT_MAX_PAGES"), d.default_max_pages).max(1),
            claude_model: non_empty("CLAUDE_MODEL").unwrap_or(d.claude_model),
            claude_max_tokens: parsed(non_empty("CLAUDE_MAX_TOKENS"), d.claude_max_tokens),
            claude_temperature: parsed(non_empty("CLAUDE_TEMPERATURE"), d.claude_temperature),
            openai_model: non_empty("OPENAI_MODEL").unwrap_or(d.openai_model),
            openai_max_tokens: parsed(non_empty("OPENAI_MAX_TOKENS"), d.openai_max_tokens),
            openai_temperature: parsed(non_empty("OPENAI_TEMPERATURE"), d.openai_temperature),
            fuzzy_match_threshold: parsed(non_empty("FUZZY_MATCH_THRESHOLD"), d.fuzzy_match_threshold)
                .clamp(0.0, 100.0),
            merge_iou_threshold: parsed(non_empty("MERGE_IOU_THRESHOLD"), d.merge_iou_threshold)
                .clamp(0.0, 1.0),
            log_strategy_selection: flag("LOG_STRATEGY_SELECTION", d.log_strategy_selection),
            pdfium_library_path: non_empty("PDFIUM_LIB_PATH").map(PathBuf::from),
            tesseract_lang: non_empty("TESSERACT_LANG").unwrap_or(d.tesseract_lang),
            ..d
        }
    }

    /// Per-image payload budget in bytes.
    pub fn max_image_size_bytes(&self) -> usize {
        (self.max_image_size_mb * 1024.0 * 1024.0) as usize
    }
}

/// Builder for [`ParsingConfig`].
#[derive(Debug)]
pub struct ParsingConfigBuilder {
    config: ParsingConfig,
}

impl ParsingConfigBuilder {
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.anthropic_api_key = Some(key.into());
        self
    }

    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(key.into());
        self
    }

    pub fn claude_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.claude_provider = Some(provider);
        self
    }

    pub fn openai_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.openai_provider = Some(provider);
        self
    }

    pub fn enable_openai_parsing(mut self, v: bool) -> Self {
        self.config.enable_openai_parsing = v;
        self
    }

    pub fn enable_claude_parsing(mut self, v: bool) -> Self {
        self.config.enable_claude_parsing = v;
        self
    }

    pub fn enable_tesseract_parsing(mut self, v: bool) -> Self {
        self.config.enable_tesseract_parsing = v;
        self
    }

    pub fn max_image_size_mb(mut self, mb: f64) -> Self {
        self.config.max_image_size_mb = mb;
        self
    }

    pub fn tile_overlap_percent(mut self, overlap: f64) -> Self {
        self.config.tile_overlap_percent = overlap.clamp(0.0, 0.5);
        self
    }

    pub fn coarse_scan_dpi(mut self, dpi: u32) -> Self {
        self.config.coarse_scan_dpi = dpi.clamp(36, 300);
        self
    }

    pub fn detail_scan_dpi(mut self, dpi: u32) -> Self {
        self.config.detail_scan_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn ocr_dpi(mut self, dpi: u32) -> Self {
        self.config.ocr_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(500);
        self
    }

    pub fn max_concurrent_tiles(mut self, n: usize) -> Self {
        self.config.max_concurrent_tiles = n.max(1);
        self
    }

    pub fn default_max_pages(mut self, n: usize) -> Self {
        self.config.default_max_pages = n.max(1);
        self
    }

    pub fn claude_model(mut self, model: impl Into<String>) -> Self {
        self.config.claude_model = model.into();
        self
    }

    pub fn claude_max_tokens(mut self, n: usize) -> Self {
        self.config.claude_max_tokens = n;
        self
    }

    pub fn openai_model(mut self, model: impl Into<String>) -> Self {
        self.config.openai_model = model.into();
        self
    }

    pub fn openai_max_tokens(mut self, n: usize) -> Self {
        self.config.openai_max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        self.config.claude_temperature = t;
        self.config.openai_temperature = t;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn fuzzy_match_threshold(mut self, threshold: f64) -> Self {
        self.config.fuzzy_match_threshold = threshold.clamp(0.0, 100.0);
        self
    }

    pub fn merge_iou_threshold(mut self, threshold: f64) -> Self {
        self.config.merge_iou_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn confidence_weights(mut self, weights: ConfidenceWeights) -> Self {
        self.config.confidence_weights = weights;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn tesseract_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_lang = lang.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn log_strategy_selection(mut self, v: bool) -> Self {
        self.config.log_strategy_selection = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParsingConfig, TakeoffError> {
        let c = &self.config;
        if !(c.max_image_size_mb > 0.0) {
            return Err(TakeoffError::InvalidConfig(format!(
                "max_image_size_mb must be > 0, got {}",
                c.max_image_size_mb
            )));
        }
        if c.coarse_scan_dpi > c.detail_scan_dpi {
            return Err(TakeoffError::InvalidConfig(format!(
                "coarse_scan_dpi ({}) must not exceed detail_scan_dpi ({})",
                c.coarse_scan_dpi, c.detail_scan_dpi
            )));
        }
        if c.tesseract_lang.trim().is_empty() {
            return Err(TakeoffError::InvalidConfig(
                "tesseract_lang must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let c = ParsingConfig::default();
        assert_eq!(c.coarse_scan_dpi, 100);
        assert_eq!(c.detail_scan_dpi, 200);
        assert_eq!(c.max_concurrent_tiles, 5);
        assert_eq!(c.default_max_pages, 5);
        assert_eq!(c.fuzzy_match_threshold, 85.0);
        assert_eq!(c.max_image_size_bytes(), (4.5 * 1024.0 * 1024.0) as usize);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = ParsingConfig::builder()
            .tile_overlap_percent(0.9)
            .max_concurrent_tiles(0)
            .fuzzy_match_threshold(140.0)
            .merge_iou_threshold(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.tile_overlap_percent, 0.5);
        assert_eq!(c.max_concurrent_tiles, 1);
        assert_eq!(c.fuzzy_match_threshold, 100.0);
        assert_eq!(c.merge_iou_threshold, 0.0);
    }

    #[test]
    fn builder_rejects_coarse_above_detail() {
        let err = ParsingConfig::builder()
            .coarse_scan_dpi(200)
            .detail_scan_dpi(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("coarse_scan_dpi"));
    }

    #[test]
    fn builder_rejects_zero_image_budget() {
        assert!(ParsingConfig::builder()
            .max_image_size_mb(0.0)
            .build()
            .is_err());
    }

    #[test]
    fn from_lookup_reads_overrides_and_keeps_defaults() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("ENABLE_OPENAI_PARSING", "FALSE"),
            ("DETAIL_SCAN_DPI", "300"),
            ("MAX_CONCURRENT_TILES", "not-a-number"),
            ("TILE_OVERLAP_PERCENT", "0.2"),
            ("OPENAI_API_KEY", "   "),
        ]
        .into_iter()
        .collect();

        let c = ParsingConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.anthropic_api_key.as_deref(), Some("sk-ant-test"));
        assert!(c.openai_api_key.is_none(), "blank key counts as unset");
        assert!(!c.enable_openai_parsing);
        assert!(c.enable_claude_parsing);
        assert_eq!(c.detail_scan_dpi, 300);
        assert_eq!(c.max_concurrent_tiles, 5, "unparseable value keeps default");
        assert_eq!(c.tile_overlap_percent, 0.2);
    }

    #[test]
    fn debug_hides_secrets() {
        let c = ParsingConfig::builder()
            .anthropic_api_key("sk-ant-very-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(dbg.contains("<set>"));
    }
}
