//! Error types for the takeoff-parser library.
//!
//! Two error types reflect two failure modes:
//!
//! * [`TakeoffError`]: **Fatal** for the operation that raised it: a
//!   document that cannot be opened, a provider that cannot be built, a
//!   strategy whose request failed outright. The public `parse*` entry
//!   points only return it for input problems; inside the engine a strategy
//!   converts it into a failed [`crate::output::ParseResult`] at its boundary.
//!
//! * [`UnitError`]: **Non-fatal**: one page or tile failed (render glitch,
//!   transient API error, unparseable model output). The unit is omitted and
//!   the rest of the document carries on.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors produced by the takeoff-parser library.
#[derive(Debug, Error)]
pub enum TakeoffError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The URL download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none or a wrong one was provided.
    #[error("PDF '{path}' is encrypted and the password is missing or wrong")]
    PasswordRequired { path: PathBuf },

    /// A page number outside `1..=total` was requested.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// JPEG/PNG encoding of a rendered page or tile failed.
    #[error("Image encoding failed: {0}")]
    ImageEncoding(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The provider for a strategy could not be created.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned an error after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The model answered, but no JSON object could be recovered.
    #[error("Failed to parse JSON from response")]
    UnparseableResponse,

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The OCR binary is missing or not runnable.
    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),

    /// The OCR binary ran but failed.
    #[error("OCR failed: {0}")]
    OcrFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not write the JSON result file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, tempfile failure, …).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one unit of work (a page or a tile).
///
/// Logged and omitted; never aborts the surrounding pass.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// Page rasterisation or tile cutting failed.
    #[error("Page {page}: render failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The inference call failed after retries.
    #[error("{unit}: inference failed: {detail}")]
    InferenceFailed { unit: String, detail: String },

    /// The inference call succeeded but returned no JSON object.
    #[error("{unit}: response contained no JSON object")]
    NoJson { unit: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_out_of_range_display() {
        let e = TakeoffError::PageOutOfRange { page: 9, total: 4 };
        let msg = e.to_string();
        assert!(msg.contains("Page 9"), "got: {msg}");
        assert!(msg.contains("4 pages"), "got: {msg}");
    }

    #[test]
    fn unparseable_response_matches_strategy_failure_text() {
        assert_eq!(
            TakeoffError::UnparseableResponse.to_string(),
            "Failed to parse JSON from response"
        );
    }

    #[test]
    fn unit_error_names_the_unit() {
        let e = UnitError::InferenceFailed {
            unit: "page 2 tile 7".into(),
            detail: "503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("tile 7"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn unit_error_round_trips_through_json() {
        let e = UnitError::RenderFailed {
            page: 3,
            detail: "bad xref".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        let back: UnitError = serde_json::from_str(&json).expect("deserialise");
        assert!(back.to_string().contains("Page 3"));
    }
}
