//! Input resolution: turn a user-supplied path, URL or byte buffer into a
//! local PDF file.
//!
//! ## Why download to a temp file?
//!
//! pdfium and tesseract both want a file-system path. Plan sets shared
//! through bid portals arrive as URLs, so they are downloaded into a
//! `TempDir` that is removed when [`ResolvedInput`] is dropped. Every input
//! has its `%PDF` magic checked up front so a mislabelled upload fails with
//! a clear error instead of three strategies each failing to open it.

use crate::error::TakeoffError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A local PDF ready for parsing.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was fetched or written to a temp directory that lives as long
    /// as this value.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Whether the input string is an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or URL to a local PDF.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, TakeoffError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

/// Write an in-memory PDF to a temp file.
pub fn resolve_bytes(bytes: &[u8], file_name: &str) -> Result<ResolvedInput, TakeoffError> {
    let temp_dir = TempDir::new().map_err(|e| TakeoffError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(sanitize_file_name(file_name));
    check_magic(&path, bytes)?;
    std::fs::write(&path, bytes)
        .map_err(|e| TakeoffError::Internal(format!("Failed to write temp file: {}", e)))?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

/// Validate existence, readability and magic bytes of a local file.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, TakeoffError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(TakeoffError::FileNotFound { path });
    }

    let mut f = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TakeoffError::PermissionDenied { path });
        }
        Err(_) => return Err(TakeoffError::FileNotFound { path }),
    };

    let mut magic = [0u8; 4];
    let n = f.read(&mut magic).unwrap_or(0);
    check_magic(&path, &magic[..n])?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), TakeoffError> {
    if head.len() >= 4 && &head[..4] == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    Err(TakeoffError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, TakeoffError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| TakeoffError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TakeoffError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    let resolved = resolve_bytes(&bytes, &file_name_from_url(url))?;
    info!("Downloaded to: {}", resolved.path().display());
    Ok(resolved)
}

/// Last path segment of the URL when it looks like a file name.
fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("document.pdf");
    base.to_string()
}
