//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! Rasterization works from an in-memory buffer, so both sources end up as a
//! `Vec<u8>` plus the filename to echo back to the caller. The `%PDF` magic is
//! checked here so callers get a meaningful error rather than a pdfium one.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";

/// Errors locating or fetching an input document.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s: {url}")]
    DownloadTimeout { url: String, secs: u64 },
}

/// Bytes of an input document plus the name it was known by.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// `true` when `bytes` begin with the PDF header.
pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Read a local file or download a URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, InputError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<ResolvedInput, InputError> {
    let path = PathBuf::from(path_str);

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => InputError::FileNotFound { path: path.clone() },
        std::io::ErrorKind::PermissionDenied => InputError::PermissionDenied { path: path.clone() },
        _ => InputError::Read {
            path: path.clone(),
            reason: e.to_string(),
        },
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput { bytes, file_name })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, InputError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| InputError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InputError::DownloadTimeout {
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
    info!("Downloaded {} bytes", bytes.len());

    Ok(ResolvedInput {
        bytes: bytes.to_vec(),
        file_name: filename_from_url(url),
    })
}

/// Last path segment of `url` if it looks like a filename.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
