//! # toolcache
//!
//! Fetch-once cache for the external binaries that pdfsmith drives but does
//! not ship: the [Tectonic](https://tectonic-typesetting.github.io/) LaTeX
//! engine used as the fallback compiler, and the
//! [PDFium](https://pdfium.googlesource.com/pdfium/) shared library used by
//! the rasterizer.
//!
//! ## How it works
//!
//! On a call to [`tectonic::ensure_tectonic`] or [`pdfium::ensure_pdfium_library_in`]:
//!
//! 1. Checks the per-version cache directory for the file.
//! 2. If absent, downloads the versioned `.tar.gz` release asset for the
//!    current platform.
//! 3. Extracts exactly one named entry into a temporary file next to the
//!    destination, marks it executable when asked to, and atomically renames
//!    it into place.
//!
//! Subsequent calls skip the network entirely.
//!
//! ## Concurrency
//!
//! Two processes (or threads) racing on a cold cache may both download.
//! Each one materialises its copy in a private temporary file and renames it
//! over the canonical path, so the last writer wins and a half-written file
//! is never visible at the final location.
//!
//! ## Cache root
//!
//! Every entry point takes the cache root explicitly. [`cache_root`] gives
//! the default, which `TOOLCACHE_DIR` overrides.

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

pub mod pdfium;
pub mod tectonic;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by toolcache operations.
#[derive(Error, Debug)]
pub enum ToolcacheError {
    /// The current OS/architecture combination has no published asset.
    #[error("Unsupported platform for {tool}: {os}/{arch}")]
    UnsupportedPlatform {
        tool: &'static str,
        os: String,
        arch: String,
    },

    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed or returned a non-success status.
    #[error("Download failed: {0}")]
    Download(String),

    /// gzip/tar extraction failed or the entry was absent.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// `libloading` / `pdfium-render` could not load the library.
    #[error("Failed to bind PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Progress callback: `(bytes_downloaded, total_size_option)`.
pub type ProgressFn<'a> = &'a dyn Fn(u64, Option<u64>);

// ── Tool descriptor ──────────────────────────────────────────────────────────

/// Everything needed to fetch one file out of one release archive.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Short tool name used in logs and errors, e.g. `tectonic`.
    pub tool: &'static str,
    /// Fully resolved archive URL.
    pub archive_url: String,
    /// Relative path of the wanted entry inside the archive.
    pub entry_in_archive: &'static str,
    /// Filename written into the cache directory.
    pub file_name: &'static str,
    /// Set the executable bits after extraction (unix only).
    pub executable: bool,
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the cache root shared by all tools.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/pdfsmith/`
/// - **Linux**: `~/.cache/pdfsmith/`
/// - **Windows**: `%LOCALAPPDATA%\pdfsmith\`
///
/// Override by setting `TOOLCACHE_DIR`.
pub fn cache_root() -> PathBuf {
    if let Ok(override_dir) = std::env::var("TOOLCACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("pdfsmith")
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Ensures `spec.file_name` exists inside `cache_dir`, downloading and
/// extracting it when absent. Returns the on-disk path.
///
/// No network access happens when the file is already present.
pub fn ensure_tool(
    spec: &ToolSpec,
    cache_dir: &Path,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, ToolcacheError> {
    let dest = cache_dir.join(spec.file_name);
    if dest.exists() {
        debug!(tool = spec.tool, path = %dest.display(), "cache hit");
        return Ok(dest);
    }

    std::fs::create_dir_all(cache_dir).map_err(ToolcacheError::CacheDir)?;

    info!(tool = spec.tool, url = %spec.archive_url, "downloading release archive");
    let archive_bytes = download_bytes(&spec.archive_url, on_progress)?;
    extract_entry(
        &archive_bytes,
        spec.entry_in_archive,
        &dest,
        spec.executable,
    )?;
    info!(tool = spec.tool, path = %dest.display(), "installed");

    Ok(dest)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Upper bound on what a `Content-Length` header can make us pre-allocate.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Guessed size when the server sends no `Content-Length`.
const DEFAULT_PREALLOC: u64 = 16 * 1024 * 1024;

fn initial_capacity(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(DEFAULT_PREALLOC).min(MAX_PREALLOC) as usize
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<Vec<u8>, ToolcacheError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("toolcache/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| ToolcacheError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| ToolcacheError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ToolcacheError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(initial_capacity(total));

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(ToolcacheError::Download(format!("Read error: {e}")));
            }
        }
    }

    Ok(buf)
}

/// Extracts a single entry from a gzipped tar archive into `dest_path`.
///
/// The entry is written to a sibling temporary file first and then renamed,
/// so `dest_path` either holds the complete file or does not exist.
pub fn extract_entry(
    archive_bytes: &[u8],
    entry_in_archive: &str,
    dest_path: &Path,
    executable: bool,
) -> Result<(), ToolcacheError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let dest_dir = dest_path
        .parent()
        .ok_or_else(|| ToolcacheError::Extract(format!("no parent for {}", dest_path.display())))?;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);

    for entry in archive
        .entries()
        .map_err(|e| ToolcacheError::Extract(e.to_string()))?
    {
        let mut entry = entry.map_err(|e| ToolcacheError::Extract(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| ToolcacheError::Extract(e.to_string()))?;

        let entry_str = entry_path.to_string_lossy();
        if entry_str.trim_start_matches("./") != entry_in_archive {
            continue;
        }

        let mut tmp = tempfile::NamedTempFile::new_in(dest_dir)
            .map_err(|e| ToolcacheError::Extract(format!("Temp file: {e}")))?;
        std::io::copy(&mut entry, tmp.as_file_mut())
            .map_err(|e| ToolcacheError::Extract(format!("Unpack failed: {e}")))?;

        if executable {
            mark_executable(tmp.as_file())?;
        }

        tmp.persist(dest_path)
            .map_err(|e| ToolcacheError::Extract(format!("Persist failed: {}", e.error)))?;
        return Ok(());
    }

    Err(ToolcacheError::Extract(format!(
        "Entry '{}' not found in archive",
        entry_in_archive
    )))
}

#[cfg(unix)]
fn mark_executable(file: &std::fs::File) -> Result<(), ToolcacheError> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(0o755))
        .map_err(|e| ToolcacheError::Extract(format!("chmod failed: {e}")))
}

#[cfg(not(unix))]
fn mark_executable(_file: &std::fs::File) -> Result<(), ToolcacheError> {
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
