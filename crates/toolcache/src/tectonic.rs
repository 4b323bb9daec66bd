//! Tectonic, the self-contained LaTeX engine used as pdfsmith's fallback
//! compiler.
//!
//! Release assets are single-binary tarballs published at
//! <https://github.com/tectonic-typesetting/tectonic/releases>. Windows only
//! ships `.zip` assets, so it is reported as unsupported here.

use std::path::{Path, PathBuf};

use crate::{ensure_tool, ProgressFn, ToolSpec, ToolcacheError};

/// The Tectonic release used for downloads.
pub const TECTONIC_VERSION: &str = "0.15.0";

/// GitHub release base URL.
const BASE_URL: &str = "https://github.com/tectonic-typesetting/tectonic/releases/download";

/// Name of the executable, both inside the archive and on disk.
pub const TECTONIC_BIN: &str = "tectonic";

fn target_triple() -> Result<&'static str, ToolcacheError> {
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;

    match (os, arch) {
        ("linux", "x86_64") => Ok("x86_64-unknown-linux-musl"),
        ("linux", "aarch64") => Ok("aarch64-unknown-linux-musl"),
        ("macos", "x86_64") => Ok("x86_64-apple-darwin"),
        ("macos", "aarch64") => Ok("aarch64-apple-darwin"),
        (os, arch) => Err(ToolcacheError::UnsupportedPlatform {
            tool: TECTONIC_BIN,
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

/// Describes the Tectonic archive for the current platform.
pub fn tectonic_spec() -> Result<ToolSpec, ToolcacheError> {
    let triple = target_triple()?;
    Ok(ToolSpec {
        tool: TECTONIC_BIN,
        archive_url: format!(
            "{BASE_URL}/tectonic%40{TECTONIC_VERSION}/tectonic-{TECTONIC_VERSION}-{triple}.tar.gz"
        ),
        entry_in_archive: TECTONIC_BIN,
        file_name: TECTONIC_BIN,
        executable: true,
    })
}

/// Per-version directory holding the cached executable under `root`.
pub fn tectonic_cache_dir(root: &Path) -> PathBuf {
    root.join(format!("tectonic-{TECTONIC_VERSION}"))
}

/// Returns the cached executable path if it is already on disk.
pub fn cached_tectonic_path(root: &Path) -> Option<PathBuf> {
    let p = tectonic_cache_dir(root).join(TECTONIC_BIN);
    p.exists().then_some(p)
}

/// Ensures the Tectonic executable is present under `root`, downloading it on
/// first use. Blocking; call from `spawn_blocking` in async code.
pub fn ensure_tectonic(
    root: &Path,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, ToolcacheError> {
    let spec = tectonic_spec()?;
    ensure_tool(&spec, &tectonic_cache_dir(root), on_progress)
}
