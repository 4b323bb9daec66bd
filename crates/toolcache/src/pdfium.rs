//! PDFium, the shared library behind pdfsmith's rasterizer.
//!
//! Prebuilt libraries come from
//! [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries);
//! every asset is a `.tgz` holding the library under `lib/` (or `bin/` on
//! Windows).

use std::path::{Path, PathBuf};

use pdfium_render::prelude::Pdfium;

use crate::{ensure_tool, ProgressFn, ToolSpec, ToolcacheError};

/// The pdfium-binaries release tag used for downloads.
pub const PDFIUM_VERSION: &str = "7690";

const BASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// `(os, arch) -> (asset suffix, entry inside archive, file name on disk)`.
const ASSETS: &[(&str, &str, &str, &str, &str)] = &[
    ("macos", "aarch64", "mac-arm64", "lib/libpdfium.dylib", "libpdfium.dylib"),
    ("macos", "x86_64", "mac-x64", "lib/libpdfium.dylib", "libpdfium.dylib"),
    ("linux", "x86_64", "linux-x64", "lib/libpdfium.so", "libpdfium.so"),
    ("linux", "aarch64", "linux-arm64", "lib/libpdfium.so", "libpdfium.so"),
    ("windows", "x86_64", "win-x64", "bin/pdfium.dll", "pdfium.dll"),
    ("windows", "aarch64", "win-arm64", "bin/pdfium.dll", "pdfium.dll"),
];

/// Describes the PDFium archive for the current platform.
pub fn pdfium_spec() -> Result<ToolSpec, ToolcacheError> {
    let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
    let &(_, _, suffix, entry_in_archive, file_name) = ASSETS
        .iter()
        .find(|(o, a, ..)| *o == os && *a == arch)
        .ok_or_else(|| ToolcacheError::UnsupportedPlatform {
            tool: "pdfium",
            os: os.to_string(),
            arch: arch.to_string(),
        })?;

    Ok(ToolSpec {
        tool: "pdfium",
        archive_url: format!("{BASE_URL}/chromium%2F{PDFIUM_VERSION}/pdfium-{suffix}.tgz"),
        entry_in_archive,
        file_name,
        executable: false,
    })
}

/// Per-version directory holding the cached library under `root`.
pub fn pdfium_cache_dir(root: &Path) -> PathBuf {
    root.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Returns the cached library path under `root` if it is already on disk.
pub fn cached_pdfium_path(root: &Path) -> Option<PathBuf> {
    let spec = pdfium_spec().ok()?;
    let p = pdfium_cache_dir(root).join(spec.file_name);
    p.exists().then_some(p)
}

/// Ensures the PDFium library is present under `root`, downloading it on
/// first use. Blocking; call from `spawn_blocking` in async code.
pub fn ensure_pdfium_library_in(
    root: &Path,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<PathBuf, ToolcacheError> {
    ensure_tool(&pdfium_spec()?, &pdfium_cache_dir(root), on_progress)
}

/// Binds to the PDFium library cached under `root`, downloading it first if
/// necessary.
pub fn bind_pdfium_in(
    root: &Path,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<Pdfium, ToolcacheError> {
    bind_pdfium_from_path(&ensure_pdfium_library_in(root, on_progress)?)
}

/// Binds to the PDFium library at `path`.
pub fn bind_pdfium_from_path(path: &Path) -> Result<Pdfium, ToolcacheError> {
    let bindings = Pdfium::bind_to_library(path).map_err(|e| ToolcacheError::Bind {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_platform_has_an_asset() {
        let spec = pdfium_spec().unwrap();
        assert!(spec.archive_url.contains(PDFIUM_VERSION));
        assert!(spec.archive_url.ends_with(".tgz"));
        assert!(spec.entry_in_archive.ends_with(spec.file_name));
        assert!(!spec.executable);
    }

    #[test]
    fn cache_dir_is_versioned() {
        let dir = pdfium_cache_dir(Path::new("/tmp/toolcache-test"));
        assert_eq!(
            dir,
            PathBuf::from(format!("/tmp/toolcache-test/pdfium-{PDFIUM_VERSION}"))
        );
    }

    #[test]
    fn library_resolves_under_the_given_root() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(cached_pdfium_path(root.path()), None);

        let spec = pdfium_spec().unwrap();
        let dir = pdfium_cache_dir(root.path());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(spec.file_name), b"not really a library").unwrap();

        // Cache hit: no network.
        let path = ensure_pdfium_library_in(root.path(), None).unwrap();
        assert_eq!(path, dir.join(spec.file_name));
        assert!(path.starts_with(root.path()));
        assert_eq!(cached_pdfium_path(root.path()), Some(path));
    }

    #[test]
    fn binding_a_missing_library_fails_cleanly() {
        let err = bind_pdfium_from_path(Path::new("/definitely/not/libpdfium.so")).unwrap_err();
        assert!(matches!(err, ToolcacheError::Bind { .. }));
    }
}
