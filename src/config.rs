//! Configuration types for compilation and rasterization.
//!
//! All behaviour is controlled through [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`]. Toolchain lookup (compiler path, search
//! paths, `TEXINPUTS`) is resolved once in [`ConversionConfigBuilder::build`]
//! and the resulting subprocess environment is reused for every request.

use crate::error::ConfigError;
use crate::observer::{NoopObserver, ObserverHandle};
use crate::pipeline::provision::{Provisioner, StaticBinary, TectonicProvisioner};
use crate::pipeline::render::RasterOptions;
use crate::pipeline::workspace::WorkspaceManager;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pages rasterized when the caller does not say otherwise.
pub const DEFAULT_MAX_PAGES: usize = 3;
/// Rasterization resolution when the caller does not say otherwise.
pub const DEFAULT_DPI: u32 = 150;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 60;

// ── Toolchain ────────────────────────────────────────────────────────────────

/// Where the external programs live and what they need in their environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// pdfLaTeX executable; a bare name is looked up in `search_paths` first,
    /// then in `PATH`.
    pub pdflatex: PathBuf,
    /// Directories prepended to `PATH` for compiler processes.
    pub search_paths: Vec<PathBuf>,
    /// Directories prepended to the dynamic loader path.
    pub library_paths: Vec<PathBuf>,
    /// Extra `TEXINPUTS` directories; the engine defaults are kept after them.
    pub tex_inputs: Vec<PathBuf>,
    /// Pre-installed Tectonic. When unset it is downloaded into `tool_cache_dir`.
    pub tectonic: Option<PathBuf>,
    /// Cache for downloaded tools.
    pub tool_cache_dir: PathBuf,
    /// Explicit libpdfium. When unset it is downloaded into `tool_cache_dir`.
    pub pdfium_library: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            pdflatex: PathBuf::from("pdflatex"),
            search_paths: Vec::new(),
            library_paths: Vec::new(),
            tex_inputs: Vec::new(),
            tectonic: None,
            tool_cache_dir: toolcache::cache_root(),
            pdfium_library: None,
        }
    }
}

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

impl ToolchainConfig {
    /// Defaults plus the TeX binary directories installed on this host.
    pub fn for_host() -> Self {
        Self {
            search_paths: host_tex_bin_dirs(),
            ..Self::default()
        }
    }

    /// Environment overrides for compiler processes.
    ///
    /// Reads the current `PATH` and loader path once, so call it at
    /// configuration time, not per request.
    pub fn resolve_env(&self) -> Vec<(OsString, OsString)> {
        let mut env = Vec::new();

        if !self.search_paths.is_empty() {
            if let Some(v) = prepend_paths("PATH", &self.search_paths) {
                env.push(("PATH".into(), v));
            }
        }
        if !self.library_paths.is_empty() {
            if let Some(v) = prepend_paths(LIBRARY_PATH_VAR, &self.library_paths) {
                env.push((LIBRARY_PATH_VAR.into(), v));
            }
        }
        if !self.tex_inputs.is_empty() {
            match std::env::join_paths(&self.tex_inputs) {
                Ok(mut v) => {
                    // A trailing empty component keeps the engine's own search path.
                    v.push(if cfg!(windows) { ";" } else { ":" });
                    env.push(("TEXINPUTS".into(), v));
                }
                Err(e) => warn!("ignoring TEXINPUTS entries: {}", e),
            }
        }

        env
    }

    /// The pdfLaTeX path to spawn.
    pub fn resolve_pdflatex(&self) -> PathBuf {
        if self.pdflatex.components().count() != 1 {
            return self.pdflatex.clone();
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(&self.pdflatex))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| self.pdflatex.clone())
    }
}

fn prepend_paths(var: &str, dirs: &[PathBuf]) -> Option<OsString> {
    let existing = std::env::var_os(var);
    let all = dirs
        .iter()
        .cloned()
        .chain(existing.iter().flat_map(std::env::split_paths));
    match std::env::join_paths(all) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring {} overrides: {}", var, e);
            None
        }
    }
}

#[cfg(target_os = "macos")]
fn host_tex_bin_dirs() -> Vec<PathBuf> {
    let texbin = PathBuf::from("/Library/TeX/texbin");
    if texbin.is_dir() {
        vec![texbin]
    } else {
        Vec::new()
    }
}

/// `/usr/local/texlive/<year>/bin/<arch>-linux`, newest year first.
#[cfg(not(target_os = "macos"))]
fn host_tex_bin_dirs() -> Vec<PathBuf> {
    texlive_bin_dirs(Path::new("/usr/local/texlive"), std::env::consts::ARCH)
}

#[cfg_attr(target_os = "macos", allow(dead_code))]
fn texlive_bin_dirs(texlive_root: &Path, arch: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(texlive_root) else {
        return Vec::new();
    };
    let mut years: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.len() == 4 && n.chars().all(|c| c.is_ascii_digit()))
        })
        .collect();
    years.sort();
    years.reverse();

    years
        .into_iter()
        .map(|y| y.join("bin").join(format!("{arch}-linux")))
        .filter(|p| p.is_dir())
        .collect()
}

// ── Conversion config ────────────────────────────────────────────────────────

/// Configuration shared by every request.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`]. Cheap to clone.
///
/// # Example
/// ```rust
/// use pdfsmith::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .compile_timeout_secs(30)
///     .scratch_root(std::env::temp_dir().join("my-scratch"))
///     .build()
///     .unwrap();
/// assert_eq!(config.compile_timeout().as_secs(), 30);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Parent directory for per-request workspaces.
    pub scratch_root: PathBuf,
    /// JPEG quality for rasterized pages. Default: 85.
    pub jpeg_quality: u8,
    /// Longest edge of a rendered page in pixels. Default: 4000.
    pub max_rendered_pixels: u32,
    /// Limit for downloads: the fallback compiler and URL inputs. Default: 120.
    pub download_timeout_secs: u64,
    pub observer: Option<ObserverHandle>,
    compile_timeout: Duration,
    toolchain: ToolchainConfig,
    provisioner: Arc<dyn Provisioner>,
    subprocess_env: Arc<[(OsString, OsString)]>,
    pdflatex_program: PathBuf,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        ConversionConfigBuilder::new().assemble()
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("scratch_root", &self.scratch_root)
            .field("compile_timeout", &self.compile_timeout)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("toolchain", &self.toolchain)
            .field("pdflatex_program", &self.pdflatex_program)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder::new()
    }

    /// Wall-clock budget for each compiler process.
    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn toolchain(&self) -> &ToolchainConfig {
        &self.toolchain
    }

    /// pdfLaTeX as resolved at build time.
    pub fn pdflatex_program(&self) -> &Path {
        &self.pdflatex_program
    }

    /// Environment overrides applied to every compiler process.
    pub fn subprocess_env(&self) -> &[(OsString, OsString)] {
        &self.subprocess_env
    }

    pub fn provisioner(&self) -> Arc<dyn Provisioner> {
        Arc::clone(&self.provisioner)
    }

    pub fn workspace_manager(&self) -> WorkspaceManager {
        WorkspaceManager::new(self.scratch_root.clone(), self.observer.clone())
    }

    /// The configured observer, or a no-op one.
    pub fn observer_handle(&self) -> ObserverHandle {
        self.observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver))
    }

    pub fn raster_options(&self, max_pages: usize, dpi: u32) -> RasterOptions {
        RasterOptions {
            max_pages,
            dpi,
            jpeg_quality: self.jpeg_quality,
            max_rendered_pixels: self.max_rendered_pixels,
            pdfium_library: self.toolchain.pdfium_library.clone(),
            tool_cache_dir: self.toolchain.tool_cache_dir.clone(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    scratch_root: PathBuf,
    compile_timeout: Duration,
    jpeg_quality: u8,
    max_rendered_pixels: u32,
    download_timeout_secs: u64,
    toolchain: ToolchainConfig,
    observer: Option<ObserverHandle>,
    provisioner: Option<Arc<dyn Provisioner>>,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("scratch_root", &self.scratch_root)
            .field("compile_timeout", &self.compile_timeout)
            .field("toolchain", &self.toolchain)
            .finish_non_exhaustive()
    }
}

impl ConversionConfigBuilder {
    fn new() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("pdfsmith"),
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIMEOUT_SECS),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_rendered_pixels: 4000,
            download_timeout_secs: 120,
            toolchain: ToolchainConfig::for_host(),
            observer: None,
            provisioner: None,
        }
    }

    pub fn scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = dir.into();
        self
    }

    pub fn compile_timeout_secs(mut self, secs: u64) -> Self {
        self.compile_timeout = Duration::from_secs(secs.max(1));
        self
    }

    /// Sub-second budgets are accepted here; mostly useful in tests.
    pub fn compile_timeout(mut self, budget: Duration) -> Self {
        self.compile_timeout = budget;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.max_rendered_pixels = px.max(100);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs.max(1);
        self
    }

    pub fn toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn pdflatex(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolchain.pdflatex = path.into();
        self
    }

    pub fn search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.toolchain.search_paths.push(dir.into());
        self
    }

    pub fn tex_input(mut self, dir: impl Into<PathBuf>) -> Self {
        self.toolchain.tex_inputs.push(dir.into());
        self
    }

    pub fn tectonic(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolchain.tectonic = Some(path.into());
        self
    }

    pub fn tool_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.toolchain.tool_cache_dir = dir.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.toolchain.pdfium_library = Some(path.into());
        self
    }

    pub fn observer(mut self, observer: ObserverHandle) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the fallback compiler lookup entirely.
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConfigError> {
        if self.compile_timeout.is_zero() {
            return Err(ConfigError::Invalid("compile timeout must be non-zero".into()));
        }
        if self.scratch_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("scratch root must not be empty".into()));
        }
        if self.toolchain.pdflatex.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("pdflatex path must not be empty".into()));
        }
        Ok(self.assemble())
    }

    fn assemble(self) -> ConversionConfig {
        let provisioner = self.provisioner.unwrap_or_else(|| match &self.toolchain.tectonic {
            Some(path) => Arc::new(StaticBinary(path.clone())) as Arc<dyn Provisioner>,
            None => Arc::new(TectonicProvisioner::new(self.toolchain.tool_cache_dir.clone())),
        });
        let subprocess_env: Arc<[(OsString, OsString)]> = self.toolchain.resolve_env().into();
        let pdflatex_program = self.toolchain.resolve_pdflatex();
        debug!(
            pdflatex = %pdflatex_program.display(),
            overrides = subprocess_env.len(),
            "toolchain resolved"
        );

        ConversionConfig {
            scratch_root: self.scratch_root,
            jpeg_quality: self.jpeg_quality,
            max_rendered_pixels: self.max_rendered_pixels,
            download_timeout_secs: self.download_timeout_secs,
            observer: self.observer,
            compile_timeout: self.compile_timeout,
            toolchain: self.toolchain,
            provisioner,
            subprocess_env,
            pdflatex_program,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_options_use_configured_tool_cache() {
        let c = ConversionConfig::builder()
            .tool_cache_dir("/srv/pdfsmith-tools")
            .build()
            .unwrap();
        let opts = c.raster_options(3, 150);
        assert_eq!(opts.tool_cache_dir, PathBuf::from("/srv/pdfsmith-tools"));
        assert_eq!(opts.pdfium_library, None);
        assert_eq!(
            toolcache::pdfium::pdfium_cache_dir(&opts.tool_cache_dir),
            PathBuf::from(format!(
                "/srv/pdfsmith-tools/pdfium-{}",
                toolcache::pdfium::PDFIUM_VERSION
            ))
        );
    }

    #[test]
    fn defaults() {
        let c = ConversionConfig::default();
        assert_eq!(c.compile_timeout(), Duration::from_secs(60));
        assert_eq!(c.jpeg_quality, 85);
        assert!(c.scratch_root.ends_with("pdfsmith"));
        assert!(c.observer.is_none());
    }

    #[test]
    fn builder_clamps() {
        let c = ConversionConfig::builder()
            .jpeg_quality(0)
            .compile_timeout_secs(0)
            .max_rendered_pixels(1)
            .build()
            .unwrap();
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.compile_timeout(), Duration::from_secs(1));
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn zero_duration_rejected() {
        let err = ConversionConfig::builder()
            .compile_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn empty_pdflatex_rejected() {
        assert!(ConversionConfig::builder().pdflatex("").build().is_err());
    }

    #[test]
    fn tex_inputs_keep_default_search() {
        let t = ToolchainConfig {
            tex_inputs: vec![PathBuf::from("/opt/styles")],
            ..ToolchainConfig::default()
        };
        let env = t.resolve_env();
        let (_, v) = env.iter().find(|(k, _)| k == "TEXINPUTS").unwrap();
        assert_eq!(v, "/opt/styles:");
    }

    #[test]
    fn search_paths_prepended_to_path() {
        let t = ToolchainConfig {
            search_paths: vec![PathBuf::from("/opt/tex/bin")],
            ..ToolchainConfig::default()
        };
        let env = t.resolve_env();
        let (_, v) = env.iter().find(|(k, _)| k == "PATH").unwrap();
        assert!(v.to_string_lossy().starts_with("/opt/tex/bin"));
    }

    #[test]
    fn no_overrides_no_env() {
        let t = ToolchainConfig::default();
        assert!(t.resolve_env().is_empty());
    }

    #[test]
    fn bare_pdflatex_found_in_search_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pdflatex"), b"").unwrap();
        let t = ToolchainConfig {
            search_paths: vec![dir.path().to_path_buf()],
            ..ToolchainConfig::default()
        };
        assert_eq!(t.resolve_pdflatex(), dir.path().join("pdflatex"));

        let absolute = ToolchainConfig {
            pdflatex: PathBuf::from("/usr/bin/pdflatex"),
            ..t
        };
        assert_eq!(absolute.resolve_pdflatex(), PathBuf::from("/usr/bin/pdflatex"));
    }

    #[test]
    fn texlive_years_newest_first() {
        let root = tempfile::tempdir().unwrap();
        for year in ["2022", "2024", "tlpkg"] {
            std::fs::create_dir_all(root.path().join(year).join("bin").join("x86_64-linux")).unwrap();
        }
        let dirs = texlive_bin_dirs(root.path(), "x86_64");
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].starts_with(root.path().join("2024")));
    }

    #[test]
    fn explicit_tectonic_uses_static_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tectonic");
        std::fs::write(&bin, b"").unwrap();
        let c = ConversionConfig::builder().tectonic(&bin).build().unwrap();
        assert_eq!(c.provisioner().ensure_fallback_binary().unwrap(), bin);
    }
}
