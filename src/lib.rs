//! # pdfsmith
//!
//! Compile LaTeX to PDF through pdfLaTeX or Tectonic, and rasterize PDFs to
//! JPEG page images.
//!
//! ## Why this crate?
//!
//! Driving a TeX engine from a service is mostly about everything around the
//! engine: scratch directories that must disappear, processes that hang,
//! logs that are megabytes long, a fallback engine that is not installed
//! yet, and documents written for one engine that the other rejects. This
//! crate wraps all of that behind two calls that return either a result or
//! one classified [`FailureRecord`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! LaTeX
//!  │
//!  ├─ 1. Preprocess  add missing \usepackage lines, replace icon commands
//!  ├─ 2. Workspace   fresh <scratch>/<uuid>/document.tex
//!  ├─ 3. Compile     pdflatex (two passes) or tectonic (fetched on first use)
//!  └─ 4. Output      PDF bytes + applied fixes, workspace removed
//!
//! PDF
//!  │
//!  ├─ 1. Render      first N pages via pdfium (spawn_blocking)
//!  └─ 2. Encode      RGB JPEG per page, failed pages skipped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfsmith::{compile_markup, rasterize, Backend, CompileRequest, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let request = CompileRequest::new(
//!         "\\documentclass{article}\n\\begin{document}\\faPhone 555\\end{document}\n",
//!         "cv.pdf",
//!     );
//!     let doc = compile_markup(&request, Backend::Primary, &config).await?;
//!     for fix in &doc.corrections {
//!         eprintln!("fixed: {fix}");
//!     }
//!
//!     let pages = rasterize(doc.bytes, 3, 150, &config).await?;
//!     eprintln!("{} page(s)", pages.pages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfsmith` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdfsmith = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod observer;
pub mod output;
pub mod pipeline;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionConfig, ConversionConfigBuilder, ToolchainConfig, DEFAULT_DPI, DEFAULT_MAX_PAGES,
};
pub use convert::{
    compile_markup, compile_markup_chain, compile_markup_sync, compile_markup_to_file, rasterize,
    rasterize_sync, rasterize_to_dir,
};
pub use error::{ConfigError, FailureKind, FailureRecord, PageError};
pub use observer::{NoopObserver, ObserverHandle, PipelineObserver};
pub use output::{
    Backend, CompilationAttempt, CompileRequest, CompiledDocument, RasterOutput, RasterPage,
    RasterResponse,
};
pub use pipeline::preprocess::{preprocess, Correction, PreprocessResult};
pub use pipeline::provision::{Provisioner, StaticBinary, TectonicProvisioner};
