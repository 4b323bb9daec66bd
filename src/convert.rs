//! Public entry points: compile markup to PDF, rasterize PDF to JPEG pages.
//!
//! Every function here returns either its output or exactly one
//! [`FailureRecord`]. Scratch directories are gone by the time any of them
//! return.

use crate::config::ConversionConfig;
use crate::error::{FailureKind, FailureRecord};
use crate::output::{Backend, CompileRequest, CompiledDocument, RasterOutput};
use crate::pipeline::{compile, input, preprocess, render};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Compile LaTeX source to PDF with one backend.
///
/// The source is preprocessed first; the applied fixes come back in
/// [`CompiledDocument::corrections`].
///
/// # Errors
/// - `MalformedInput` for empty or whitespace-only source
/// - `CompilationRejected`, `OutputMissing`, `Timeout` from the compiler
/// - `ProvisioningError` when the fallback compiler cannot be obtained
/// - `ResourceError` when scratch space or the primary compiler is unavailable
///
/// # Example
/// ```rust,no_run
/// use pdfsmith::{compile_markup, Backend, CompileRequest, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let request = CompileRequest::new(
///     "\\documentclass{article}\n\\begin{document}Hi\\end{document}\n",
///     "hello.pdf",
/// );
/// let doc = compile_markup(&request, Backend::Primary, &ConversionConfig::default()).await?;
/// std::fs::write(&doc.output_name, &doc.bytes)?;
/// # Ok(())
/// # }
/// ```
pub async fn compile_markup(
    request: &CompileRequest,
    backend: Backend,
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    if request.markup_source.trim().is_empty() {
        return Err(FailureRecord::new(
            FailureKind::MalformedInput,
            "No LaTeX content provided",
        ));
    }

    let pre = preprocess::preprocess(&request.markup_source);
    if !pre.corrections.is_empty() {
        info!("Applied {} automatic fix(es) before compiling", pre.corrections.len());
    }

    compile::compile(
        &pre,
        backend,
        &request.sanitized_output_name(),
        config.compile_timeout(),
        config,
    )
    .await
}

/// Try each backend in order, returning the first success.
///
/// Moves on after any failure except `MalformedInput`, which no backend can
/// fix. When every backend fails, the last failure is returned.
pub async fn compile_markup_chain(
    request: &CompileRequest,
    backends: &[Backend],
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    let mut last = FailureRecord::new(FailureKind::MalformedInput, "No backend selected");

    for (i, &backend) in backends.iter().enumerate() {
        match compile_markup(request, backend, config).await {
            Ok(doc) => return Ok(doc),
            Err(e) if e.kind == FailureKind::MalformedInput => return Err(e),
            Err(e) => {
                if i + 1 < backends.len() {
                    warn!("{} failed ({}); trying next backend", backend, e.kind);
                }
                last = e;
            }
        }
    }

    Err(last)
}

/// Compile and write the PDF to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn compile_markup_to_file(
    request: &CompileRequest,
    backend: Backend,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    let doc = compile_markup(request, backend, config).await?;
    write_atomic(output_path.as_ref(), &doc.bytes).await?;
    Ok(doc)
}

/// Synchronous wrapper around [`compile_markup`].
///
/// Creates a temporary tokio runtime internally.
pub fn compile_markup_sync(
    request: &CompileRequest,
    backend: Backend,
    config: &ConversionConfig,
) -> Result<CompiledDocument, FailureRecord> {
    runtime()?.block_on(compile_markup(request, backend, config))
}

/// Rasterize the first `max_pages` pages of a PDF to JPEG.
///
/// Pages that fail are skipped and listed in
/// [`RasterOutput::skipped_pages`].
///
/// # Errors
/// - `InvalidInput` when `bytes` do not start with `%PDF`
/// - `ConversionFailed` when PDFium cannot be bound or cannot open the file
/// - `NoPagesProduced` when no page survives
pub async fn rasterize(
    bytes: Vec<u8>,
    max_pages: usize,
    dpi: u32,
    config: &ConversionConfig,
) -> Result<RasterOutput, FailureRecord> {
    if !input::looks_like_pdf(&bytes) {
        return Err(FailureRecord::new(
            FailureKind::InvalidInput,
            "Input is not a PDF document",
        ));
    }

    let opts = config.raster_options(max_pages, dpi);
    render::rasterize_bytes(bytes, opts, config.observer_handle()).await
}

/// Rasterize and write each page into `out_dir` as `page-N.jpg`.
pub async fn rasterize_to_dir(
    bytes: Vec<u8>,
    max_pages: usize,
    dpi: u32,
    out_dir: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<(RasterOutput, Vec<PathBuf>), FailureRecord> {
    let output = rasterize(bytes, max_pages, dpi, config).await?;
    let dir = out_dir.as_ref();

    let mut written = Vec::with_capacity(output.pages.len());
    for page in &output.pages {
        let path = dir.join(page.file_name());
        write_atomic(&path, &page.encoded_bytes).await?;
        written.push(path);
    }
    Ok((output, written))
}

/// Synchronous wrapper around [`rasterize`].
pub fn rasterize_sync(
    bytes: Vec<u8>,
    max_pages: usize,
    dpi: u32,
    config: &ConversionConfig,
) -> Result<RasterOutput, FailureRecord> {
    runtime()?.block_on(rasterize(bytes, max_pages, dpi, config))
}

/// Write `bytes` to `path` via a sibling temp file, so readers never see a
/// partial file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FailureRecord> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();

    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| FailureRecord::new(FailureKind::ResourceError, format!("Write task panicked: {e}")))?
}

fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> Result<(), FailureRecord> {
    let failed = |e: std::io::Error| {
        FailureRecord::new(
            FailureKind::ResourceError,
            format!("Failed to write {}: {}", path.display(), e),
        )
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(failed)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(failed)?;
    tmp.write_all(bytes).map_err(failed)?;
    tmp.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime, FailureRecord> {
    tokio::runtime::Runtime::new().map_err(|e| {
        FailureRecord::new(
            FailureKind::ResourceError,
            format!("Failed to create tokio runtime: {}", e),
        )
    })
}
