//! PDF rasterisation: render the leading pages of a document to JPEG.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why a `PageSource` seam?
//!
//! The skip-on-failure loop in [`rasterize_source`] does not care where pages
//! come from. Keeping it behind a trait lets it run against synthetic
//! documents in tests, where a PDF with a page that fails to render on demand
//! is hard to produce.

use crate::error::{FailureKind, FailureRecord, PageError};
use crate::observer::{ObserverHandle, PipelineObserver};
use crate::output::{RasterOutput, RasterPage};
use crate::pipeline::encode::{encode_jpeg, JPEG_MIME};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// A document whose pages can be rendered one at a time.
pub trait PageSource {
    /// Total number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render the page at 0-based `index`.
    fn render_page(&self, index: usize) -> Result<DynamicImage, String>;
}

/// Settings for one rasterization, copied out of the config so they can move
/// into a blocking task.
#[derive(Debug, Clone)]
pub struct RasterOptions {
    pub max_pages: usize,
    pub dpi: u32,
    pub jpeg_quality: u8,
    pub max_rendered_pixels: u32,
    /// Explicit libpdfium to bind; `None` resolves through the tool cache.
    pub pdfium_library: Option<PathBuf>,
    /// Where a missing libpdfium is downloaded to.
    pub tool_cache_dir: PathBuf,
}

/// Render and encode pages `1..=min(max_pages, page_count)` of `source`.
///
/// A page that fails to render or encode is logged, reported to the observer
/// and skipped. The result is an error only when no page survives.
pub fn rasterize_source(
    source: &dyn PageSource,
    max_pages: usize,
    jpeg_quality: u8,
    observer: &dyn PipelineObserver,
) -> Result<RasterOutput, FailureRecord> {
    let started = Instant::now();
    let document_pages = source.page_count();
    let candidates = document_pages.min(max_pages);

    let mut pages = Vec::with_capacity(candidates);
    let mut skipped = Vec::new();

    for idx in 0..candidates {
        let page_num = idx + 1;
        match render_and_encode(source, idx, jpeg_quality) {
            Ok(page) => {
                debug!(
                    "Rendered page {} → {}x{} px, {} bytes",
                    page_num,
                    page.width,
                    page.height,
                    page.encoded_bytes.len()
                );
                observer.on_page_rendered(page_num, page.encoded_bytes.len());
                pages.push(page);
            }
            Err(err) => {
                warn!("Skipping page: {}", err);
                observer.on_page_skipped(&err);
                skipped.push(err);
            }
        }
    }

    if pages.is_empty() {
        let message = if document_pages == 0 {
            "Document has no pages".to_string()
        } else {
            format!("Failed to convert any of the first {candidates} pages")
        };
        let detail = skipped
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        return Err(FailureRecord::new(FailureKind::NoPagesProduced, message).with_excerpt(detail));
    }

    info!(
        "Rasterized {}/{} page(s) ({} in document)",
        pages.len(),
        candidates,
        document_pages
    );

    Ok(RasterOutput {
        pages,
        document_pages,
        skipped_pages: skipped,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

fn render_and_encode(
    source: &dyn PageSource,
    idx: usize,
    jpeg_quality: u8,
) -> Result<RasterPage, PageError> {
    let page = idx + 1;
    let image = source
        .render_page(idx)
        .map_err(|detail| PageError::RenderFailed { page, detail })?;
    let encoded = encode_jpeg(&image, jpeg_quality).map_err(|e| PageError::EncodeFailed {
        page,
        detail: e.to_string(),
    })?;

    Ok(RasterPage {
        index: page,
        encoded_bytes: encoded,
        mime_format: JPEG_MIME,
        width: image.width(),
        height: image.height(),
    })
}

// ── PDFium-backed source ─────────────────────────────────────────────────────

/// Pages of a loaded PDFium document.
pub struct PdfiumPages<'a, 'b> {
    document: &'a PdfDocument<'b>,
    render: PdfRenderConfig,
}

impl<'a, 'b> PdfiumPages<'a, 'b> {
    pub fn new(document: &'a PdfDocument<'b>, dpi: u32, max_pixels: u32) -> Self {
        let render = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);
        Self { document, render }
    }
}

impl PageSource for PdfiumPages<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize) -> Result<DynamicImage, String> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{:?}", e))?;
        let bitmap = page
            .render_with_config(&self.render)
            .map_err(|e| format!("{:?}", e))?;
        Ok(bitmap.as_image())
    }
}

static PDFIUM: OnceLock<Pdfium> = OnceLock::new();
static BIND_LOCK: Mutex<()> = Mutex::new(());

/// Process-wide PDFium binding. The library can only be bound once per
/// process, so the first successful bind wins.
fn pdfium(library: Option<&Path>, cache_dir: &Path) -> Result<&'static Pdfium, FailureRecord> {
    if let Some(p) = PDFIUM.get() {
        return Ok(p);
    }
    let _guard = BIND_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(p) = PDFIUM.get() {
        return Ok(p);
    }

    let bound = match library {
        Some(path) => toolcache::pdfium::bind_pdfium_from_path(path),
        None => toolcache::pdfium::bind_pdfium_in(cache_dir, None),
    }
    .map_err(|e| FailureRecord::new(FailureKind::ConversionFailed, e.to_string()))?;

    Ok(PDFIUM.get_or_init(|| bound))
}

/// Blocking rasterization of an in-memory PDF.
pub fn rasterize_bytes_blocking(
    bytes: &[u8],
    opts: &RasterOptions,
    observer: &dyn PipelineObserver,
) -> Result<RasterOutput, FailureRecord> {
    let pdfium = pdfium(opts.pdfium_library.as_deref(), &opts.tool_cache_dir)?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        FailureRecord::new(
            FailureKind::ConversionFailed,
            format!("PDF could not be opened: {:?}", e),
        )
    })?;

    let source = PdfiumPages::new(&document, opts.dpi, opts.max_rendered_pixels);
    info!("PDF loaded: {} pages", source.page_count());

    rasterize_source(&source, opts.max_pages, opts.jpeg_quality, observer)
}

/// Rasterize an in-memory PDF on the blocking pool.
pub async fn rasterize_bytes(
    bytes: Vec<u8>,
    opts: RasterOptions,
    observer: ObserverHandle,
) -> Result<RasterOutput, FailureRecord> {
    tokio::task::spawn_blocking(move || rasterize_bytes_blocking(&bytes, &opts, observer.as_ref()))
        .await
        .map_err(|e| {
            FailureRecord::new(
                FailureKind::ConversionFailed,
                format!("Render task panicked: {}", e),
            )
        })?
}
