//! Error types for the pdfsmith library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`FailureRecord`]: **Terminal**, the request cannot produce a result
//!   (empty source, compiler rejected the document, timeout, engine could not
//!   be provisioned). Returned as `Err(FailureRecord)` from
//!   [`crate::compile_markup`] and [`crate::rasterize`]. Its [`FailureKind`]
//!   maps onto the status code a service boundary should answer with.
//!
//! * [`PageError`]: **Non-fatal**, a single page failed to render or encode
//!   but the remaining pages are fine. Stored inside
//!   [`crate::output::RasterOutput::skipped_pages`] so callers can see what
//!   was dropped without losing the whole document.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    // ── Compilation ───────────────────────────────────────────────────────
    /// Empty markup or otherwise unusable request.
    MalformedInput,
    /// The compiler ran and reported a defect in the source.
    CompilationRejected,
    /// The compiler exited cleanly but left no document behind.
    OutputMissing,
    /// A compiler process exceeded the time budget and was killed.
    Timeout,
    /// The fallback engine could not be downloaded or unpacked.
    ProvisioningError,
    /// Scratch space could not be allocated, or a compiler could not be launched.
    ResourceError,

    // ── Rasterization ─────────────────────────────────────────────────────
    /// Input bytes are not a PDF.
    InvalidInput,
    /// PDFium could not be bound or could not open the document.
    ConversionFailed,
    /// Every candidate page failed, or the document has no pages.
    NoPagesProduced,
}

impl FailureKind {
    /// Status code a request/response boundary should report for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            FailureKind::MalformedInput
            | FailureKind::CompilationRejected
            | FailureKind::InvalidInput => 400,
            FailureKind::Timeout => 408,
            FailureKind::OutputMissing
            | FailureKind::ProvisioningError
            | FailureKind::ResourceError
            | FailureKind::ConversionFailed
            | FailureKind::NoPagesProduced => 500,
        }
    }

    /// `true` when the caller can fix the problem by changing the input.
    pub fn is_caller_error(self) -> bool {
        self.http_status() < 500 && self != FailureKind::Timeout
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::MalformedInput => "malformed input",
            FailureKind::CompilationRejected => "compilation rejected",
            FailureKind::OutputMissing => "output missing",
            FailureKind::Timeout => "timeout",
            FailureKind::ProvisioningError => "provisioning unavailable",
            FailureKind::ResourceError => "resource error",
            FailureKind::InvalidInput => "invalid input",
            FailureKind::ConversionFailed => "conversion failed",
            FailureKind::NoPagesProduced => "no pages produced",
        };
        f.write_str(s)
    }
}

/// A terminal, classified failure.
///
/// Never constructed alongside a successful result: every public entry point
/// returns either its output or exactly one `FailureRecord`.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// Short human-facing explanation.
    pub message: String,
    /// Bounded excerpt of the raw diagnostic output, if any.
    pub diagnostic_excerpt: Option<String>,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            diagnostic_excerpt: None,
        }
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        let excerpt = excerpt.into();
        self.diagnostic_excerpt = (!excerpt.is_empty()).then_some(excerpt);
        self
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

/// A non-fatal error for a single page.
///
/// Recorded in [`crate::output::RasterOutput`] when a page is skipped. The
/// rasterization continues unless ALL pages fail.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageError {
    /// PDFium failed to render the page.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The bitmap could not be encoded.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number this error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. } | PageError::EncodeFailed { page, .. } => *page,
        }
    }
}

/// Invalid [`crate::config::ConversionConfig`] values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
