//! Request and result types shared by the compile and rasterize paths, plus
//! the transport encodings a service boundary hands back to its callers.

use crate::error::PageError;
use crate::pipeline::preprocess::Correction;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which external compiler drives a compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// pdfLaTeX from a system TeX distribution. Two passes.
    Primary,
    /// Tectonic, fetched on first use. Single pass.
    Fallback,
}

impl Backend {
    /// Engine name used in logs and diagnostics.
    pub fn engine(self) -> &'static str {
        match self {
            Backend::Primary => "pdflatex",
            Backend::Fallback => "tectonic",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine())
    }
}

/// One markup compilation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub markup_source: String,
    /// Filename the caller wants the resulting PDF delivered as.
    pub output_name: String,
}

impl CompileRequest {
    pub fn new(markup_source: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            markup_source: markup_source.into(),
            output_name: output_name.into(),
        }
    }

    /// `output_name` reduced to a bare `*.pdf` filename.
    ///
    /// Directory components are dropped and an empty name becomes
    /// `document.pdf`.
    pub fn sanitized_output_name(&self) -> String {
        let base = self
            .output_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .trim();
        if base.is_empty() || base == "." || base == ".." {
            return "document.pdf".to_string();
        }
        if base.to_ascii_lowercase().ends_with(".pdf") {
            base.to_string()
        } else {
            format!("{base}.pdf")
        }
    }
}

/// Record of one compiler process invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationAttempt {
    pub backend: Backend,
    /// 1-based pass number within the request.
    pub pass_number: u32,
    /// Exit code; `None` when the process was killed or died by signal.
    pub exit_status: Option<i32>,
    pub captured_stdout: String,
    pub captured_stderr: String,
    pub duration_ms: u64,
}

impl CompilationAttempt {
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Standard output followed by standard error.
    pub fn combined_output(&self) -> String {
        let mut s = String::with_capacity(self.captured_stdout.len() + self.captured_stderr.len() + 1);
        s.push_str(&self.captured_stdout);
        if !self.captured_stdout.is_empty() && !self.captured_stderr.is_empty() {
            s.push('\n');
        }
        s.push_str(&self.captured_stderr);
        s
    }
}

/// A successfully compiled PDF.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub bytes: Vec<u8>,
    pub size: usize,
    pub output_name: String,
    pub backend: Backend,
    /// Fixes the preprocessor applied before compiling.
    pub corrections: Vec<Correction>,
    pub attempts: Vec<CompilationAttempt>,
}

impl CompiledDocument {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// One rasterized page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    /// 1-based page number in the source document.
    pub index: usize,
    pub encoded_bytes: Vec<u8>,
    pub mime_format: &'static str,
    pub width: u32,
    pub height: u32,
}

impl RasterPage {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.encoded_bytes)
    }

    /// `data:` URI suitable for embedding in HTML or a multimodal API body.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_format, self.to_base64())
    }

    /// Conventional filename for writing the page to disk.
    pub fn file_name(&self) -> String {
        let ext = match self.mime_format {
            "image/png" => "png",
            _ => "jpg",
        };
        format!("page-{}.{}", self.index, ext)
    }
}

/// Result of a rasterization.
#[derive(Debug, Clone)]
pub struct RasterOutput {
    /// Pages in strictly increasing `index` order.
    pub pages: Vec<RasterPage>,
    /// Page count of the whole document, before the cap.
    pub document_pages: usize,
    /// Pages within the cap that were dropped.
    pub skipped_pages: Vec<PageError>,
    pub duration_ms: u64,
}

/// JSON envelope for a rasterization, as returned over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterResponse {
    pub success: bool,
    /// Base64-encoded JPEG bytes, one per page, in page order.
    pub images: Vec<String>,
    pub page_count: usize,
    pub original_filename: Option<String>,
}

impl RasterResponse {
    pub fn from_output(output: &RasterOutput, original_filename: Option<String>) -> Self {
        Self {
            success: true,
            images: output.pages.iter().map(RasterPage::to_base64).collect(),
            page_count: output.pages.len(),
            original_filename,
        }
    }
}
