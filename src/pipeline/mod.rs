//! Pipeline stages for compilation and rasterization.
//!
//! Each submodule implements exactly one step.
//!
//! ## Data Flow
//!
//! ```text
//! compile:   preprocess ──▶ workspace ──▶ compile ──▶ (provision, diagnostics)
//!            (fix-ups)      (scratch)     (pdflatex / tectonic)
//!
//! rasterize: input ──▶ render ──▶ encode
//!            (bytes)   (pdfium)   (JPEG)
//! ```
//!
//! 1. [`preprocess`]: pure text rewrite adding missing packages and
//!    replacing commands the engines disagree on
//! 2. [`workspace`]: one scratch directory per request, removed on every path
//! 3. [`compile`]: spawn the compiler under a time budget, retry, classify
//! 4. [`provision`]: fetch the fallback compiler on first use
//! 5. [`diagnostics`]: bound and scrub compiler output for callers
//! 6. [`input`]: read a local path or download a URL
//! 7. [`render`]: rasterize leading pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 8. [`encode`]: RGB-normalise and JPEG-encode each page

pub mod compile;
pub mod diagnostics;
pub mod encode;
pub mod input;
pub mod preprocess;
pub mod provision;
pub mod render;
pub mod workspace;
