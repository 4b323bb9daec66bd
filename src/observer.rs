//! Observer trait for pipeline lifecycle events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::ConversionConfigBuilder::observer`] to receive events as
//! requests acquire scratch space, run compiler passes and render pages.
//!
//! The CLI drives its progress output from these events; tests use them to
//! count workspace acquire/release pairs under injected faults.
//!
//! # Example
//!
//! ```rust
//! use pdfsmith::{ConversionConfig, PipelineObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     live: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_workspace_acquired(&self, _id: &str) {
//!         self.live.fetch_add(1, Ordering::SeqCst);
//!     }
//!     fn on_workspace_released(&self, _id: &str, _removed: bool) {
//!         self.live.fetch_sub(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { live: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .observer(observer as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PageError;
use crate::output::{Backend, CompilationAttempt};
use std::sync::Arc;

/// Called by the pipeline as it works through a request.
///
/// Implementations must be `Send + Sync`: concurrent requests share one
/// observer, and workspace release may fire from a `Drop` on any thread.
/// All methods default to no-ops so callers only override what they need.
pub trait PipelineObserver: Send + Sync {
    /// A scratch directory was created for a compilation.
    fn on_workspace_acquired(&self, workspace_id: &str) {
        let _ = workspace_id;
    }

    /// A scratch directory was released. Fires exactly once per acquire.
    ///
    /// `removed` is `false` when deletion failed and the directory leaked.
    fn on_workspace_released(&self, workspace_id: &str, removed: bool) {
        let _ = (workspace_id, removed);
    }

    /// A compiler process is about to be spawned.
    fn on_attempt_start(&self, backend: Backend, pass_number: u32) {
        let _ = (backend, pass_number);
    }

    /// A compiler process exited (or was killed).
    fn on_attempt_complete(&self, attempt: &CompilationAttempt) {
        let _ = attempt;
    }

    /// A page was rasterized and encoded.
    fn on_page_rendered(&self, index: usize, encoded_len: usize) {
        let _ = (index, encoded_len);
    }

    /// A page within the cap was dropped.
    fn on_page_skipped(&self, error: &PageError) {
        let _ = error;
    }
}

/// A no-op implementation; the default when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ObserverHandle = Arc<dyn PipelineObserver>;
