//! Per-request scratch directories.
//!
//! Each compilation gets `<scratch_root>/<uuid-v4>` and nothing else. The
//! returned [`Workspace`] is a guard: [`Workspace::release`] removes the
//! directory on the normal path, and `Drop` removes it when the owning future
//! is cancelled or a panic unwinds through it. Whichever runs first wins; the
//! observer sees exactly one release per acquire.

use crate::error::{FailureKind, FailureRecord};
use crate::observer::ObserverHandle;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;

/// Source file every backend compiles.
pub const SOURCE_FILE: &str = "document.tex";
/// Output file every backend is expected to leave behind.
pub const OUTPUT_FILE: &str = "document.pdf";

/// Creates workspaces under one scratch root.
#[derive(Clone)]
pub struct WorkspaceManager {
    scratch_root: PathBuf,
    observer: Option<ObserverHandle>,
}

impl WorkspaceManager {
    pub fn new(scratch_root: impl Into<PathBuf>, observer: Option<ObserverHandle>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            observer,
        }
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Create a fresh, empty workspace.
    pub async fn acquire(&self) -> Result<Workspace, FailureRecord> {
        let id = Uuid::new_v4().to_string();
        let root_path = self.scratch_root.join(&id);

        tokio::fs::create_dir_all(&root_path).await.map_err(|e| {
            FailureRecord::new(
                FailureKind::ResourceError,
                format!("Could not create scratch directory: {}", e),
            )
        })?;

        debug!(workspace = %id, path = %root_path.display(), "workspace acquired");
        if let Some(o) = &self.observer {
            o.on_workspace_acquired(&id);
        }

        Ok(Workspace {
            id,
            root_path,
            created_at: SystemTime::now(),
            observer: self.observer.clone(),
            released: false,
        })
    }
}

/// A scratch directory owned by one compilation.
pub struct Workspace {
    id: String,
    root_path: PathBuf,
    created_at: SystemTime,
    observer: Option<ObserverHandle>,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn source_path(&self) -> PathBuf {
        self.root_path.join(SOURCE_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root_path.join(OUTPUT_FILE)
    }

    /// Write the markup to [`SOURCE_FILE`].
    pub async fn write_source(&self, source: &str) -> Result<(), FailureRecord> {
        tokio::fs::write(self.source_path(), source)
            .await
            .map_err(|e| {
                FailureRecord::new(
                    FailureKind::ResourceError,
                    format!("Could not write source file: {}", e),
                )
            })
    }

    /// Delete the directory. Failures are logged, never returned.
    pub async fn release(mut self) {
        let removed = match tokio::fs::remove_dir_all(&self.root_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(workspace = %self.id, "failed to remove workspace: {}", e);
                false
            }
        };
        self.finish(removed);
    }

    fn finish(&mut self, removed: bool) {
        self.released = true;
        debug!(workspace = %self.id, removed, "workspace released");
        if let Some(o) = &self.observer {
            o.on_workspace_released(&self.id, removed);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let removed = match std::fs::remove_dir_all(&self.root_path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(workspace = %self.id, "failed to remove abandoned workspace: {}", e);
                false
            }
        };
        self.finish(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::PipelineObserver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counts {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl PipelineObserver for Counts {
        fn on_workspace_acquired(&self, _id: &str) {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
        fn on_workspace_released(&self, _id: &str, _removed: bool) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(root: &Path) -> (WorkspaceManager, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let handle: ObserverHandle = counts.clone();
        (WorkspaceManager::new(root, Some(handle)), counts)
    }

    #[tokio::test]
    async fn acquire_creates_unique_dirs() {
        let scratch = tempfile::tempdir().unwrap();
        let (mgr, _) = manager(scratch.path());

        let a = mgr.acquire().await.unwrap();
        let b = mgr.acquire().await.unwrap();
        assert_ne!(a.root_path(), b.root_path());
        assert!(a.root_path().is_dir());
        assert!(a.root_path().starts_with(scratch.path()));
        a.release().await;
        b.release().await;
    }

    #[tokio::test]
    async fn release_removes_directory_once() {
        let scratch = tempfile::tempdir().unwrap();
        let (mgr, counts) = manager(scratch.path());

        let ws = mgr.acquire().await.unwrap();
        ws.write_source("x").await.unwrap();
        let path = ws.root_path().to_path_buf();
        ws.release().await;

        assert!(!path.exists());
        assert_eq!(counts.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_releases_abandoned_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let (mgr, counts) = manager(scratch.path());

        let path = {
            let ws = mgr.acquire().await.unwrap();
            ws.root_path().to_path_buf()
        };

        assert!(!path.exists());
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_deleted_counts_as_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let (mgr, counts) = manager(scratch.path());

        let ws = mgr.acquire().await.unwrap();
        std::fs::remove_dir_all(ws.root_path()).unwrap();
        ws.release().await;
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unwritable_root_is_resource_error() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let mgr = WorkspaceManager::new(&file, None);
        let err = mgr.acquire().await.err().unwrap();
        assert_eq!(err.kind, FailureKind::ResourceError);
    }
}
