//! Locating the fallback compiler.
//!
//! The orchestrator only asks for a path. [`TectonicProvisioner`] answers by
//! consulting the on-disk tool cache and downloading the release archive on a
//! miss; [`StaticBinary`] answers with a path fixed at configuration time.

use crate::error::{FailureKind, FailureRecord};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Supplies the fallback compiler executable.
///
/// Called from a blocking thread; implementations may perform network and
/// file-system I/O.
pub trait Provisioner: Send + Sync {
    fn ensure_fallback_binary(&self) -> Result<PathBuf, FailureRecord>;
}

/// Downloads Tectonic into `cache_root` on first use.
#[derive(Debug)]
pub struct TectonicProvisioner {
    cache_root: PathBuf,
    resolved: OnceLock<PathBuf>,
}

impl TectonicProvisioner {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            resolved: OnceLock::new(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }
}

impl Provisioner for TectonicProvisioner {
    fn ensure_fallback_binary(&self) -> Result<PathBuf, FailureRecord> {
        if let Some(path) = self.resolved.get() {
            return Ok(path.clone());
        }

        let path = toolcache::tectonic::ensure_tectonic(&self.cache_root, None).map_err(|e| {
            FailureRecord::new(
                FailureKind::ProvisioningError,
                format!("Fallback compiler unavailable: {}", e),
            )
        })?;
        info!(path = %path.display(), "fallback compiler ready");

        Ok(self.resolved.get_or_init(|| path).clone())
    }
}

/// A fallback compiler installed out of band.
#[derive(Debug, Clone)]
pub struct StaticBinary(pub PathBuf);

impl Provisioner for StaticBinary {
    fn ensure_fallback_binary(&self) -> Result<PathBuf, FailureRecord> {
        if self.0.is_file() {
            Ok(self.0.clone())
        } else {
            Err(FailureRecord::new(
                FailureKind::ProvisioningError,
                format!("Fallback compiler not found at {}", self.0.display()),
            ))
        }
    }
}

/// Run the provisioner on the blocking pool, bounded by `budget`.
pub async fn provision(
    provisioner: Arc<dyn Provisioner>,
    budget: Duration,
) -> Result<PathBuf, FailureRecord> {
    let task = tokio::task::spawn_blocking(move || provisioner.ensure_fallback_binary());

    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => {
            if let Ok(path) = &result {
                debug!(path = %path.display(), "fallback compiler resolved");
            }
            result
        }
        Ok(Err(join)) => Err(FailureRecord::new(
            FailureKind::ProvisioningError,
            format!("Provisioning task panicked: {}", join),
        )),
        Err(_) => Err(FailureRecord::new(
            FailureKind::ProvisioningError,
            format!("Fallback compiler download exceeded {}s", budget.as_secs()),
        )),
    }
}
