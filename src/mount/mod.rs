//! Overlay mount orchestration.
//!
//! Every layer owns a private writable upper directory, an overlay scratch
//! directory, and a mount target. A branch's filesystem view is built by
//! stacking its layer's ancestor chain (nearest first) plus the immutable
//! base snapshot as read-only lower directories beneath the layer's upper
//! directory, using the external `fuse-overlayfs` binary.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::PathsConfig;
use crate::types::LayerId;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("failed to prepare directories for layer {layer_id}: {source}")]
    Prepare {
        layer_id: LayerId,
        #[source]
        source: std::io::Error,
    },

    #[error("overlay mount of {} failed: {reason}", .target.display())]
    MountFailed { target: PathBuf, reason: String },

    #[error("unmount of {} failed: {reason}", .target.display())]
    UnmountFailed { target: PathBuf, reason: String },
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait MountOrchestrator: Send + Sync {
    /// Materialize the writable view for `layer_id` over `lower_chain`, the
    /// nearest-first ancestor stack excluding the layer itself. Directory
    /// creation is idempotent; directories already created are not rolled
    /// back on failure. Returns the mount target path.
    async fn mount(&self, layer_id: LayerId, lower_chain: &[LayerId])
    -> Result<PathBuf, MountError>;

    /// Release the mount for `layer_id`. Must only be called once every
    /// process holding the mount open has exited, else the call fails or
    /// leaves a stale mount behind.
    async fn unmount(&self, layer_id: LayerId) -> Result<(), MountError>;

    /// Deterministic mount target for a layer.
    fn mount_path(&self, layer_id: LayerId) -> PathBuf;
}

/// Mounts layers with `fuse-overlayfs` and releases them with `fusermount`.
pub struct OverlayMounter {
    paths: PathsConfig,
}

impl OverlayMounter {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    fn upper_dir(&self, layer_id: LayerId) -> PathBuf {
        self.paths.layers_dir.join(layer_id.to_string())
    }

    fn work_dir(&self, layer_id: LayerId) -> PathBuf {
        self.paths.work_dir.join(layer_id.to_string())
    }

    /// Lower stack specification: ancestor upper directories nearest first,
    /// then the immutable base snapshot.
    fn lowerdir_spec(&self, lower_chain: &[LayerId]) -> String {
        let mut lower: Vec<String> = lower_chain
            .iter()
            .map(|layer_id| self.upper_dir(*layer_id).display().to_string())
            .collect();
        lower.push(self.paths.base_dir.display().to_string());
        lower.join(":")
    }

    async fn prepare_dirs(&self, layer_id: LayerId) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.upper_dir(layer_id)).await?;
        tokio::fs::create_dir_all(self.work_dir(layer_id)).await?;
        tokio::fs::create_dir_all(self.mount_path(layer_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl MountOrchestrator for OverlayMounter {
    async fn mount(
        &self,
        layer_id: LayerId,
        lower_chain: &[LayerId],
    ) -> Result<PathBuf, MountError> {
        self.prepare_dirs(layer_id)
            .await
            .map_err(|source| MountError::Prepare { layer_id, source })?;

        let target = self.mount_path(layer_id);
        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lowerdir_spec(lower_chain),
            self.upper_dir(layer_id).display(),
            self.work_dir(layer_id).display(),
        );

        debug!(layer_id = %layer_id, options = %options, "mounting overlay");

        let output = Command::new("fuse-overlayfs")
            .arg("-o")
            .arg(&options)
            .arg("overlay")
            .arg(&target)
            .output()
            .await
            .map_err(|e| MountError::MountFailed { target: target.clone(), reason: e.to_string() })?;

        if !output.status.success() {
            return Err(MountError::MountFailed {
                target,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(layer_id = %layer_id, target = %target.display(), "overlay mounted");

        Ok(target)
    }

    async fn unmount(&self, layer_id: LayerId) -> Result<(), MountError> {
        let target = self.mount_path(layer_id);

        let output = Command::new("fusermount")
            .arg("-u")
            .arg(&target)
            .output()
            .await
            .map_err(|e| MountError::UnmountFailed {
                target: target.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(MountError::UnmountFailed {
                target,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(layer_id = %layer_id, target = %target.display(), "overlay unmounted");

        Ok(())
    }

    fn mount_path(&self, layer_id: LayerId) -> PathBuf {
        self.paths.mounts_dir.join(layer_id.to_string())
    }
}
