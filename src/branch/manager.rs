//! Branch lifecycle manager.
//!
//! Implements the fork algorithm: freezing a branch's current layer as
//! shared read-only history while producing two new writable sibling layers,
//! one replacing the base branch's top and one backing the new branch. Each
//! sibling gets its own overlay mount and engine instance.

use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mount::{MountError, MountOrchestrator};
use crate::ports::PortAllocator;
use crate::storage::{Branch, BranchRepository, CreateBranchInput, LayerRepository};
use crate::supervisor::{ProcessSupervisor, SupervisorError};
use crate::types::LayerId;

/// The bootstrap-created root branch; protected from deletion.
pub const ROOT_BRANCH: &str = "base";

#[derive(Error, Debug)]
pub enum BranchError {
    #[error("branch not found: {0}")]
    NotFound(String),

    #[error("branch is protected: {0}")]
    Forbidden(String),

    #[error("mount failure: {0}")]
    Mount(#[from] MountError),

    #[error("engine process failure: {0}")]
    Process(#[from] SupervisorError),

    #[error("metadata storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type BranchResult<T> = Result<T, BranchError>;

pub struct BranchManager {
    layers: Arc<dyn LayerRepository>,
    branches: Arc<dyn BranchRepository>,
    mounter: Arc<dyn MountOrchestrator>,
    supervisor: Arc<dyn ProcessSupervisor>,
    ports: PortAllocator,
    /// Lifecycle operations queue here; an interleaved fork against the same
    /// base would corrupt the stop/rebase/restart sequence.
    lifecycle_lock: Mutex<()>,
}

impl BranchManager {
    pub fn new(
        layers: Arc<dyn LayerRepository>,
        branches: Arc<dyn BranchRepository>,
        mounter: Arc<dyn MountOrchestrator>,
        supervisor: Arc<dyn ProcessSupervisor>,
        ports: PortAllocator,
    ) -> Self {
        Self { layers, branches, mounter, supervisor, ports, lifecycle_lock: Mutex::new(()) }
    }

    pub async fn list_branches(&self) -> BranchResult<Vec<Branch>> {
        Ok(self.branches.list().await?)
    }

    /// Fork `base_branch` into itself plus a new branch named `branch_name`.
    ///
    /// The base branch's current layer is frozen as the shared nearest
    /// ancestor of two fresh sibling layers: a replacement top for the base
    /// branch (which keeps its port) and the new branch's first layer. The
    /// registry row for the new branch is the final write, so a failure
    /// part-way leaves no record of a half-made branch; already-created
    /// layers, mounts, and processes are left for operator reconciliation.
    pub async fn create_branch(
        &self,
        branch_name: &str,
        base_branch: &str,
        requested_port: Option<u16>,
    ) -> BranchResult<Branch> {
        let _guard = self.lifecycle_lock.lock().await;

        let base = self
            .branches
            .get_by_name(base_branch)
            .await?
            .ok_or_else(|| BranchError::NotFound(base_branch.to_string()))?;

        if self.branches.get_by_name(branch_name).await?.is_some() {
            return Err(BranchError::Storage(anyhow!("branch '{branch_name}' already exists")));
        }

        let old_layer = base.layer_id;

        // Both siblings mount the identical lower stack: the frozen layer
        // itself, nearest first, then its ancestors down to the root.
        let chain = self.layers.ancestor_chain(old_layer).await?;
        let lower: Vec<LayerId> = chain.iter().map(|layer| layer.layer_id).collect();

        let port = self.pick_port(requested_port).await?;

        // The base engine must be down before its layer becomes shared
        // read-only ancestry. Its old mount path goes stale here; it is not
        // released.
        self.supervisor.stop(base_branch).await?;

        let replacement = self.layers.create(Some(old_layer)).await?;
        let base_mount = self.mounter.mount(replacement.layer_id, &lower).await?;
        self.supervisor.start(base_branch, &base_mount, base.port).await?;
        self.branches.set_current_layer(base.branch_id, replacement.layer_id).await?;

        let new_layer = self.layers.create(Some(old_layer)).await?;
        let new_mount = self.mounter.mount(new_layer.layer_id, &lower).await?;
        self.supervisor.start(branch_name, &new_mount, port).await?;

        let branch = self
            .branches
            .create(CreateBranchInput {
                branch_name: branch_name.to_string(),
                layer_id: new_layer.layer_id,
                port,
            })
            .await?;

        info!(
            branch = %branch.branch_name,
            base = %base_branch,
            port = branch.port,
            layer_id = %branch.layer_id,
            fork_point = %old_layer,
            "branch forked"
        );

        Ok(branch)
    }

    /// Remove a branch and stop its engine. The branch's layers and mount
    /// are retained: descendants forked from it keep reading that history.
    pub async fn delete_branch(&self, branch_name: &str) -> BranchResult<()> {
        let _guard = self.lifecycle_lock.lock().await;

        if branch_name == ROOT_BRANCH {
            return Err(BranchError::Forbidden(branch_name.to_string()));
        }

        let removed = self.branches.delete_by_name(branch_name).await?;
        if !removed {
            return Err(BranchError::NotFound(branch_name.to_string()));
        }

        match self.supervisor.stop(branch_name).await {
            Ok(()) => {}
            Err(SupervisorError::NotRunning(_)) => {
                warn!(branch = %branch_name, "engine was not running at delete");
            }
            Err(err) => return Err(err.into()),
        }

        info!(branch = %branch_name, "branch deleted");

        Ok(())
    }

    /// Bring the system to a running state from whatever the registry holds.
    ///
    /// An empty registry gets a fresh root branch over the immutable base
    /// snapshot. Surviving registry rows are reconciled instead of wiped:
    /// every branch's current layer is remounted and its engine restarted on
    /// its persisted port, and the port allocator is advanced past every
    /// persisted port so restarts never reissue one.
    pub async fn bootstrap(&self) -> BranchResult<()> {
        let _guard = self.lifecycle_lock.lock().await;

        let existing = self.branches.list().await?;

        if existing.is_empty() {
            let port = self.ports.next();
            let root_layer = self.layers.create(None).await?;
            let mount_path = self.mounter.mount(root_layer.layer_id, &[]).await?;
            self.supervisor.start(ROOT_BRANCH, &mount_path, port).await?;
            self.branches
                .create(CreateBranchInput {
                    branch_name: ROOT_BRANCH.to_string(),
                    layer_id: root_layer.layer_id,
                    port,
                })
                .await?;

            info!(port, layer_id = %root_layer.layer_id, "bootstrapped root branch");
            return Ok(());
        }

        for branch in &existing {
            self.ports.reserve(branch.port);
        }

        for branch in existing {
            let chain = self.layers.ancestor_chain(branch.layer_id).await?;
            let lower: Vec<LayerId> =
                chain.iter().skip(1).map(|layer| layer.layer_id).collect();

            // A previous run may have left the target mounted.
            if let Err(err) = self.mounter.unmount(branch.layer_id).await {
                debug!(branch = %branch.branch_name, %err, "no stale mount to release");
            }

            let mount_path = self.mounter.mount(branch.layer_id, &lower).await?;
            self.supervisor.start(&branch.branch_name, &mount_path, branch.port).await?;

            info!(branch = %branch.branch_name, port = branch.port, "reconciled branch");
        }

        Ok(())
    }

    /// Stop every engine and release its mount. An engine is always stopped
    /// before its mount is released; unmounting under a live process leaves
    /// the mount stale.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle_lock.lock().await;

        let branches = match self.branches.list().await {
            Ok(branches) => branches,
            Err(err) => {
                warn!(%err, "could not list branches for shutdown");
                return;
            }
        };

        for branch in branches {
            if let Err(err) = self.supervisor.stop(&branch.branch_name).await {
                warn!(branch = %branch.branch_name, %err, "failed to stop engine");
                continue;
            }
            if let Err(err) = self.mounter.unmount(branch.layer_id).await {
                warn!(branch = %branch.branch_name, %err, "failed to release mount");
            }
        }
    }

    /// A requested port is honored when no branch holds it; otherwise the
    /// allocator decides. Caller intent is never silently dropped.
    async fn pick_port(&self, requested: Option<u16>) -> BranchResult<u16> {
        match requested {
            Some(port) if !self.branches.port_in_use(port).await? => {
                self.ports.reserve(port);
                Ok(port)
            }
            Some(port) => {
                let fallback = self.ports.next();
                warn!(
                    requested = port,
                    fallback,
                    "requested port already bound to a branch, falling back to allocator"
                );
                Ok(fallback)
            }
            None => Ok(self.ports.next()),
        }
    }
}
