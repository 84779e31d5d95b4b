//! End-to-end lifecycle scenarios against real SQLite metadata and recording
//! fakes for the mount and process layers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use forkdb::branch::{BranchError, BranchManager, ROOT_BRANCH};
use forkdb::mount::{MountError, MountOrchestrator};
use forkdb::ports::PortAllocator;
use forkdb::storage::{
    BranchOperations, BranchRepository, DatabasePool, LayerOperations, LayerRepository,
};
use forkdb::supervisor::{ProcessSupervisor, SupervisorError};
use forkdb::types::LayerId;

/// Records mounts instead of invoking fuse-overlayfs.
#[derive(Default)]
struct FakeMounter {
    mounted: Mutex<Vec<(LayerId, Vec<LayerId>)>>,
}

#[async_trait]
impl MountOrchestrator for FakeMounter {
    async fn mount(
        &self,
        layer_id: LayerId,
        lower_chain: &[LayerId],
    ) -> Result<PathBuf, MountError> {
        self.mounted.lock().unwrap().push((layer_id, lower_chain.to_vec()));
        Ok(self.mount_path(layer_id))
    }

    async fn unmount(&self, _layer_id: LayerId) -> Result<(), MountError> {
        Ok(())
    }

    fn mount_path(&self, layer_id: LayerId) -> PathBuf {
        PathBuf::from(format!("/mnt/{layer_id}"))
    }
}

/// In-memory engine table enforcing the same start/stop discipline as the
/// real supervisor: double starts and stops of unknown branches fail.
#[derive(Default)]
struct FakeSupervisor {
    running: Mutex<HashMap<String, u16>>,
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn start(
        &self,
        branch: &str,
        _mount_path: &std::path::Path,
        port: u16,
    ) -> Result<(), SupervisorError> {
        let mut running = self.running.lock().unwrap();
        if running.contains_key(branch) {
            return Err(SupervisorError::AlreadyRunning(branch.to_string()));
        }
        running.insert(branch.to_string(), port);
        Ok(())
    }

    async fn stop(&self, branch: &str) -> Result<(), SupervisorError> {
        self.running
            .lock()
            .unwrap()
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| SupervisorError::NotRunning(branch.to_string()))
    }

    async fn is_running(&self, branch: &str) -> bool {
        self.running.lock().unwrap().contains_key(branch)
    }
}

struct Harness {
    manager: BranchManager,
    layers: Arc<LayerOperations>,
    branches: Arc<BranchOperations>,
    supervisor: Arc<FakeSupervisor>,
    db: DatabasePool,
}

async fn harness() -> Result<Harness> {
    let db = DatabasePool::new_in_memory().await?;
    db.init_schema().await?;
    Ok(harness_over(db))
}

fn harness_over(db: DatabasePool) -> Harness {
    let layers = Arc::new(LayerOperations::new(db.pool().clone()));
    let branches = Arc::new(BranchOperations::new(db.pool().clone()));
    let supervisor = Arc::new(FakeSupervisor::default());

    let manager = BranchManager::new(
        layers.clone(),
        branches.clone(),
        Arc::new(FakeMounter::default()),
        supervisor.clone(),
        PortAllocator::new(33061),
    );

    Harness { manager, layers, branches, supervisor, db }
}

#[tokio::test]
async fn test_full_branching_scenario() -> Result<()> {
    let h = harness().await?;

    // Bootstrap creates "base" at the first port.
    h.manager.bootstrap().await?;
    let base = h.branches.get_by_name(ROOT_BRANCH).await?.unwrap();
    assert_eq!(base.port, 33061);
    let original_root = base.layer_id;

    // Fork f1 from base.
    let f1 = h.manager.create_branch("f1", ROOT_BRANCH, None).await?;
    assert_eq!(f1.port, 33062);

    // Base keeps its port but now points at a replacement layer parented on
    // the original root.
    let base = h.branches.get_by_name(ROOT_BRANCH).await?.unwrap();
    assert_eq!(base.port, 33061);
    assert_ne!(base.layer_id, original_root);
    let base_top = h.layers.get(base.layer_id).await?.unwrap();
    assert_eq!(base_top.parent_layer_id, Some(original_root));

    let f1_layer_before_fork = f1.layer_id;

    // Fork f2 from f1.
    let f2 = h.manager.create_branch("f2", "f1", None).await?;
    assert_eq!(f2.port, 33063);

    // f2's ancestor chain includes f1's pre-fork layer and the original root.
    let f2_chain: Vec<LayerId> =
        h.layers.ancestor_chain(f2.layer_id).await?.iter().map(|l| l.layer_id).collect();
    assert!(f2_chain.contains(&f1_layer_before_fork));
    assert!(f2_chain.contains(&original_root));
    assert_eq!(*f2_chain.last().unwrap(), original_root);

    // Delete f1; it disappears from the listing while its engine is stopped.
    h.manager.delete_branch("f1").await?;
    let names: Vec<String> =
        h.manager.list_branches().await?.into_iter().map(|b| b.branch_name).collect();
    assert_eq!(names, vec!["base".to_string(), "f2".to_string()]);
    assert!(!h.supervisor.is_running("f1").await);

    // The protected root cannot be deleted.
    let err = h.manager.delete_branch(ROOT_BRANCH).await.unwrap_err();
    assert!(matches!(err, BranchError::Forbidden(_)));

    Ok(())
}

#[tokio::test]
async fn test_fork_restarts_base_and_starts_new_engine() -> Result<()> {
    let h = harness().await?;
    h.manager.bootstrap().await?;

    h.manager.create_branch("f1", ROOT_BRANCH, None).await?;

    // Both engines run after the fork; the fake supervisor would have
    // rejected a base restart without a prior stop.
    assert!(h.supervisor.is_running(ROOT_BRANCH).await);
    assert!(h.supervisor.is_running("f1").await);
    assert_eq!(h.supervisor.running.lock().unwrap()[ROOT_BRANCH], 33061);
    assert_eq!(h.supervisor.running.lock().unwrap()["f1"], 33062);

    Ok(())
}

#[tokio::test]
async fn test_sibling_mounts_share_the_same_lower_stack() -> Result<()> {
    let db = DatabasePool::new_in_memory().await?;
    db.init_schema().await?;

    let layers = Arc::new(LayerOperations::new(db.pool().clone()));
    let branches = Arc::new(BranchOperations::new(db.pool().clone()));
    let mounter = Arc::new(FakeMounter::default());

    let manager = BranchManager::new(
        layers.clone(),
        branches.clone(),
        mounter.clone(),
        Arc::new(FakeSupervisor::default()),
        PortAllocator::new(33061),
    );

    manager.bootstrap().await?;
    let original_root = branches.get_by_name(ROOT_BRANCH).await?.unwrap().layer_id;
    manager.create_branch("f1", ROOT_BRANCH, None).await?;

    let mounts = mounter.mounted.lock().unwrap();
    assert_eq!(mounts.len(), 3, "bootstrap mount plus two fork mounts");

    // Bootstrap mounts the root over the empty chain.
    assert_eq!(mounts[0].0, original_root);
    assert!(mounts[0].1.is_empty());

    // Both siblings mount the identical frozen stack, nearest-first from the
    // fork point.
    assert_eq!(mounts[1].1, vec![original_root]);
    assert_eq!(mounts[2].1, vec![original_root]);
    assert_ne!(mounts[1].0, mounts[2].0);

    Ok(())
}

#[tokio::test]
async fn test_bootstrap_reconciles_surviving_state_instead_of_wiping() -> Result<()> {
    let h = harness().await?;
    h.manager.bootstrap().await?;
    h.manager.create_branch("f1", ROOT_BRANCH, None).await?;

    let layers_before = h.layers.list().await?.len();

    // Simulate a service restart over the same metadata: fresh manager,
    // fresh allocator, fresh (empty) process table.
    let restarted = harness_over(h.db.clone());
    restarted.manager.bootstrap().await?;

    // Nothing was wiped or recreated.
    assert_eq!(restarted.layers.list().await?.len(), layers_before);
    let names: Vec<String> =
        restarted.manager.list_branches().await?.into_iter().map(|b| b.branch_name).collect();
    assert_eq!(names, vec!["base".to_string(), "f1".to_string()]);

    // Engines are back on their persisted ports.
    assert_eq!(restarted.supervisor.running.lock().unwrap()[ROOT_BRANCH], 33061);
    assert_eq!(restarted.supervisor.running.lock().unwrap()["f1"], 33062);

    // The allocator was reseeded past every persisted port.
    let f2 = restarted.manager.create_branch("f2", "f1", None).await?;
    assert_eq!(f2.port, 33063);

    Ok(())
}

#[tokio::test]
async fn test_ports_never_repeat_across_forks_and_deletes() -> Result<()> {
    let h = harness().await?;
    h.manager.bootstrap().await?;

    let f1 = h.manager.create_branch("f1", ROOT_BRANCH, None).await?;
    h.manager.delete_branch("f1").await?;

    // A deleted branch's port is not reissued within this process.
    let f2 = h.manager.create_branch("f2", ROOT_BRANCH, None).await?;
    assert!(f2.port > f1.port);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_every_engine() -> Result<()> {
    let h = harness().await?;
    h.manager.bootstrap().await?;
    h.manager.create_branch("f1", ROOT_BRANCH, None).await?;

    h.manager.shutdown().await;

    assert!(!h.supervisor.is_running(ROOT_BRANCH).await);
    assert!(!h.supervisor.is_running("f1").await);

    Ok(())
}
