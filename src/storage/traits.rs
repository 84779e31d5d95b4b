use anyhow::Result;
use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use crate::types::{BranchId, LayerId};

use super::models::{Branch, CreateBranchInput, Layer};

#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait LayerRepository: Send + Sync {
    /// Persist a new layer, optionally attached under `parent_layer_id`.
    /// The parent must already exist; layers are never reparented, so the
    /// forest stays acyclic by construction.
    async fn create(&self, parent_layer_id: Option<LayerId>) -> Result<Layer>;

    async fn get(&self, layer_id: LayerId) -> Result<Option<Layer>>;

    /// Nearest-first chain from `layer_id` through parent links to the root,
    /// inclusive of both ends. This exact order is the lower-directory stack
    /// of every mount.
    async fn ancestor_chain(&self, layer_id: LayerId) -> Result<Vec<Layer>>;

    async fn list(&self) -> Result<Vec<Layer>>;
}

#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait BranchRepository: Send + Sync {
    async fn create(&self, input: CreateBranchInput) -> Result<Branch>;
    async fn get_by_name(&self, branch_name: &str) -> Result<Option<Branch>>;
    async fn list(&self) -> Result<Vec<Branch>>;

    /// Repoint a branch at a new current layer, as the base branch is after
    /// every fork.
    async fn set_current_layer(&self, branch_id: BranchId, layer_id: LayerId) -> Result<()>;

    /// Returns whether a row was removed.
    async fn delete_by_name(&self, branch_name: &str) -> Result<bool>;

    async fn port_in_use(&self, port: u16) -> Result<bool>;
}
