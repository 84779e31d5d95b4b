use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{BranchId, LayerId};

/// One node in the copy-on-write layer forest.
///
/// Layers are append-only: a layer is created at bootstrap or as one of the
/// two siblings of a fork, and is never deleted or reparented. A branch's
/// history is the chain of parent links from its current layer to the root.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Layer {
    pub layer_id: LayerId,
    pub parent_layer_id: Option<LayerId>,
    pub created_at: DateTime<Utc>,
}

/// A named, independently running engine instance.
///
/// `layer_id` is the branch's current writable layer; it is reassigned every
/// time the branch is used as the base of a fork.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Branch {
    pub branch_id: BranchId,
    pub branch_name: String,
    pub port: u16,
    pub layer_id: LayerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateBranchInput {
    pub branch_name: String,
    pub layer_id: LayerId,
    pub port: u16,
}
