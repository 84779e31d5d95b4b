//! Stable identifiers shared across the crate.

use uuid::Uuid;

pub type LayerId = Uuid;
pub type BranchId = Uuid;
