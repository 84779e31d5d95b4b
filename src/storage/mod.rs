pub mod branch;
pub mod layer;
pub mod models;
pub mod pool;
pub mod traits;

pub use branch::BranchOperations;
pub use layer::LayerOperations;
pub use models::*;
pub use pool::DatabasePool;
pub use traits::{BranchRepository, LayerRepository};

#[cfg(any(test, feature = "mockall"))]
pub use traits::{MockBranchRepository, MockLayerRepository};
