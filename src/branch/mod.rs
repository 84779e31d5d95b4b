pub mod manager;

pub use manager::{BranchError, BranchManager, BranchResult, ROOT_BRANCH};
