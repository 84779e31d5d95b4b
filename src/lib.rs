//! forkdb - copy-on-write branching for a running MySQL dataset.
//!
//! A branch is a named mysqld instance backed by an overlay mount built from
//! a chain of copy-on-write layers. Forking a branch freezes its current
//! layer as shared read-only history and gives both the base branch and the
//! new branch a fresh writable layer on top of it.

pub mod api;
pub mod branch;
pub mod config;
pub mod mount;
pub mod ports;
pub mod storage;
pub mod supervisor;
pub mod types;
