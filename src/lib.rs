//! ElasticMem Directory Service Library
//!
//! This library crate defines the core modules of the elastic in-memory
//! storage metadata service. It serves as the foundation for the directory
//! daemon binary (`main.rs`).
//!
//! ## Architecture Modules
//! The service is composed of two loosely coupled subsystems:
//!
//! - **`directory`**: The metadata core. A hierarchical namespace of
//!   directories and files, where each file is backed by chain-replicated
//!   in-memory blocks covering a hash slot space. Includes the block
//!   allocator, the capacity & persistence orchestration (slot splits,
//!   merges, chain repair, sync/dump/load, lease expiry), the background
//!   workers, and the HTTP service adapter.
//! - **`storage`**: The storage management boundary. The capability set the
//!   directory core invokes on remote storage nodes, with a real remote
//!   client and an in-memory recording implementation.

pub mod directory;
pub mod storage;
