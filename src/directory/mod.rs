//! Directory Metadata Core
//!
//! A hierarchical namespace over chain-replicated in-memory blocks.
//!
//! ## Core Concepts
//! - **Namespace**: directories and files as tagged nodes, each guarded by
//!   its own reader/writer lock (`tree`).
//! - **Data status**: per-file replica chains covering the hash slot space
//!   `[0, SLOT_MAX]`, with storage modes, flags and tags (`types`).
//! - **Capacity management**: slot splits, merges, chain repair and replica
//!   addition orchestrated against the storage layer (`tree`).
//! - **Persistence**: sync/dump/load against a backing store, plus
//!   lease-expiry cleanup (`tree`, `workers`).
//! - **Adapter**: the HTTP surface delegating every call to the shared tree
//!   (`protocol`, `handlers`).

pub mod allocator;
pub mod errors;
pub mod handlers;
pub mod protocol;
pub mod tree;
pub mod types;
pub mod workers;

#[cfg(test)]
mod tests;
