//! Storage Management Network Protocol
//!
//! Endpoints and Data Transfer Objects for the management RPCs the
//! directory core issues against storage nodes: block setup, re-partitioning
//! state changes, persistence operations and chain-repair primitives.
//!
//! These structures are serialized as JSON and sent over HTTP to the
//! management endpoint embedded in each block identifier.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Install a block with its chain membership and replication role.
pub const ENDPOINT_SETUP_BLOCK: &str = "/setup_block";
/// Atomic setup + enter importing state (split recipient).
pub const ENDPOINT_SETUP_IMPORTING: &str = "/setup_importing";
/// Mark a block as exporting a slot range to a target chain.
pub const ENDPOINT_SET_EXPORTING: &str = "/set_exporting";
/// Mark a block as importing a slot range.
pub const ENDPOINT_SET_IMPORTING: &str = "/set_importing";
/// Return a block to stable serving with its final slot range.
pub const ENDPOINT_SET_REGULAR: &str = "/set_regular";
/// Read block contents back from the backing store.
pub const ENDPOINT_LOAD: &str = "/load";
/// Flush block contents to the backing store.
pub const ENDPOINT_DUMP: &str = "/dump";
/// Flush without clearing in-memory state.
pub const ENDPOINT_SYNC: &str = "/sync";
/// Clear block in-memory state.
pub const ENDPOINT_RESET: &str = "/reset";
/// Bytes currently stored in a block.
pub const ENDPOINT_STORAGE_SIZE: &str = "/storage_size";
/// Bytes a block can hold.
pub const ENDPOINT_STORAGE_CAPACITY: &str = "/storage_capacity";
/// Replay in-flight operations after a chain repair.
pub const ENDPOINT_RESEND_PENDING: &str = "/resend_pending";
/// Stream a block's full contents down-chain (new replica catch-up).
pub const ENDPOINT_FORWARD_ALL: &str = "/forward_all";

// --- Data Transfer Objects ---

/// Payload installing a block into a replication chain.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupBlockRequest {
    /// The block being installed.
    pub block_name: String,
    /// Namespace path of the owning file.
    pub path: String,
    pub slot_begin: i32,
    pub slot_end: i32,
    /// Every member of the chain, head first.
    pub chain: Vec<String>,
    /// Whether the storage node may trigger auto-scale for this block.
    pub auto_scale: bool,
    /// Replication role encoded as a small integer.
    pub chain_role: i32,
    /// Successor block, or `"nil"` for the tail.
    pub next_block_name: String,
}

/// Payload for atomic setup + importing (no `auto_scale`: an importing
/// block never scales while the split is in flight).
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupImportingRequest {
    pub block_name: String,
    pub path: String,
    pub slot_begin: i32,
    pub slot_end: i32,
    pub chain: Vec<String>,
    pub chain_role: i32,
    pub next_block_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetExportingRequest {
    pub block_name: String,
    /// Chain receiving the exported slot range.
    pub target_block: Vec<String>,
    pub slot_begin: i32,
    pub slot_end: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetImportingRequest {
    pub block_name: String,
    pub slot_begin: i32,
    pub slot_end: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRegularRequest {
    pub block_name: String,
    pub slot_begin: i32,
    pub slot_end: i32,
}

/// Payload for load/dump/sync against one block. The backing path already
/// carries the chain's slot-range segment.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistenceRequest {
    pub block_name: String,
    pub backing_path: String,
}

/// Payload for operations addressing a bare block (reset, sizes,
/// resend_pending, forward_all).
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockRequest {
    pub block_name: String,
}

/// Standard acknowledgment for management operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SizeResponse {
    pub bytes: u64,
}

/// Error body returned by a storage node on a failed management call.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
