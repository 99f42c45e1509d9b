//! Directory Service Network Protocol
//!
//! Endpoints and Data Transfer Objects for the directory interface exposed
//! to clients, plus the conversions between the internal value types and
//! their wire encodings (enums travel as small integers).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::errors::DirectoryError;
use super::types::{
    ChainStatus, DataStatus, DirectoryEntry, FileStatus, PermOptions, Perms, ReplicaChain,
    StorageMode,
};

// --- API Endpoints ---

pub const ENDPOINT_CREATE_DIRECTORY: &str = "/create_directory";
pub const ENDPOINT_CREATE_DIRECTORIES: &str = "/create_directories";
pub const ENDPOINT_CREATE: &str = "/create";
pub const ENDPOINT_OPEN: &str = "/open";
pub const ENDPOINT_OPEN_OR_CREATE: &str = "/open_or_create";
pub const ENDPOINT_EXISTS: &str = "/exists";
pub const ENDPOINT_IS_DIRECTORY: &str = "/is_directory";
pub const ENDPOINT_IS_REGULAR_FILE: &str = "/is_regular_file";
pub const ENDPOINT_STATUS: &str = "/status";
pub const ENDPOINT_DSTATUS: &str = "/dstatus";
pub const ENDPOINT_LAST_WRITE_TIME: &str = "/last_write_time";
pub const ENDPOINT_PERMISSIONS_GET: &str = "/permissions/get";
pub const ENDPOINT_PERMISSIONS_SET: &str = "/permissions/set";
pub const ENDPOINT_TOUCH: &str = "/touch";
pub const ENDPOINT_RENAME: &str = "/rename";
pub const ENDPOINT_REMOVE: &str = "/remove";
pub const ENDPOINT_REMOVE_ALL: &str = "/remove_all";
pub const ENDPOINT_SYNC: &str = "/sync";
pub const ENDPOINT_DUMP: &str = "/dump";
pub const ENDPOINT_LOAD: &str = "/load";
pub const ENDPOINT_DIRECTORY_ENTRIES: &str = "/directory_entries";
pub const ENDPOINT_RECURSIVE_DIRECTORY_ENTRIES: &str = "/recursive_directory_entries";
pub const ENDPOINT_ADD_TAGS: &str = "/add_tags";
pub const ENDPOINT_FILE_SIZE: &str = "/file_size";
pub const ENDPOINT_ADD_BLOCK_TO_FILE: &str = "/add_block_to_file";
pub const ENDPOINT_SPLIT_SLOT_RANGE: &str = "/split_slot_range";
pub const ENDPOINT_MERGE_SLOT_RANGE: &str = "/merge_slot_range";
pub const ENDPOINT_RESOLVE_FAILURES: &str = "/resolve_failures";
pub const ENDPOINT_ADD_REPLICA_TO_CHAIN: &str = "/add_replica_to_chain";
pub const ENDPOINT_HANDLE_LEASE_EXPIRY: &str = "/handle_lease_expiry";

// --- Wire encodings ---

/// A replica chain on the wire: membership, inclusive slot range, and the
/// chain status / storage mode as small integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReplicaChain {
    pub block_names: Vec<String>,
    pub slot_range: (i32, i32),
    pub status: i32,
    pub mode: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDataStatus {
    /// Storage mode per chain, mirrored from `data_blocks` for quick
    /// inspection.
    pub storage_modes: Vec<i32>,
    pub backing_path: String,
    pub chain_length: i32,
    pub data_blocks: Vec<RpcReplicaChain>,
    pub flags: i32,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFileStatus {
    pub file_type: i32,
    pub permissions: i32,
    pub last_write_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDirEntry {
    pub name: String,
    pub status: RpcFileStatus,
}

pub fn to_rpc_chain(chain: &ReplicaChain) -> RpcReplicaChain {
    RpcReplicaChain {
        block_names: chain.block_names.clone(),
        slot_range: chain.slot_range,
        status: chain.status.as_i32(),
        mode: chain.mode.as_i32(),
    }
}

pub fn from_rpc_chain(rpc: &RpcReplicaChain) -> Result<ReplicaChain, DirectoryError> {
    let status = ChainStatus::from_i32(rpc.status).ok_or_else(|| {
        DirectoryError::InvalidArgument(format!("unknown chain status {}", rpc.status))
    })?;
    let mode = StorageMode::from_i32(rpc.mode).ok_or_else(|| {
        DirectoryError::InvalidArgument(format!("unknown storage mode {}", rpc.mode))
    })?;
    Ok(ReplicaChain {
        block_names: rpc.block_names.clone(),
        slot_range: rpc.slot_range,
        status,
        mode,
    })
}

pub fn to_rpc_data_status(status: &DataStatus) -> RpcDataStatus {
    RpcDataStatus {
        storage_modes: status.mode().iter().map(|m| m.as_i32()).collect(),
        backing_path: status.backing_path().to_string(),
        chain_length: status.chain_length() as i32,
        data_blocks: status.data_blocks().iter().map(to_rpc_chain).collect(),
        flags: status.flags(),
        tags: status.tags().clone(),
    }
}

pub fn to_rpc_file_status(status: &FileStatus) -> RpcFileStatus {
    RpcFileStatus {
        file_type: status.file_type.as_i32(),
        permissions: status.permissions.bits() as i32,
        last_write_time: status.last_write_time,
    }
}

pub fn to_rpc_entry(entry: &DirectoryEntry) -> RpcDirEntry {
    RpcDirEntry {
        name: entry.name.clone(),
        status: to_rpc_file_status(&entry.status),
    }
}

pub fn perm_options_from_i32(v: i32) -> Result<PermOptions, DirectoryError> {
    match v {
        0 => Ok(PermOptions::Replace),
        1 => Ok(PermOptions::Add),
        2 => Ok(PermOptions::Remove),
        _ => Err(DirectoryError::InvalidArgument(format!(
            "unknown permission option {}",
            v
        ))),
    }
}

// --- Requests ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

fn default_num_blocks() -> usize {
    1
}

fn default_chain_length() -> usize {
    1
}

fn default_permissions() -> i32 {
    Perms::ALL.bits() as i32
}

/// Create-file request; provisioning fields default to a single unreplicated
/// block with open permissions.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub path: String,
    #[serde(default)]
    pub backing_path: String,
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
    #[serde(default = "default_chain_length")]
    pub chain_length: usize,
    #[serde(default)]
    pub flags: i32,
    #[serde(default = "default_permissions")]
    pub permissions: i32,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
}

/// Permission update: `opts` is 0 = replace, 1 = add, 2 = remove.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsSetRequest {
    pub path: String,
    pub permissions: i32,
    pub opts: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistenceRequest {
    pub path: String,
    pub backing_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotRangeRequest {
    pub path: String,
    pub slot_begin: i32,
    pub slot_end: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddTagsRequest {
    pub path: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainRequest {
    pub path: String,
    pub chain: RpcReplicaChain,
}

// --- Responses ---

#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BoolResponse {
    pub value: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastWriteTimeResponse {
    pub last_write_time: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub permissions: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileSizeResponse {
    pub bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntriesResponse {
    pub entries: Vec<RpcDirEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: RpcReplicaChain,
}

/// The single transport-visible error shape: a human-readable message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
