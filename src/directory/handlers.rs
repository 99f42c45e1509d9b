//! Directory Service API Handlers
//!
//! HTTP endpoints exposing the directory interface to the network. Each
//! handler is a transparent passthrough: decode the request, run the
//! corresponding tree operation on the blocking pool, encode the result.
//! Every failure is translated into a single error body carrying the
//! message, with a status code mapped from the error taxonomy.
//!
//! Handlers hold no state of their own beyond the shared tree reference
//! injected via `Extension`, so connect/disconnect needs no bookkeeping.

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    routing::post,
};
use std::sync::Arc;

use super::errors::DirectoryError;
use super::protocol::*;
use super::tree::DirectoryTree;
use super::types::Perms;

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn error_status(err: &DirectoryError) -> StatusCode {
    match err {
        DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
        DirectoryError::Exists(_)
        | DirectoryError::DirectoryNotEmpty(_)
        | DirectoryError::Busy(_) => StatusCode::CONFLICT,
        DirectoryError::IsDirectory(_)
        | DirectoryError::NotDirectory(_)
        | DirectoryError::InvalidArgument(_)
        | DirectoryError::NoPartner(_) => StatusCode::BAD_REQUEST,
        DirectoryError::AtCapacity(_) => StatusCode::INSUFFICIENT_STORAGE,
        DirectoryError::Storage(_) | DirectoryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_error(err: DirectoryError) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!("Directory operation failed: {}", err);
    (
        error_status(&err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Run a blocking tree operation off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, DirectoryError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DirectoryError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(DirectoryError::Io(format!("handler task failed: {}", e))),
    }
}

fn ok() -> Json<OkResponse> {
    Json(OkResponse { success: true })
}

/// Create a single directory.
///
/// The parent must already exist; missing ancestors are a client error
/// here, unlike the `mkdir -p` variant below.
pub async fn handle_create_directory(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.create_directory(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Create a directory and any missing ancestors (`mkdir -p`).
pub async fn handle_create_directories(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.create_directories(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Create a file.
///
/// Allocates the requested replica chains, sets their blocks up on the
/// storage nodes and returns the resulting data status.
pub async fn handle_create(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<CreateRequest>,
) -> HandlerResult<RpcDataStatus> {
    run_blocking(move || {
        tree.create(
            &req.path,
            &req.backing_path,
            req.num_blocks,
            req.chain_length,
            req.flags,
            Perms(req.permissions as u16),
            &req.tags,
        )
    })
    .await
    .map(|status| Json(to_rpc_data_status(&status)))
    .map_err(into_error)
}

/// Open an existing file and return its data status.
pub async fn handle_open(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<RpcDataStatus> {
    run_blocking(move || tree.open(&req.path))
        .await
        .map(|status| Json(to_rpc_data_status(&status)))
        .map_err(into_error)
}

/// Open the file if it exists, otherwise create it with the given
/// provisioning.
pub async fn handle_open_or_create(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<CreateRequest>,
) -> HandlerResult<RpcDataStatus> {
    run_blocking(move || {
        tree.open_or_create(
            &req.path,
            &req.backing_path,
            req.num_blocks,
            req.chain_length,
            req.flags,
            Perms(req.permissions as u16),
            &req.tags,
        )
    })
    .await
    .map(|status| Json(to_rpc_data_status(&status)))
    .map_err(into_error)
}

/// Check whether a path exists at all.
pub async fn handle_exists(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<BoolResponse> {
    run_blocking(move || Ok(tree.exists(&req.path)))
        .await
        .map(|value| Json(BoolResponse { value }))
        .map_err(into_error)
}

/// Check whether a path names a directory.
pub async fn handle_is_directory(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<BoolResponse> {
    run_blocking(move || tree.is_directory(&req.path))
        .await
        .map(|value| Json(BoolResponse { value }))
        .map_err(into_error)
}

/// Check whether a path names a regular file.
pub async fn handle_is_regular_file(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<BoolResponse> {
    run_blocking(move || tree.is_regular_file(&req.path))
        .await
        .map(|value| Json(BoolResponse { value }))
        .map_err(into_error)
}

/// Fetch a node's file status: type, permissions, last write time.
pub async fn handle_status(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<RpcFileStatus> {
    run_blocking(move || tree.status(&req.path))
        .await
        .map(|status| Json(to_rpc_file_status(&status)))
        .map_err(into_error)
}

/// Fetch a file's data status: chains, slot ranges, modes, flags, tags.
pub async fn handle_dstatus(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<RpcDataStatus> {
    run_blocking(move || tree.dstatus(&req.path))
        .await
        .map(|status| Json(to_rpc_data_status(&status)))
        .map_err(into_error)
}

/// Fetch a node's last write time in milliseconds since the epoch.
pub async fn handle_last_write_time(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<LastWriteTimeResponse> {
    run_blocking(move || tree.last_write_time(&req.path))
        .await
        .map(|last_write_time| Json(LastWriteTimeResponse { last_write_time }))
        .map_err(into_error)
}

/// Read a node's permission bits.
pub async fn handle_permissions_get(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<PermissionsResponse> {
    run_blocking(move || tree.permissions(&req.path))
        .await
        .map(|prms| {
            Json(PermissionsResponse {
                permissions: prms.bits() as i32,
            })
        })
        .map_err(into_error)
}

/// Update a node's permission bits.
///
/// The `opts` field selects replace, add (bitwise OR) or remove (bitwise
/// AND-NOT).
pub async fn handle_permissions_set(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PermissionsSetRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || {
        let opts = perm_options_from_i32(req.opts)?;
        tree.set_permissions(&req.path, Perms(req.permissions as u16), opts)
    })
    .await
    .map(|_| ok())
    .map_err(into_error)
}

/// Advance the last write time of a path, its ancestors and (for a
/// directory) its whole subtree. Touch is how clients renew leases.
pub async fn handle_touch(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.touch(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Move a file or directory. The target must not exist and must name the
/// destination entry explicitly.
pub async fn handle_rename(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<RenameRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.rename(&req.old_path, &req.new_path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Remove a file or an empty directory, releasing its storage blocks.
pub async fn handle_remove(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.remove(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Remove a whole subtree, releasing every contained file's blocks.
pub async fn handle_remove_all(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.remove_all(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Write a path's dirty chains back to the backing store. Storage modes
/// are left unchanged.
pub async fn handle_sync(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PersistenceRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.sync(&req.path, &req.backing_path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Flush a path to the backing store and release its in-memory blocks;
/// chain modes become on-disk.
pub async fn handle_dump(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PersistenceRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.dump(&req.path, &req.backing_path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Re-materialize a path from the backing store onto freshly allocated
/// blocks.
pub async fn handle_load(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PersistenceRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.load(&req.path, &req.backing_path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// List a directory's entries, sorted by child name.
pub async fn handle_directory_entries(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<EntriesResponse> {
    run_blocking(move || tree.directory_entries(&req.path))
        .await
        .map(|entries| {
            Json(EntriesResponse {
                entries: entries.iter().map(to_rpc_entry).collect(),
            })
        })
        .map_err(into_error)
}

/// List a subtree's entries in pre-order depth-first order, not including
/// the directory itself.
pub async fn handle_recursive_directory_entries(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<EntriesResponse> {
    run_blocking(move || tree.recursive_directory_entries(&req.path))
        .await
        .map(|entries| {
            Json(EntriesResponse {
                entries: entries.iter().map(to_rpc_entry).collect(),
            })
        })
        .map_err(into_error)
}

/// Merge key/value tags into a file's data status.
pub async fn handle_add_tags(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<AddTagsRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.add_tags(&req.path, &req.tags))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Report bytes stored under a path: a file's chain tails, or the
/// recursive sum for a directory.
pub async fn handle_file_size(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<FileSizeResponse> {
    run_blocking(move || tree.file_size(&req.path))
        .await
        .map(|bytes| Json(FileSizeResponse { bytes }))
        .map_err(into_error)
}

/// Auto-scale a file by one block: the fullest chain donates half its slot
/// range to a freshly allocated chain.
pub async fn handle_add_block_to_file(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.add_block_to_file(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Split the chain owning exactly the given slot range in two.
pub async fn handle_split_slot_range(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<SlotRangeRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.split_slot_range(&req.path, req.slot_begin, req.slot_end))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Merge the chain owning exactly the given slot range into its right
/// neighbor, freeing the donor's blocks.
pub async fn handle_merge_slot_range(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<SlotRangeRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.merge_slot_range(&req.path, req.slot_begin, req.slot_end))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Repair a chain after block failures.
///
/// Invoked by storage nodes that detect dead chain members; returns the
/// rebuilt chain so the caller can resume serving.
pub async fn handle_resolve_failures(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<ChainRequest>,
) -> HandlerResult<ChainResponse> {
    run_blocking(move || {
        let chain = from_rpc_chain(&req.chain)?;
        tree.resolve_failures(&req.path, &chain)
    })
    .await
    .map(|chain| {
        Json(ChainResponse {
            chain: to_rpc_chain(&chain),
        })
    })
    .map_err(into_error)
}

/// Extend a (possibly degraded) chain by one replica at the tail.
pub async fn handle_add_replica_to_chain(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<ChainRequest>,
) -> HandlerResult<ChainResponse> {
    run_blocking(move || {
        let chain = from_rpc_chain(&req.chain)?;
        tree.add_replica_to_chain(&req.path, &chain)
    })
    .await
    .map(|chain| {
        Json(ChainResponse {
            chain: to_rpc_chain(&chain),
        })
    })
    .map_err(into_error)
}

/// Expire a path's lease: pinned entries are untouched, mapped files are
/// flushed in place, everything else is cleared and removed.
pub async fn handle_lease_expiry(
    Extension(tree): Extension<Arc<DirectoryTree>>,
    Json(req): Json<PathRequest>,
) -> HandlerResult<OkResponse> {
    run_blocking(move || tree.handle_lease_expiry(&req.path))
        .await
        .map(|_| ok())
        .map_err(into_error)
}

/// Every directory route; the shared tree is injected as an `Extension`
/// layer by the caller.
pub fn directory_routes() -> Router {
    Router::new()
        .route(ENDPOINT_CREATE_DIRECTORY, post(handle_create_directory))
        .route(ENDPOINT_CREATE_DIRECTORIES, post(handle_create_directories))
        .route(ENDPOINT_CREATE, post(handle_create))
        .route(ENDPOINT_OPEN, post(handle_open))
        .route(ENDPOINT_OPEN_OR_CREATE, post(handle_open_or_create))
        .route(ENDPOINT_EXISTS, post(handle_exists))
        .route(ENDPOINT_IS_DIRECTORY, post(handle_is_directory))
        .route(ENDPOINT_IS_REGULAR_FILE, post(handle_is_regular_file))
        .route(ENDPOINT_STATUS, post(handle_status))
        .route(ENDPOINT_DSTATUS, post(handle_dstatus))
        .route(ENDPOINT_LAST_WRITE_TIME, post(handle_last_write_time))
        .route(ENDPOINT_PERMISSIONS_GET, post(handle_permissions_get))
        .route(ENDPOINT_PERMISSIONS_SET, post(handle_permissions_set))
        .route(ENDPOINT_TOUCH, post(handle_touch))
        .route(ENDPOINT_RENAME, post(handle_rename))
        .route(ENDPOINT_REMOVE, post(handle_remove))
        .route(ENDPOINT_REMOVE_ALL, post(handle_remove_all))
        .route(ENDPOINT_SYNC, post(handle_sync))
        .route(ENDPOINT_DUMP, post(handle_dump))
        .route(ENDPOINT_LOAD, post(handle_load))
        .route(ENDPOINT_DIRECTORY_ENTRIES, post(handle_directory_entries))
        .route(
            ENDPOINT_RECURSIVE_DIRECTORY_ENTRIES,
            post(handle_recursive_directory_entries),
        )
        .route(ENDPOINT_ADD_TAGS, post(handle_add_tags))
        .route(ENDPOINT_FILE_SIZE, post(handle_file_size))
        .route(ENDPOINT_ADD_BLOCK_TO_FILE, post(handle_add_block_to_file))
        .route(ENDPOINT_SPLIT_SLOT_RANGE, post(handle_split_slot_range))
        .route(ENDPOINT_MERGE_SLOT_RANGE, post(handle_merge_slot_range))
        .route(ENDPOINT_RESOLVE_FAILURES, post(handle_resolve_failures))
        .route(
            ENDPOINT_ADD_REPLICA_TO_CHAIN,
            post(handle_add_replica_to_chain),
        )
        .route(ENDPOINT_HANDLE_LEASE_EXPIRY, post(handle_lease_expiry))
}
