use axum::Json;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::Extension,
    routing::get,
};
use elasticmem::directory::allocator::{BlockAllocator, RandomBlockAllocator};
use elasticmem::directory::handlers::directory_routes;
use elasticmem::directory::tree::DirectoryTree;
use elasticmem::directory::workers::{FileSizeTracker, LeaseExpiryWorker, SyncWorker};
use elasticmem::storage::manager::StorageManagementClient;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--block <host:port:id>]...",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:9090 \\", args[0]);
        eprintln!("    --block 127.0.0.1:9093:0 --block 127.0.0.1:9093:1");
        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut block_names: Vec<String> = vec![];

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--block" => {
                block_names.push(args[i + 1].clone());
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");

    tracing::info!("Starting directory server on {}", bind_addr);
    if block_names.is_empty() {
        tracing::warn!("No storage blocks registered; file creation will fail until blocks exist");
    } else {
        tracing::info!("Registered {} storage block(s)", block_names.len());
    }

    // 1. Block allocator + storage management client:
    let allocator: Arc<dyn BlockAllocator> = Arc::new(RandomBlockAllocator::new(block_names));
    let storage = Arc::new(StorageManagementClient::new());

    // 2. Directory tree:
    let tree = Arc::new(DirectoryTree::new(allocator, storage));

    // 3. Background workers:
    let sync_period_ms = env_ms("SYNC_PERIOD_MS", 30_000);
    let lease_period_ms = env_ms("LEASE_PERIOD_MS", 10_000);
    let grace_period_ms = env_ms("GRACE_PERIOD_MS", 10_000);
    let size_period_ms = env_ms("SIZE_PERIOD_MS", 60_000);

    let mut sync_worker = SyncWorker::new(tree.clone(), Duration::from_millis(sync_period_ms));
    sync_worker.start();
    let sync_worker = Arc::new(sync_worker);

    let mut lease_worker = LeaseExpiryWorker::new(
        tree.clone(),
        Duration::from_millis(lease_period_ms),
        Duration::from_millis(lease_period_ms),
        Duration::from_millis(grace_period_ms),
    );
    lease_worker.start();
    let lease_worker = Arc::new(lease_worker);

    let mut size_tracker = FileSizeTracker::new(tree.clone(), Duration::from_millis(size_period_ms));
    size_tracker.start();
    let size_tracker = Arc::new(size_tracker);

    tracing::info!(
        "Workers started (sync every {} ms, lease scan every {} ms)",
        sync_period_ms,
        lease_period_ms
    );

    // 4. HTTP router:
    let max_body_bytes = std::env::var("MAX_BODY_BYTES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(20 * 1024 * 1024);

    let stats = StatsState {
        bind_addr,
        allocator: tree.allocator().clone(),
        sync_worker,
        lease_worker,
        size_tracker,
    };

    let app = Router::new()
        .route("/health/routes", get(handle_routes))
        .route("/health/stats", get(handle_stats))
        .merge(directory_routes())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(tree.clone()))
        .layer(Extension(stats));

    // 5. Serve:
    tracing::info!("Directory server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn env_ms(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Clone)]
struct StatsState {
    bind_addr: SocketAddr,
    allocator: Arc<dyn BlockAllocator>,
    sync_worker: Arc<SyncWorker>,
    lease_worker: Arc<LeaseExpiryWorker>,
    size_tracker: Arc<FileSizeTracker>,
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<&'static str>,
}

#[derive(Serialize)]
struct NodeStatsResponse {
    bind_addr: String,
    blocks_free: usize,
    blocks_allocated: usize,
    sync_epochs: usize,
    lease_epochs: usize,
    tracked_files: usize,
    tracked_bytes: u64,
    cpu_usage: f32,
    mem_used_mb: u64,
    mem_total_mb: u64,
}

async fn handle_routes() -> Json<RoutesResponse> {
    Json(RoutesResponse {
        routes: vec![
            "/health/routes",
            "/health/stats",
            "/create_directory",
            "/create_directories",
            "/create",
            "/open",
            "/open_or_create",
            "/exists",
            "/is_directory",
            "/is_regular_file",
            "/status",
            "/dstatus",
            "/last_write_time",
            "/permissions/get",
            "/permissions/set",
            "/touch",
            "/rename",
            "/remove",
            "/remove_all",
            "/sync",
            "/dump",
            "/load",
            "/directory_entries",
            "/recursive_directory_entries",
            "/add_tags",
            "/file_size",
            "/add_block_to_file",
            "/split_slot_range",
            "/merge_slot_range",
            "/resolve_failures",
            "/add_replica_to_chain",
            "/handle_lease_expiry",
        ],
    })
}

async fn handle_stats(Extension(stats): Extension<StatsState>) -> Json<NodeStatsResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    let cpu_usage = sys.global_cpu_info().cpu_usage();
    // sysinfo returns bytes for memory values.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);
    let tracked = stats.size_tracker.tracked();
    let tracked_bytes: u64 = tracked.iter().map(|(_, bytes)| *bytes).sum();

    Json(NodeStatsResponse {
        bind_addr: stats.bind_addr.to_string(),
        blocks_free: stats.allocator.num_free(),
        blocks_allocated: stats.allocator.num_allocated(),
        sync_epochs: stats.sync_worker.num_epochs(),
        lease_epochs: stats.lease_worker.num_epochs(),
        tracked_files: tracked.len(),
        tracked_bytes,
        cpu_usage,
        mem_used_mb,
        mem_total_mb,
    })
}
