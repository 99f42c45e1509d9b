//! Background workers over the directory tree.
//!
//! Each worker owns one thread and a stop flag: `start` launches the loop,
//! `stop` raises the flag and joins. Workers reach the tree only through
//! its public operations and never hold state across iterations; a failure
//! on one file is logged and does not stop the scan.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::tree::{DirectoryTree, join_path};
use super::types::{FileType, now_ms};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sleep out the remainder of a worker epoch, waking early on stop.
fn wait_for_next_epoch(stop: &AtomicBool, started: Instant, period: Duration) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match period.checked_sub(started.elapsed()) {
            Some(remaining) if remaining > Duration::ZERO => {
                thread::sleep(remaining.min(STOP_POLL_INTERVAL));
            }
            _ => return,
        }
    }
}

/// Periodically writes every mapped file's dirty chains back to its backing
/// store.
pub struct SyncWorker {
    tree: Arc<DirectoryTree>,
    sync_period: Duration,
    stop: Arc<AtomicBool>,
    num_epochs: Arc<AtomicUsize>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SyncWorker {
    pub fn new(tree: Arc<DirectoryTree>, sync_period: Duration) -> Self {
        Self {
            tree,
            sync_period,
            stop: Arc::new(AtomicBool::new(false)),
            num_epochs: Arc::new(AtomicUsize::new(0)),
            worker: None,
        }
    }

    pub fn start(&mut self) {
        let tree = self.tree.clone();
        let stop = self.stop.clone();
        let num_epochs = self.num_epochs.clone();
        let period = self.sync_period;
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                tracing::trace!("Looking for mapped files to synchronize...");
                let started = Instant::now();
                sync_pass(&tree, "/");
                num_epochs.fetch_add(1, Ordering::Relaxed);
                wait_for_next_epoch(&stop, started, period);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn num_epochs(&self) -> usize {
        self.num_epochs.load(Ordering::Relaxed)
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sync_pass(tree: &DirectoryTree, path: &str) {
    let entries = match tree.directory_entries(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Sync scan of {} failed: {}", path, e);
            return;
        }
    };
    for entry in entries {
        let child_path = join_path(path, &entry.name);
        match entry.file_type() {
            FileType::Regular => {
                // The file may race with removal; skip it on any error.
                match tree.dstatus(&child_path) {
                    Ok(status) if status.is_mapped() => {
                        tracing::info!(
                            "Syncing file {} with {}...",
                            child_path,
                            status.backing_path()
                        );
                        if let Err(e) = tree.sync(&child_path, status.backing_path()) {
                            tracing::error!("Failed to sync {}: {}", child_path, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Skipping {}: {}", child_path, e),
                }
            }
            FileType::Directory => sync_pass(tree, &child_path),
        }
    }
}

/// Periodically expires leases: any node whose last write is older than the
/// lease period (plus grace) is handed to `handle_lease_expiry`.
pub struct LeaseExpiryWorker {
    tree: Arc<DirectoryTree>,
    scan_period: Duration,
    lease_period: Duration,
    grace_period: Duration,
    stop: Arc<AtomicBool>,
    num_epochs: Arc<AtomicUsize>,
    worker: Option<thread::JoinHandle<()>>,
}

impl LeaseExpiryWorker {
    pub fn new(
        tree: Arc<DirectoryTree>,
        scan_period: Duration,
        lease_period: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            tree,
            scan_period,
            lease_period,
            grace_period,
            stop: Arc::new(AtomicBool::new(false)),
            num_epochs: Arc::new(AtomicUsize::new(0)),
            worker: None,
        }
    }

    pub fn start(&mut self) {
        let tree = self.tree.clone();
        let stop = self.stop.clone();
        let num_epochs = self.num_epochs.clone();
        let period = self.scan_period;
        let cutoff = (self.lease_period + self.grace_period).as_millis() as u64;
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let started = Instant::now();
                expiry_pass(&tree, "/", cutoff);
                num_epochs.fetch_add(1, Ordering::Relaxed);
                wait_for_next_epoch(&stop, started, period);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn num_epochs(&self) -> usize {
        self.num_epochs.load(Ordering::Relaxed)
    }
}

impl Drop for LeaseExpiryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn expiry_pass(tree: &DirectoryTree, path: &str, cutoff_ms: u64) {
    let entries = match tree.directory_entries(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Lease scan of {} failed: {}", path, e);
            return;
        }
    };
    for entry in entries {
        let child_path = join_path(path, &entry.name);
        let age = now_ms().saturating_sub(entry.last_write_time());
        if age >= cutoff_ms {
            tracing::info!("Lease expired on {} (idle {} ms)", child_path, age);
            if let Err(e) = tree.handle_lease_expiry(&child_path) {
                tracing::error!("Failed to expire {}: {}", child_path, e);
            }
        } else if entry.file_type() == FileType::Directory {
            // A recently written directory can still hold stale files.
            expiry_pass(tree, &child_path, cutoff_ms);
        }
    }
}

/// Periodically aggregates per-file storage sizes for observability.
pub struct FileSizeTracker {
    tree: Arc<DirectoryTree>,
    scan_period: Duration,
    stop: Arc<AtomicBool>,
    sizes: Arc<DashMap<String, u64>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FileSizeTracker {
    pub fn new(tree: Arc<DirectoryTree>, scan_period: Duration) -> Self {
        Self {
            tree,
            scan_period,
            stop: Arc::new(AtomicBool::new(false)),
            sizes: Arc::new(DashMap::new()),
            worker: None,
        }
    }

    pub fn start(&mut self) {
        let tree = self.tree.clone();
        let stop = self.stop.clone();
        let sizes = self.sizes.clone();
        let period = self.scan_period;
        self.worker = Some(thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let started = Instant::now();
                let mut seen = HashSet::new();
                size_pass(&tree, "/", &sizes, &mut seen);
                sizes.retain(|path, _| seen.contains(path));
                wait_for_next_epoch(&stop, started, period);
            }
        }));
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// Last observed size of every tracked file.
    pub fn tracked(&self) -> Vec<(String, u64)> {
        self.sizes
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn num_tracked(&self) -> usize {
        self.sizes.len()
    }
}

impl Drop for FileSizeTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn size_pass(
    tree: &DirectoryTree,
    path: &str,
    sizes: &DashMap<String, u64>,
    seen: &mut HashSet<String>,
) {
    let entries = match tree.directory_entries(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Size scan of {} failed: {}", path, e);
            return;
        }
    };
    for entry in entries {
        let child_path = join_path(path, &entry.name);
        match entry.file_type() {
            FileType::Regular => match tree.file_size(&child_path) {
                Ok(bytes) => {
                    tracing::debug!("File {} holds {} bytes", child_path, bytes);
                    sizes.insert(child_path.clone(), bytes);
                    seen.insert(child_path);
                }
                Err(e) => tracing::debug!("Skipping {}: {}", child_path, e),
            },
            FileType::Directory => size_pass(tree, &child_path, sizes, seen),
        }
    }
}
