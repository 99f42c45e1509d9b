//! Block allocator: an exclusive pool of opaque block identifiers.
//!
//! Storage servers advertise their blocks at startup; the directory core
//! draws replica-chain members from the pool and returns them when files are
//! removed, dumped or merged away. An identifier handed out by `allocate` is
//! never handed out again until it is `free`d.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("out of capacity: requested {requested} block(s), {free} free")]
    OutOfCapacity { requested: usize, free: usize },

    #[error("block not allocated: {0}")]
    NotAllocated(String),
}

/// Capability set the directory core requires from an allocator.
///
/// `hints` is advisory (e.g. preferred hosts); implementations may ignore
/// it. All implementations are thread-safe.
pub trait BlockAllocator: Send + Sync {
    /// Reserve `count` distinct, currently-free block identifiers.
    fn allocate(&self, count: usize, hints: &[String]) -> Result<Vec<String>, AllocatorError>;

    /// Return identifiers to the free pool. Freeing an unallocated
    /// identifier is an error; nothing is freed in that case.
    fn free(&self, block_names: &[String]) -> Result<(), AllocatorError>;

    fn num_free(&self) -> usize;

    fn num_allocated(&self) -> usize;

    fn num_total(&self) -> usize {
        self.num_free() + self.num_allocated()
    }
}

#[derive(Default)]
struct Pool {
    free: Vec<String>,
    allocated: HashSet<String>,
}

impl Pool {
    fn check_capacity(&self, count: usize) -> Result<(), AllocatorError> {
        if self.free.len() < count {
            return Err(AllocatorError::OutOfCapacity {
                requested: count,
                free: self.free.len(),
            });
        }
        Ok(())
    }

    fn take_back(&mut self, block_names: &[String]) -> Result<(), AllocatorError> {
        for name in block_names {
            if !self.allocated.contains(name) {
                return Err(AllocatorError::NotAllocated(name.clone()));
            }
        }
        for name in block_names {
            self.allocated.remove(name);
            self.free.push(name.clone());
        }
        Ok(())
    }
}

/// Host prefix of a block identifier of the form `host:port:id`. Block
/// names without separators are their own prefix.
fn host_of(block_name: &str) -> &str {
    match block_name.rfind(':') {
        Some(idx) => &block_name[..idx],
        None => block_name,
    }
}

/// Production allocator: picks free blocks at random while spreading the
/// members of one allocation across distinct hosts when possible.
pub struct RandomBlockAllocator {
    pool: Mutex<Pool>,
}

impl RandomBlockAllocator {
    pub fn new(block_names: Vec<String>) -> Self {
        Self {
            pool: Mutex::new(Pool {
                free: block_names,
                allocated: HashSet::new(),
            }),
        }
    }
}

impl BlockAllocator for RandomBlockAllocator {
    fn allocate(&self, count: usize, hints: &[String]) -> Result<Vec<String>, AllocatorError> {
        let mut pool = self.pool.lock().unwrap();
        pool.check_capacity(count)?;

        let mut by_host: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in pool.free.drain(..) {
            by_host.entry(host_of(&name).to_string()).or_default().push(name);
        }

        let mut rng = rand::thread_rng();
        let mut picked = Vec::with_capacity(count);

        // Honor host hints first, one block per hinted host.
        for hint in hints {
            if picked.len() == count {
                break;
            }
            if let Some(blocks) = by_host.get_mut(host_of(hint)) {
                if !blocks.is_empty() {
                    let idx = rng.gen_range(0..blocks.len());
                    picked.push(blocks.swap_remove(idx));
                }
            }
        }

        // Fill the rest from random hosts, preferring hosts not yet used by
        // this allocation so chain members spread across failure domains.
        let mut used_hosts: HashSet<String> =
            picked.iter().map(|name| host_of(name).to_string()).collect();
        while picked.len() < count {
            let mut candidates: Vec<String> = by_host
                .iter()
                .filter(|(host, blocks)| !blocks.is_empty() && !used_hosts.contains(*host))
                .map(|(host, _)| host.clone())
                .collect();
            if candidates.is_empty() {
                candidates = by_host
                    .iter()
                    .filter(|(_, blocks)| !blocks.is_empty())
                    .map(|(host, _)| host.clone())
                    .collect();
            }
            let host = candidates[rng.gen_range(0..candidates.len())].clone();
            let blocks = by_host.get_mut(&host).unwrap();
            let idx = rng.gen_range(0..blocks.len());
            picked.push(blocks.swap_remove(idx));
            used_hosts.insert(host);
        }

        for blocks in by_host.into_values() {
            pool.free.extend(blocks);
        }
        for name in &picked {
            pool.allocated.insert(name.clone());
        }
        Ok(picked)
    }

    fn free(&self, block_names: &[String]) -> Result<(), AllocatorError> {
        self.pool.lock().unwrap().take_back(block_names)
    }

    fn num_free(&self) -> usize {
        self.pool.lock().unwrap().free.len()
    }

    fn num_allocated(&self) -> usize {
        self.pool.lock().unwrap().allocated.len()
    }
}

/// Deterministic allocator: hands out blocks in seed order. Used by the
/// test suites and single-node development setups where placement does not
/// matter.
pub struct SequentialBlockAllocator {
    pool: Mutex<Pool>,
}

impl SequentialBlockAllocator {
    pub fn new(block_names: Vec<String>) -> Self {
        Self {
            pool: Mutex::new(Pool {
                free: block_names,
                allocated: HashSet::new(),
            }),
        }
    }

    /// Pool of `capacity` blocks named `"0"`, `"1"`, and so on.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new((0..capacity).map(|i| i.to_string()).collect())
    }
}

impl BlockAllocator for SequentialBlockAllocator {
    fn allocate(&self, count: usize, _hints: &[String]) -> Result<Vec<String>, AllocatorError> {
        let mut pool = self.pool.lock().unwrap();
        pool.check_capacity(count)?;
        let picked: Vec<String> = pool.free.drain(..count).collect();
        for name in &picked {
            pool.allocated.insert(name.clone());
        }
        Ok(picked)
    }

    fn free(&self, block_names: &[String]) -> Result<(), AllocatorError> {
        self.pool.lock().unwrap().take_back(block_names)
    }

    fn num_free(&self) -> usize {
        self.pool.lock().unwrap().free.len()
    }

    fn num_allocated(&self) -> usize {
        self.pool.lock().unwrap().allocated.len()
    }
}
