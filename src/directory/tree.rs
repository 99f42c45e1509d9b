//! Namespace tree and capacity orchestration.
//!
//! Directories and files are tagged nodes, each guarding its own state with
//! a reader/writer lock: a directory protects its children map, a file its
//! data status and the list of chains currently being imported. There is no
//! global tree lock; path resolution takes reader locks step by step, and
//! mutations lock only the final parent (or the file itself).
//!
//! The file node also hosts the re-partitioning protocols: a slot split or
//! merge runs as a setup phase (statuses flipped, storage informed) and a
//! finalize phase (ranges rewritten, chains returned to stable serving),
//! each atomic under the file's writer lock. Data movement between blocks
//! is driven by the storage layer; the directory core only coordinates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::directory::allocator::BlockAllocator;
use crate::directory::errors::{DirectoryError, Result};
use crate::directory::types::*;
use crate::storage::manager::StorageManagementOps;

/// Split an absolute, normalized path into its components. `/` yields an
/// empty list.
pub fn path_components(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(DirectoryError::InvalidArgument(format!(
            "path must be absolute: {}",
            path
        )));
    }
    if path == "/" {
        return Ok(Vec::new());
    }
    let mut components = Vec::new();
    for part in path[1..].split('/') {
        if part.is_empty() {
            return Err(DirectoryError::InvalidArgument(format!(
                "path is not normalized: {}",
                path
            )));
        }
        components.push(part.to_string());
    }
    Ok(components)
}

/// Join a path element onto a backing or namespace path.
pub fn join_path(base: &str, element: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, element)
    } else {
        format!("{}/{}", base, element)
    }
}

struct NodeCommon {
    name: RwLock<String>,
    file_type: FileType,
    permissions: AtomicU16,
    last_write_time: AtomicU64,
}

impl NodeCommon {
    fn new(name: &str, file_type: FileType, permissions: Perms, time: u64) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
            file_type,
            permissions: AtomicU16::new(permissions.bits()),
            last_write_time: AtomicU64::new(time),
        }
    }
}

enum NodeKind {
    Directory(DirNode),
    File(FileNode),
}

struct DsNode {
    common: NodeCommon,
    kind: NodeKind,
}

impl DsNode {
    fn new_directory(name: &str) -> Arc<DsNode> {
        Arc::new(DsNode {
            common: NodeCommon::new(name, FileType::Directory, Perms::ALL, now_ms()),
            kind: NodeKind::Directory(DirNode::default()),
        })
    }

    fn new_file(name: &str, permissions: Perms, dstatus: DataStatus) -> Arc<DsNode> {
        Arc::new(DsNode {
            common: NodeCommon::new(name, FileType::Regular, permissions, now_ms()),
            kind: NodeKind::File(FileNode::new(dstatus)),
        })
    }

    fn name(&self) -> String {
        self.common.name.read().unwrap().clone()
    }

    fn set_name(&self, name: &str) {
        *self.common.name.write().unwrap() = name.to_string();
    }

    fn is_directory(&self) -> bool {
        self.common.file_type == FileType::Directory
    }

    fn is_regular_file(&self) -> bool {
        self.common.file_type == FileType::Regular
    }

    fn file_status(&self) -> FileStatus {
        FileStatus::new(
            self.common.file_type,
            Perms(self.common.permissions.load(Ordering::Relaxed)),
            self.common.last_write_time.load(Ordering::Relaxed),
        )
    }

    fn entry(&self) -> DirectoryEntry {
        DirectoryEntry::new(self.name(), self.file_status())
    }

    fn last_write_time(&self) -> u64 {
        self.common.last_write_time.load(Ordering::Relaxed)
    }

    /// Touch may only advance the write time.
    fn touch_time(&self, time: u64) {
        self.common.last_write_time.fetch_max(time, Ordering::Relaxed);
    }

    fn permissions(&self) -> Perms {
        Perms(self.common.permissions.load(Ordering::Relaxed))
    }

    fn set_permissions(&self, prms: Perms, opts: PermOptions) {
        let masked = prms.bits() & Perms::MASK;
        match opts {
            PermOptions::Replace => {
                self.common.permissions.store(masked, Ordering::Relaxed);
            }
            PermOptions::Add => {
                self.common.permissions.fetch_or(masked, Ordering::Relaxed);
            }
            PermOptions::Remove => {
                self.common.permissions.fetch_and(!masked, Ordering::Relaxed);
            }
        }
    }

    fn as_dir(&self, path: &str) -> Result<&DirNode> {
        match &self.kind {
            NodeKind::Directory(dir) => Ok(dir),
            NodeKind::File(_) => Err(DirectoryError::NotDirectory(path.to_string())),
        }
    }

    fn as_file(&self, path: &str) -> Result<&FileNode> {
        match &self.kind {
            NodeKind::File(file) => Ok(file),
            NodeKind::Directory(_) => Err(DirectoryError::IsDirectory(path.to_string())),
        }
    }
}

#[derive(Default)]
struct DirNode {
    children: RwLock<BTreeMap<String, Arc<DsNode>>>,
}

impl DirNode {
    fn get_child(&self, name: &str) -> Option<Arc<DsNode>> {
        self.children.read().unwrap().get(name).cloned()
    }

    fn add_child(&self, node: Arc<DsNode>) -> Result<()> {
        let mut children = self.children.write().unwrap();
        let name = node.name();
        if children.contains_key(&name) {
            return Err(DirectoryError::Exists(name));
        }
        children.insert(name, node);
        Ok(())
    }

    fn remove_child(&self, name: &str) -> Result<Arc<DsNode>> {
        self.children
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))
    }

    fn child_names(&self) -> Vec<String> {
        self.children.read().unwrap().keys().cloned().collect()
    }

    fn child_nodes(&self) -> Vec<Arc<DsNode>> {
        self.children.read().unwrap().values().cloned().collect()
    }

    fn is_empty(&self) -> bool {
        self.children.read().unwrap().is_empty()
    }

    /// Snapshot of the children, sorted by name.
    fn entries(&self) -> Vec<DirectoryEntry> {
        self.children
            .read()
            .unwrap()
            .values()
            .map(|node| node.entry())
            .collect()
    }
}

struct FileState {
    dstatus: DataStatus,
    /// Chains being imported by an in-flight split; not yet live.
    adding: Vec<ReplicaChain>,
}

/// The donor and recipient of one re-partitioning step.
#[derive(Debug, Clone)]
pub struct ExportCtx {
    pub from_block: ReplicaChain,
    pub to_block: ReplicaChain,
}

struct FileNode {
    state: RwLock<FileState>,
}

impl FileNode {
    fn new(dstatus: DataStatus) -> Self {
        Self {
            state: RwLock::new(FileState {
                dstatus,
                adding: Vec::new(),
            }),
        }
    }

    fn dstatus(&self) -> DataStatus {
        self.state.read().unwrap().dstatus.clone()
    }

    fn add_tags(&self, tags: &BTreeMap<String, String>) {
        self.state.write().unwrap().dstatus.add_tags(tags);
    }

    /// Live chains plus chains still being imported.
    fn num_blocks(&self) -> usize {
        let state = self.state.read().unwrap();
        state.dstatus.data_blocks().len() + state.adding.len()
    }

    fn all_block_names(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        let mut names = Vec::new();
        for chain in state.dstatus.data_blocks() {
            names.extend(chain.block_names.iter().cloned());
        }
        for chain in &state.adding {
            names.extend(chain.block_names.iter().cloned());
        }
        names
    }

    fn size(&self, storage: &dyn StorageManagementOps) -> Result<u64> {
        let state = self.state.read().unwrap();
        let mut total = 0;
        for chain in state.dstatus.data_blocks() {
            total += storage.storage_size(chain.tail())?;
        }
        Ok(total)
    }

    /// Flush dirty in-memory chains to the backing store.
    fn sync(&self, backing_path: &str, storage: &dyn StorageManagementOps) -> Result<()> {
        let state = self.state.write().unwrap();
        for chain in state.dstatus.data_blocks() {
            if chain.mode == StorageMode::InMemory || chain.mode == StorageMode::InMemoryGrace {
                let block_backing_path = join_path(backing_path, &chain.slot_range_string());
                storage.sync(chain.tail(), &block_backing_path)?;
            }
        }
        Ok(())
    }

    /// Flush every chain's tail, reset the other members and hand all block
    /// names back to the caller for freeing.
    fn dump(
        &self,
        cleared_blocks: &mut Vec<String>,
        backing_path: &str,
        storage: &dyn StorageManagementOps,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for i in 0..state.dstatus.data_blocks().len() {
            let chain = state.dstatus.data_blocks()[i].clone();
            let len = chain.block_names.len();
            for (j, block_name) in chain.block_names.iter().enumerate() {
                if j == len - 1 {
                    let block_backing_path = join_path(backing_path, &chain.slot_range_string());
                    storage.dump(block_name, &block_backing_path)?;
                    state.dstatus.mark_dumped(i);
                } else {
                    storage.reset(block_name)?;
                }
                cleared_blocks.push(block_name.clone());
            }
        }
        Ok(())
    }

    /// Re-materialize the file from the backing store onto fresh blocks.
    fn load(
        &self,
        path: &str,
        backing_path: &str,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let auto_scale = !state.dstatus.is_static_provisioned();
        let num_blocks = state.dstatus.data_blocks().len();
        let chain_length = state.dstatus.chain_length();
        let slots_per_block = SLOT_MAX / num_blocks as i32;
        for i in 0..num_blocks {
            let slot_begin = i as i32 * slots_per_block;
            let slot_end = if i == num_blocks - 1 {
                SLOT_MAX
            } else {
                (i as i32 + 1) * slots_per_block - 1
            };
            let block_names = allocator.allocate(chain_length, &[])?;
            let block_backing_path =
                join_path(backing_path, &format!("{}_{}", slot_begin, slot_end));
            for (j, block_name) in block_names.iter().enumerate() {
                storage.setup_block(
                    block_name,
                    path,
                    slot_begin,
                    slot_end,
                    &block_names,
                    auto_scale,
                    chain_role_at(j, chain_length),
                    &next_block_at(&block_names, j),
                )?;
                storage.load(block_name, &block_backing_path)?;
            }
            state.dstatus.update_data_block_slots(i, slot_begin, slot_end);
            state.dstatus.mark_loaded(i, block_names);
        }
        Ok(())
    }

    /// Clear storage on lease expiry. Returns true when the namespace entry
    /// should be removed as well.
    fn handle_lease_expiry(
        &self,
        cleared_blocks: &mut Vec<String>,
        name: &str,
        storage: &dyn StorageManagementOps,
    ) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        if state.dstatus.is_pinned() {
            return Ok(false);
        }
        tracing::info!("Clearing storage for {}", name);
        if state.dstatus.is_mapped() {
            let backing_path = state.dstatus.backing_path().to_string();
            for i in 0..state.dstatus.data_blocks().len() {
                let chain = state.dstatus.data_blocks()[i].clone();
                let len = chain.block_names.len();
                for (j, block_name) in chain.block_names.iter().enumerate() {
                    if j == len - 1 {
                        let block_backing_path =
                            join_path(&backing_path, &chain.slot_range_string());
                        storage.dump(block_name, &block_backing_path)?;
                        state.dstatus.set_mode(i, StorageMode::OnDisk);
                    } else {
                        storage.reset(block_name)?;
                    }
                    cleared_blocks.push(block_name.clone());
                }
            }
            // Blocks are cleared, the namespace entry stays.
            Ok(false)
        } else {
            for chain in state.dstatus.data_blocks() {
                for block_name in &chain.block_names {
                    storage.reset(block_name)?;
                    cleared_blocks.push(block_name.clone());
                }
            }
            Ok(true)
        }
    }

    /// Auto-scale: pick the donor chain with the largest tail and split its
    /// slot range in two.
    fn setup_add_block(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        path: &str,
    ) -> Result<ExportCtx> {
        let mut state = self.state.write().unwrap();
        if state.dstatus.data_blocks().len() + state.adding.len() >= SLOT_MAX as usize {
            return Err(DirectoryError::AtCapacity(format!(
                "cannot expand {} beyond {} blocks",
                path, SLOT_MAX
            )));
        }

        let mut donor: Option<(usize, u64)> = None;
        for (i, chain) in state.dstatus.data_blocks().iter().enumerate() {
            if chain.status != ChainStatus::Stable || chain.num_slots() <= 1 {
                continue;
            }
            let size = storage.storage_size(chain.tail())?;
            match donor {
                Some((_, best)) if size <= best => {}
                _ => donor = Some((i, size)),
            }
        }
        let (donor_idx, _) = donor.ok_or_else(|| {
            DirectoryError::Busy(format!("no splittable chain available on {}", path))
        })?;

        start_split(&mut state, storage, allocator, path, donor_idx)
    }

    /// Split the chain owning exactly `[slot_begin, slot_end]`.
    fn setup_slot_range_split(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        path: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<ExportCtx> {
        let mut state = self.state.write().unwrap();
        if state.dstatus.data_blocks().len() + state.adding.len() >= SLOT_MAX as usize {
            return Err(DirectoryError::AtCapacity(format!(
                "cannot expand {} beyond {} blocks",
                path, SLOT_MAX
            )));
        }

        let donor_idx = state
            .dstatus
            .data_blocks()
            .iter()
            .position(|chain| chain.slot_range == (slot_begin, slot_end))
            .ok_or_else(|| {
                DirectoryError::NotFound(format!(
                    "no block with slot range {}-{} on {}",
                    slot_begin, slot_end, path
                ))
            })?;
        if state.dstatus.get_data_block_status(donor_idx) != ChainStatus::Stable {
            return Err(DirectoryError::Busy(format!(
                "block already involved in re-partitioning on {}",
                path
            )));
        }

        start_split(&mut state, storage, allocator, path, donor_idx)
    }

    /// Commit a finished split: shrink the donor, insert the recipient
    /// right of it and return both chains to stable serving.
    fn finalize_slot_range_split(
        &self,
        storage: &dyn StorageManagementOps,
        ctx: &ExportCtx,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let (slot_begin, slot_end) = ctx.from_block.slot_range;
        let slot_mid = (slot_begin + slot_end) / 2;

        let from_idx = state
            .dstatus
            .find_replica_chain(&ctx.from_block)
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("donor chain {} not present", ctx.from_block))
            })?;
        state
            .dstatus
            .update_data_block_slots(from_idx, slot_begin, slot_mid);
        state
            .dstatus
            .set_data_block_status(from_idx, ChainStatus::Stable);

        let mut recipient = ctx.to_block.clone();
        recipient.status = ChainStatus::Stable;
        state.dstatus.add_data_block(recipient, from_idx + 1);

        let adding_idx = state
            .adding
            .iter()
            .position(|chain| chain.same_blocks(&ctx.to_block))
            .ok_or_else(|| {
                DirectoryError::InvalidArgument(format!(
                    "recipient chain {} missing from adding list",
                    ctx.to_block
                ))
            })?;
        state.adding.remove(adding_idx);

        for j in 0..ctx.from_block.block_names.len() {
            storage.set_regular(&ctx.from_block.block_names[j], slot_begin, slot_mid)?;
            storage.set_regular(&ctx.to_block.block_names[j], slot_mid + 1, slot_end)?;
        }
        tracing::info!("Updated file data status: {}", state.dstatus);
        Ok(())
    }

    /// Merge the chain owning exactly `[slot_begin, slot_end]` into its
    /// right neighbor.
    fn setup_slot_range_merge(
        &self,
        storage: &dyn StorageManagementOps,
        path: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<ExportCtx> {
        let mut state = self.state.write().unwrap();
        let donor_idx = state
            .dstatus
            .data_blocks()
            .iter()
            .position(|chain| chain.slot_range == (slot_begin, slot_end))
            .ok_or_else(|| {
                DirectoryError::NotFound(format!(
                    "no block with slot range {}-{} on {}",
                    slot_begin, slot_end, path
                ))
            })?;
        if donor_idx == state.dstatus.data_blocks().len() - 1 || slot_end == SLOT_MAX {
            return Err(DirectoryError::NoPartner(path.to_string()));
        }
        if state.dstatus.get_data_block_status(donor_idx) != ChainStatus::Stable {
            return Err(DirectoryError::Busy(format!(
                "block already involved in re-partitioning on {}",
                path
            )));
        }

        let from_chain = state.dstatus.data_blocks()[donor_idx].clone();
        let to_chain = state.dstatus.data_blocks()[donor_idx + 1].clone();
        if to_chain.status == ChainStatus::Exporting {
            return Err(DirectoryError::NoPartner(path.to_string()));
        }

        state
            .dstatus
            .set_data_block_status(donor_idx, ChainStatus::Exporting);
        state
            .dstatus
            .set_data_block_status(donor_idx + 1, ChainStatus::Importing);

        let mut importing = 0;
        let mut failure = None;
        for block_name in &to_chain.block_names {
            if let Err(e) = storage.set_importing(block_name, slot_begin, slot_end) {
                failure = Some(e);
                break;
            }
            importing += 1;
        }
        if failure.is_none() {
            for block_name in &from_chain.block_names {
                if let Err(e) =
                    storage.set_exporting(block_name, &to_chain.block_names, slot_begin, slot_end)
                {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            for block_name in to_chain.block_names.iter().take(importing) {
                let _ = storage.set_regular(block_name, to_chain.slot_begin(), to_chain.slot_end());
            }
            state
                .dstatus
                .set_data_block_status(donor_idx, ChainStatus::Stable);
            state
                .dstatus
                .set_data_block_status(donor_idx + 1, ChainStatus::Stable);
            return Err(err.into());
        }

        Ok(ExportCtx {
            from_block: from_chain,
            to_block: to_chain,
        })
    }

    /// Commit a finished merge: widen the partner, drop the donor and free
    /// its blocks.
    fn finalize_slot_range_merge(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        ctx: &ExportCtx,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let slot_begin = ctx.from_block.slot_begin();
        let slot_end = ctx.to_block.slot_end();

        let to_idx = state
            .dstatus
            .find_replica_chain(&ctx.to_block)
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("partner chain {} not present", ctx.to_block))
            })?;
        state
            .dstatus
            .update_data_block_slots(to_idx, slot_begin, slot_end);
        state.dstatus.set_data_block_status(to_idx, ChainStatus::Stable);

        let from_idx = state
            .dstatus
            .find_replica_chain(&ctx.from_block)
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("donor chain {} not present", ctx.from_block))
            })?;
        state.dstatus.remove_data_block(from_idx);

        for j in 0..ctx.from_block.block_names.len() {
            storage.reset(&ctx.from_block.block_names[j])?;
            storage.set_regular(&ctx.to_block.block_names[j], slot_begin, slot_end)?;
        }
        allocator.free(&ctx.from_block.block_names)?;
        tracing::info!("Updated file data status: {}", state.dstatus);
        Ok(())
    }

    /// Rebuild a chain around its surviving members.
    fn resolve_failures(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        path: &str,
        chain: &ReplicaChain,
    ) -> Result<ReplicaChain> {
        let mut state = self.state.write().unwrap();
        let idx = state.dstatus.find_replica_chain(chain).ok_or_else(|| {
            DirectoryError::NotFound(format!("chain {} not present on {}", chain, path))
        })?;
        let current = state.dstatus.data_blocks()[idx].clone();

        let mut survivors = Vec::new();
        for block_name in &current.block_names {
            match storage.storage_size(block_name) {
                Ok(_) => survivors.push(block_name.clone()),
                Err(e) => {
                    tracing::warn!("Block {} of {} is unreachable: {}", block_name, path, e);
                }
            }
        }
        if survivors.len() == current.block_names.len() {
            return Ok(current);
        }

        let chain_length = current.block_names.len();
        let replacements = allocator.allocate(chain_length - survivors.len(), &[])?;
        let mut new_names = survivors.clone();
        new_names.extend(replacements);

        let (slot_begin, slot_end) = current.slot_range;
        let auto_scale = !state.dstatus.is_static_provisioned();
        for j in survivors.len()..new_names.len() {
            storage.setup_block(
                &new_names[j],
                path,
                slot_begin,
                slot_end,
                &new_names,
                auto_scale,
                chain_role_at(j, chain_length),
                &next_block_at(&new_names, j),
            )?;
        }
        storage.resend_pending(&new_names[0])?;

        let new_chain = ReplicaChain::new(
            new_names,
            slot_begin,
            slot_end,
            current.status,
            current.mode,
        );
        state.dstatus.set_data_block(idx, new_chain.clone());
        tracing::info!("Repaired chain on {}: {}", path, new_chain);
        Ok(new_chain)
    }

    /// Extend a (possibly degraded) chain by one member at the tail.
    fn add_replica(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        path: &str,
        chain: &ReplicaChain,
    ) -> Result<ReplicaChain> {
        let mut state = self.state.write().unwrap();
        let idx = state.dstatus.find_replica_chain(chain).ok_or_else(|| {
            DirectoryError::NotFound(format!("chain {} not present on {}", chain, path))
        })?;
        let current = state.dstatus.data_blocks()[idx].clone();

        let new_block = allocator.allocate(1, &[])?.remove(0);
        let mut new_names = current.block_names.clone();
        new_names.push(new_block);
        let len = new_names.len();

        let (slot_begin, slot_end) = current.slot_range;
        let auto_scale = !state.dstatus.is_static_provisioned();
        let prior_tail = len - 2;
        storage.setup_block(
            &new_names[prior_tail],
            path,
            slot_begin,
            slot_end,
            &new_names,
            auto_scale,
            chain_role_at(prior_tail, len),
            &new_names[len - 1],
        )?;
        storage.setup_block(
            &new_names[len - 1],
            path,
            slot_begin,
            slot_end,
            &new_names,
            auto_scale,
            ChainRole::Tail,
            NIL_BLOCK,
        )?;
        storage.forward_all(&new_names[prior_tail])?;

        let new_chain = ReplicaChain::new(
            new_names,
            slot_begin,
            slot_end,
            current.status,
            current.mode,
        );
        state.dstatus.set_data_block(idx, new_chain.clone());
        tracing::info!("Extended chain on {}: {}", path, new_chain);
        Ok(new_chain)
    }

    /// Drop the chain at `i`, resetting and freeing its blocks.
    fn remove_data_block_at(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
        i: usize,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if i >= state.dstatus.data_blocks().len() {
            return Err(DirectoryError::InvalidArgument(format!(
                "no data block at index {}",
                i
            )));
        }
        let chain = state.dstatus.remove_data_block(i);
        for block_name in &chain.block_names {
            storage.reset(block_name)?;
        }
        allocator.free(&chain.block_names)?;
        Ok(())
    }

    /// Drop every chain, resetting and freeing all blocks.
    fn remove_all_data_blocks(
        &self,
        storage: &dyn StorageManagementOps,
        allocator: &dyn BlockAllocator,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        while !state.dstatus.data_blocks().is_empty() {
            let chain = state.dstatus.remove_data_block(0);
            for block_name in &chain.block_names {
                storage.reset(block_name)?;
            }
            allocator.free(&chain.block_names)?;
        }
        Ok(())
    }
}

/// Shared body of auto-scale and explicit split: flip the donor to
/// exporting, allocate and install the recipient chain, point the donor at
/// it. Rolls back on storage failure.
fn start_split(
    state: &mut FileState,
    storage: &dyn StorageManagementOps,
    allocator: &dyn BlockAllocator,
    path: &str,
    donor_idx: usize,
) -> Result<ExportCtx> {
    state
        .dstatus
        .set_data_block_status(donor_idx, ChainStatus::Exporting);
    let from_chain = state.dstatus.data_blocks()[donor_idx].clone();
    let (slot_begin, slot_end) = from_chain.slot_range;
    // TODO: a size-weighted split point would balance better than the midpoint.
    let slot_mid = (slot_begin + slot_end) / 2;

    let chain_length = state.dstatus.chain_length();
    let block_names = match allocator.allocate(chain_length, &[]) {
        Ok(names) => names,
        Err(err) => {
            state
                .dstatus
                .set_data_block_status(donor_idx, ChainStatus::Stable);
            return Err(err.into());
        }
    };
    let to_chain = ReplicaChain::new(
        block_names,
        slot_mid + 1,
        slot_end,
        ChainStatus::Importing,
        StorageMode::InMemory,
    );

    let mut installed = 0;
    let mut exporting = 0;
    let mut failure = None;
    for (j, block_name) in to_chain.block_names.iter().enumerate() {
        let result = storage.setup_and_set_importing(
            block_name,
            path,
            slot_mid + 1,
            slot_end,
            &to_chain.block_names,
            chain_role_at(j, chain_length),
            &next_block_at(&to_chain.block_names, j),
        );
        if let Err(e) = result {
            failure = Some(e);
            break;
        }
        installed += 1;
    }
    if failure.is_none() {
        for block_name in &from_chain.block_names {
            if let Err(e) =
                storage.set_exporting(block_name, &to_chain.block_names, slot_mid + 1, slot_end)
            {
                failure = Some(e);
                break;
            }
            exporting += 1;
        }
    }
    if let Some(err) = failure {
        for block_name in to_chain.block_names.iter().take(installed) {
            let _ = storage.reset(block_name);
        }
        for block_name in from_chain.block_names.iter().take(exporting) {
            let _ = storage.set_regular(block_name, slot_begin, slot_end);
        }
        let _ = allocator.free(&to_chain.block_names);
        state
            .dstatus
            .set_data_block_status(donor_idx, ChainStatus::Stable);
        return Err(err.into());
    }

    state.adding.push(to_chain.clone());
    Ok(ExportCtx {
        from_block: from_chain,
        to_block: to_chain,
    })
}

/// The shared namespace: a tree of directory and file nodes rooted at `/`,
/// plus the block allocator and the storage management capability the
/// orchestration drives.
pub struct DirectoryTree {
    root: Arc<DsNode>,
    allocator: Arc<dyn BlockAllocator>,
    storage: Arc<dyn StorageManagementOps>,
}

impl DirectoryTree {
    pub fn new(
        allocator: Arc<dyn BlockAllocator>,
        storage: Arc<dyn StorageManagementOps>,
    ) -> Self {
        Self {
            root: DsNode::new_directory("/"),
            allocator,
            storage,
        }
    }

    pub fn allocator(&self) -> &Arc<dyn BlockAllocator> {
        &self.allocator
    }

    pub fn storage_manager(&self) -> &Arc<dyn StorageManagementOps> {
        &self.storage
    }

    fn lookup(&self, path: &str) -> Result<Arc<DsNode>> {
        let components = path_components(path)?;
        let mut current = self.root.clone();
        for component in &components {
            let dir = current.as_dir(path)?;
            let next = dir
                .get_child(component)
                .ok_or_else(|| DirectoryError::NotFound(path.to_string()))?;
            current = next;
        }
        Ok(current)
    }

    fn lookup_dir(&self, path: &str) -> Result<Arc<DsNode>> {
        let node = self.lookup(path)?;
        node.as_dir(path)?;
        Ok(node)
    }

    /// Parent directory node and final component of a non-root path.
    fn lookup_parent(&self, path: &str) -> Result<(Arc<DsNode>, String)> {
        let mut components = path_components(path)?;
        let name = components.pop().ok_or_else(|| {
            DirectoryError::InvalidArgument(format!("operation not permitted on root: {}", path))
        })?;
        let mut current = self.root.clone();
        for component in &components {
            let dir = current.as_dir(path)?;
            let next = dir
                .get_child(component)
                .ok_or_else(|| DirectoryError::NotFound(path.to_string()))?;
            current = next;
        }
        current.as_dir(path)?;
        Ok((current, name))
    }

    /// Walk to the parent of `path`, creating missing directories on the
    /// way. Fails if an existing ancestor is a file.
    fn create_parents(&self, path: &str, components: &[String]) -> Result<Arc<DsNode>> {
        let mut current = self.root.clone();
        for component in components {
            let dir = current.as_dir(path)?;
            let next = match dir.get_child(component) {
                Some(node) => node,
                None => {
                    let node = DsNode::new_directory(component);
                    match dir.add_child(node.clone()) {
                        Ok(()) => node,
                        // Lost the race; take whatever got there first.
                        Err(DirectoryError::Exists(_)) => dir.get_child(component).ok_or_else(
                            || DirectoryError::NotFound(path.to_string()),
                        )?,
                        Err(e) => return Err(e),
                    }
                }
            };
            current = next;
        }
        current.as_dir(path)?;
        Ok(current)
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        let (parent, name) = self.lookup_parent(path)?;
        let parent_dir = parent.as_dir(path)?;
        parent_dir
            .add_child(DsNode::new_directory(&name))
            .map_err(|e| match e {
                DirectoryError::Exists(_) => DirectoryError::Exists(path.to_string()),
                other => other,
            })
    }

    pub fn create_directories(&self, path: &str) -> Result<()> {
        let components = path_components(path)?;
        self.create_parents(path, &components)?;
        Ok(())
    }

    /// Create a file with default provisioning: one block, chain length one.
    pub fn create_file(&self, path: &str, backing_path: &str) -> Result<DataStatus> {
        self.create(path, backing_path, 1, 1, 0, Perms::ALL, &BTreeMap::new())
    }

    /// Create a file, its missing parents, and its storage blocks.
    ///
    /// `[0, SLOT_MAX]` is partitioned into `num_blocks` contiguous ranges
    /// and every chain is set up on the storage nodes, chain by chain, head
    /// to tail. On a storage failure the already-installed blocks are reset
    /// and the allocation is freed, best effort.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        path: &str,
        backing_path: &str,
        num_blocks: usize,
        chain_length: usize,
        flags: i32,
        permissions: Perms,
        tags: &BTreeMap<String, String>,
    ) -> Result<DataStatus> {
        if num_blocks == 0 || num_blocks > SLOT_MAX as usize {
            return Err(DirectoryError::InvalidArgument(format!(
                "num_blocks must be in [1, {}]",
                SLOT_MAX
            )));
        }
        if chain_length == 0 {
            return Err(DirectoryError::InvalidArgument(
                "chain_length must be at least 1".to_string(),
            ));
        }
        let mut components = path_components(path)?;
        let name = components.pop().ok_or_else(|| {
            DirectoryError::Exists("/".to_string())
        })?;
        let parent = self.create_parents(path, &components)?;
        let parent_dir = parent.as_dir(path)?;
        if parent_dir.get_child(&name).is_some() {
            return Err(DirectoryError::Exists(path.to_string()));
        }

        let slots_per_block = SLOT_MAX / num_blocks as i32;
        let mut chains: Vec<ReplicaChain> = Vec::with_capacity(num_blocks);
        for i in 0..num_blocks {
            let slot_begin = i as i32 * slots_per_block;
            let slot_end = if i == num_blocks - 1 {
                SLOT_MAX
            } else {
                (i as i32 + 1) * slots_per_block - 1
            };
            let block_names = match self.allocator.allocate(chain_length, &[]) {
                Ok(names) => names,
                Err(err) => {
                    for chain in &chains {
                        let _ = self.allocator.free(&chain.block_names);
                    }
                    return Err(err.into());
                }
            };
            chains.push(ReplicaChain::new(
                block_names,
                slot_begin,
                slot_end,
                ChainStatus::Stable,
                StorageMode::InMemory,
            ));
        }

        let auto_scale = flags & DataStatus::STATIC_PROVISIONED == 0;
        if let Err(err) = self.setup_chains(path, &chains, chain_length, auto_scale) {
            for chain in &chains {
                let _ = self.allocator.free(&chain.block_names);
            }
            return Err(err);
        }

        let dstatus = DataStatus::new(
            backing_path.to_string(),
            chain_length,
            chains,
            flags,
            tags.clone(),
        );
        let node = DsNode::new_file(&name, permissions, dstatus.clone());
        if let Err(e) = parent_dir.add_child(node) {
            // Lost a create race; release everything we set up.
            for chain in dstatus.data_blocks() {
                for block_name in &chain.block_names {
                    let _ = self.storage.reset(block_name);
                }
                let _ = self.allocator.free(&chain.block_names);
            }
            return Err(match e {
                DirectoryError::Exists(_) => DirectoryError::Exists(path.to_string()),
                other => other,
            });
        }
        tracing::info!("Created file {} with data status {}", path, dstatus);
        Ok(dstatus)
    }

    /// Install every chain on the storage nodes; reset what was installed
    /// on failure.
    fn setup_chains(
        &self,
        path: &str,
        chains: &[ReplicaChain],
        chain_length: usize,
        auto_scale: bool,
    ) -> Result<()> {
        let mut installed: Vec<String> = Vec::new();
        for chain in chains {
            for (j, block_name) in chain.block_names.iter().enumerate() {
                let result = self.storage.setup_block(
                    block_name,
                    path,
                    chain.slot_begin(),
                    chain.slot_end(),
                    &chain.block_names,
                    auto_scale,
                    chain_role_at(j, chain_length),
                    &next_block_at(&chain.block_names, j),
                );
                if let Err(e) = result {
                    for name in &installed {
                        let _ = self.storage.reset(name);
                    }
                    return Err(e.into());
                }
                installed.push(block_name.clone());
            }
        }
        Ok(())
    }

    pub fn open(&self, path: &str) -> Result<DataStatus> {
        let node = self.lookup(path)?;
        Ok(node.as_file(path)?.dstatus())
    }

    /// Create iff absent, else open.
    #[allow(clippy::too_many_arguments)]
    pub fn open_or_create(
        &self,
        path: &str,
        backing_path: &str,
        num_blocks: usize,
        chain_length: usize,
        flags: i32,
        permissions: Perms,
        tags: &BTreeMap<String, String>,
    ) -> Result<DataStatus> {
        match self.open(path) {
            Err(DirectoryError::NotFound(_)) => {
                match self.create(
                    path,
                    backing_path,
                    num_blocks,
                    chain_length,
                    flags,
                    permissions,
                    tags,
                ) {
                    // Lost a create race against a concurrent creator.
                    Err(DirectoryError::Exists(_)) => self.open(path),
                    other => other,
                }
            }
            other => other,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_ok()
    }

    pub fn is_directory(&self, path: &str) -> Result<bool> {
        Ok(self.lookup(path)?.is_directory())
    }

    pub fn is_regular_file(&self, path: &str) -> Result<bool> {
        Ok(self.lookup(path)?.is_regular_file())
    }

    pub fn status(&self, path: &str) -> Result<FileStatus> {
        Ok(self.lookup(path)?.file_status())
    }

    pub fn last_write_time(&self, path: &str) -> Result<u64> {
        Ok(self.lookup(path)?.last_write_time())
    }

    pub fn permissions(&self, path: &str) -> Result<Perms> {
        Ok(self.lookup(path)?.permissions())
    }

    pub fn set_permissions(&self, path: &str, prms: Perms, opts: PermOptions) -> Result<()> {
        self.lookup(path)?.set_permissions(prms, opts);
        Ok(())
    }

    /// Advance the write time of `path` and every ancestor to now. Touching
    /// a directory advances its whole subtree to the same instant.
    pub fn touch(&self, path: &str) -> Result<()> {
        let components = path_components(path)?;
        let time = now_ms();
        let mut current = self.root.clone();
        current.touch_time(time);
        for component in &components {
            let dir = current.as_dir(path)?;
            let next = dir
                .get_child(component)
                .ok_or_else(|| DirectoryError::NotFound(path.to_string()))?;
            next.touch_time(time);
            current = next;
        }
        touch_subtree(&current, time);
        Ok(())
    }

    /// Move `old_path` to `new_path`. The target must not exist and must
    /// name its final component explicitly.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        if new_path.len() > 1 && new_path.ends_with('/') {
            return Err(DirectoryError::InvalidArgument(format!(
                "rename target must name the destination entry: {}",
                new_path
            )));
        }
        let mut old_components = path_components(old_path)?;
        let old_name = old_components.pop().ok_or_else(|| {
            DirectoryError::InvalidArgument("cannot rename root".to_string())
        })?;
        let mut new_components = path_components(new_path)?;
        let new_name = new_components.pop().ok_or_else(|| {
            DirectoryError::InvalidArgument("cannot rename onto root".to_string())
        })?;

        let old_parent_path = format!("/{}", old_components.join("/"));
        let new_parent_path = format!("/{}", new_components.join("/"));
        let old_parent = self.lookup_dir(&old_parent_path)?;
        let new_parent = self.lookup_dir(&new_parent_path)?;

        let old_dir = old_parent.as_dir(old_path)?;
        let new_dir = new_parent.as_dir(new_path)?;

        if Arc::ptr_eq(&old_parent, &new_parent) {
            let mut children = old_dir.children.write().unwrap();
            if children.contains_key(&new_name) {
                return Err(DirectoryError::Exists(new_path.to_string()));
            }
            let node = children
                .remove(&old_name)
                .ok_or_else(|| DirectoryError::NotFound(old_path.to_string()))?;
            node.set_name(&new_name);
            children.insert(new_name, node);
            return Ok(());
        }

        // Lock both parents in canonical (path) order to avoid deadlock.
        let mut src;
        let mut dst;
        if old_parent_path <= new_parent_path {
            src = old_dir.children.write().unwrap();
            dst = new_dir.children.write().unwrap();
        } else {
            dst = new_dir.children.write().unwrap();
            src = old_dir.children.write().unwrap();
        }
        if dst.contains_key(&new_name) {
            return Err(DirectoryError::Exists(new_path.to_string()));
        }
        let node = src
            .remove(&old_name)
            .ok_or_else(|| DirectoryError::NotFound(old_path.to_string()))?;
        node.set_name(&new_name);
        dst.insert(new_name, node);
        Ok(())
    }

    /// Remove a file or an empty directory.
    pub fn remove(&self, path: &str) -> Result<()> {
        let (parent, name) = self.lookup_parent(path)?;
        let parent_dir = parent.as_dir(path)?;
        let node = parent_dir
            .get_child(&name)
            .ok_or_else(|| DirectoryError::NotFound(path.to_string()))?;
        if let NodeKind::Directory(dir) = &node.kind {
            if !dir.is_empty() {
                return Err(DirectoryError::DirectoryNotEmpty(path.to_string()));
            }
        }
        parent_dir.remove_child(&name)?;
        let mut cleared_blocks = Vec::new();
        self.clear_storage(&mut cleared_blocks, &node)?;
        if !cleared_blocks.is_empty() {
            self.allocator.free(&cleared_blocks)?;
        }
        Ok(())
    }

    /// Remove a subtree, resetting and freeing all its blocks.
    pub fn remove_all(&self, path: &str) -> Result<()> {
        let (parent, name) = self.lookup_parent(path)?;
        let parent_dir = parent.as_dir(path)?;
        let node = parent_dir.remove_child(&name).map_err(|e| match e {
            DirectoryError::NotFound(_) => DirectoryError::NotFound(path.to_string()),
            other => other,
        })?;
        let mut cleared_blocks = Vec::new();
        self.clear_storage(&mut cleared_blocks, &node)?;
        if !cleared_blocks.is_empty() {
            self.allocator.free(&cleared_blocks)?;
        }
        Ok(())
    }

    fn clear_storage(&self, cleared_blocks: &mut Vec<String>, node: &Arc<DsNode>) -> Result<()> {
        match &node.kind {
            NodeKind::File(file) => {
                for block_name in file.all_block_names() {
                    self.storage.reset(&block_name)?;
                    cleared_blocks.push(block_name);
                }
                Ok(())
            }
            NodeKind::Directory(dir) => {
                for child in dir.child_nodes() {
                    self.clear_storage(cleared_blocks, &child)?;
                }
                Ok(())
            }
        }
    }

    /// Flush dirty chains of `path` (recursively for directories) to the
    /// backing store. Modes are unchanged.
    pub fn sync(&self, path: &str, backing_path: &str) -> Result<()> {
        let node = self.lookup(path)?;
        self.sync_node(&node, backing_path)
    }

    fn sync_node(&self, node: &Arc<DsNode>, backing_path: &str) -> Result<()> {
        match &node.kind {
            NodeKind::File(file) => file.sync(backing_path, &*self.storage),
            NodeKind::Directory(dir) => {
                for child in dir.child_nodes() {
                    self.sync_node(&child, backing_path)?;
                }
                Ok(())
            }
        }
    }

    /// Flush `path` (recursively for directories) to the backing store and
    /// release its blocks. Chain modes become on-disk.
    pub fn dump(&self, path: &str, backing_path: &str) -> Result<()> {
        let node = self.lookup(path)?;
        let mut cleared_blocks = Vec::new();
        self.dump_node(&node, &mut cleared_blocks, backing_path)?;
        if !cleared_blocks.is_empty() {
            self.allocator.free(&cleared_blocks)?;
        }
        Ok(())
    }

    fn dump_node(
        &self,
        node: &Arc<DsNode>,
        cleared_blocks: &mut Vec<String>,
        backing_path: &str,
    ) -> Result<()> {
        match &node.kind {
            NodeKind::File(file) => file.dump(cleared_blocks, backing_path, &*self.storage),
            NodeKind::Directory(dir) => {
                for child in dir.child_nodes() {
                    self.dump_node(&child, cleared_blocks, backing_path)?;
                }
                Ok(())
            }
        }
    }

    /// Re-materialize `path` (recursively for directories) from the backing
    /// store onto freshly allocated blocks.
    pub fn load(&self, path: &str, backing_path: &str) -> Result<()> {
        let node = self.lookup(path)?;
        self.load_node(path, &node, backing_path)
    }

    fn load_node(&self, path: &str, node: &Arc<DsNode>, backing_path: &str) -> Result<()> {
        match &node.kind {
            NodeKind::File(file) => file.load(path, backing_path, &*self.storage, &*self.allocator),
            NodeKind::Directory(dir) => {
                for child in dir.child_nodes() {
                    let child_path = join_path(path, &child.name());
                    self.load_node(&child_path, &child, backing_path)?;
                }
                Ok(())
            }
        }
    }

    pub fn dstatus(&self, path: &str) -> Result<DataStatus> {
        Ok(self.lookup(path)?.as_file(path)?.dstatus())
    }

    pub fn add_tags(&self, path: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.lookup(path)?.as_file(path)?.add_tags(tags);
        Ok(())
    }

    /// Entries of `path`, sorted by child name.
    pub fn directory_entries(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let node = self.lookup(path)?;
        Ok(node.as_dir(path)?.entries())
    }

    /// Pre-order depth-first entries of the subtree under `path`, not
    /// including `path` itself.
    pub fn recursive_directory_entries(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let node = self.lookup(path)?;
        let dir = node.as_dir(path)?;
        let mut entries = Vec::new();
        populate_recursive_entries(dir, &mut entries);
        Ok(entries)
    }

    /// Bytes stored under `path`: for a file the sum of its chain tails,
    /// for a directory the recursive sum over contained files.
    pub fn file_size(&self, path: &str) -> Result<u64> {
        let node = self.lookup(path)?;
        self.node_size(&node)
    }

    fn node_size(&self, node: &Arc<DsNode>) -> Result<u64> {
        match &node.kind {
            NodeKind::File(file) => file.size(&*self.storage),
            NodeKind::Directory(dir) => {
                let mut total = 0;
                for child in dir.child_nodes() {
                    total += self.node_size(&child)?;
                }
                Ok(total)
            }
        }
    }

    /// Auto-scale `path` by one block: split the fullest chain's slot range.
    pub fn add_block_to_file(&self, path: &str) -> Result<()> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        let ctx = file.setup_add_block(&*self.storage, &*self.allocator, path)?;
        file.finalize_slot_range_split(&*self.storage, &ctx)
    }

    /// Split the chain owning exactly `[slot_begin, slot_end]` in two.
    pub fn split_slot_range(&self, path: &str, slot_begin: i32, slot_end: i32) -> Result<()> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        let ctx =
            file.setup_slot_range_split(&*self.storage, &*self.allocator, path, slot_begin, slot_end)?;
        file.finalize_slot_range_split(&*self.storage, &ctx)
    }

    /// Merge the chain owning exactly `[slot_begin, slot_end]` into its
    /// right neighbor.
    pub fn merge_slot_range(&self, path: &str, slot_begin: i32, slot_end: i32) -> Result<()> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        let ctx = file.setup_slot_range_merge(&*self.storage, path, slot_begin, slot_end)?;
        file.finalize_slot_range_merge(&*self.storage, &*self.allocator, &ctx)
    }

    /// Rebuild a chain whose membership may include dead blocks.
    pub fn resolve_failures(&self, path: &str, chain: &ReplicaChain) -> Result<ReplicaChain> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        file.resolve_failures(&*self.storage, &*self.allocator, path, chain)
    }

    /// Extend a chain by one replica at the tail.
    pub fn add_replica_to_chain(&self, path: &str, chain: &ReplicaChain) -> Result<ReplicaChain> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        file.add_replica(&*self.storage, &*self.allocator, path, chain)
    }

    /// Drop the chain at index `i` of `path`, resetting and freeing its
    /// blocks.
    pub fn remove_data_block(&self, path: &str, i: usize) -> Result<()> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        file.remove_data_block_at(&*self.storage, &*self.allocator, i)
    }

    /// Drop every chain of `path`, resetting and freeing all blocks.
    pub fn remove_all_data_blocks(&self, path: &str) -> Result<()> {
        let node = self.lookup(path)?;
        let file = node.as_file(path)?;
        file.remove_all_data_blocks(&*self.storage, &*self.allocator)
    }

    /// Number of chains of `path`, including chains still being imported.
    pub fn num_blocks(&self, path: &str) -> Result<usize> {
        let node = self.lookup(path)?;
        Ok(node.as_file(path)?.num_blocks())
    }

    /// Lease-expiry hook. Pinned files are untouched; mapped files are
    /// flushed but keep their namespace entry; everything else is cleared
    /// and removed. Directories are handled recursively and removed only if
    /// every descendant was removed.
    pub fn handle_lease_expiry(&self, path: &str) -> Result<()> {
        let (parent, name) = self.lookup_parent(path)?;
        let parent_dir = parent.as_dir(path)?;
        let mut cleared_blocks = Vec::new();
        let removed = self.expire_child(parent_dir, &name, path, &mut cleared_blocks)?;
        if !cleared_blocks.is_empty() {
            self.allocator.free(&cleared_blocks)?;
        }
        if removed {
            tracing::info!("Lease expired, removed {}", path);
        }
        Ok(())
    }

    fn expire_child(
        &self,
        parent: &DirNode,
        child_name: &str,
        child_path: &str,
        cleared_blocks: &mut Vec<String>,
    ) -> Result<bool> {
        let child = parent
            .get_child(child_name)
            .ok_or_else(|| DirectoryError::NotFound(child_path.to_string()))?;
        match &child.kind {
            NodeKind::File(file) => {
                if file.handle_lease_expiry(cleared_blocks, child_path, &*self.storage)? {
                    parent.remove_child(child_name)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            NodeKind::Directory(dir) => {
                let mut cleared = true;
                for name in dir.child_names() {
                    let path = join_path(child_path, &name);
                    if !self.expire_child(dir, &name, &path, cleared_blocks)? {
                        cleared = false;
                    }
                }
                if cleared {
                    parent.remove_child(child_name)?;
                }
                Ok(cleared)
            }
        }
    }
}

fn touch_subtree(node: &Arc<DsNode>, time: u64) {
    node.touch_time(time);
    if let NodeKind::Directory(dir) = &node.kind {
        for child in dir.child_nodes() {
            touch_subtree(&child, time);
        }
    }
}

fn populate_recursive_entries(dir: &DirNode, entries: &mut Vec<DirectoryEntry>) {
    for child in dir.child_nodes() {
        entries.push(child.entry());
        if let NodeKind::Directory(child_dir) = &child.kind {
            populate_recursive_entries(child_dir, entries);
        }
    }
}
