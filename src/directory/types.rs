//! Identifiers and value types for the directory core.
//!
//! Pure data with invariants: permissions, file types, storage modes, chain
//! roles and statuses, replica chains over hash slot ranges, and the
//! per-file data status the rest of the service orchestrates around.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest hash slot. Every file's stable replica chains partition the
/// inclusive range `[0, SLOT_MAX]`.
pub const SLOT_MAX: i32 = 65536;

/// Chain link terminator used as the `next_block` of a tail or singleton.
pub const NIL_BLOCK: &str = "nil";

/// Milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A 9-bit permission mode in the conventional owner/group/other layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms(pub u16);

impl Perms {
    pub const NONE: Perms = Perms(0);
    pub const OWNER_READ: Perms = Perms(0o400);
    pub const OWNER_WRITE: Perms = Perms(0o200);
    pub const OWNER_EXEC: Perms = Perms(0o100);
    pub const OWNER_ALL: Perms = Perms(0o700);
    pub const GROUP_READ: Perms = Perms(0o040);
    pub const GROUP_WRITE: Perms = Perms(0o020);
    pub const GROUP_EXEC: Perms = Perms(0o010);
    pub const GROUP_ALL: Perms = Perms(0o070);
    pub const OTHERS_READ: Perms = Perms(0o004);
    pub const OTHERS_WRITE: Perms = Perms(0o002);
    pub const OTHERS_EXEC: Perms = Perms(0o001);
    pub const OTHERS_ALL: Perms = Perms(0o007);
    pub const ALL: Perms = Perms(0o777);

    /// Mask of the meaningful permission bits.
    pub const MASK: u16 = 0o777;

    pub fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for Perms {
    type Output = Perms;
    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

impl BitAnd for Perms {
    type Output = Perms;
    fn bitand(self, rhs: Perms) -> Perms {
        Perms(self.0 & rhs.0)
    }
}

impl Not for Perms {
    type Output = Perms;
    fn not(self) -> Perms {
        Perms(!self.0 & Perms::MASK)
    }
}

impl fmt::Display for Perms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03o}", self.0)
    }
}

/// How a permission update combines with the current bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermOptions {
    /// Overwrite the current bits.
    Replace,
    /// Bitwise OR into the current bits.
    Add,
    /// Bitwise AND-NOT out of the current bits.
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

impl FileType {
    pub fn as_i32(self) -> i32 {
        match self {
            FileType::Regular => 0,
            FileType::Directory => 1,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(FileType::Regular),
            1 => Some(FileType::Directory),
            _ => None,
        }
    }
}

/// Where a replica chain's data currently lives.
///
/// `InMemoryGrace` marks a chain scheduled for flush; `Flushing` is the
/// transient during dump; `OnDisk` means the data lives only in the backing
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    InMemory,
    InMemoryGrace,
    Flushing,
    OnDisk,
}

impl StorageMode {
    pub fn as_i32(self) -> i32 {
        match self {
            StorageMode::InMemory => 0,
            StorageMode::InMemoryGrace => 1,
            StorageMode::Flushing => 2,
            StorageMode::OnDisk => 3,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(StorageMode::InMemory),
            1 => Some(StorageMode::InMemoryGrace),
            2 => Some(StorageMode::Flushing),
            3 => Some(StorageMode::OnDisk),
            _ => None,
        }
    }
}

/// Re-partitioning state of a replica chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Stable,
    Exporting,
    Importing,
}

impl ChainStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            ChainStatus::Stable => 0,
            ChainStatus::Exporting => 1,
            ChainStatus::Importing => 2,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(ChainStatus::Stable),
            1 => Some(ChainStatus::Exporting),
            2 => Some(ChainStatus::Importing),
            _ => None,
        }
    }
}

/// A block's position within its replication chain. A chain of length one
/// uses `Singleton`; otherwise head, zero or more mids, tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    Singleton,
    Head,
    Mid,
    Tail,
}

impl ChainRole {
    pub fn as_i32(self) -> i32 {
        match self {
            ChainRole::Singleton => 0,
            ChainRole::Head => 1,
            ChainRole::Mid => 2,
            ChainRole::Tail => 3,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(ChainRole::Singleton),
            1 => Some(ChainRole::Head),
            2 => Some(ChainRole::Mid),
            3 => Some(ChainRole::Tail),
            _ => None,
        }
    }
}

/// Role of the block at position `pos` in a chain of `len` members.
pub fn chain_role_at(pos: usize, len: usize) -> ChainRole {
    if len == 1 {
        ChainRole::Singleton
    } else if pos == 0 {
        ChainRole::Head
    } else if pos == len - 1 {
        ChainRole::Tail
    } else {
        ChainRole::Mid
    }
}

/// Name of the block following position `pos`, or `NIL_BLOCK` for the tail.
pub fn next_block_at(block_names: &[String], pos: usize) -> String {
    if pos == block_names.len() - 1 {
        NIL_BLOCK.to_string()
    } else {
        block_names[pos + 1].clone()
    }
}

/// An ordered sequence of blocks replicating one slot range.
///
/// The first member is the head, the last the tail. Block names are unique
/// process-wide while allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaChain {
    pub block_names: Vec<String>,
    /// Inclusive slot range `[begin, end]`.
    pub slot_range: (i32, i32),
    pub status: ChainStatus,
    pub mode: StorageMode,
}

impl ReplicaChain {
    pub fn new(
        block_names: Vec<String>,
        slot_begin: i32,
        slot_end: i32,
        status: ChainStatus,
        mode: StorageMode,
    ) -> Self {
        Self {
            block_names,
            slot_range: (slot_begin, slot_end),
            status,
            mode,
        }
    }

    pub fn head(&self) -> &str {
        &self.block_names[0]
    }

    pub fn tail(&self) -> &str {
        self.block_names.last().map(String::as_str).unwrap_or(NIL_BLOCK)
    }

    pub fn slot_begin(&self) -> i32 {
        self.slot_range.0
    }

    pub fn slot_end(&self) -> i32 {
        self.slot_range.1
    }

    pub fn num_slots(&self) -> i32 {
        self.slot_range.1 - self.slot_range.0 + 1
    }

    /// Backing-path segment for this chain: `"{begin}_{end}"`.
    pub fn slot_range_string(&self) -> String {
        format!("{}_{}", self.slot_range.0, self.slot_range.1)
    }

    /// Chains are identified by their membership, not their transient
    /// status or mode.
    pub fn same_blocks(&self, other: &ReplicaChain) -> bool {
        self.block_names == other.block_names
    }
}

impl fmt::Display for ReplicaChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chain({})[{}:{}]",
            self.block_names.join(","),
            self.slot_range.0,
            self.slot_range.1
        )
    }
}

/// Per-file data status: backing path prefix, replication factor, the
/// ordered replica chains covering the slot space, flags and tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStatus {
    backing_path: String,
    chain_length: usize,
    data_blocks: Vec<ReplicaChain>,
    flags: i32,
    tags: BTreeMap<String, String>,
}

impl DataStatus {
    /// File survives lease expiry entirely.
    pub const PINNED: i32 = 1 << 0;
    /// Auto-scale is disabled; capacity never changes behind the user's back.
    pub const STATIC_PROVISIONED: i32 = 1 << 1;
    /// File is backed by persistent storage; flushed (not deleted) on lease
    /// expiry.
    pub const MAPPED: i32 = 1 << 2;

    pub fn new(
        backing_path: String,
        chain_length: usize,
        data_blocks: Vec<ReplicaChain>,
        flags: i32,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            backing_path,
            chain_length,
            data_blocks,
            flags,
            tags,
        }
    }

    pub fn backing_path(&self) -> &str {
        &self.backing_path
    }

    pub fn set_backing_path(&mut self, prefix: &str) {
        self.backing_path = prefix.to_string();
    }

    pub fn chain_length(&self) -> usize {
        self.chain_length
    }

    pub fn set_chain_length(&mut self, chain_length: usize) {
        self.chain_length = chain_length;
    }

    pub fn data_blocks(&self) -> &[ReplicaChain] {
        &self.data_blocks
    }

    pub fn flags(&self) -> i32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: i32) {
        self.flags = flags;
    }

    pub fn is_pinned(&self) -> bool {
        self.flags & Self::PINNED != 0
    }

    pub fn is_static_provisioned(&self) -> bool {
        self.flags & Self::STATIC_PROVISIONED != 0
    }

    pub fn is_mapped(&self) -> bool {
        self.flags & Self::MAPPED != 0
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn add_tag(&mut self, key: String, value: String) {
        self.tags.insert(key, value);
    }

    pub fn add_tags(&mut self, tags: &BTreeMap<String, String>) {
        for (k, v) in tags {
            self.tags.insert(k.clone(), v.clone());
        }
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Storage mode of every chain, in chain order.
    pub fn mode(&self) -> Vec<StorageMode> {
        self.data_blocks.iter().map(|c| c.mode).collect()
    }

    pub fn set_mode(&mut self, i: usize, mode: StorageMode) {
        self.data_blocks[i].mode = mode;
    }

    pub fn set_mode_all(&mut self, mode: StorageMode) {
        for chain in &mut self.data_blocks {
            chain.mode = mode;
        }
    }

    /// Transition after the chain at `i` was flushed to the backing store.
    pub fn mark_dumped(&mut self, i: usize) {
        self.data_blocks[i].mode = StorageMode::OnDisk;
    }

    /// Transition after the chain at `i` was re-materialized from the
    /// backing store onto freshly allocated blocks.
    pub fn mark_loaded(&mut self, i: usize, block_names: Vec<String>) {
        let chain = &mut self.data_blocks[i];
        chain.block_names = block_names;
        chain.status = ChainStatus::Stable;
        chain.mode = StorageMode::InMemory;
    }

    pub fn num_slots(&self, i: usize) -> i32 {
        self.data_blocks[i].num_slots()
    }

    pub fn get_data_block_status(&self, i: usize) -> ChainStatus {
        self.data_blocks[i].status
    }

    pub fn set_data_block_status(&mut self, i: usize, status: ChainStatus) {
        self.data_blocks[i].status = status;
    }

    pub fn update_data_block_slots(&mut self, i: usize, slot_begin: i32, slot_end: i32) {
        self.data_blocks[i].slot_range = (slot_begin, slot_end);
    }

    pub fn add_data_block(&mut self, chain: ReplicaChain, position: usize) {
        self.data_blocks.insert(position, chain);
    }

    pub fn remove_data_block(&mut self, i: usize) -> ReplicaChain {
        self.data_blocks.remove(i)
    }

    pub fn set_data_block(&mut self, i: usize, chain: ReplicaChain) {
        self.data_blocks[i] = chain;
    }

    /// Index of the chain with the given membership.
    pub fn find_replica_chain(&self, chain: &ReplicaChain) -> Option<usize> {
        self.data_blocks.iter().position(|c| c.same_blocks(chain))
    }
}

impl fmt::Display for DataStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backing_path={} chain_length={} flags={:#x} blocks=[",
            self.backing_path, self.chain_length, self.flags
        )?;
        for (i, chain) in self.data_blocks.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", chain)?;
        }
        write!(f, "]")
    }
}

/// Type, permissions and last write time of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStatus {
    pub file_type: FileType,
    pub permissions: Perms,
    pub last_write_time: u64,
}

impl FileStatus {
    pub fn new(file_type: FileType, permissions: Perms, last_write_time: u64) -> Self {
        Self {
            file_type,
            permissions,
            last_write_time,
        }
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub name: String,
    pub status: FileStatus,
}

impl DirectoryEntry {
    pub fn new(name: String, status: FileStatus) -> Self {
        Self { name, status }
    }

    pub fn file_type(&self) -> FileType {
        self.status.file_type
    }

    pub fn permissions(&self) -> Perms {
        self.status.permissions
    }

    pub fn last_write_time(&self) -> u64 {
        self.status.last_write_time
    }
}
