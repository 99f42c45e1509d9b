//! In-memory storage management implementation.
//!
//! Records every management call instead of talking to storage nodes.
//! Data-plane commands (anything that touches block contents) land in one
//! log with stable string formats (`clear:<block>`, `flush:<block>:<path>`,
//! ...); control-plane commands (setup and re-partitioning state changes)
//! land in a second log. The command formats are part of the testable
//! contract of the directory scenarios.

use std::sync::Mutex;

use dashmap::DashMap;

use super::manager::{StorageError, StorageManagementOps};
use crate::directory::types::ChainRole;

/// Capacity reported for every block unless overridden.
const DEFAULT_BLOCK_CAPACITY: u64 = 134_217_728;

#[derive(Default)]
pub struct RecordingStorageManager {
    commands: Mutex<Vec<String>>,
    control: Mutex<Vec<String>>,
    sizes: DashMap<String, u64>,
    failing: DashMap<String, ()>,
}

impl RecordingStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data-plane commands in issue order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Control-plane commands in issue order.
    pub fn control_commands(&self) -> Vec<String> {
        self.control.lock().unwrap().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
        self.control.lock().unwrap().clear();
    }

    /// Override the size reported for a block.
    pub fn set_storage_size(&self, block_name: &str, bytes: u64) {
        self.sizes.insert(block_name.to_string(), bytes);
    }

    /// Make a block unreachable: setup and size probes against it fail.
    pub fn set_block_failing(&self, block_name: &str, failing: bool) {
        if failing {
            self.failing.insert(block_name.to_string(), ());
        } else {
            self.failing.remove(block_name);
        }
    }

    fn check_reachable(&self, block_name: &str) -> Result<(), StorageError> {
        if self.failing.contains_key(block_name) {
            return Err(StorageError::Server(format!(
                "block {} unreachable",
                block_name
            )));
        }
        Ok(())
    }

    fn record(&self, command: String) {
        self.commands.lock().unwrap().push(command);
    }

    fn record_control(&self, command: String) {
        self.control.lock().unwrap().push(command);
    }
}

impl StorageManagementOps for RecordingStorageManager {
    fn setup_block(
        &self,
        block_name: &str,
        path: &str,
        slot_begin: i32,
        slot_end: i32,
        chain: &[String],
        auto_scale: bool,
        role: ChainRole,
        next_block_name: &str,
    ) -> Result<(), StorageError> {
        self.check_reachable(block_name)?;
        self.record_control(format!(
            "setup_block:{}:{}:{}:{}:{}:{}:{}:{}",
            block_name,
            path,
            slot_begin,
            slot_end,
            chain.join(","),
            auto_scale,
            role.as_i32(),
            next_block_name
        ));
        Ok(())
    }

    fn setup_and_set_importing(
        &self,
        block_name: &str,
        path: &str,
        slot_begin: i32,
        slot_end: i32,
        chain: &[String],
        role: ChainRole,
        next_block_name: &str,
    ) -> Result<(), StorageError> {
        self.check_reachable(block_name)?;
        self.record_control(format!(
            "setup_importing:{}:{}:{}:{}:{}:{}:{}",
            block_name,
            path,
            slot_begin,
            slot_end,
            chain.join(","),
            role.as_i32(),
            next_block_name
        ));
        Ok(())
    }

    fn set_exporting(
        &self,
        block_name: &str,
        target_block: &[String],
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.record_control(format!(
            "set_exporting:{}:{}:{}:{}",
            block_name,
            target_block.join(","),
            slot_begin,
            slot_end
        ));
        Ok(())
    }

    fn set_importing(
        &self,
        block_name: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.record_control(format!(
            "set_importing:{}:{}:{}",
            block_name, slot_begin, slot_end
        ));
        Ok(())
    }

    fn set_regular(
        &self,
        block_name: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.record_control(format!(
            "set_regular:{}:{}:{}",
            block_name, slot_begin, slot_end
        ));
        Ok(())
    }

    fn load(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        self.record(format!("load:{}:{}", block_name, backing_path));
        Ok(())
    }

    fn dump(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        self.record(format!("flush:{}:{}", block_name, backing_path));
        Ok(())
    }

    fn sync(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        self.record(format!("sync:{}:{}", block_name, backing_path));
        Ok(())
    }

    fn reset(&self, block_name: &str) -> Result<(), StorageError> {
        self.record(format!("clear:{}", block_name));
        Ok(())
    }

    fn storage_size(&self, block_name: &str) -> Result<u64, StorageError> {
        self.check_reachable(block_name)?;
        Ok(self.sizes.get(block_name).map(|s| *s).unwrap_or(0))
    }

    fn storage_capacity(&self, _block_name: &str) -> Result<u64, StorageError> {
        Ok(DEFAULT_BLOCK_CAPACITY)
    }

    fn resend_pending(&self, block_name: &str) -> Result<(), StorageError> {
        self.record_control(format!("resend_pending:{}", block_name));
        Ok(())
    }

    fn forward_all(&self, block_name: &str) -> Result<(), StorageError> {
        self.record_control(format!("forward_all:{}", block_name));
        Ok(())
    }
}
