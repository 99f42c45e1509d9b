//! Storage management capability.
//!
//! The directory core drives remote storage nodes exclusively through the
//! [`StorageManagementOps`] trait. [`StorageManagementClient`] is the
//! production implementation: it resolves the management endpoint embedded
//! in a block identifier (`host:port:id`) and issues HTTP/JSON calls with
//! bounded retry. The in-memory recording implementation lives in
//! [`crate::storage::recording`].

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::protocol::*;
use crate::directory::types::ChainRole;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Server(String),

    #[error("malformed block name: {0}")]
    BadBlockName(String),
}

/// Operations the directory core invokes on remote storage.
///
/// Every call may fail with a transport error or a server-side error; the
/// core surfaces both and never swallows them.
pub trait StorageManagementOps: Send + Sync {
    /// Install a block with its chain membership and replication role.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), StorageError>;

    /// Atomic setup + enter importing state.
    #[allow(clippy::too_many_arguments)]
    fn setup_and_set_importing(
        &self,
        block_name: &str,
        path: &str,
        slot_begin: i32,
        slot_end: i32,
        chain: &[String],
        role: ChainRole,
        next_block_name: &str,
    ) -> Result<(), StorageError>;

    /// Mark the block as exporting `[slot_begin, slot_end]` to `target_block`.
    fn set_exporting(
        &self,
        block_name: &str,
        target_block: &[String],
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError>;

    /// Mark the block as importing `[slot_begin, slot_end]`.
    fn set_importing(&self, block_name: &str, slot_begin: i32, slot_end: i32)
        -> Result<(), StorageError>;

    /// Return the block to stable serving with its final slot range.
    fn set_regular(&self, block_name: &str, slot_begin: i32, slot_end: i32)
        -> Result<(), StorageError>;

    /// Read the block's contents from `backing_path`.
    fn load(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError>;

    /// Flush the block's contents to `backing_path`.
    fn dump(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError>;

    /// Flush dirty state to `backing_path` without clearing memory.
    fn sync(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError>;

    /// Clear the block's in-memory state.
    fn reset(&self, block_name: &str) -> Result<(), StorageError>;

    fn storage_size(&self, block_name: &str) -> Result<u64, StorageError>;

    fn storage_capacity(&self, block_name: &str) -> Result<u64, StorageError>;

    /// Replay in-flight operations on a repaired chain's head.
    fn resend_pending(&self, block_name: &str) -> Result<(), StorageError>;

    /// Stream the block's contents down-chain so a fresh replica catches up.
    fn forward_all(&self, block_name: &str) -> Result<(), StorageError>;
}

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
const REQUEST_ATTEMPTS: usize = 3;

/// HTTP client for the management interface of the storage nodes.
pub struct StorageManagementClient {
    http_client: reqwest::blocking::Client,
}

impl StorageManagementClient {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::blocking::Client::new(),
        }
    }

    /// Management address of a block identifier of the form `host:port:id`.
    fn management_addr(block_name: &str) -> Result<String, StorageError> {
        let mut parts = block_name.split(':');
        let host = parts.next().unwrap_or_default();
        let port = parts.next().unwrap_or_default();
        if host.is_empty() || port.parse::<u16>().is_err() || parts.next().is_none() {
            return Err(StorageError::BadBlockName(block_name.to_string()));
        }
        Ok(format!("{}:{}", host, port))
    }

    fn post_with_retry<T: Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::blocking::Response, StorageError> {
        let mut delay_ms = 150u64;

        for attempt in 0..REQUEST_ATTEMPTS {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(REQUEST_TIMEOUT)
                .send();

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == REQUEST_ATTEMPTS {
                        return Err(StorageError::Transport(e.to_string()));
                    }
                    let jitter = rand::thread_rng().gen_range(0..50);
                    std::thread::sleep(Duration::from_millis(delay_ms + jitter));
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(StorageError::Transport("retry attempts exhausted".to_string()))
    }

    /// POST `payload` to the block's management endpoint and decode the
    /// response body, surfacing the remote error message on failure.
    fn call<T: Serialize, R: DeserializeOwned>(
        &self,
        block_name: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<R, StorageError> {
        let addr = Self::management_addr(block_name)?;
        let url = format!("http://{}{}", addr, endpoint);
        let response = self.post_with_retry(url, payload)?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorResponse>()
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("management call failed with {}", status));
            return Err(StorageError::Server(message));
        }

        response.json::<R>().map_err(|e| StorageError::Transport(e.to_string()))
    }

    fn call_ok<T: Serialize>(
        &self,
        block_name: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<(), StorageError> {
        let ack: OkResponse = self.call(block_name, endpoint, payload)?;
        if !ack.success {
            return Err(StorageError::Server(format!(
                "storage node rejected {} for block {}",
                endpoint, block_name
            )));
        }
        Ok(())
    }
}

impl Default for StorageManagementClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageManagementOps for StorageManagementClient {
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
        tracing::debug!("setup_block {} for {} [{}, {}]", block_name, path, slot_begin, slot_end);
        self.call_ok(
            block_name,
            ENDPOINT_SETUP_BLOCK,
            &SetupBlockRequest {
                block_name: block_name.to_string(),
                path: path.to_string(),
                slot_begin,
                slot_end,
                chain: chain.to_vec(),
                auto_scale,
                chain_role: role.as_i32(),
                next_block_name: next_block_name.to_string(),
            },
        )
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
        tracing::debug!(
            "setup_and_set_importing {} for {} [{}, {}]",
            block_name,
            path,
            slot_begin,
            slot_end
        );
        self.call_ok(
            block_name,
            ENDPOINT_SETUP_IMPORTING,
            &SetupImportingRequest {
                block_name: block_name.to_string(),
                path: path.to_string(),
                slot_begin,
                slot_end,
                chain: chain.to_vec(),
                chain_role: role.as_i32(),
                next_block_name: next_block_name.to_string(),
            },
        )
    }

    fn set_exporting(
        &self,
        block_name: &str,
        target_block: &[String],
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_SET_EXPORTING,
            &SetExportingRequest {
                block_name: block_name.to_string(),
                target_block: target_block.to_vec(),
                slot_begin,
                slot_end,
            },
        )
    }

    fn set_importing(
        &self,
        block_name: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_SET_IMPORTING,
            &SetImportingRequest {
                block_name: block_name.to_string(),
                slot_begin,
                slot_end,
            },
        )
    }

    fn set_regular(
        &self,
        block_name: &str,
        slot_begin: i32,
        slot_end: i32,
    ) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_SET_REGULAR,
            &SetRegularRequest {
                block_name: block_name.to_string(),
                slot_begin,
                slot_end,
            },
        )
    }

    fn load(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        tracing::debug!("load {} <- {}", block_name, backing_path);
        self.call_ok(
            block_name,
            ENDPOINT_LOAD,
            &PersistenceRequest {
                block_name: block_name.to_string(),
                backing_path: backing_path.to_string(),
            },
        )
    }

    fn dump(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        tracing::debug!("dump {} -> {}", block_name, backing_path);
        self.call_ok(
            block_name,
            ENDPOINT_DUMP,
            &PersistenceRequest {
                block_name: block_name.to_string(),
                backing_path: backing_path.to_string(),
            },
        )
    }

    fn sync(&self, block_name: &str, backing_path: &str) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_SYNC,
            &PersistenceRequest {
                block_name: block_name.to_string(),
                backing_path: backing_path.to_string(),
            },
        )
    }

    fn reset(&self, block_name: &str) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_RESET,
            &BlockRequest {
                block_name: block_name.to_string(),
            },
        )
    }

    fn storage_size(&self, block_name: &str) -> Result<u64, StorageError> {
        let size: SizeResponse = self.call(
            block_name,
            ENDPOINT_STORAGE_SIZE,
            &BlockRequest {
                block_name: block_name.to_string(),
            },
        )?;
        Ok(size.bytes)
    }

    fn storage_capacity(&self, block_name: &str) -> Result<u64, StorageError> {
        let size: SizeResponse = self.call(
            block_name,
            ENDPOINT_STORAGE_CAPACITY,
            &BlockRequest {
                block_name: block_name.to_string(),
            },
        )?;
        Ok(size.bytes)
    }

    fn resend_pending(&self, block_name: &str) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_RESEND_PENDING,
            &BlockRequest {
                block_name: block_name.to_string(),
            },
        )
    }

    fn forward_all(&self, block_name: &str) -> Result<(), StorageError> {
        self.call_ok(
            block_name,
            ENDPOINT_FORWARD_ALL,
            &BlockRequest {
                block_name: block_name.to_string(),
            },
        )
    }
}
