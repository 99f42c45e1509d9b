//! Error taxonomy of the directory core.

use thiserror::Error;

use crate::directory::allocator::AllocatorError;
use crate::storage::manager::StorageError;

/// Every failure a directory operation can surface.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file or directory already exists: {0}")]
    Exists(String),

    #[error("{0} is a directory")]
    IsDirectory(String),

    #[error("{0} is not a directory")]
    NotDirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("at capacity: {0}")]
    AtCapacity(String),

    #[error("resource busy: {0}")]
    Busy(String),

    #[error("cannot find a merge partner: {0}")]
    NoPartner(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<StorageError> for DirectoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Transport(msg) => DirectoryError::Io(msg),
            other => DirectoryError::Storage(other.to_string()),
        }
    }
}

impl From<AllocatorError> for DirectoryError {
    fn from(err: AllocatorError) -> Self {
        match err {
            AllocatorError::OutOfCapacity { .. } => DirectoryError::AtCapacity(err.to_string()),
            AllocatorError::NotAllocated(_) => DirectoryError::InvalidArgument(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
