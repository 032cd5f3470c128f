//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The snapshot file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the lock on this snapshot.
    #[error("storage locked: another process has exclusive access to {path}")]
    Locked {
        /// Path of the contended snapshot.
        path: String,
    },

    /// A write was rejected by an injected fault.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
