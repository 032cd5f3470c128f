//! Error types for the local store.

use thiserror::Error;
use zonesync_protocol::{CodecError, RecordId};
use zonesync_storage::StorageError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Snapshot codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Entity type is not in the catalog.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// Requested entity name.
        name: String,
    },

    /// A record ID is already used by another entity type.
    #[error("record {record_id} already exists as {existing}")]
    DuplicateRecord {
        /// Contended record ID.
        record_id: RecordId,
        /// Entity type holding the ID.
        existing: String,
    },

    /// Persisted snapshot does not match the catalog.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Creates an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }
}
