//! Error types for the sync engine.

use thiserror::Error;
use zonesync_protocol::{CodecError, RecordId, RemoteRecord};
use zonesync_storage::StorageError;
use zonesync_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for calls to the remote record store.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failures reported by a [`RemoteSyncClient`](crate::RemoteSyncClient).
///
/// Per-record conflicts are not errors; they come back in
/// [`PushResult::conflicted`](zonesync_protocol::PushResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote store rejected the request.
    #[error("server error: {0}")]
    Server(String),

    /// The zone does not exist remotely.
    #[error("unknown zone {0}")]
    UnknownZone(String),

    /// The change token was not issued by this remote or has expired.
    #[error("invalid change token")]
    InvalidToken,
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { retryable, .. } => *retryable,
            RemoteError::Server(_) => true,
            _ => false,
        }
    }
}

/// Errors that end a sync pass.
///
/// Every pass reports exactly one of these or a successful report.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Querying the local store for pending changes failed.
    #[error("local fetch failed: {0}")]
    LocalFetch(#[source] StoreError),

    /// Push failed for a reason other than per-record conflicts.
    #[error("remote modify failed: {0}")]
    RemoteModify(#[source] RemoteError),

    /// Records still conflicted after the single resolution retry.
    #[error("{} record(s) still conflicted after resolution", records.len())]
    ConflictsDetected {
        /// Records the remote rejected on the retried push.
        records: Vec<RemoteRecord>,
    },

    /// Pulling remote changes or re-fetching conflicted records failed.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(#[source] RemoteError),

    /// Applying pulled changes or committing them failed.
    #[error("local apply failed: {0}")]
    LocalApply(#[source] StoreError),

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A pass was started while another was running.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The configured conflict policy cannot be applied.
    #[error("conflict policy {0} is not supported")]
    UnsupportedPolicy(String),

    /// The configuration is unusable.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),
}

/// Discriminant of a [`SyncError`], for completion handlers that only
/// branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// See [`SyncError::LocalFetch`].
    LocalFetch,
    /// See [`SyncError::RemoteModify`].
    RemoteModify,
    /// See [`SyncError::ConflictsDetected`].
    ConflictsDetected,
    /// See [`SyncError::RemoteFetch`].
    RemoteFetch,
    /// See [`SyncError::LocalApply`].
    LocalApply,
    /// See [`SyncError::Cancelled`].
    Cancelled,
    /// See [`SyncError::InvalidStateTransition`].
    InvalidStateTransition,
    /// See [`SyncError::UnsupportedPolicy`].
    UnsupportedPolicy,
    /// See [`SyncError::InvalidConfig`].
    InvalidConfig,
}

impl SyncError {
    /// Wraps a storage failure that happened while applying.
    pub fn local_apply(err: impl Into<StoreError>) -> Self {
        Self::LocalApply(err.into())
    }

    /// Returns the error class.
    #[must_use]
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::LocalFetch(_) => SyncErrorKind::LocalFetch,
            SyncError::RemoteModify(_) => SyncErrorKind::RemoteModify,
            SyncError::ConflictsDetected { .. } => SyncErrorKind::ConflictsDetected,
            SyncError::RemoteFetch(_) => SyncErrorKind::RemoteFetch,
            SyncError::LocalApply(_) => SyncErrorKind::LocalApply,
            SyncError::Cancelled => SyncErrorKind::Cancelled,
            SyncError::InvalidStateTransition { .. } => SyncErrorKind::InvalidStateTransition,
            SyncError::UnsupportedPolicy(_) => SyncErrorKind::UnsupportedPolicy,
            SyncError::InvalidConfig(_) => SyncErrorKind::InvalidConfig,
        }
    }

    /// Returns true if running the pass again may succeed without changes
    /// to configuration or data.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteModify(e) | SyncError::RemoteFetch(e) => e.is_retryable(),
            SyncError::ConflictsDetected { .. } => true,
            SyncError::InvalidStateTransition { .. } => true,
            _ => false,
        }
    }

    /// IDs of records still conflicted, if this is a conflict error.
    #[must_use]
    pub fn conflicted_ids(&self) -> Vec<RecordId> {
        match self {
            SyncError::ConflictsDetected { records } => {
                records.iter().map(|r| r.record_id.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::LocalApply(StoreError::Storage(err))
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        Self::LocalApply(StoreError::Codec(err))
    }
}
