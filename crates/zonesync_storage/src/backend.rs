//! Storage backend trait definition.

use crate::error::StorageResult;

/// A snapshot store for a single opaque byte blob.
///
/// # Invariants
///
/// - `store` replaces the previous snapshot atomically: after a crash the
///   backend holds either the old or the new bytes, never a mix
/// - `load` returns exactly the bytes passed to the last successful `store`
/// - A failed `store` leaves the previous snapshot untouched
/// - Backends must be `Send + Sync`; they lock internally
pub trait StorageBackend: Send + Sync {
    /// Returns the current snapshot, or `None` if nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the snapshot with `data`.
    ///
    /// After this returns successfully the new snapshot survives process
    /// termination (for durable backends).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The old snapshot stays in place.
    fn store(&self, data: &[u8]) -> StorageResult<()>;

    /// Removes the snapshot entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be removed.
    fn clear(&self) -> StorageResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        (**self).load()
    }

    fn store(&self, data: &[u8]) -> StorageResult<()> {
        (**self).store(data)
    }

    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }
}
