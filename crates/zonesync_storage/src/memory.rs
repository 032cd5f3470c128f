//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory snapshot backend.
///
/// Suitable for unit tests, integration tests and replicas that don't need
/// to outlive the process. A write fault can be armed with
/// [`fail_next_store`](Self::fail_next_store) to exercise commit failures.
///
/// # Example
///
/// ```rust
/// use zonesync_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.store(b"v1").unwrap();
/// backend.fail_next_store();
/// assert!(backend.store(b"v2").is_err());
/// assert_eq!(backend.load().unwrap().as_deref(), Some(&b"v1"[..]));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Option<Vec<u8>>>,
    fail_next: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding an existing snapshot.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(data)),
            ..Self::default()
        }
    }

    /// Makes the next call to `store` fail without touching the snapshot.
    pub fn fail_next_store(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of successful `store` calls so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for InMemoryBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone())
    }

    fn store(&self, data: &[u8]) -> StorageResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(
                "injected in-memory write failure".into(),
            ));
        }
        *self.data.write() = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        *self.data.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.load().unwrap(), None);
        assert_eq!(backend.write_count(), 0);
    }

    #[test]
    fn store_replaces_snapshot() {
        let backend = InMemoryBackend::new();
        backend.store(b"first").unwrap();
        backend.store(b"second").unwrap();
        assert_eq!(backend.load().unwrap(), Some(b"second".to_vec()));
        assert_eq!(backend.write_count(), 2);
    }

    #[test]
    fn injected_failure_keeps_old_snapshot() {
        let backend = InMemoryBackend::with_data(b"old".to_vec());
        backend.fail_next_store();

        let err = backend.store(b"new").unwrap_err();
        assert!(matches!(err, StorageError::WriteRejected(_)));
        assert_eq!(backend.load().unwrap(), Some(b"old".to_vec()));

        // Fault is one-shot
        backend.store(b"new").unwrap();
        assert_eq!(backend.load().unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn clear_removes_snapshot() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        backend.clear().unwrap();
        assert_eq!(backend.load().unwrap(), None);
    }
}
