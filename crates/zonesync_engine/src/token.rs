//! Change token persistence.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use zonesync_protocol::{from_cbor, to_cbor, ChangeToken, ZoneId};
use zonesync_storage::{StorageBackend, StorageError, StorageResult};

/// Persists the resume token of each synchronized zone.
///
/// The orchestrator saves a token only after the changes pulled with it have
/// been committed locally.
pub trait TokenStore: Send + Sync {
    /// Returns the stored token for `zone`, or `None` before the first pull.
    fn load(&self, zone: &ZoneId) -> StorageResult<Option<ChangeToken>>;

    /// Replaces the stored token for `zone`.
    fn save(&self, zone: &ZoneId, token: &ChangeToken) -> StorageResult<()>;

    /// Forgets the token for `zone`, forcing the next pull to start over.
    fn clear(&self, zone: &ZoneId) -> StorageResult<()>;
}

impl<T: TokenStore + ?Sized> TokenStore for std::sync::Arc<T> {
    fn load(&self, zone: &ZoneId) -> StorageResult<Option<ChangeToken>> {
        (**self).load(zone)
    }

    fn save(&self, zone: &ZoneId, token: &ChangeToken) -> StorageResult<()> {
        (**self).save(zone, token)
    }

    fn clear(&self, zone: &ZoneId) -> StorageResult<()> {
        (**self).clear(zone)
    }
}

/// A token store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<BTreeMap<ZoneId, ChangeToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, zone: &ZoneId) -> StorageResult<Option<ChangeToken>> {
        Ok(self.tokens.read().get(zone).cloned())
    }

    fn save(&self, zone: &ZoneId, token: &ChangeToken) -> StorageResult<()> {
        self.tokens.write().insert(zone.clone(), token.clone());
        Ok(())
    }

    fn clear(&self, zone: &ZoneId) -> StorageResult<()> {
        self.tokens.write().remove(zone);
        Ok(())
    }
}

/// A token store persisted through a [`StorageBackend`].
///
/// All zones share one CBOR snapshot; every save rewrites it.
pub struct BackendTokenStore<B: StorageBackend> {
    backend: B,
    tokens: RwLock<BTreeMap<ZoneId, ChangeToken>>,
}

impl<B: StorageBackend> BackendTokenStore<B> {
    /// Opens the store, loading any tokens already persisted in `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or is not a token map.
    pub fn open(backend: B) -> StorageResult<Self> {
        let tokens = match backend.load()? {
            Some(bytes) => from_cbor(&bytes).map_err(|e| StorageError::Corrupted(e.to_string()))?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            backend,
            tokens: RwLock::new(tokens),
        })
    }

    fn persist(&self, tokens: &BTreeMap<ZoneId, ChangeToken>) -> StorageResult<()> {
        let bytes = to_cbor(tokens).map_err(|e| StorageError::Corrupted(e.to_string()))?;
        self.backend.store(&bytes)
    }
}

impl<B: StorageBackend> TokenStore for BackendTokenStore<B> {
    fn load(&self, zone: &ZoneId) -> StorageResult<Option<ChangeToken>> {
        Ok(self.tokens.read().get(zone).cloned())
    }

    fn save(&self, zone: &ZoneId, token: &ChangeToken) -> StorageResult<()> {
        let mut tokens = self.tokens.write();
        let mut next = tokens.clone();
        next.insert(zone.clone(), token.clone());
        self.persist(&next)?;
        *tokens = next;
        Ok(())
    }

    fn clear(&self, zone: &ZoneId) -> StorageResult<()> {
        let mut tokens = self.tokens.write();
        if !tokens.contains_key(zone) {
            return Ok(());
        }
        let mut next = tokens.clone();
        next.remove(zone);
        self.persist(&next)?;
        *tokens = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use zonesync_storage::{FileBackend, InMemoryBackend};

    fn token(n: u8) -> ChangeToken {
        ChangeToken::from_bytes(vec![n])
    }

    #[test]
    fn memory_store_keeps_one_token_per_zone() {
        let store = MemoryTokenStore::new();
        let a = ZoneId::new("a");
        let b = ZoneId::new("b");

        assert_eq!(store.load(&a).unwrap(), None);
        store.save(&a, &token(1)).unwrap();
        store.save(&a, &token(2)).unwrap();
        store.save(&b, &token(9)).unwrap();
        assert_eq!(store.load(&a).unwrap(), Some(token(2)));
        assert_eq!(store.load(&b).unwrap(), Some(token(9)));

        store.clear(&a).unwrap();
        assert_eq!(store.load(&a).unwrap(), None);
    }

    #[test]
    fn failed_save_keeps_previous_token() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = BackendTokenStore::open(Arc::clone(&backend)).unwrap();
        let zone = ZoneId::new("z");

        store.save(&zone, &token(1)).unwrap();
        backend.fail_next_store();
        assert!(store.save(&zone, &token(2)).is_err());
        assert_eq!(store.load(&zone).unwrap(), Some(token(1)));

        let reopened = BackendTokenStore::open(backend).unwrap();
        assert_eq!(reopened.load(&zone).unwrap(), Some(token(1)));
    }

    #[test]
    fn file_backed_tokens_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.cbor");
        let zone = ZoneId::new("todos");

        {
            let store = BackendTokenStore::open(FileBackend::open(&path).unwrap()).unwrap();
            store.save(&zone, &token(7)).unwrap();
        }

        let store = BackendTokenStore::open(FileBackend::open(&path).unwrap()).unwrap();
        assert_eq!(store.load(&zone).unwrap(), Some(token(7)));
    }

    #[test]
    fn garbage_snapshot_is_corrupted() {
        let backend = InMemoryBackend::with_data(vec![0xff, 0x00, 0x13]);
        assert!(matches!(
            BackendTokenStore::open(backend),
            Err(StorageError::Corrupted(_))
        ));
    }
}
