//! In-memory local store with optional snapshot persistence.

use crate::batch::{OnChanged, PendingWrite, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::record::{LocalRecord, Tombstone};
use crate::schema::Catalog;
use crate::store::{CommitStats, LocalStore};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use zonesync_protocol::{from_cbor, to_cbor, RecordId};
use zonesync_storage::StorageBackend;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    records: BTreeMap<String, BTreeMap<RecordId, LocalRecord>>,
    tombstones: BTreeMap<RecordId, Tombstone>,
}

impl StoreState {
    fn owner_of(&self, record_id: &RecordId) -> Option<&str> {
        self.records
            .iter()
            .find(|(_, records)| records.contains_key(record_id))
            .map(|(entity, _)| entity.as_str())
    }
}

/// A [`LocalStore`] held in memory.
///
/// When opened with a [`StorageBackend`], every commit writes a CBOR
/// snapshot of all records and tombstones before the new state becomes
/// visible; a failed snapshot write leaves the store unchanged.
///
/// # Example
///
/// ```rust
/// use zonesync_protocol::RecordId;
/// use zonesync_store::{Catalog, EntityDescription, LocalRecord, LocalStore, MemoryStore, WriteBatch};
///
/// let store = MemoryStore::new(Catalog::new().with_entity(EntityDescription::new("Note")));
/// let mut batch = WriteBatch::new();
/// batch.insert_local(LocalRecord::new("Note", RecordId::new("n1")).with_field("title", "hi"));
/// store.commit(batch).unwrap();
///
/// assert_eq!(store.fetch_dirty("Note").unwrap().len(), 1);
/// ```
pub struct MemoryStore {
    catalog: Catalog,
    state: RwLock<StoreState>,
    backend: Option<Box<dyn StorageBackend>>,
    commits: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty, non-persistent store.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            state: RwLock::new(StoreState::default()),
            backend: None,
            commits: AtomicU64::new(0),
        }
    }

    /// Opens a store persisted through `backend`, loading its last snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or decoded, or if it
    /// holds entity types missing from `catalog`.
    pub fn open(catalog: Catalog, backend: impl StorageBackend + 'static) -> StoreResult<Self> {
        let state = match backend.load()? {
            Some(bytes) => from_cbor::<StoreState>(&bytes)?,
            None => StoreState::default(),
        };

        if let Some(entity) = state.records.keys().find(|e| !catalog.contains(e)) {
            return Err(StoreError::InvalidSnapshot {
                message: format!("snapshot holds unknown entity type {entity}"),
            });
        }

        debug!(
            records = state.records.values().map(BTreeMap::len).sum::<usize>(),
            tombstones = state.tombstones.len(),
            "opened persisted store"
        );

        Ok(Self {
            catalog,
            state: RwLock::new(state),
            backend: Some(Box::new(backend)),
            commits: AtomicU64::new(0),
        })
    }

    /// Number of non-empty commits applied since this handle was created.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Returns every record of `entity`, clean or dirty.
    #[must_use]
    pub fn records(&self, entity: &str) -> Vec<LocalRecord> {
        self.state
            .read()
            .records
            .get(entity)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Finds a record by ID in any entity type.
    #[must_use]
    pub fn find(&self, record_id: &RecordId) -> Option<LocalRecord> {
        let state = self.state.read();
        let entity = state.owner_of(record_id)?;
        state.records.get(entity)?.get(record_id).cloned()
    }

    /// Total number of records across entity types.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.read().records.values().map(BTreeMap::len).sum()
    }

    fn check_entity(&self, entity: &str) -> StoreResult<()> {
        if self.catalog.contains(entity) {
            Ok(())
        } else {
            Err(StoreError::unknown_entity(entity))
        }
    }

    fn apply(&self, state: &mut StoreState, batch: &WriteBatch) -> StoreResult<CommitStats> {
        let mut stats = CommitStats::default();

        // Deletes first so an ID can move between entity types in one batch
        for (entity, record_id, write) in batch.writes() {
            if matches!(write, PendingWrite::Delete) {
                let removed = state
                    .records
                    .get_mut(entity)
                    .and_then(|records| records.remove(record_id));
                if removed.is_some() {
                    stats.records_deleted += 1;
                }
            }
        }

        for (entity, record_id, write) in batch.writes() {
            let PendingWrite::Put(record) = write else {
                continue;
            };
            self.check_entity(entity)?;
            if let Some(existing) = state.owner_of(record_id) {
                if existing != entity {
                    return Err(StoreError::DuplicateRecord {
                        record_id: record_id.clone(),
                        existing: existing.to_string(),
                    });
                }
            }
            let current = state
                .records
                .get(entity)
                .and_then(|records| records.get(record_id))
                .cloned();
            let record = match batch.guard(entity, record_id) {
                Some(guard) if guard.base != current => {
                    stats.records_kept += 1;
                    match (guard.on_changed, current) {
                        (OnChanged::AdoptMetadata, Some(mut kept)) => {
                            debug!(%record_id, "record changed since read, keeping local edit");
                            kept.remote_metadata = record.remote_metadata.clone();
                            kept
                        }
                        _ => {
                            debug!(%record_id, "record changed since read, skipping write");
                            continue;
                        }
                    }
                }
                _ => record.clone(),
            };
            state
                .records
                .entry(entity.to_string())
                .or_default()
                .insert(record_id.clone(), record);
            stats.records_written += 1;
        }

        for record_id in batch.tombstones_purged() {
            if state.tombstones.remove(record_id).is_some() {
                stats.tombstones_purged += 1;
            }
        }

        for tombstone in batch.tombstones_added() {
            state
                .tombstones
                .insert(tombstone.record_id.clone(), tombstone.clone());
            stats.tombstones_added += 1;
        }

        state.records.retain(|_, records| !records.is_empty());
        Ok(stats)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.record_count())
            .field("persistent", &self.backend.is_some())
            .finish()
    }
}

impl LocalStore for MemoryStore {
    fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn fetch_dirty(&self, entity: &str) -> StoreResult<Vec<LocalRecord>> {
        self.check_entity(entity)?;
        Ok(self
            .state
            .read()
            .records
            .get(entity)
            .map(|records| records.values().filter(|r| r.is_dirty()).cloned().collect())
            .unwrap_or_default())
    }

    fn fetch_tombstones(&self) -> StoreResult<Vec<Tombstone>> {
        Ok(self.state.read().tombstones.values().cloned().collect())
    }

    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<LocalRecord>> {
        self.check_entity(entity)?;
        let state = self.state.read();
        let Some(records) = state.records.get(entity) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitStats> {
        if batch.is_empty() {
            return Ok(CommitStats::default());
        }

        let mut state = self.state.write();
        let mut next = state.clone();
        let stats = self.apply(&mut next, &batch)?;

        if let Some(backend) = &self.backend {
            backend.store(&to_cbor(&next)?)?;
        }

        *state = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(
            written = stats.records_written,
            deleted = stats.records_deleted,
            tombstones_added = stats.tombstones_added,
            tombstones_purged = stats.tombstones_purged,
            kept = stats.records_kept,
            "committed batch"
        );
        Ok(stats)
    }
}
