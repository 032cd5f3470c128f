//! Extraction of pending local changes.

use crate::error::{SyncError, SyncResult};
use std::collections::BTreeSet;
use tracing::debug;
use zonesync_protocol::RecordId;
use zonesync_store::{LocalRecord, LocalStore};

/// The local delta of one sync pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalChangeSet {
    /// Dirty records of the tracked entity types.
    pub upserts: Vec<LocalRecord>,
    /// IDs of tombstoned records to delete remotely.
    pub tombstones: Vec<RecordId>,
    /// Tombstones of IDs that were re-created locally. They are purged
    /// instead of pushed, so each ID lands in exactly one of the two sets.
    pub superseded_tombstones: Vec<RecordId>,
}

impl LocalChangeSet {
    /// Reads dirty records of each tracked entity type and every tombstone.
    ///
    /// Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalFetch`] if any store query fails.
    pub fn compute<S: LocalStore + ?Sized>(store: &S, entities: &[String]) -> SyncResult<Self> {
        let mut upserts = Vec::new();
        for entity in entities {
            upserts.extend(store.fetch_dirty(entity).map_err(SyncError::LocalFetch)?);
        }

        let upserted: BTreeSet<&RecordId> = upserts.iter().map(|r| &r.record_id).collect();
        let (superseded_tombstones, tombstones): (Vec<RecordId>, Vec<RecordId>) = store
            .fetch_tombstones()
            .map_err(SyncError::LocalFetch)?
            .into_iter()
            .map(|t| t.record_id)
            .partition(|id| upserted.contains(id));

        debug!(
            upserts = upserts.len(),
            tombstones = tombstones.len(),
            superseded = superseded_tombstones.len(),
            "computed local change set"
        );
        Ok(Self {
            upserts,
            tombstones,
            superseded_tombstones,
        })
    }

    /// Returns true if there is nothing to push.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.tombstones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_store::{Catalog, EntityDescription, MemoryStore, WriteBatch};

    fn store() -> MemoryStore {
        MemoryStore::new(
            Catalog::new()
                .with_entity(EntityDescription::new("List"))
                .with_entity(EntityDescription::new("Task")),
        )
    }

    #[test]
    fn selects_dirty_records_and_tombstones() {
        let store = store();
        let mut batch = WriteBatch::new();
        batch.insert_local(LocalRecord::new("Task", RecordId::new("t1")));
        batch.put(LocalRecord::new("Task", RecordId::new("t2")));
        batch.insert_local(LocalRecord::new("List", RecordId::new("l1")));
        batch.delete_local("Task", RecordId::new("t0"));
        store.commit(batch).unwrap();

        let changes = LocalChangeSet::compute(&store, &["Task".to_string()]).unwrap();
        assert_eq!(changes.upserts.len(), 1);
        assert_eq!(changes.upserts[0].record_id, RecordId::new("t1"));
        // Tombstones are not scoped by entity type
        assert_eq!(changes.tombstones, vec![RecordId::new("t0")]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn recreated_ids_are_not_deleted() {
        let store = store();
        let mut batch = WriteBatch::new();
        batch.delete_local("Task", RecordId::new("t1"));
        store.commit(batch).unwrap();
        let mut batch = WriteBatch::new();
        batch.insert_local(LocalRecord::new("Task", RecordId::new("t1")));
        store.commit(batch).unwrap();

        let changes = LocalChangeSet::compute(&store, &["Task".to_string()]).unwrap();
        assert_eq!(changes.upserts.len(), 1);
        assert!(changes.tombstones.is_empty());
        assert_eq!(changes.superseded_tombstones, vec![RecordId::new("t1")]);
    }

    #[test]
    fn unknown_entity_is_a_fetch_error() {
        let err = LocalChangeSet::compute(&store(), &["Ghost".to_string()]).unwrap_err();
        assert!(matches!(err, SyncError::LocalFetch(_)));
    }
}
