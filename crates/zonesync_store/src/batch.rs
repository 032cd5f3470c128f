//! Atomic write batches.

use crate::record::{now_millis, ChangeType, LocalRecord, Tombstone};
use std::collections::{BTreeMap, BTreeSet};
use zonesync_protocol::RecordId;

/// A staged write to one record.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// Insert or replace the record.
    Put(LocalRecord),
    /// Remove the record if present.
    Delete,
}

/// What a guarded put does if the stored record changed after it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnChanged {
    /// Leave the stored record as it is.
    Skip,
    /// Keep the stored fields and dirty flag, but take the staged remote metadata.
    AdoptMetadata,
}

/// The precondition on a put staged with [`WriteBatch::put_if_unchanged`].
#[derive(Debug, Clone, PartialEq)]
pub struct PutGuard {
    /// The stored record when it was read, or `None` if it was absent.
    pub base: Option<LocalRecord>,
    /// Applied when the stored record no longer equals `base`.
    pub on_changed: OnChanged,
}

/// A set of writes committed to a [`LocalStore`](crate::LocalStore) as one unit.
///
/// Later writes to the same record replace earlier ones. Reads against the
/// batch ([`record`](Self::record), [`find_record`](Self::find_record)) see
/// staged state, which lets the sync applier resolve references to records
/// it has not committed yet.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: BTreeMap<(String, RecordId), PendingWrite>,
    index: BTreeMap<RecordId, String>,
    guards: BTreeMap<(String, RecordId), PutGuard>,
    tombstones_added: BTreeMap<RecordId, Tombstone>,
    tombstones_purged: BTreeSet<RecordId>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.tombstones_added.is_empty() && self.tombstones_purged.is_empty()
    }

    /// Number of staged record writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Stages a record as-is. The caller owns its dirty flag.
    pub fn put(&mut self, record: LocalRecord) {
        self.index
            .insert(record.record_id.clone(), record.entity.clone());
        self.writes.insert(
            (record.entity.clone(), record.record_id.clone()),
            PendingWrite::Put(record),
        );
    }

    /// Stages a record that only lands if the stored copy still equals
    /// `base` at commit. The first guard staged for a record stays in force
    /// through later puts of the same record.
    pub fn put_if_unchanged(
        &mut self,
        record: LocalRecord,
        base: Option<LocalRecord>,
        on_changed: OnChanged,
    ) {
        self.guards
            .entry((record.entity.clone(), record.record_id.clone()))
            .or_insert(PutGuard { base, on_changed });
        self.put(record);
    }

    /// Stages a record removal. Drops any guard on the record.
    pub fn delete(&mut self, entity: impl Into<String>, record_id: RecordId) {
        let entity = entity.into();
        self.guards.remove(&(entity.clone(), record_id.clone()));
        if self.index.get(&record_id) == Some(&entity) {
            self.index.remove(&record_id);
        }
        self.writes
            .insert((entity, record_id), PendingWrite::Delete);
    }

    /// Stages a tombstone.
    pub fn add_tombstone(&mut self, tombstone: Tombstone) {
        self.tombstones_purged.remove(&tombstone.record_id);
        self.tombstones_added
            .insert(tombstone.record_id.clone(), tombstone);
    }

    /// Stages removal of a tombstone. Purging an absent tombstone is a no-op.
    pub fn purge_tombstone(&mut self, record_id: RecordId) {
        self.tombstones_added.remove(&record_id);
        self.tombstones_purged.insert(record_id);
    }

    /// Stages a locally-originated insert; the record becomes dirty.
    pub fn insert_local(&mut self, record: LocalRecord) {
        self.update_local(record);
    }

    /// Stages a locally-originated update; the record becomes dirty.
    pub fn update_local(&mut self, mut record: LocalRecord) {
        record.change_type = ChangeType::Updated;
        record.modified_at = now_millis().max(record.modified_at.saturating_add(1));
        self.put(record);
    }

    /// Stages a locally-originated delete and its tombstone.
    pub fn delete_local(&mut self, entity: impl Into<String>, record_id: RecordId) {
        self.add_tombstone(Tombstone::new(record_id.clone()));
        self.delete(entity, record_id);
    }

    /// Returns the staged write for a record, if any.
    #[must_use]
    pub fn pending(&self, entity: &str, record_id: &RecordId) -> Option<&PendingWrite> {
        self.writes.get(&(entity.to_string(), record_id.clone()))
    }

    /// Returns the guard on a staged put, if any.
    #[must_use]
    pub fn guard(&self, entity: &str, record_id: &RecordId) -> Option<&PutGuard> {
        self.guards.get(&(entity.to_string(), record_id.clone()))
    }

    /// Returns the staged record, if one is being put.
    #[must_use]
    pub fn record(&self, entity: &str, record_id: &RecordId) -> Option<&LocalRecord> {
        match self.pending(entity, record_id) {
            Some(PendingWrite::Put(record)) => Some(record),
            _ => None,
        }
    }

    /// Returns a mutable staged record, if one is being put.
    pub fn record_mut(&mut self, entity: &str, record_id: &RecordId) -> Option<&mut LocalRecord> {
        match self.writes.get_mut(&(entity.to_string(), record_id.clone())) {
            Some(PendingWrite::Put(record)) => Some(record),
            _ => None,
        }
    }

    /// Finds a staged record by ID regardless of entity type.
    #[must_use]
    pub fn find_record(&self, record_id: &RecordId) -> Option<&LocalRecord> {
        let entity = self.index.get(record_id)?;
        self.record(entity, record_id)
    }

    /// Iterates staged record writes in key order.
    pub fn writes(&self) -> impl Iterator<Item = (&str, &RecordId, &PendingWrite)> {
        self.writes
            .iter()
            .map(|((entity, id), write)| (entity.as_str(), id, write))
    }

    /// Iterates staged tombstones.
    pub fn tombstones_added(&self) -> impl Iterator<Item = &Tombstone> {
        self.tombstones_added.values()
    }

    /// Iterates staged tombstone purges.
    pub fn tombstones_purged(&self) -> impl Iterator<Item = &RecordId> {
        self.tombstones_purged.iter()
    }
}
