//! Application of remote changes to the local store.

use crate::error::{SyncError, SyncResult};
use crate::translator::{LocalFields, RecordTranslator};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use zonesync_protocol::{PullPage, PushResult, RecordId, RemoteRecord};
use zonesync_store::{ChangeType, LocalRecord, LocalStore, OnChanged, PendingWrite, WriteBatch};

/// Remote changes accumulated over the pages of one pull cycle.
///
/// A change on a later page supersedes an earlier change to the same record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteChanges {
    /// Records created or changed remotely, in arrival order.
    pub upserts: Vec<RemoteRecord>,
    /// IDs deleted remotely.
    pub deletes: Vec<RecordId>,
}

impl RemoteChanges {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in one pull page.
    pub fn absorb(&mut self, page: PullPage) {
        for id in page.deleted {
            self.upserts.retain(|r| r.record_id != id);
            if !self.deletes.contains(&id) {
                self.deletes.push(id);
            }
        }
        for record in page.upserted {
            self.deletes.retain(|id| *id != record.record_id);
            self.upserts.retain(|r| r.record_id != record.record_id);
            self.upserts.push(record);
        }
    }

    /// Returns true if nothing changed remotely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Counters for one apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Records whose push was acknowledged.
    pub records_acknowledged: usize,
    /// Pulled records created or overwritten.
    pub records_upserted: usize,
    /// Local records removed by remote deletes.
    pub records_deleted: usize,
    /// Tombstones removed at commit.
    pub tombstones_purged: usize,
    /// To-one references whose target was not found.
    pub unresolved_references: usize,
    /// Records left as edited locally because they changed during the pass.
    pub local_edits_kept: usize,
}

/// Stages remote-origin changes into one [`WriteBatch`] and commits it.
///
/// Nothing reaches the store before [`commit`](Self::commit); dropping the
/// applier discards every staged write.
pub struct LocalApplier<'a, S: LocalStore + ?Sized> {
    store: &'a S,
    entities: BTreeSet<&'a str>,
    batch: WriteBatch,
    stats: ApplyStats,
}

impl<'a, S: LocalStore + ?Sized> LocalApplier<'a, S> {
    /// Creates an applier for the tracked `entities` of `store`.
    pub fn new(store: &'a S, entities: &'a [String]) -> Self {
        Self {
            store,
            entities: entities.iter().map(String::as_str).collect(),
            batch: WriteBatch::new(),
            stats: ApplyStats::default(),
        }
    }

    /// Stages the outcome of a push: saved records take the server's state
    /// and become clean, and acknowledged deletes drop their tombstones.
    ///
    /// `pushed` holds the local records as they were read for the push. A
    /// record edited locally since then keeps its edit and dirty flag and
    /// only takes the new remote metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalApply`] if the store cannot be read.
    pub fn acknowledge(&mut self, result: &PushResult, pushed: &[LocalRecord]) -> SyncResult<()> {
        let bases: BTreeMap<&RecordId, &LocalRecord> =
            pushed.iter().map(|r| (&r.record_id, r)).collect();
        self.stats.records_acknowledged +=
            self.stage_upserts(&result.saved, &bases, OnChanged::AdoptMetadata)?;
        for id in &result.deleted {
            self.batch.purge_tombstone(id.clone());
        }
        Ok(())
    }

    /// Stages tombstone removals without any remote delete.
    pub fn purge_tombstones(&mut self, ids: &[RecordId]) {
        for id in ids {
            self.batch.purge_tombstone(id.clone());
        }
    }

    /// Stages pulled changes: deletes first, then upserts.
    ///
    /// An ID present in both sets ends up present locally. An upsert of a
    /// record edited locally after it was read here is skipped at commit, so
    /// the edit stays dirty for the next pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalApply`] if the store cannot be read or a
    /// record's metadata cannot be encoded.
    pub fn apply(&mut self, changes: &RemoteChanges) -> SyncResult<()> {
        self.stage_deletes(&changes.deletes)?;
        self.stats.records_upserted +=
            self.stage_upserts(&changes.upserts, &BTreeMap::new(), OnChanged::Skip)?;
        Ok(())
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ApplyStats {
        self.stats
    }

    /// Commits every staged write as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalApply`] if the commit fails; the store is
    /// then unchanged.
    pub fn commit(self) -> SyncResult<ApplyStats> {
        let mut stats = self.stats;
        if self.batch.is_empty() {
            return Ok(stats);
        }
        let committed = self
            .store
            .commit(self.batch)
            .map_err(SyncError::LocalApply)?;
        stats.tombstones_purged = committed.tombstones_purged;
        stats.local_edits_kept = committed.records_kept;
        if committed.records_kept > 0 {
            info!(
                kept = committed.records_kept,
                "kept records edited locally during the pass"
            );
        }
        debug!(
            written = committed.records_written,
            deleted = committed.records_deleted,
            "applied remote changes"
        );
        Ok(stats)
    }

    fn stage_deletes(&mut self, ids: &[RecordId]) -> SyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let store = self.store;
        for entity in self.entities.clone() {
            let mut doomed: BTreeSet<RecordId> = store
                .fetch_by_ids(entity, ids)
                .map_err(SyncError::LocalApply)?
                .into_iter()
                .map(|r| r.record_id)
                .collect();
            doomed.extend(
                ids.iter()
                    .filter(|id| self.batch.record(entity, id).is_some())
                    .cloned(),
            );
            for id in doomed {
                self.batch.delete(entity, id);
                self.stats.records_deleted += 1;
            }
        }
        for id in ids {
            self.batch.purge_tombstone(id.clone());
        }
        Ok(())
    }

    /// Two passes: fields and metadata for every record, then to-one links,
    /// so a reference to a record later in the same set still resolves.
    fn stage_upserts(
        &mut self,
        records: &[RemoteRecord],
        bases: &BTreeMap<&RecordId, &LocalRecord>,
        on_changed: OnChanged,
    ) -> SyncResult<usize> {
        let mut staged = Vec::with_capacity(records.len());

        for remote in records {
            let entity = remote.record_type.as_str();
            if !self.entities.contains(entity) {
                warn!(
                    record_id = %remote.record_id,
                    record_type = %entity,
                    "skipping record of untracked type"
                );
                continue;
            }

            // Only a first read from the store guards the write
            let (mut local, base) = match self.batch.pending(entity, &remote.record_id) {
                Some(PendingWrite::Put(record)) => (record.clone(), None),
                Some(PendingWrite::Delete) => {
                    (LocalRecord::new(entity, remote.record_id.clone()), None)
                }
                None => {
                    let read = match bases.get(&remote.record_id) {
                        Some(pushed) if pushed.entity == entity => Some((*pushed).clone()),
                        _ => self
                            .store
                            .get(entity, &remote.record_id)
                            .map_err(SyncError::LocalApply)?,
                    };
                    let local = read
                        .clone()
                        .unwrap_or_else(|| LocalRecord::new(entity, remote.record_id.clone()));
                    (local, Some(read))
                }
            };

            let LocalFields {
                fields,
                references,
                remote_metadata,
            } = RecordTranslator::to_local(remote)?;
            local.fields = fields;
            local.remote_metadata = remote_metadata;
            local.change_type = ChangeType::NoChange;
            if let Some(modified_at) = remote.modified_at {
                local.modified_at = modified_at;
            }

            match base {
                Some(read) => self.batch.put_if_unchanged(local, read, on_changed),
                None => self.batch.put(local),
            }
            staged.push((entity, &remote.record_id, references));
        }

        let count = staged.len();
        for (entity, record_id, references) in staged {
            self.relink(entity, record_id, &references)?;
        }
        Ok(count)
    }

    fn relink(
        &mut self,
        entity: &str,
        record_id: &RecordId,
        references: &BTreeMap<String, RecordId>,
    ) -> SyncResult<()> {
        let store = self.store;
        let Some(description) = store.catalog().entity(entity) else {
            return Ok(());
        };

        for name in references.keys() {
            if !matches!(description.relationship(name), Some(rel) if !rel.to_many) {
                warn!(%entity, relationship = %name, "ignoring unknown relationship");
            }
        }

        let mut to_one = BTreeMap::new();
        for rel in description.to_one_relationships() {
            let Some(target) = references.get(&rel.name) else {
                continue;
            };
            if self.target_exists(&rel.destination, target)? {
                to_one.insert(rel.name.clone(), target.clone());
            } else {
                warn!(
                    record_id = %record_id,
                    relationship = %rel.name,
                    target = %target,
                    "unresolved relationship target"
                );
                self.stats.unresolved_references += 1;
            }
        }

        if let Some(record) = self.batch.record_mut(entity, record_id) {
            record.to_one = to_one;
        }
        Ok(())
    }

    /// Looks in the batch first, then in the store.
    fn target_exists(&self, entity: &str, record_id: &RecordId) -> SyncResult<bool> {
        match self.batch.pending(entity, record_id) {
            Some(PendingWrite::Put(_)) => Ok(true),
            Some(PendingWrite::Delete) => Ok(false),
            None if !self.store.catalog().contains(entity) => Ok(false),
            None => Ok(self
                .store
                .get(entity, record_id)
                .map_err(SyncError::LocalApply)?
                .is_some()),
        }
    }
}
