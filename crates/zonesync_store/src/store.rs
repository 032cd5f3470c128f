//! The local store collaborator.

use crate::batch::WriteBatch;
use crate::error::StoreResult;
use crate::record::{LocalRecord, Tombstone};
use crate::schema::Catalog;
use zonesync_protocol::RecordId;

/// Counts of what a commit changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Records inserted or replaced.
    pub records_written: usize,
    /// Records removed.
    pub records_deleted: usize,
    /// Tombstones created.
    pub tombstones_added: usize,
    /// Tombstones purged.
    pub tombstones_purged: usize,
    /// Guarded puts not applied as staged because the stored record changed
    /// after it was read.
    pub records_kept: usize,
}

/// A local persistent object store the sync engine can reconcile.
///
/// Queries never observe a partially applied [`WriteBatch`]: `commit`
/// applies every staged write or none of them.
pub trait LocalStore: Send + Sync {
    /// The entity catalog of this store.
    fn catalog(&self) -> &Catalog;

    /// Returns records of `entity` whose change type is `Updated`.
    fn fetch_dirty(&self, entity: &str) -> StoreResult<Vec<LocalRecord>>;

    /// Returns all pending tombstones.
    fn fetch_tombstones(&self) -> StoreResult<Vec<Tombstone>>;

    /// Returns the records of `entity` whose IDs are in `ids`.
    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<LocalRecord>>;

    /// Returns one record of `entity`.
    fn get(&self, entity: &str, record_id: &RecordId) -> StoreResult<Option<LocalRecord>> {
        Ok(self
            .fetch_by_ids(entity, std::slice::from_ref(record_id))?
            .into_iter()
            .next())
    }

    /// Atomically applies a batch.
    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitStats>;
}

impl<S: LocalStore + ?Sized> LocalStore for std::sync::Arc<S> {
    fn catalog(&self) -> &Catalog {
        (**self).catalog()
    }

    fn fetch_dirty(&self, entity: &str) -> StoreResult<Vec<LocalRecord>> {
        (**self).fetch_dirty(entity)
    }

    fn fetch_tombstones(&self) -> StoreResult<Vec<Tombstone>> {
        (**self).fetch_tombstones()
    }

    fn fetch_by_ids(&self, entity: &str, ids: &[RecordId]) -> StoreResult<Vec<LocalRecord>> {
        (**self).fetch_by_ids(entity, ids)
    }

    fn get(&self, entity: &str, record_id: &RecordId) -> StoreResult<Option<LocalRecord>> {
        (**self).get(entity, record_id)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<CommitStats> {
        (**self).commit(batch)
    }
}
