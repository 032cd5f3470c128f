//! The remote record store collaborator.

use crate::error::RemoteResult;
use zonesync_protocol::{ChangeToken, PullPage, PushResult, RecordId, RemoteRecord, ZoneId};

/// Batched push and paginated pull against a remote record store.
///
/// Every call blocks until the remote fully answers. Transport, wire format
/// and authentication belong to the implementation.
pub trait RemoteSyncClient: Send + Sync {
    /// Saves `upserts` and deletes `deletes` in `zone`.
    ///
    /// A record whose remote version moved since the metadata it carries is
    /// reported in [`PushResult::conflicted`] instead of failing the batch;
    /// the rest of the batch still applies.
    fn push(
        &self,
        zone: &ZoneId,
        upserts: &[RemoteRecord],
        deletes: &[RecordId],
    ) -> RemoteResult<PushResult>;

    /// Fetches one page of changes made in `zone` after `token`.
    ///
    /// `None` starts from the beginning of the change stream. Callers keep
    /// calling with [`PullPage::next_token`] while
    /// [`PullPage::more_coming`] is set.
    fn pull_page(&self, zone: &ZoneId, token: Option<&ChangeToken>) -> RemoteResult<PullPage>;

    /// Fetches the current server version of each record. Missing records
    /// are left out of the result.
    fn fetch_records(&self, zone: &ZoneId, ids: &[RecordId]) -> RemoteResult<Vec<RemoteRecord>>;
}

impl<R: RemoteSyncClient + ?Sized> RemoteSyncClient for std::sync::Arc<R> {
    fn push(
        &self,
        zone: &ZoneId,
        upserts: &[RemoteRecord],
        deletes: &[RecordId],
    ) -> RemoteResult<PushResult> {
        (**self).push(zone, upserts, deletes)
    }

    fn pull_page(&self, zone: &ZoneId, token: Option<&ChangeToken>) -> RemoteResult<PullPage> {
        (**self).pull_page(zone, token)
    }

    fn fetch_records(&self, zone: &ZoneId, ids: &[RecordId]) -> RemoteResult<Vec<RemoteRecord>> {
        (**self).fetch_records(zone, ids)
    }
}
