//! Push and pull messages exchanged with the remote store.

use crate::id::RecordId;
use crate::metadata::ChangeToken;
use crate::record::RemoteRecord;

/// Outcome of one push batch.
///
/// A batch can partly succeed: each record lands either in `saved` or in
/// `conflicted`, independent of the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    /// Records accepted by the remote, carrying their new remote metadata.
    pub saved: Vec<RemoteRecord>,
    /// IDs whose delete was accepted (including IDs already absent remotely).
    pub deleted: Vec<RecordId>,
    /// Records rejected because the remote version moved. Each entry is the
    /// server version the remote saw, or the client record if the remote has
    /// none.
    pub conflicted: Vec<RemoteRecord>,
}

impl PushResult {
    /// Returns true if any record conflicted.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }

    /// Folds another batch result into this one.
    pub fn merge(&mut self, other: PushResult) {
        self.saved.extend(other.saved);
        self.deleted.extend(other.deleted);
        self.conflicted.extend(other.conflicted);
    }
}

/// One page of a zone's change stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PullPage {
    /// Records created or changed since the request token.
    pub upserted: Vec<RemoteRecord>,
    /// Records deleted since the request token.
    pub deleted: Vec<RecordId>,
    /// Token to pass to the next page request.
    pub next_token: ChangeToken,
    /// True if the stream has further pages.
    pub more_coming: bool,
}

impl PullPage {
    /// Returns true if the page carries no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.deleted.is_empty()
    }
}
