//! Conflict policies and conflict pairs.

use crate::id::RecordId;
use crate::record::RemoteRecord;

/// Policy for resolving a write-write conflict between a client record and
/// the current server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// An injected callback picks the final record.
    ClientDecides,
    /// Client changes are discarded.
    #[default]
    ServerWins,
    /// Client fields are copied onto the server record.
    ClientWins,
    /// The record with the later modification time wins.
    GreaterModifiedDateWins,
    /// Keep both versions. Not supported: rejected before a pass starts.
    KeepBoth,
}

impl ConflictPolicy {
    /// Returns true if the engine can apply this policy.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, ConflictPolicy::KeepBoth)
    }

    /// Returns true if this policy needs a resolution callback.
    #[must_use]
    pub fn needs_callback(&self) -> bool {
        matches!(self, ConflictPolicy::ClientDecides)
    }

    /// Converts to a code.
    #[must_use]
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::ClientDecides => 0,
            ConflictPolicy::ServerWins => 1,
            ConflictPolicy::ClientWins => 2,
            ConflictPolicy::GreaterModifiedDateWins => 3,
            ConflictPolicy::KeepBoth => 4,
        }
    }

    /// Converts from a code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ConflictPolicy::ClientDecides),
            1 => Some(ConflictPolicy::ServerWins),
            2 => Some(ConflictPolicy::ClientWins),
            3 => Some(ConflictPolicy::GreaterModifiedDateWins),
            4 => Some(ConflictPolicy::KeepBoth),
            _ => None,
        }
    }
}

/// A rejected client record together with the authoritative server record.
///
/// `server` is `None` when the record was deleted remotely between the
/// rejected push and the re-fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictPair {
    /// The record the client tried to save.
    pub client: RemoteRecord,
    /// The freshly fetched server record.
    pub server: Option<RemoteRecord>,
}

impl ConflictPair {
    /// Creates a conflict pair.
    pub fn new(client: RemoteRecord, server: Option<RemoteRecord>) -> Self {
        Self { client, server }
    }

    /// The conflicted record ID.
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        &self.client.record_id
    }

    /// Returns true if the client edit is strictly newer than the server's.
    ///
    /// Missing timestamps never win.
    #[must_use]
    pub fn client_is_newer(&self) -> bool {
        match (&self.server, self.client.modified_at) {
            (Some(server), Some(client_time)) => match server.modified_at {
                Some(server_time) => client_time > server_time,
                None => true,
            },
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}
