//! Conflict resolution.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteSyncClient;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use zonesync_protocol::{ConflictPair, ConflictPolicy, RecordId, RemoteRecord, ZoneId};

/// Callback that picks the final record under [`ConflictPolicy::ClientDecides`].
///
/// Receives the client record and the freshly fetched server record. The
/// returned record is used as-is except for its record ID and metadata,
/// which are replaced by the server's so the retried push is accepted.
pub type ResolutionCallback = Arc<dyn Fn(&RemoteRecord, &RemoteRecord) -> RemoteRecord + Send + Sync>;

/// Re-fetches the server version of every conflicted client record.
///
/// The copy a push conflict reports may already be stale, so resolution
/// always starts from what the remote holds now.
///
/// # Errors
///
/// Returns [`SyncError::RemoteFetch`] if the fetch fails.
pub fn fetch_conflict_pairs<R: RemoteSyncClient + ?Sized>(
    remote: &R,
    zone: &ZoneId,
    clients: Vec<RemoteRecord>,
) -> SyncResult<Vec<ConflictPair>> {
    let ids: Vec<RecordId> = clients.iter().map(|c| c.record_id.clone()).collect();
    let mut servers: BTreeMap<RecordId, RemoteRecord> = remote
        .fetch_records(zone, &ids)
        .map_err(SyncError::RemoteFetch)?
        .into_iter()
        .map(|r| (r.record_id.clone(), r))
        .collect();

    Ok(clients
        .into_iter()
        .map(|client| {
            let server = servers.remove(&client.record_id);
            ConflictPair::new(client, server)
        })
        .collect())
}

/// Applies a [`ConflictPolicy`] to conflict pairs.
///
/// Every resolved record carries the fetched server's metadata, so the
/// retried push is accepted unless the server moves again.
#[derive(Clone)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    callback: Option<ResolutionCallback>,
}

impl ConflictResolver {
    /// Creates a resolver for `policy`.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            callback: None,
        }
    }

    /// Sets the callback used by [`ConflictPolicy::ClientDecides`].
    pub fn with_callback(mut self, callback: Option<ResolutionCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Resolves every pair. Pairs resolved to "nothing to push" are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnsupportedPolicy`] for `KeepBoth` and
    /// [`SyncError::InvalidConfig`] for `ClientDecides` without a callback.
    pub fn resolve(&self, pairs: Vec<ConflictPair>) -> SyncResult<Vec<RemoteRecord>> {
        let mut resolved = Vec::with_capacity(pairs.len());
        for pair in pairs {
            if let Some(record) = self.resolve_pair(pair)? {
                resolved.push(record);
            }
        }
        Ok(resolved)
    }

    /// Resolves one pair.
    ///
    /// Returns `None` when the server deleted the record and the policy
    /// lets the server win.
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve).
    pub fn resolve_pair(&self, pair: ConflictPair) -> SyncResult<Option<RemoteRecord>> {
        let record_id = pair.record_id().clone();
        let client_newer = pair.client_is_newer();
        let ConflictPair { client, server } = pair;

        let outcome = match (self.policy, server) {
            (ConflictPolicy::KeepBoth, _) => {
                return Err(SyncError::UnsupportedPolicy(format!("{:?}", self.policy)))
            }
            (ConflictPolicy::ServerWins, None) => None,
            (_, None) => Some(recreate(client)),
            (ConflictPolicy::ServerWins, Some(server)) => Some(server),
            (ConflictPolicy::ClientWins, Some(server)) => Some(overlay(&client, server)),
            (ConflictPolicy::GreaterModifiedDateWins, Some(server)) => {
                if client_newer {
                    Some(overlay(&client, server))
                } else {
                    Some(server)
                }
            }
            (ConflictPolicy::ClientDecides, Some(server)) => {
                let callback = self.callback.as_ref().ok_or_else(|| {
                    SyncError::InvalidConfig("ClientDecides needs a resolution callback".into())
                })?;
                let mut chosen = callback(&client, &server);
                chosen.record_id = server.record_id;
                chosen.metadata = server.metadata;
                Some(chosen)
            }
        };

        debug!(
            record_id = %record_id,
            policy = ?self.policy,
            dropped = outcome.is_none(),
            "resolved conflict"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("policy", &self.policy)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Copies every client value onto the server record.
fn overlay(client: &RemoteRecord, mut server: RemoteRecord) -> RemoteRecord {
    server
        .values
        .extend(client.values.iter().map(|(k, v)| (k.clone(), v.clone())));
    server.modified_at = client.modified_at;
    server
}

/// Turns a client record into a fresh create for a record the server lost.
fn recreate(mut client: RemoteRecord) -> RemoteRecord {
    client.metadata = None;
    client
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemote;
    use zonesync_protocol::{FieldValue, RemoteMetadata};

    fn record(title: &str, modified_at: i64, tag: &str) -> RemoteRecord {
        let mut record = RemoteRecord::with_metadata(
            RecordId::new("r"),
            RemoteMetadata::new("z", "Note", tag, 1, modified_at),
        );
        record.set_field("name", title);
        record.modified_at = Some(modified_at);
        record
    }

    fn pair(client_time: i64, server_time: i64) -> ConflictPair {
        let mut server = record("y", server_time, "server-tag");
        server.set_field("server_only", 7i64);
        ConflictPair::new(record("x", client_time, "old-tag"), Some(server))
    }

    fn name(record: &RemoteRecord) -> Option<&str> {
        record.field("name").and_then(FieldValue::as_text)
    }

    #[test]
    fn server_wins_takes_server_as_is() {
        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let out = resolver.resolve_pair(pair(20, 10)).unwrap().unwrap();
        assert_eq!(name(&out), Some("y"));
        assert_eq!(out.change_tag(), Some("server-tag"));
    }

    #[test]
    fn client_wins_keeps_server_metadata() {
        let resolver = ConflictResolver::new(ConflictPolicy::ClientWins);
        let out = resolver.resolve_pair(pair(10, 20)).unwrap().unwrap();
        assert_eq!(name(&out), Some("x"));
        assert_eq!(out.field("server_only"), Some(&FieldValue::Integer(7)));
        assert_eq!(out.change_tag(), Some("server-tag"));
    }

    #[test]
    fn greater_modified_date_wins() {
        let resolver = ConflictResolver::new(ConflictPolicy::GreaterModifiedDateWins);

        let out = resolver.resolve_pair(pair(1, 2)).unwrap().unwrap();
        assert_eq!(name(&out), Some("y"));

        let out = resolver.resolve_pair(pair(2, 1)).unwrap().unwrap();
        assert_eq!(name(&out), Some("x"));
        assert_eq!(out.change_tag(), Some("server-tag"));

        // Ties go to the server
        let out = resolver.resolve_pair(pair(5, 5)).unwrap().unwrap();
        assert_eq!(name(&out), Some("y"));
    }

    #[test]
    fn client_decides_uses_callback_with_server_metadata() {
        let callback: ResolutionCallback = Arc::new(|client: &RemoteRecord, server: &RemoteRecord| {
            let mut merged = server.clone();
            let joined = format!(
                "{}+{}",
                client.field("name").and_then(FieldValue::as_text).unwrap_or(""),
                server.field("name").and_then(FieldValue::as_text).unwrap_or("")
            );
            merged.set_field("name", joined);
            merged.metadata = None;
            merged
        });
        let resolver =
            ConflictResolver::new(ConflictPolicy::ClientDecides).with_callback(Some(callback));
        let out = resolver.resolve_pair(pair(1, 2)).unwrap().unwrap();
        assert_eq!(name(&out), Some("x+y"));
        assert_eq!(out.change_tag(), Some("server-tag"));
    }

    #[test]
    fn client_decides_without_callback_fails() {
        let resolver = ConflictResolver::new(ConflictPolicy::ClientDecides);
        assert!(matches!(
            resolver.resolve_pair(pair(1, 2)),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn keep_both_is_unsupported() {
        let resolver = ConflictResolver::new(ConflictPolicy::KeepBoth);
        assert!(matches!(
            resolver.resolve(vec![pair(1, 2)]),
            Err(SyncError::UnsupportedPolicy(_))
        ));
    }

    #[test]
    fn vanished_server_record() {
        let client = record("x", 1, "old-tag");

        let resolver = ConflictResolver::new(ConflictPolicy::ServerWins);
        let out = resolver
            .resolve(vec![ConflictPair::new(client.clone(), None)])
            .unwrap();
        assert!(out.is_empty());

        let resolver = ConflictResolver::new(ConflictPolicy::ClientWins);
        let out = resolver
            .resolve_pair(ConflictPair::new(client, None))
            .unwrap()
            .unwrap();
        assert!(out.metadata.is_none());
        assert_eq!(name(&out), Some("x"));
    }

    #[test]
    fn pairs_use_freshly_fetched_server_records() {
        let remote = MemoryRemote::new();
        let zone = ZoneId::new("z");
        let mut stored = RemoteRecord::new(RecordId::new("r"), "Note");
        stored.set_field("name", "latest");
        remote.server_save(&zone, stored);

        let mut ghost = RemoteRecord::new(RecordId::new("gone"), "Note");
        ghost.set_field("name", "ghost");

        let pairs =
            fetch_conflict_pairs(&remote, &zone, vec![record("x", 1, "old"), ghost]).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].server.as_ref().and_then(name), Some("latest"));
        assert!(pairs[1].server.is_none());
    }
}
