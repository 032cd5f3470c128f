//! In-memory remote record store.

use crate::error::{RemoteError, RemoteResult};
use crate::remote::RemoteSyncClient;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use zonesync_protocol::{
    ChangeToken, PullPage, PushResult, RecordId, ReferenceAction, RemoteMetadata, RemoteRecord,
    ZoneId,
};

/// Default number of change log entries per pull page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
enum LogEntry {
    Saved(RemoteRecord),
    Deleted(RecordId),
}

impl LogEntry {
    fn record_id(&self) -> &RecordId {
        match self {
            LogEntry::Saved(record) => &record.record_id,
            LogEntry::Deleted(id) => id,
        }
    }
}

#[derive(Debug, Default)]
struct ZoneState {
    records: BTreeMap<RecordId, RemoteRecord>,
    log: Vec<LogEntry>,
}

#[derive(Debug, Default)]
struct RemoteState {
    zones: BTreeMap<ZoneId, ZoneState>,
    clock: i64,
    saves: u64,
    fail_push: Option<RemoteError>,
    fail_pull: Option<RemoteError>,
    fail_fetch: Option<RemoteError>,
    edits_after_fetch: u32,
}

impl RemoteState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn next_tag(&mut self, record_id: &RecordId, modified_at: i64) -> String {
        self.saves += 1;
        let mut hasher = Sha256::new();
        hasher.update(record_id.as_str().as_bytes());
        hasher.update(self.saves.to_be_bytes());
        hasher.update(modified_at.to_be_bytes());
        hasher.finalize()[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn current(&self, zone: &ZoneId, record_id: &RecordId) -> Option<&RemoteRecord> {
        self.zones.get(zone)?.records.get(record_id)
    }

    /// Saves `record` over the current version, keeping keys it doesn't carry.
    fn save(&mut self, zone: &ZoneId, record: RemoteRecord) -> RemoteRecord {
        let now = self.tick();
        let tag = self.next_tag(&record.record_id, now);
        let zone_state = self.zones.entry(zone.clone()).or_default();

        let (mut stored, created_at) = match zone_state.records.get(&record.record_id) {
            Some(existing) => {
                let created_at = existing.metadata.as_ref().map_or(now, |m| m.created_at);
                let mut merged = existing.clone();
                merged.values.extend(record.values);
                merged.record_type = record.record_type;
                (merged, created_at)
            }
            None => (record, now),
        };
        stored.metadata = Some(RemoteMetadata::new(
            zone.clone(),
            stored.record_type.clone(),
            tag,
            created_at,
            now,
        ));
        stored.modified_at = Some(now);

        zone_state
            .records
            .insert(stored.record_id.clone(), stored.clone());
        zone_state.log.push(LogEntry::Saved(stored.clone()));
        stored
    }

    /// Deletes a record and every record whose cascading reference points at
    /// a deleted one. Returns the IDs actually removed.
    fn delete(&mut self, zone: &ZoneId, record_id: &RecordId) -> Vec<RecordId> {
        let zone_state = self.zones.entry(zone.clone()).or_default();
        let mut removed = Vec::new();
        let mut queue = vec![record_id.clone()];

        while let Some(id) = queue.pop() {
            if zone_state.records.remove(&id).is_none() {
                continue;
            }
            zone_state.log.push(LogEntry::Deleted(id.clone()));
            queue.extend(
                zone_state
                    .records
                    .values()
                    .filter(|r| {
                        r.references().any(|(_, reference)| {
                            reference.record_id == id
                                && reference.action == ReferenceAction::DeleteSelf
                        })
                    })
                    .map(|r| r.record_id.clone()),
            );
            removed.push(id);
        }
        removed
    }
}

fn encode_token(position: usize) -> ChangeToken {
    ChangeToken::from_bytes((position as u64).to_be_bytes().to_vec())
}

fn decode_token(token: Option<&ChangeToken>) -> RemoteResult<usize> {
    let Some(token) = token else {
        return Ok(0);
    };
    let bytes: [u8; 8] = token
        .as_bytes()
        .try_into()
        .map_err(|_| RemoteError::InvalidToken)?;
    usize::try_from(u64::from_be_bytes(bytes)).map_err(|_| RemoteError::InvalidToken)
}

/// A [`RemoteSyncClient`] that keeps zones in memory.
///
/// Behaves like a versioned record store: every save assigns a fresh change
/// tag, a push carrying a stale tag is reported as a conflict, deletes
/// cascade along [`ReferenceAction::DeleteSelf`] references, and every
/// change is appended to a per-zone log that pulls page through.
///
/// Faults can be armed for the next push, pull or fetch, and
/// [`server_save`](Self::server_save) stands in for edits made by other
/// clients.
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    page_size: usize,
    pull_hook: RwLock<Option<Hook>>,
    push_calls: AtomicU64,
    pull_calls: AtomicU64,
    fetch_calls: AtomicU64,
}

impl MemoryRemote {
    /// Creates an empty remote whose clock starts at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            state: Mutex::new(RemoteState {
                clock: now,
                ..RemoteState::default()
            }),
            page_size: DEFAULT_PAGE_SIZE,
            pull_hook: RwLock::new(None),
            push_calls: AtomicU64::new(0),
            pull_calls: AtomicU64::new(0),
            fetch_calls: AtomicU64::new(0),
        }
    }

    /// Sets how many change log entries one pull page covers.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Moves the server clock; the next save is stamped `millis + 1`.
    pub fn set_clock(&self, millis: i64) {
        self.state.lock().clock = millis;
    }

    /// Saves a record as another client would, ignoring its change tag.
    pub fn server_save(&self, zone: &ZoneId, record: RemoteRecord) -> RemoteRecord {
        self.state.lock().save(zone, record)
    }

    /// Deletes a record as another client would. Returns every removed ID,
    /// cascades included.
    pub fn server_delete(&self, zone: &ZoneId, record_id: &RecordId) -> Vec<RecordId> {
        self.state.lock().delete(zone, record_id)
    }

    /// Returns the current version of a record.
    #[must_use]
    pub fn record(&self, zone: &ZoneId, record_id: &RecordId) -> Option<RemoteRecord> {
        self.state.lock().current(zone, record_id).cloned()
    }

    /// Returns every live record in `zone`.
    #[must_use]
    pub fn records(&self, zone: &ZoneId) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .zones
            .get(zone)
            .map(|z| z.records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Token a client holds once it has consumed the whole change log.
    #[must_use]
    pub fn current_token(&self, zone: &ZoneId) -> ChangeToken {
        let state = self.state.lock();
        encode_token(state.zones.get(zone).map_or(0, |z| z.log.len()))
    }

    /// Makes the next push fail with `err`.
    pub fn fail_next_push(&self, err: RemoteError) {
        self.state.lock().fail_push = Some(err);
    }

    /// Makes the next pull fail with `err`.
    pub fn fail_next_pull(&self, err: RemoteError) {
        self.state.lock().fail_pull = Some(err);
    }

    /// Makes the next fetch fail with `err`.
    pub fn fail_next_fetch(&self, err: RemoteError) {
        self.state.lock().fail_fetch = Some(err);
    }

    /// After the next fetch returns, re-saves every fetched record so the
    /// caller's copies are stale again.
    pub fn edit_after_next_fetch(&self) {
        self.state.lock().edits_after_fetch += 1;
    }

    /// Runs `hook` at the start of every pull, before the remote answers.
    pub fn set_pull_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.pull_hook.write() = Some(Box::new(hook));
    }

    /// Number of push calls received.
    #[must_use]
    pub fn push_calls(&self) -> u64 {
        self.push_calls.load(Ordering::SeqCst)
    }

    /// Number of pull calls received.
    #[must_use]
    pub fn pull_calls(&self) -> u64 {
        self.pull_calls.load(Ordering::SeqCst)
    }

    /// Number of fetch calls received.
    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemote")
            .field("page_size", &self.page_size)
            .field("push_calls", &self.push_calls())
            .field("pull_calls", &self.pull_calls())
            .finish()
    }
}

impl RemoteSyncClient for MemoryRemote {
    fn push(
        &self,
        zone: &ZoneId,
        upserts: &[RemoteRecord],
        deletes: &[RecordId],
    ) -> RemoteResult<PushResult> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.fail_push.take() {
            return Err(err);
        }

        let mut result = PushResult::default();
        for record in upserts {
            let current = state.current(zone, &record.record_id).cloned();
            let stale = match (&current, record.change_tag()) {
                (Some(server), Some(tag)) => server.change_tag() != Some(tag),
                // Creating an ID that already exists, or saving one deleted since
                (Some(_), None) | (None, Some(_)) => true,
                (None, None) => false,
            };
            if stale {
                debug!(record_id = %record.record_id, "push conflict");
                result
                    .conflicted
                    .push(current.unwrap_or_else(|| record.clone()));
                continue;
            }
            result.saved.push(state.save(zone, record.clone()));
        }

        for record_id in deletes {
            state.delete(zone, record_id);
            result.deleted.push(record_id.clone());
        }

        debug!(
            zone = %zone,
            saved = result.saved.len(),
            deleted = result.deleted.len(),
            conflicted = result.conflicted.len(),
            "push handled"
        );
        Ok(result)
    }

    fn pull_page(&self, zone: &ZoneId, token: Option<&ChangeToken>) -> RemoteResult<PullPage> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.pull_hook.read().as_ref() {
            hook();
        }

        let mut state = self.state.lock();
        if let Some(err) = state.fail_pull.take() {
            return Err(err);
        }

        let start = decode_token(token)?;
        let log: &[LogEntry] = state.zones.get(zone).map_or(&[], |z| z.log.as_slice());
        if start > log.len() {
            return Err(RemoteError::InvalidToken);
        }
        let end = start.saturating_add(self.page_size).min(log.len());

        // Later entries for the same record replace earlier ones
        let mut order: Vec<&RecordId> = Vec::new();
        let mut latest: BTreeMap<&RecordId, &LogEntry> = BTreeMap::new();
        for entry in &log[start..end] {
            if latest.insert(entry.record_id(), entry).is_none() {
                order.push(entry.record_id());
            }
        }

        let mut page = PullPage {
            upserted: Vec::new(),
            deleted: Vec::new(),
            next_token: encode_token(end),
            more_coming: end < log.len(),
        };
        for id in order {
            match latest.get(id) {
                Some(LogEntry::Saved(record)) => page.upserted.push(record.clone()),
                Some(LogEntry::Deleted(id)) => page.deleted.push(id.clone()),
                None => {}
            }
        }
        Ok(page)
    }

    fn fetch_records(&self, zone: &ZoneId, ids: &[RecordId]) -> RemoteResult<Vec<RemoteRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.fail_fetch.take() {
            return Err(err);
        }

        let found: Vec<RemoteRecord> = ids
            .iter()
            .filter_map(|id| state.current(zone, id).cloned())
            .collect();

        if state.edits_after_fetch > 0 {
            state.edits_after_fetch -= 1;
            for record in &found {
                let touch = RemoteRecord::new(record.record_id.clone(), record.record_type.clone());
                state.save(zone, touch);
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::{FieldValue, Reference};

    fn zone() -> ZoneId {
        ZoneId::new("z")
    }

    fn note(id: &str, title: &str) -> RemoteRecord {
        let mut record = RemoteRecord::new(RecordId::new(id), "Note");
        record.set_field("title", title);
        record
    }

    #[test]
    fn new_records_get_metadata() {
        let remote = MemoryRemote::new();
        remote.set_clock(1_000);
        let result = remote.push(&zone(), &[note("a", "x")], &[]).unwrap();

        assert_eq!(result.saved.len(), 1);
        let saved = &result.saved[0];
        let meta = saved.metadata.as_ref().unwrap();
        assert_eq!(meta.created_at, 1_001);
        assert_eq!(meta.modified_at, 1_001);
        assert_eq!(meta.change_tag.len(), 16);
        assert_eq!(saved.modified_at, Some(1_001));
    }

    #[test]
    fn stale_tag_conflicts() {
        let remote = MemoryRemote::new();
        let saved = remote.push(&zone(), &[note("a", "x")], &[]).unwrap().saved;
        let mut edit = saved[0].clone();

        remote.server_save(&zone(), note("a", "other client"));

        edit.set_field("title", "mine");
        let result = remote.push(&zone(), &[edit], &[]).unwrap();
        assert!(result.saved.is_empty());
        assert_eq!(result.conflicted.len(), 1);
        assert_eq!(
            result.conflicted[0].field("title"),
            Some(&FieldValue::from("other client"))
        );
    }

    #[test]
    fn creating_an_existing_id_conflicts() {
        let remote = MemoryRemote::new();
        remote.server_save(&zone(), note("a", "x"));
        let result = remote.push(&zone(), &[note("a", "y")], &[]).unwrap();
        assert!(result.has_conflicts());
    }

    #[test]
    fn saves_keep_keys_not_pushed() {
        let remote = MemoryRemote::new();
        let mut full = note("a", "x");
        full.set_field("body", "kept");
        let saved = remote.push(&zone(), &[full], &[]).unwrap().saved;

        let mut partial = RemoteRecord::with_metadata(
            RecordId::new("a"),
            saved[0].metadata.clone().unwrap(),
        );
        partial.set_field("title", "y");
        let saved = remote.push(&zone(), &[partial], &[]).unwrap().saved;
        assert_eq!(saved[0].field("body"), Some(&FieldValue::from("kept")));
        assert_eq!(saved[0].field("title"), Some(&FieldValue::from("y")));
    }

    #[test]
    fn deletes_cascade() {
        let remote = MemoryRemote::new();
        let mut task = note("t", "task");
        task.set_reference("list", Reference::cascading(RecordId::new("l")));
        remote.server_save(&zone(), note("l", "list"));
        remote.server_save(&zone(), task);

        let result = remote.push(&zone(), &[], &[RecordId::new("l")]).unwrap();
        assert_eq!(result.deleted, vec![RecordId::new("l")]);
        assert!(remote.records(&zone()).is_empty());

        let page = remote.pull_page(&zone(), None).unwrap();
        assert_eq!(page.deleted.len(), 2);
        assert!(page.upserted.is_empty());
    }

    #[test]
    fn pull_pages_through_the_log() {
        let remote = MemoryRemote::new().with_page_size(2);
        for id in ["a", "b", "c"] {
            remote.server_save(&zone(), note(id, id));
        }

        let first = remote.pull_page(&zone(), None).unwrap();
        assert_eq!(first.upserted.len(), 2);
        assert!(first.more_coming);

        let second = remote.pull_page(&zone(), Some(&first.next_token)).unwrap();
        assert_eq!(second.upserted.len(), 1);
        assert!(!second.more_coming);
        assert_eq!(second.next_token, remote.current_token(&zone()));

        let empty = remote.pull_page(&zone(), Some(&second.next_token)).unwrap();
        assert!(empty.is_empty());
        assert!(!empty.more_coming);
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let remote = MemoryRemote::new();
        let garbage = ChangeToken::from_bytes(vec![1, 2, 3]);
        assert_eq!(
            remote.pull_page(&zone(), Some(&garbage)),
            Err(RemoteError::InvalidToken)
        );
        assert_eq!(
            remote.pull_page(&zone(), Some(&encode_token(5))),
            Err(RemoteError::InvalidToken)
        );
    }

    #[test]
    fn injected_faults_fire_once() {
        let remote = MemoryRemote::new();
        remote.fail_next_push(RemoteError::transport_retryable("offline"));
        assert!(remote.push(&zone(), &[note("a", "x")], &[]).is_err());
        assert!(remote.push(&zone(), &[note("a", "x")], &[]).is_ok());
        assert_eq!(remote.push_calls(), 2);
    }

    #[test]
    fn edit_after_fetch_moves_the_tag() {
        let remote = MemoryRemote::new();
        remote.server_save(&zone(), note("a", "x"));
        remote.edit_after_next_fetch();

        let fetched = remote.fetch_records(&zone(), &[RecordId::new("a")]).unwrap();
        let current = remote.record(&zone(), &RecordId::new("a")).unwrap();
        assert_ne!(fetched[0].change_tag(), current.change_tag());
        assert_eq!(current.field("title"), Some(&FieldValue::from("x")));
    }
}
