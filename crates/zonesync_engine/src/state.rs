//! Sync pass state machine.

use crate::applier::{LocalApplier, RemoteChanges};
use crate::change_set::LocalChangeSet;
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::RemoteSyncClient;
use crate::resolver::{fetch_conflict_pairs, ConflictResolver, ResolutionCallback};
use crate::token::TokenStore;
use crate::translator::RecordTranslator;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zonesync_protocol::{ChangeToken, PushResult, RecordId, RemoteRecord};
use zonesync_store::{LocalStore, StoreError};

/// The phase a sync pass is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass has run yet.
    Idle,
    /// Reading dirty records and tombstones.
    ComputingLocalChanges,
    /// Pushing local changes.
    Pushing,
    /// Fetching server versions and applying the conflict policy.
    ResolvingConflicts,
    /// Pushing resolved records, once.
    PushingRetry,
    /// Pulling remote changes and committing them locally.
    PullingAndApplying,
    /// The last pass succeeded.
    Completed,
    /// The last pass failed.
    Failed,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !self.can_start_sync()
    }

    /// Returns true if a new pass may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Completed | SyncState::Failed
        )
    }

    /// Returns true for the outcome states of a pass.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Completed | SyncState::Failed)
    }
}

/// Outcome of one successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records the remote saved.
    pub records_pushed: usize,
    /// Deletes the remote acknowledged.
    pub records_deleted_remotely: usize,
    /// Conflicts that went through the resolver.
    pub conflicts_resolved: usize,
    /// Pull pages fetched.
    pub pages_pulled: usize,
    /// Pulled records created or overwritten locally.
    pub records_applied: usize,
    /// Local records removed by remote deletes.
    pub records_deleted_locally: usize,
    /// Tombstones purged.
    pub tombstones_purged: usize,
    /// To-one references left unlinked because the target was missing.
    pub unresolved_references: usize,
    /// Records edited locally during the pass, left dirty for the next one.
    pub local_edits_kept: usize,
    /// True if a new change token was persisted.
    pub token_advanced: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

/// Cumulative statistics over every pass of one [`SyncOperation`].
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that succeeded.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Records saved remotely.
    pub records_pushed: u64,
    /// Records applied from pulls.
    pub records_pulled: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// End of the last successful pass.
    pub last_sync_time: Option<Instant>,
    /// Message of the last failure, cleared on success.
    pub last_error: Option<String>,
}

/// Runs sync passes between a local store and one remote zone.
///
/// A pass pushes dirty records and tombstones, resolves conflicts with one
/// retry, pulls every remote change since the stored token, commits the
/// result locally as a single batch, and only then saves the new token.
///
/// Passes are single-flight: starting one while another runs fails with
/// [`SyncError::InvalidStateTransition`]. Use one `SyncOperation` per local
/// store.
///
/// # Example
///
/// ```rust
/// use zonesync_engine::{MemoryRemote, MemoryTokenStore, SyncConfig, SyncOperation};
/// use zonesync_protocol::RecordId;
/// use zonesync_store::{Catalog, EntityDescription, LocalRecord, LocalStore, MemoryStore, WriteBatch};
///
/// let store = MemoryStore::new(Catalog::new().with_entity(EntityDescription::new("Note")));
/// let mut batch = WriteBatch::new();
/// batch.insert_local(LocalRecord::new("Note", RecordId::new("n1")).with_field("title", "hi"));
/// store.commit(batch).unwrap();
///
/// let sync = SyncOperation::new(
///     SyncConfig::new("notes"),
///     store,
///     MemoryRemote::new(),
///     MemoryTokenStore::new(),
/// );
/// let report = sync.run().unwrap();
/// assert_eq!(report.records_pushed, 1);
/// assert!(sync.store().fetch_dirty("Note").unwrap().is_empty());
/// ```
pub struct SyncOperation<S: LocalStore, R: RemoteSyncClient, T: TokenStore> {
    config: SyncConfig,
    store: S,
    remote: R,
    tokens: T,
    callback: Option<ResolutionCallback>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    running: Mutex<()>,
}

impl<S: LocalStore, R: RemoteSyncClient, T: TokenStore> SyncOperation<S, R, T> {
    /// Creates an orchestrator. Pass `Arc`s to share the collaborators.
    pub fn new(config: SyncConfig, store: S, remote: R, tokens: T) -> Self {
        Self {
            config,
            store,
            remote,
            tokens,
            callback: None,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            running: Mutex::new(()),
        }
    }

    /// Sets the callback used under [`ConflictPolicy::ClientDecides`](zonesync_protocol::ConflictPolicy).
    pub fn with_resolution_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RemoteRecord, &RemoteRecord) -> RemoteRecord + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the local store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gets the remote client.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Gets the token store.
    pub fn tokens(&self) -> &T {
        &self.tokens
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the running pass.
    ///
    /// The pass stops before its next remote call or before its local
    /// commit, whichever comes first. Remote writes already made stay.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested for the current pass.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        debug!(zone = %self.config.zone, ?state, "sync state");
        *self.state.write() = state;
    }

    /// Runs one pass and reports its single outcome.
    ///
    /// # Errors
    ///
    /// Returns the typed error that ended the pass. See [`SyncError`].
    pub fn run(&self) -> SyncResult<SyncReport> {
        let Some(_guard) = self.running.try_lock() else {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: format!("{:?}", SyncState::ComputingLocalChanges),
            });
        };
        self.cancelled.store(false, Ordering::SeqCst);

        let start = Instant::now();
        match self.run_pass() {
            Ok(mut report) => {
                report.duration = start.elapsed();
                self.set_state(SyncState::Completed);
                {
                    let mut stats = self.stats.write();
                    stats.passes_completed += 1;
                    stats.records_pushed += report.records_pushed as u64;
                    stats.records_pulled += report.records_applied as u64;
                    stats.conflicts_resolved += report.conflicts_resolved as u64;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    zone = %self.config.zone,
                    pushed = report.records_pushed,
                    applied = report.records_applied,
                    pages = report.pages_pulled,
                    conflicts = report.conflicts_resolved,
                    "sync pass completed"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_state(SyncState::Failed);
                {
                    let mut stats = self.stats.write();
                    stats.passes_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                warn!(zone = %self.config.zone, error = %err, "sync pass failed");
                Err(err)
            }
        }
    }

    /// Runs one pass and hands its outcome to `completion`, exactly once.
    pub fn run_with_completion<F>(&self, completion: F)
    where
        F: FnOnce(SyncResult<SyncReport>),
    {
        completion(self.run());
    }

    fn tracked_entities(&self) -> Vec<String> {
        match &self.config.entities {
            Some(entities) => entities.clone(),
            None => self
                .store
                .catalog()
                .entity_names()
                .map(str::to_string)
                .collect(),
        }
    }

    /// The conflict retry pushes only the resolved records; records saved by
    /// the first push are not sent again.
    fn run_pass(&self) -> SyncResult<SyncReport> {
        self.config.validate()?;
        let policy = self.config.conflict_policy;
        if !policy.is_supported() {
            return Err(SyncError::UnsupportedPolicy(format!("{policy:?}")));
        }
        if policy.needs_callback() && self.callback.is_none() {
            return Err(SyncError::InvalidConfig(format!(
                "{policy:?} needs a resolution callback"
            )));
        }

        let zone = &self.config.zone;
        let entities = self.tracked_entities();
        let mut report = SyncReport::default();

        // Phase 0: local delta
        self.set_state(SyncState::ComputingLocalChanges);
        let start_token = self
            .tokens
            .load(zone)
            .map_err(|e| SyncError::LocalFetch(StoreError::Storage(e)))?;
        let changes = LocalChangeSet::compute(&self.store, &entities)?;
        let upserts = self.translate(&changes)?;

        // Phase A: push, resolve once, retry once
        self.set_state(SyncState::Pushing);
        let mut pushed = self.push_batched(&upserts, &changes.tombstones)?;

        if pushed.has_conflicts() {
            self.set_state(SyncState::ResolvingConflicts);
            let conflicted: Vec<RecordId> = pushed
                .conflicted
                .drain(..)
                .map(|r| r.record_id)
                .collect();
            let clients: Vec<RemoteRecord> = upserts
                .iter()
                .filter(|r| conflicted.contains(&r.record_id))
                .cloned()
                .collect();
            info!(zone = %zone, conflicts = clients.len(), "resolving push conflicts");

            self.check_cancelled()?;
            let pairs = fetch_conflict_pairs(&self.remote, zone, clients.clone())?;
            let resolved = ConflictResolver::new(policy)
                .with_callback(self.callback.clone())
                .resolve(pairs)?;
            report.conflicts_resolved = clients.len();

            self.set_state(SyncState::PushingRetry);
            let retry = self.push_batched(&resolved, &[])?;
            if retry.has_conflicts() {
                let still: Vec<RecordId> =
                    retry.conflicted.iter().map(|r| r.record_id.clone()).collect();
                return Err(SyncError::ConflictsDetected {
                    records: clients
                        .into_iter()
                        .filter(|r| still.contains(&r.record_id))
                        .collect(),
                });
            }
            pushed.merge(retry);
        }
        report.records_pushed = pushed.saved.len();
        report.records_deleted_remotely = pushed.deleted.len();

        let mut applier = LocalApplier::new(&self.store, &entities);
        applier.acknowledge(&pushed, &changes.upserts)?;
        applier.purge_tombstones(&changes.superseded_tombstones);

        // Phase B: pull every page
        self.set_state(SyncState::PullingAndApplying);
        let (remote_changes, end_token, pages) = self.pull_all(start_token.as_ref())?;
        report.pages_pulled = pages;

        // Phase C: apply and commit once
        applier.apply(&remote_changes)?;
        self.check_cancelled()?;
        let applied = applier.commit()?;
        report.records_applied = applied.records_upserted;
        report.records_deleted_locally = applied.records_deleted;
        report.tombstones_purged = applied.tombstones_purged;
        report.unresolved_references = applied.unresolved_references;
        report.local_edits_kept = applied.local_edits_kept;

        if let Some(token) = end_token.filter(|t| Some(t) != start_token.as_ref()) {
            self.tokens.save(zone, &token)?;
            report.token_advanced = true;
        }
        Ok(report)
    }

    fn translate(&self, changes: &LocalChangeSet) -> SyncResult<Vec<RemoteRecord>> {
        let catalog = self.store.catalog();
        let translator = RecordTranslator::new(&self.config.zone);
        changes
            .upserts
            .iter()
            .map(|record| {
                let entity = catalog
                    .entity(&record.entity)
                    .ok_or_else(|| SyncError::LocalFetch(StoreError::unknown_entity(&record.entity)))?;
                translator
                    .to_remote(record, entity)
                    .map_err(|e| SyncError::LocalFetch(e.into()))
            })
            .collect()
    }

    /// Pushes in chunks of at most `push_batch_size` records. Makes no
    /// remote call when there is nothing to push.
    fn push_batched(&self, upserts: &[RemoteRecord], deletes: &[RecordId]) -> SyncResult<PushResult> {
        let size = self.config.push_batch_size;
        let mut result = PushResult::default();
        let (mut upserts, mut deletes) = (upserts, deletes);

        while !upserts.is_empty() || !deletes.is_empty() {
            self.check_cancelled()?;
            let (up_now, up_rest) = upserts.split_at(upserts.len().min(size));
            let room = size - up_now.len();
            let (del_now, del_rest) = deletes.split_at(deletes.len().min(room));

            let part = self
                .remote
                .push(&self.config.zone, up_now, del_now)
                .map_err(SyncError::RemoteModify)?;
            debug!(
                saved = part.saved.len(),
                deleted = part.deleted.len(),
                conflicted = part.conflicted.len(),
                "push batch"
            );
            result.merge(part);
            upserts = up_rest;
            deletes = del_rest;
        }
        Ok(result)
    }

    fn pull_all(
        &self,
        start: Option<&ChangeToken>,
    ) -> SyncResult<(RemoteChanges, Option<ChangeToken>, usize)> {
        let mut changes = RemoteChanges::new();
        let mut token = start.cloned();
        let mut pages = 0usize;

        loop {
            self.check_cancelled()?;
            let page = self
                .remote
                .pull_page(&self.config.zone, token.as_ref())
                .map_err(SyncError::RemoteFetch)?;
            pages += 1;
            debug!(
                page = pages,
                upserted = page.upserted.len(),
                deleted = page.deleted.len(),
                more = page.more_coming,
                "pulled page"
            );

            let more = page.more_coming;
            token = Some(page.next_token.clone());
            changes.absorb(page);
            if !more {
                break;
            }
            if let Some(max) = self.config.max_pull_pages {
                if pages >= max as usize {
                    return Err(SyncError::RemoteFetch(RemoteError::Server(format!(
                        "change stream still has more after {max} pages"
                    ))));
                }
            }
        }
        Ok((changes, token, pages))
    }
}

impl<S: LocalStore, R: RemoteSyncClient, T: TokenStore> std::fmt::Debug for SyncOperation<S, R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOperation")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemote;
    use crate::token::MemoryTokenStore;
    use zonesync_protocol::{ConflictPolicy, FieldValue, ZoneId};
    use zonesync_store::{Catalog, EntityDescription, LocalRecord, MemoryStore, WriteBatch};

    type TestOp = SyncOperation<Arc<MemoryStore>, Arc<MemoryRemote>, MemoryTokenStore>;

    fn catalog() -> Catalog {
        Catalog::new().with_entity(EntityDescription::new("Note"))
    }

    fn setup(config: SyncConfig) -> (Arc<MemoryStore>, Arc<MemoryRemote>, TestOp) {
        let store = Arc::new(MemoryStore::new(catalog()));
        let remote = Arc::new(MemoryRemote::new());
        let op = SyncOperation::new(
            config,
            Arc::clone(&store),
            Arc::clone(&remote),
            MemoryTokenStore::new(),
        );
        (store, remote, op)
    }

    fn insert_notes(store: &MemoryStore, ids: &[&str]) {
        let mut batch = WriteBatch::new();
        for id in ids {
            batch.insert_local(LocalRecord::new("Note", RecordId::new(*id)).with_field("title", *id));
        }
        store.commit(batch).unwrap();
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Completed.can_start_sync());
        assert!(SyncState::Failed.can_start_sync());
        assert!(!SyncState::Pushing.can_start_sync());
        assert!(!SyncState::PullingAndApplying.can_start_sync());

        assert!(SyncState::ResolvingConflicts.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(SyncState::Failed.is_terminal());
        assert!(!SyncState::Idle.is_terminal());
    }

    #[test]
    fn initial_state() {
        let (_, _, op) = setup(SyncConfig::new("z"));
        assert_eq!(op.state(), SyncState::Idle);
        assert_eq!(op.stats().passes_completed, 0);
    }

    #[test]
    fn successful_pass() {
        let (store, remote, op) = setup(SyncConfig::new("z"));
        insert_notes(&store, &["a", "b"]);

        let report = op.run().unwrap();
        assert_eq!(op.state(), SyncState::Completed);
        assert_eq!(report.records_pushed, 2);
        assert!(report.token_advanced);
        assert_eq!(remote.records(&ZoneId::new("z")).len(), 2);
        assert!(store.fetch_dirty("Note").unwrap().is_empty());
        assert_eq!(
            op.tokens().load(&ZoneId::new("z")).unwrap(),
            Some(remote.current_token(&ZoneId::new("z")))
        );

        let stats = op.stats();
        assert_eq!(stats.passes_completed, 1);
        assert_eq!(stats.records_pushed, 2);
        assert!(stats.last_sync_time.is_some());
    }

    #[test]
    fn nothing_to_push_skips_push() {
        let (_, remote, op) = setup(SyncConfig::new("z"));
        op.run().unwrap();
        assert_eq!(remote.push_calls(), 0);
        assert_eq!(remote.pull_calls(), 1);
    }

    #[test]
    fn pushes_in_batches() {
        let (store, remote, op) = setup(SyncConfig::new("z").with_push_batch_size(2));
        insert_notes(&store, &["a", "b", "c", "d", "e"]);

        let mut batch = WriteBatch::new();
        batch.delete_local("Note", RecordId::new("gone"));
        store.commit(batch).unwrap();

        let report = op.run().unwrap();
        assert_eq!(report.records_pushed, 5);
        assert_eq!(report.records_deleted_remotely, 1);
        assert_eq!(remote.push_calls(), 3);
    }

    #[test]
    fn keep_both_fails_before_any_remote_call() {
        let (store, remote, op) =
            setup(SyncConfig::new("z").with_conflict_policy(ConflictPolicy::KeepBoth));
        insert_notes(&store, &["a"]);

        let err = op.run().unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedPolicy(_)));
        assert_eq!(remote.push_calls(), 0);
        assert_eq!(remote.pull_calls(), 0);
        assert_eq!(op.state(), SyncState::Failed);
        assert_eq!(op.stats().passes_failed, 1);
    }

    #[test]
    fn client_decides_needs_callback() {
        let (_, _, op) =
            setup(SyncConfig::new("z").with_conflict_policy(ConflictPolicy::ClientDecides));
        assert!(matches!(op.run(), Err(SyncError::InvalidConfig(_))));

        let (_, _, op) =
            setup(SyncConfig::new("z").with_conflict_policy(ConflictPolicy::ClientDecides));
        let op = op.with_resolution_callback(|_, server| server.clone());
        assert!(op.run().is_ok());
    }

    #[test]
    fn push_failure_leaves_store_untouched() {
        let (store, remote, op) = setup(SyncConfig::new("z"));
        insert_notes(&store, &["a"]);
        remote.fail_next_push(RemoteError::transport_retryable("offline"));

        let err = op.run().unwrap_err();
        assert!(matches!(err, SyncError::RemoteModify(_)));
        assert!(err.is_retryable());
        assert_eq!(store.fetch_dirty("Note").unwrap().len(), 1);
        assert_eq!(remote.pull_calls(), 0);
    }

    #[test]
    fn pull_failure_keeps_token() {
        let (store, remote, op) = setup(SyncConfig::new("z"));
        insert_notes(&store, &["a"]);
        remote.fail_next_pull(RemoteError::Server("busy".into()));

        let err = op.run().unwrap_err();
        assert!(matches!(err, SyncError::RemoteFetch(_)));
        assert_eq!(op.tokens().load(&ZoneId::new("z")).unwrap(), None);
        // The push landed remotely but nothing was committed locally
        assert_eq!(store.fetch_dirty("Note").unwrap().len(), 1);
    }

    #[test]
    fn page_cap_aborts_runaway_pulls() {
        let store = Arc::new(MemoryStore::new(catalog()));
        let remote = Arc::new(MemoryRemote::new().with_page_size(1));
        let zone = ZoneId::new("z");
        for id in ["a", "b", "c"] {
            let mut record = RemoteRecord::new(RecordId::new(id), "Note");
            record.set_field("title", FieldValue::from(id));
            remote.server_save(&zone, record);
        }

        let op = SyncOperation::new(
            SyncConfig::new("z").with_max_pull_pages(2),
            Arc::clone(&store),
            Arc::clone(&remote),
            MemoryTokenStore::new(),
        );
        assert!(matches!(op.run(), Err(SyncError::RemoteFetch(_))));
        assert_eq!(store.record_count(), 0);

        let op = SyncOperation::new(
            SyncConfig::new("z").with_max_pull_pages(3),
            Arc::clone(&store),
            remote,
            MemoryTokenStore::new(),
        );
        let report = op.run().unwrap();
        assert_eq!(report.pages_pulled, 3);
        assert_eq!(store.record_count(), 3);
    }

    #[test]
    fn run_with_completion_reports_once() {
        let (store, _, op) = setup(SyncConfig::new("z"));
        insert_notes(&store, &["a"]);

        let mut outcomes = Vec::new();
        op.run_with_completion(|result| outcomes.push(result.map(|r| r.records_pushed)));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Ok(1)));
    }
}
