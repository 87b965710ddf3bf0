//! Sync coordinator.
//!
//! Replays the offline change queue against the remote store in enqueue
//! order, reconciles temporary ids and versions, resolves stale updates with
//! the configured [`ConflictStrategy`], then refreshes the cache from the
//! authoritative note list.

mod conflict;
mod retry;

pub use conflict::{choose, is_stale, ConflictStrategy, Winner};
pub use retry::RetryPolicy;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::{ChangeResolution, LocalNoteStore};
use crate::error::{Error, Result};
use crate::models::{ChangeKind, NewSyncConflict, Note, NoteChange, NoteId, QueuedChange, SyncState};
use crate::remote::{RemoteError, RemoteNoteStore, RemoteResult};
use crate::state::{SyncPhase, SyncStatus};

/// Tunables for a [`SyncCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub strategy: ConflictStrategy,
    pub retry: RetryPolicy,
    /// Upper bound for a single remote call
    pub request_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Counters for one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Changes acknowledged by the remote
    pub synced: usize,
    /// Changes flagged `conflict` (stale, rejected, or out of retries)
    pub conflicts: usize,
    /// Changes left queued after a transient failure
    pub retried: usize,
    /// Changes held back behind an earlier failure for the same note
    pub skipped: usize,
    /// Changes that ran out of retries (also counted in `conflicts`)
    pub dead_lettered: usize,
    /// Queue passes, more than one when triggers were coalesced
    pub passes: usize,
}

impl SyncReport {
    fn absorb(&mut self, other: Self) {
        self.synced += other.synced;
        self.conflicts += other.conflicts;
        self.retried += other.retried;
        self.skipped += other.skipped;
        self.dead_lettered += other.dead_lettered;
        self.passes += other.passes;
    }

    /// Whether queued work was left behind by transient failures
    pub const fn needs_retry(&self) -> bool {
        self.retried > 0 || self.skipped > 0
    }
}

/// Result of asking the coordinator to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// This call ran the queue
    Completed(SyncReport),
    /// Another run was in progress; it will make one more pass
    Coalesced,
}

impl SyncOutcome {
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Coalesced => None,
        }
    }
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

/// Bookkeeping for one pass over the queue snapshot.
struct Pass {
    report: SyncReport,
    /// Temporary id -> server id, for creates acknowledged in this pass
    aliases: HashMap<NoteId, NoteId>,
    /// Latest acknowledged server version per note
    versions: HashMap<NoteId, i64>,
    /// Notes with an unacknowledged earlier change
    blocked: HashSet<NoteId>,
    remote: HashMap<NoteId, Note>,
    /// Most recent reason a change was left unsynced
    last_failure: Option<String>,
}

impl Pass {
    fn new(remote_notes: &[Note]) -> Self {
        Self {
            report: SyncReport {
                passes: 1,
                ..SyncReport::default()
            },
            aliases: HashMap::new(),
            versions: HashMap::new(),
            blocked: HashSet::new(),
            remote: remote_notes
                .iter()
                .map(|note| (note.id.clone(), note.clone()))
                .collect(),
            last_failure: None,
        }
    }

    /// Summary for [`SyncStatus::error`] when changes were left unsynced
    fn failure_summary(&self) -> Option<String> {
        let unsynced = self.report.conflicts + self.report.retried + self.report.skipped;
        if unsynced == 0 {
            return None;
        }
        let reason = self.last_failure.as_deref().unwrap_or("held back");
        Some(format!("{unsynced} changes not synced (last: {reason})"))
    }

    /// Mirror what the cache did to later queue entries when an earlier one
    /// was acknowledged.
    fn rebase(&self, change: &mut NoteChange) {
        if let Some(server_id) = self.aliases.get(&change.note.id) {
            change.note.id = server_id.clone();
        }
        if let Some(version) = self.versions.get(&change.note.id) {
            change.note.version = *version;
        }
    }

    fn acknowledge(&mut self, note: &Note) {
        self.versions.insert(note.id.clone(), note.version);
        self.remote.insert(note.id.clone(), note.clone());
    }
}

/// Orchestrates queue replay, conflict handling and status reporting.
///
/// At most one run is active at a time; overlapping triggers are coalesced
/// into one extra pass of the running sync.
pub struct SyncCoordinator<R, L> {
    remote: Arc<R>,
    store: Arc<L>,
    options: SyncOptions,
    status: watch::Sender<SyncStatus>,
    running: AtomicBool,
    rerun: AtomicBool,
    cancel: Mutex<CancellationToken>,
    wake: Notify,
    idle: Notify,
}

impl<R: RemoteNoteStore, L: LocalNoteStore> SyncCoordinator<R, L> {
    pub fn new(remote: Arc<R>, store: Arc<L>, options: SyncOptions) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            remote,
            store,
            options,
            status,
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            wake: Notify::new(),
            idle: Notify::new(),
        }
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn store(&self) -> &Arc<L> {
        &self.store
    }

    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Current status snapshot
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receive every status change
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Re-read the queue length into the published status
    pub fn refresh_pending(&self) -> Result<usize> {
        let pending = self.store.pending_change_count()?;
        self.status
            .send_modify(|status| status.pending_changes = pending);
        Ok(pending)
    }

    /// Wake the background loop (e.g. on reconnect or a local mutation)
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Abort the in-flight run at its next remote call or queue entry
    pub fn cancel(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Cancel any run, wait for it to stop, then wipe the local cache
    pub async fn sign_out(&self) -> Result<()> {
        self.cancel();
        loop {
            let idle = self.idle.notified();
            if !self.is_running() {
                break;
            }
            idle.await;
        }

        self.store.clear_storage()?;
        self.status.send_replace(SyncStatus::default());
        info!("Signed out; local cache cleared");
        Ok(())
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run a remote call under the request timeout and the current run token
    pub(crate) async fn call<T>(
        &self,
        future: impl Future<Output = RemoteResult<T>>,
    ) -> Result<T> {
        let token = self.token();
        self.call_with(&token, future).await
    }

    async fn call_with<T>(
        &self,
        token: &CancellationToken,
        future: impl Future<Output = RemoteResult<T>>,
    ) -> Result<T> {
        let timeout = self.options.request_timeout;
        tokio::select! {
            () = token.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, future) => match outcome {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Remote(RemoteError::Timeout(timeout))),
            },
        }
    }

    /// Replay the queue, then refresh the cache from the remote.
    ///
    /// Returns [`SyncOutcome::Coalesced`] without doing anything when a run
    /// is already active; that run makes one more pass before finishing.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let mut report: Option<SyncReport> = None;
        loop {
            // Raised before the check so a finishing run cannot miss it
            self.rerun.store(true, Ordering::SeqCst);
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                if report.is_none() {
                    debug!("Sync already running; trigger coalesced");
                }
                break;
            }

            let token = self.token();
            let passes = {
                let _guard = RunGuard {
                    running: &self.running,
                    idle: &self.idle,
                };
                self.rerun.store(false, Ordering::SeqCst);
                self.run_passes(&token).await?
            };
            report.get_or_insert_with(SyncReport::default).absorb(passes);

            // A trigger can land between the last check and the guard drop
            if token.is_cancelled() || !self.rerun.load(Ordering::SeqCst) {
                break;
            }
            debug!("Picking up a trigger that arrived while finishing");
        }

        let Some(report) = report else {
            return Ok(SyncOutcome::Coalesced);
        };
        info!(
            "Sync finished: {} synced, {} conflicts, {} retrying",
            report.synced, report.conflicts, report.retried
        );
        Ok(SyncOutcome::Completed(report))
    }

    async fn run_passes(&self, token: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        loop {
            match self.run_pass(token).await {
                Ok(pass) => report.absorb(pass),
                Err(error) => return Err(self.fail(error)),
            }
            if !self.rerun.swap(false, Ordering::SeqCst) {
                return Ok(report);
            }
            debug!("Running coalesced sync pass");
        }
    }

    fn fail(&self, error: Error) -> Error {
        if matches!(error, Error::Cancelled) {
            info!("Sync cancelled");
            self.status.send_modify(|status| status.phase = SyncPhase::Idle);
        } else {
            warn!("Sync failed: {error}");
            let message = error.to_string();
            self.status.send_modify(|status| {
                status.phase = SyncPhase::Error;
                status.error = Some(message);
            });
        }
        error
    }

    async fn run_pass(&self, token: &CancellationToken) -> Result<SyncReport> {
        // Entries enqueued after this point wait for the next pass
        let queued = self.store.get_pending_changes()?;
        self.status.send_modify(|status| {
            status.phase = SyncPhase::Syncing;
            status.pending_changes = queued.len();
            status.error = None;
        });
        debug!("Sync pass over {} queued changes", queued.len());

        let remote_notes = self.call_with(token, self.remote.get_notes()).await?;
        let mut pass = Pass::new(&remote_notes);

        for entry in &queued {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut change = entry.change.clone();
            pass.rebase(&mut change);
            if pass.blocked.contains(&change.note.id) {
                debug!(
                    "Holding back {} of {} behind an earlier failure",
                    change.kind, change.note.id
                );
                pass.report.skipped += 1;
                continue;
            }

            match self.replay(token, &change, &pass).await {
                Ok(resolution) => self.settle(entry.seq, &change, &resolution, &mut pass)?,
                Err(Error::Remote(error)) => self.absorb_failure(entry, &change, error, &mut pass)?,
                Err(error) => return Err(error),
            }
        }

        let snapshot = if queued.is_empty() {
            Some(remote_notes)
        } else {
            match self.call_with(token, self.remote.get_notes()).await {
                Ok(notes) => Some(notes),
                Err(Error::Remote(error)) => {
                    warn!("Skipping post-sync refresh: {error}");
                    None
                }
                Err(error) => return Err(error),
            }
        };
        if let Some(notes) = snapshot {
            self.store.apply_remote_snapshot(&notes)?;
        }

        let pending = self.store.pending_change_count()?;
        let failure = pass.failure_summary();
        self.status.send_modify(|status| {
            status.phase = SyncPhase::Idle;
            status.last_synced = Some(Utc::now());
            status.pending_changes = pending;
            status.error = failure;
        });
        Ok(pass.report)
    }

    async fn replay(
        &self,
        token: &CancellationToken,
        change: &NoteChange,
        pass: &Pass,
    ) -> Result<ChangeResolution> {
        let id = &change.note.id;
        match change.kind {
            ChangeKind::Create => {
                let created = self
                    .call_with(token, self.remote.create_note(&change.note))
                    .await?;
                debug!("Created {} remotely as {}", id, created.id);
                Ok(ChangeResolution::Replaced {
                    temp_id: id.clone(),
                    note: created,
                })
            }
            ChangeKind::Update => {
                let Some(remote) = pass.remote.get(id) else {
                    return Ok(self.flagged(
                        change,
                        None,
                        format!("note {id} no longer exists remotely"),
                    ));
                };
                if is_stale(&change.note, remote) {
                    return self.resolve_stale(token, change, remote).await;
                }
                let updated = self
                    .call_with(token, self.remote.update_note(&change.note))
                    .await?;
                Ok(ChangeResolution::Stored(updated))
            }
            ChangeKind::Delete => match self.call_with(token, self.remote.delete_note(id)).await {
                // Already gone counts as done
                Ok(()) | Err(Error::Remote(RemoteError::NotFound(_))) => {
                    Ok(ChangeResolution::Removed(id.clone()))
                }
                Err(error) => Err(error),
            },
        }
    }

    async fn resolve_stale(
        &self,
        token: &CancellationToken,
        change: &NoteChange,
        remote: &Note,
    ) -> Result<ChangeResolution> {
        let strategy = self.options.strategy;
        info!(
            "Conflict on {}: queued version {}, remote version {} ({strategy} wins)",
            change.note.id, change.note.version, remote.version
        );

        if strategy == ConflictStrategy::Manual {
            return Ok(self.flagged(
                change,
                Some(remote.version),
                "remote version is ahead; waiting for manual resolution".to_string(),
            ));
        }

        match choose(&change.note, remote, strategy)? {
            Winner::Local(winner) => {
                let pushed = self
                    .call_with(token, self.remote.update_note(&winner))
                    .await?;
                self.store
                    .record_conflict(&self.conflict_record(
                        change,
                        Some(remote.version),
                        "local edit replaced a newer remote version".to_string(),
                    ))?;
                Ok(ChangeResolution::Stored(pushed))
            }
            Winner::Remote(_) => Ok(self.flagged(
                change,
                Some(remote.version),
                "remote version is ahead; local edit kept for review".to_string(),
            )),
        }
    }

    fn conflict_record(
        &self,
        change: &NoteChange,
        remote_version: Option<i64>,
        reason: String,
    ) -> NewSyncConflict {
        NewSyncConflict {
            note_id: change.note.id.to_string(),
            local_version: change.note.version,
            remote_version,
            strategy: self.options.strategy.as_str().to_string(),
            reason,
        }
    }

    fn flagged(
        &self,
        change: &NoteChange,
        remote_version: Option<i64>,
        reason: String,
    ) -> ChangeResolution {
        ChangeResolution::Flagged {
            id: change.note.id.clone(),
            conflict: self.conflict_record(change, remote_version, reason),
        }
    }

    fn settle(
        &self,
        seq: i64,
        change: &NoteChange,
        resolution: &ChangeResolution,
        pass: &mut Pass,
    ) -> Result<()> {
        self.store.complete_change(seq, resolution)?;

        match resolution {
            ChangeResolution::Stored(note) => {
                pass.acknowledge(note);
                pass.report.synced += 1;
            }
            ChangeResolution::Replaced { temp_id, note } => {
                pass.aliases.insert(temp_id.clone(), note.id.clone());
                pass.acknowledge(note);
                pass.report.synced += 1;
            }
            ChangeResolution::Removed(id) => {
                pass.remote.remove(id);
                pass.report.synced += 1;
            }
            ChangeResolution::Flagged { conflict, .. } => {
                warn!(
                    "Flagged {} of {}: {}",
                    change.kind, change.note.id, conflict.reason
                );
                pass.last_failure = Some(conflict.reason.clone());
                pass.report.conflicts += 1;
            }
        }
        Ok(())
    }

    fn absorb_failure(
        &self,
        entry: &QueuedChange,
        change: &NoteChange,
        error: RemoteError,
        pass: &mut Pass,
    ) -> Result<()> {
        if matches!(error, RemoteError::NotAuthenticated) {
            return Err(Error::Remote(error));
        }

        if !error.is_retryable() {
            let resolution = self.flagged(change, None, error.to_string());
            return self.settle(entry.seq, change, &resolution, pass);
        }

        // Later changes to this note must not overtake the failed one
        pass.blocked.insert(change.note.id.clone());

        let attempts = self
            .store
            .record_failed_attempt(entry.seq, &error.to_string())?;
        if self.options.retry.exhausted(attempts) {
            let resolution = self.flagged(
                change,
                None,
                format!("retries exhausted after {attempts} attempts: {error}"),
            );
            pass.report.dead_lettered += 1;
            return self.settle(entry.seq, change, &resolution, pass);
        }

        debug!(
            "{} of {} failed (attempt {attempts}): {error}",
            change.kind, change.note.id
        );
        pass.last_failure = Some(error.to_string());
        pass.report.retried += 1;
        Ok(())
    }

    /// Resolve a conflicted note on request.
    ///
    /// `Server` adopts the remote copy as-is; it is already authoritative, so
    /// nothing is pushed back with `update_note`. `Client` pushes the given
    /// content on top of the remote version. Either way the note ends up
    /// `synced` and the resolution is logged. `Manual` is rejected.
    pub async fn resolve_conflict(&self, note: &Note, strategy: ConflictStrategy) -> Result<Note> {
        if strategy == ConflictStrategy::Manual {
            return Err(Error::UnsupportedStrategy(strategy.to_string()));
        }

        let token = self.token();
        let remote = self
            .call_with(&token, self.remote.get_notes())
            .await?
            .into_iter()
            .find(|candidate| candidate.id == note.id)
            .ok_or_else(|| Error::NotFound(format!("{} on remote", note.id)))?;

        let resolved = match choose(note, &remote, strategy)? {
            Winner::Remote(server_copy) => server_copy,
            Winner::Local(winner) => {
                self.call_with(&token, self.remote.update_note(&winner))
                    .await?
            }
        };

        let stored = self
            .store
            .save_note(&resolved.with_status(SyncState::Synced))?;
        self.store.record_conflict(&NewSyncConflict {
            note_id: note.id.to_string(),
            local_version: note.version,
            remote_version: Some(remote.version),
            strategy: strategy.as_str().to_string(),
            reason: "resolved on request".to_string(),
        })?;
        info!("Resolved conflict on {} ({strategy} wins)", note.id);
        Ok(stored)
    }

    /// Sync every `interval`, or sooner when [`trigger`](Self::trigger) is
    /// called, until `shutdown` is cancelled.
    ///
    /// Failed runs, and runs that leave changes behind, back off
    /// exponentially per the retry policy.
    pub fn spawn_background(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        R: 'static,
        L: 'static,
    {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff: Option<Duration> = None;
            info!("Background sync every {:?}", interval);

            loop {
                let delay = backoff.unwrap_or(interval);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = coordinator.wake.notified() => debug!("Sync triggered"),
                    () = tokio::time::sleep(delay) => {}
                }

                backoff = match coordinator.sync().await {
                    Ok(SyncOutcome::Completed(report)) if report.needs_retry() => {
                        Some(coordinator.options.retry.next_delay(backoff))
                    }
                    Ok(_) | Err(Error::Cancelled) => None,
                    Err(error) => {
                        let next = coordinator.options.retry.next_delay(backoff);
                        warn!("Background sync failed: {error}; retrying in {next:?}");
                        Some(next)
                    }
                };
            }

            debug!("Background sync stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteNoteStore;
    use crate::models::NewNote;
    use crate::remote::{InMemoryNoteStore, RemoteOp};
    use pretty_assertions::assert_eq;

    type Coordinator = SyncCoordinator<InMemoryNoteStore, SqliteNoteStore>;

    fn setup(strategy: ConflictStrategy) -> (InMemoryNoteStore, Arc<SqliteNoteStore>, Coordinator) {
        let remote = InMemoryNoteStore::new("alice");
        let store = Arc::new(SqliteNoteStore::open_in_memory().unwrap());
        let options = SyncOptions {
            strategy,
            retry: RetryPolicy::test(),
            request_timeout: Duration::from_millis(200),
        };
        let coordinator =
            SyncCoordinator::new(Arc::new(remote.clone()), Arc::clone(&store), options);
        (remote, store, coordinator)
    }

    fn queue_offline_create(store: &SqliteNoteStore, content: &str) -> Note {
        let note = Note::from_draft(&NewNote::new(content, 40.71, -74.0));
        store.stage_change(&NoteChange::create(note.clone())).unwrap();
        note
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        *outcome.report().expect("sync should have run")
    }

    #[tokio::test]
    async fn test_create_then_update_replays_in_order() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        let mut note = queue_offline_create(&store, "first draft");
        note.content = "second draft".to_string();
        store.stage_change(&NoteChange::update(note.clone())).unwrap();

        let report = completed(coordinator.sync().await.unwrap());

        assert_eq!(report.synced, 2);
        assert_eq!(
            remote.calls(),
            vec![RemoteOp::List, RemoteOp::Create, RemoteOp::Update, RemoteOp::List]
        );
        let server = remote.notes();
        assert_eq!(server.len(), 1);
        assert_eq!(server[0].content, "second draft");
        assert_eq!(server[0].version, 2);

        let local = store.get_local_notes().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, server[0].id);
        assert_eq!(local[0].sync_status, Some(SyncState::Synced));
        assert_eq!(store.pending_change_count().unwrap(), 0);
        assert_eq!(coordinator.status().phase, SyncPhase::Idle);
        assert!(coordinator.status().last_synced.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_change_queued() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "retry me");
        remote.on_call({
            let remote = remote.clone();
            move |op| {
                if op == RemoteOp::Create {
                    remote.fail_next(RemoteError::Transient("connection reset".to_string()));
                }
            }
        });

        let report = completed(coordinator.sync().await.unwrap());

        assert_eq!(report.retried, 1);
        let queued = store.get_pending_changes().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attempts, 1);
        assert_eq!(
            store.get_local_notes().unwrap()[0].sync_status,
            Some(SyncState::Pending)
        );
        let status = coordinator.status();
        assert_eq!(status.pending_changes, 1);
        assert_eq!(status.phase, SyncPhase::Idle);
        let error = status.error.unwrap();
        assert!(error.starts_with("1 changes not synced"));
        assert!(error.contains("connection reset"));

        // A clean run clears it again
        remote.on_call(|_| {});
        completed(coordinator.sync().await.unwrap());
        assert_eq!(coordinator.status().error, None);
    }

    #[tokio::test]
    async fn test_offline_run_consumes_no_attempts() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "offline");
        remote.set_offline(true);

        let error = coordinator.sync().await.unwrap_err();

        assert!(matches!(error, Error::Remote(RemoteError::Transient(_))));
        assert_eq!(store.get_pending_changes().unwrap()[0].attempts, 0);
        let status = coordinator.status();
        assert_eq!(status.phase, SyncPhase::Error);
        assert!(status.error.is_some());
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        let note = queue_offline_create(&store, "never lands");
        remote.on_call({
            let remote = remote.clone();
            move |op| {
                if op == RemoteOp::Create {
                    remote.fail_next(RemoteError::Transient("502".to_string()));
                }
            }
        });

        for _ in 0..2 {
            coordinator.sync().await.unwrap();
        }
        let report = completed(coordinator.sync().await.unwrap());

        assert_eq!(report.dead_lettered, 1);
        assert_eq!(store.pending_change_count().unwrap(), 0);
        let cached = store.get_note(&note.id).unwrap().unwrap();
        assert_eq!(cached.sync_status, Some(SyncState::Conflict));
        let conflicts = store.list_conflicts(5).unwrap();
        assert!(conflicts[0].reason.contains("retries exhausted"));
    }

    #[tokio::test]
    async fn test_later_changes_wait_behind_failed_one() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        let mut note = queue_offline_create(&store, "one");
        note.content = "two".to_string();
        store.stage_change(&NoteChange::update(note)).unwrap();
        remote.on_call({
            let remote = remote.clone();
            move |op| {
                if op == RemoteOp::Create {
                    remote.fail_next(RemoteError::Timeout(Duration::from_secs(1)));
                }
            }
        });

        let report = completed(coordinator.sync().await.unwrap());

        assert_eq!(report.retried, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(remote.call_count(RemoteOp::Update), 0);
        assert_eq!(store.pending_change_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_not_authenticated_stops_run() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "who am i");
        remote.set_principal(None);

        let error = coordinator.sync().await.unwrap_err();

        assert!(matches!(error, Error::Remote(RemoteError::NotAuthenticated)));
        assert_eq!(store.pending_change_count().unwrap(), 1);
        assert_eq!(coordinator.status().phase, SyncPhase::Error);
    }

    #[tokio::test]
    async fn test_slow_remote_times_out_as_transient() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "slow");
        remote.set_latency(Some(Duration::from_secs(5)));

        let error = coordinator.sync().await.unwrap_err();

        assert!(matches!(error, Error::Remote(RemoteError::Timeout(_))));
        assert_eq!(store.pending_change_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_client_strategy_overwrites_newer_remote() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Client);
        let mut server_copy = Note::from_draft(&NewNote::new("remote edit", 1.0, 1.0));
        server_copy.id = NoteId::new("n1");
        server_copy.user_id = Some("alice".to_string());
        server_copy.version = 2;
        remote.insert(server_copy.clone());

        let mut local = server_copy.clone();
        local.version = 1;
        local.content = "local edit".to_string();
        store.stage_change(&NoteChange::update(local)).unwrap();

        let report = completed(coordinator.sync().await.unwrap());

        assert_eq!(report.synced, 1);
        let pushed = remote.get(&NoteId::new("n1")).unwrap();
        assert_eq!(pushed.content, "local edit");
        assert_eq!(pushed.version, 3);
        let cached = store.get_note(&NoteId::new("n1")).unwrap().unwrap();
        assert_eq!(cached.sync_status, Some(SyncState::Synced));
        assert_eq!(store.list_conflicts(5).unwrap()[0].strategy, "client");
    }

    #[tokio::test]
    async fn test_manual_strategy_flags_and_rejects_resolution() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Manual);
        let mut server_copy = Note::from_draft(&NewNote::new("remote edit", 1.0, 1.0));
        server_copy.id = NoteId::new("n1");
        server_copy.version = 4;
        remote.insert(server_copy.clone());
        let mut local = server_copy.clone();
        local.version = 2;
        store.stage_change(&NoteChange::update(local.clone())).unwrap();

        let report = completed(coordinator.sync().await.unwrap());
        assert_eq!(report.conflicts, 1);

        let result = coordinator
            .resolve_conflict(&local, ConflictStrategy::Manual)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedStrategy(_))));
    }

    #[tokio::test]
    async fn test_resolve_conflict_with_server_copy() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        let mut server_copy = Note::from_draft(&NewNote::new("remote edit", 1.0, 1.0));
        server_copy.id = NoteId::new("n1");
        server_copy.version = 3;
        remote.insert(server_copy.clone());
        let mut local = server_copy.clone();
        local.content = "mine".to_string();
        local.version = 1;
        store
            .save_note(&local.clone().with_status(SyncState::Conflict))
            .unwrap();

        let resolved = coordinator
            .resolve_conflict(&local, ConflictStrategy::Server)
            .await
            .unwrap();

        assert_eq!(resolved.content, "remote edit");
        assert_eq!(resolved.sync_status, Some(SyncState::Synced));
        assert_eq!(remote.call_count(RemoteOp::Update), 0);
        assert_eq!(store.list_conflicts(5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_run_leaves_queue_intact() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "keep me");
        let coordinator = Arc::new(coordinator);
        remote.set_latency(Some(Duration::from_millis(100)));

        let running = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.cancel();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.pending_change_count().unwrap(), 1);
        assert_eq!(coordinator.status().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_sign_out_clears_cache() {
        let (_remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "private");

        coordinator.sign_out().await.unwrap();

        assert!(store.get_local_notes().unwrap().is_empty());
        assert_eq!(store.pending_change_count().unwrap(), 0);
        assert_eq!(coordinator.status(), SyncStatus::default());
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_coalesced() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        queue_offline_create(&store, "once");
        let coordinator = Arc::new(coordinator);
        remote.set_latency(Some(Duration::from_millis(50)));

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = coordinator.sync().await.unwrap();

        assert_eq!(second, SyncOutcome::Coalesced);
        let report = completed(first.await.unwrap().unwrap());
        assert_eq!(report.passes, 2);
        assert_eq!(remote.call_count(RemoteOp::Create), 1);
        assert_eq!(remote.notes().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_coalesced_trigger_is_never_lost() {
        let (_remote, store, coordinator) = setup(ConflictStrategy::Server);
        let coordinator = Arc::new(coordinator);

        for round in 0..25 {
            let other = tokio::spawn({
                let coordinator = Arc::clone(&coordinator);
                async move { coordinator.sync().await }
            });
            queue_offline_create(&store, &format!("round {round}"));
            coordinator.sync().await.unwrap();
            other.await.unwrap().unwrap();

            // Whichever call coalesced, a pass ran after the entry was queued
            assert_eq!(store.pending_change_count().unwrap(), 0, "round {round}");
        }
    }

    #[tokio::test]
    async fn test_background_loop_runs_on_trigger() {
        let (remote, store, coordinator) = setup(ConflictStrategy::Server);
        let coordinator = Arc::new(coordinator);
        let shutdown = CancellationToken::new();
        let handle = coordinator.spawn_background(Duration::from_secs(3600), shutdown.clone());

        queue_offline_create(&store, "background");
        let mut status = coordinator.subscribe();
        coordinator.trigger();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                status.changed().await.unwrap();
                let current = status.borrow().clone();
                if current.phase == SyncPhase::Idle && current.last_synced.is_some() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(remote.notes().len(), 1);
        assert_eq!(store.pending_change_count().unwrap(), 0);
    }
}
