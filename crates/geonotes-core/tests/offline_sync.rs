//! End-to-end offline/online behaviour of the note service and coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geonotes_core::db::{ChangeResolution, LocalNoteStore, SqliteNoteStore};
use geonotes_core::models::{
    ChangeKind, NewNote, NewSyncConflict, Note, NoteChange, NoteId, QueuedChange, SyncConflict,
    SyncState,
};
use geonotes_core::remote::{InMemoryNoteStore, RemoteNoteStore, RemoteOp};
use geonotes_core::services::NoteService;
use geonotes_core::state::SyncPhase;
use geonotes_core::sync::{ConflictStrategy, SyncCoordinator, SyncOptions, SyncOutcome};
use geonotes_core::{Error, Result};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

struct Harness<L: LocalNoteStore> {
    remote: InMemoryNoteStore,
    store: Arc<L>,
    service: NoteService<InMemoryNoteStore, L>,
}

impl<L: LocalNoteStore> Harness<L> {
    fn with_store(store: Arc<L>, strategy: ConflictStrategy) -> Self {
        let remote = InMemoryNoteStore::new("alice");
        let options = SyncOptions {
            strategy,
            request_timeout: Duration::from_secs(2),
            ..SyncOptions::default()
        };
        let coordinator = SyncCoordinator::new(Arc::new(remote.clone()), Arc::clone(&store), options);
        Self {
            remote,
            store,
            service: NoteService::new(Arc::new(coordinator)),
        }
    }

    fn coordinator(&self) -> &SyncCoordinator<InMemoryNoteStore, L> {
        self.service.coordinator()
    }

    async fn sync(&self) -> Result<SyncOutcome> {
        self.coordinator().sync().await
    }
}

fn harness(strategy: ConflictStrategy) -> Harness<SqliteNoteStore> {
    Harness::with_store(
        Arc::new(SqliteNoteStore::open_in_memory().unwrap()),
        strategy,
    )
}

fn draft(content: &str) -> NewNote {
    NewNote::new(content, 37.7749, -122.4194).with_accuracy(12.0)
}

#[tokio::test]
async fn online_create_is_synced_at_version_one() {
    let h = harness(ConflictStrategy::Server);

    let note = h.service.create_note(draft("Great tacos")).await.unwrap();

    assert_eq!(note.version, 1);
    assert_eq!(note.sync_status, Some(SyncState::Synced));
    let cached = h.store.get_note(&note.id).unwrap().unwrap();
    assert_eq!(cached.sync_status, Some(SyncState::Synced));
    assert_eq!(h.remote.get(&note.id).unwrap().content, "Great tacos");
}

#[tokio::test]
async fn failed_create_is_cached_pending_with_one_queued_create() {
    let h = harness(ConflictStrategy::Server);
    h.remote.set_offline(true);

    let note = h.service.create_note(draft("Offline thought")).await.unwrap();

    assert!(note.id.is_temporary());
    let local = h.store.get_local_notes().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].sync_status, Some(SyncState::Pending));
    assert_eq!(local[0].content, "Offline thought");

    let queued = h.store.get_pending_changes().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind(), ChangeKind::Create);
    assert_eq!(queued[0].note_id(), &note.id);
}

#[tokio::test]
async fn replaying_create_then_update_lands_updated_content() {
    let h = harness(ConflictStrategy::Server);
    h.remote.set_offline(true);
    let note = h.service.create_note(draft("first")).await.unwrap();
    h.service.edit_content(&note.id, "second").await.unwrap();
    h.remote.set_offline(false);

    let outcome = h.sync().await.unwrap();

    assert_eq!(outcome.report().unwrap().synced, 2);
    let remote_notes = h.remote.notes();
    assert_eq!(remote_notes.len(), 1);
    assert_eq!(remote_notes[0].content, "second");

    let local = h.store.get_local_notes().unwrap();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].id, remote_notes[0].id);
    assert_eq!(local[0].sync_status, Some(SyncState::Synced));
    assert_eq!(h.store.pending_change_count().unwrap(), 0);
    // The placeholder id still resolves after reconciliation
    assert_eq!(
        h.service.get_note(&note.id).unwrap().unwrap().id,
        remote_notes[0].id
    );
}

#[tokio::test]
async fn server_wins_leaves_remote_untouched_and_flags_local() {
    let h = harness(ConflictStrategy::Server);
    let note = h.service.create_note(draft("original")).await.unwrap();

    // Another device edits the note (version 2)
    let mut elsewhere = note.clone();
    elsewhere.content = "edited elsewhere".to_string();
    h.remote.update_note(&elsewhere).await.unwrap();

    // This device edits the version 1 copy while offline
    h.remote.set_offline(true);
    h.service
        .edit_content(&note.id, "my offline edit")
        .await
        .unwrap();
    h.remote.set_offline(false);

    let outcome = h.sync().await.unwrap();

    assert_eq!(outcome.report().unwrap().conflicts, 1);
    let remote_copy = h.remote.get(&note.id).unwrap();
    assert_eq!(remote_copy.content, "edited elsewhere");
    assert_eq!(remote_copy.version, 2);

    let local = h.store.get_note(&note.id).unwrap().unwrap();
    assert_eq!(local.sync_status, Some(SyncState::Conflict));
    assert_eq!(local.content, "my offline edit");

    let conflicts = h.store.list_conflicts(10).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].local_version, 1);
    assert_eq!(conflicts[0].remote_version, Some(2));

    // Adopting the server copy clears the conflict
    let resolved = h
        .coordinator()
        .resolve_conflict(&local, ConflictStrategy::Server)
        .await
        .unwrap();
    assert_eq!(resolved.content, "edited elsewhere");
    assert_eq!(resolved.sync_status, Some(SyncState::Synced));
}

#[tokio::test]
async fn editing_a_conflicted_note_never_overwrites_the_remote() {
    let h = harness(ConflictStrategy::Server);
    let note = h.service.create_note(draft("original")).await.unwrap();

    let mut elsewhere = note.clone();
    elsewhere.content = "edited elsewhere".to_string();
    h.remote.update_note(&elsewhere).await.unwrap();

    h.remote.set_offline(true);
    h.service
        .edit_content(&note.id, "my offline edit")
        .await
        .unwrap();
    h.remote.set_offline(false);
    h.sync().await.unwrap();
    assert_eq!(
        h.store.get_note(&note.id).unwrap().unwrap().sync_status,
        Some(SyncState::Conflict)
    );

    // Online, but the flagged copy is still based on version 1
    let moved = h
        .service
        .move_note(&note.id, 10.0, 10.0, None)
        .await
        .unwrap();
    assert_eq!(moved.sync_status, Some(SyncState::Pending));
    assert_eq!(h.store.pending_change_count().unwrap(), 1);

    let remote_copy = h.remote.get(&note.id).unwrap();
    assert_eq!(remote_copy.content, "edited elsewhere");
    assert_eq!(remote_copy.version, 2);

    let outcome = h.sync().await.unwrap();
    assert_eq!(outcome.report().unwrap().conflicts, 1);
    assert_eq!(h.remote.get(&note.id).unwrap().content, "edited elsewhere");

    let local = h.store.get_note(&note.id).unwrap().unwrap();
    assert_eq!(local.sync_status, Some(SyncState::Conflict));
    assert_eq!(local.content, "my offline edit");
    assert_eq!(local.latitude, 10.0);
}

#[tokio::test]
async fn delete_replay_against_deleted_remote_note_succeeds() {
    let h = harness(ConflictStrategy::Server);
    let note = h.service.create_note(draft("short lived")).await.unwrap();

    h.remote.set_offline(true);
    h.service.delete_note(&note.id).await.unwrap();
    h.remote.set_offline(false);
    assert_eq!(h.store.pending_change_count().unwrap(), 1);

    // Deleted from another device before this one reconnects
    h.remote.delete_note(&note.id).await.unwrap();

    let outcome = h.sync().await.unwrap();

    assert_eq!(outcome.report().unwrap().synced, 1);
    assert!(h.store.get_note(&note.id).unwrap().is_none());
    assert_eq!(h.store.pending_change_count().unwrap(), 0);
}

#[tokio::test]
async fn clear_storage_removes_notes_and_queue() {
    let h = harness(ConflictStrategy::Server);
    h.service.create_note(draft("synced")).await.unwrap();
    h.remote.set_offline(true);
    h.service.create_note(draft("queued")).await.unwrap();

    h.coordinator().sign_out().await.unwrap();

    assert!(h.store.get_local_notes().unwrap().is_empty());
    assert!(h.store.get_pending_changes().unwrap().is_empty());
    assert_eq!(h.coordinator().status().pending_changes, 0);
}

#[tokio::test]
async fn change_enqueued_during_replay_survives_to_next_run() {
    let h = harness(ConflictStrategy::Server);
    h.remote.set_offline(true);
    h.service.create_note(draft("before the run")).await.unwrap();
    h.remote.set_offline(false);

    let injected = Arc::new(AtomicBool::new(false));
    h.remote.on_call({
        let store = Arc::clone(&h.store);
        let injected = Arc::clone(&injected);
        move |op| {
            if op == RemoteOp::Create && !injected.swap(true, Ordering::SeqCst) {
                let late = Note::from_draft(&draft("during the run"));
                store.stage_change(&NoteChange::create(late)).unwrap();
            }
        }
    });

    h.sync().await.unwrap();

    assert!(injected.load(Ordering::SeqCst));
    let queued = h.store.get_pending_changes().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].change.note.content, "during the run");
    assert_eq!(h.remote.notes().len(), 1);
    assert_eq!(h.coordinator().status().pending_changes, 1);

    h.sync().await.unwrap();

    assert_eq!(h.store.pending_change_count().unwrap(), 0);
    let mut contents = h
        .remote
        .notes()
        .into_iter()
        .map(|note| note.content)
        .collect::<Vec<_>>();
    contents.sort();
    assert_eq!(contents, vec!["before the run", "during the run"]);
}

#[tokio::test]
async fn queue_survives_restart() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("cache").join("geonotes.db");
    let remote = InMemoryNoteStore::new("alice");
    remote.set_offline(true);

    {
        let store = Arc::new(SqliteNoteStore::open(&path).unwrap());
        let coordinator =
            SyncCoordinator::new(Arc::new(remote.clone()), store, SyncOptions::default());
        let service = NoteService::new(Arc::new(coordinator));
        service.create_note(draft("survives")).await.unwrap();
    }

    remote.set_offline(false);
    let store = Arc::new(SqliteNoteStore::open(&path).unwrap());
    let coordinator =
        SyncCoordinator::new(Arc::new(remote.clone()), Arc::clone(&store), SyncOptions::default());
    assert_eq!(coordinator.refresh_pending().unwrap(), 1);

    coordinator.sync().await.unwrap();

    assert_eq!(remote.notes()[0].content, "survives");
    assert_eq!(
        store.get_local_notes().unwrap()[0].sync_status,
        Some(SyncState::Synced)
    );
}

/// Cache double whose queue completion can be made to fail.
struct FlakyStore {
    inner: SqliteNoteStore,
    fail_completion: AtomicBool,
}

impl LocalNoteStore for FlakyStore {
    fn save_note(&self, note: &Note) -> Result<Note> {
        self.inner.save_note(note)
    }
    fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.inner.get_note(id)
    }
    fn get_local_notes(&self) -> Result<Vec<Note>> {
        self.inner.get_local_notes()
    }
    fn get_pending_notes(&self) -> Result<Vec<Note>> {
        self.inner.get_pending_notes()
    }
    fn remove_note(&self, id: &NoteId) -> Result<bool> {
        self.inner.remove_note(id)
    }
    fn update_sync_status(&self, id: &NoteId, status: SyncState) -> Result<()> {
        self.inner.update_sync_status(id, status)
    }
    fn apply_remote_snapshot(&self, notes: &[Note]) -> Result<()> {
        self.inner.apply_remote_snapshot(notes)
    }
    fn queue_change(&self, change: &NoteChange) -> Result<QueuedChange> {
        self.inner.queue_change(change)
    }
    fn stage_change(&self, change: &NoteChange) -> Result<QueuedChange> {
        self.inner.stage_change(change)
    }
    fn get_pending_changes(&self) -> Result<Vec<QueuedChange>> {
        self.inner.get_pending_changes()
    }
    fn replace_note_id(&self, temp_id: &NoteId, server_note: &Note) -> Result<()> {
        self.inner.replace_note_id(temp_id, server_note)
    }
    fn pending_change_count(&self) -> Result<usize> {
        self.inner.pending_change_count()
    }
    fn clear_pending_changes(&self, processed: &[i64]) -> Result<usize> {
        self.inner.clear_pending_changes(processed)
    }
    fn record_failed_attempt(&self, seq: i64, error: &str) -> Result<u32> {
        self.inner.record_failed_attempt(seq, error)
    }
    fn complete_change(&self, seq: i64, resolution: &ChangeResolution) -> Result<()> {
        if self.fail_completion.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.complete_change(seq, resolution)
    }
    fn record_conflict(&self, conflict: &NewSyncConflict) -> Result<SyncConflict> {
        self.inner.record_conflict(conflict)
    }
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.inner.list_conflicts(limit)
    }
    fn clear_storage(&self) -> Result<()> {
        self.inner.clear_storage()
    }
}

#[tokio::test]
async fn storage_failure_aborts_run_with_error_status() {
    let store = Arc::new(FlakyStore {
        inner: SqliteNoteStore::open_in_memory().unwrap(),
        fail_completion: AtomicBool::new(true),
    });
    let h = Harness::with_store(Arc::clone(&store), ConflictStrategy::Server);
    h.remote.set_offline(true);
    h.service.create_note(draft("one")).await.unwrap();
    h.service.create_note(draft("two")).await.unwrap();
    h.remote.set_offline(false);

    let error = h.sync().await.unwrap_err();

    assert!(error.is_storage());
    let status = h.coordinator().status();
    assert_eq!(status.phase, SyncPhase::Error);
    assert!(status.error.unwrap().contains("disk full"));
    // The run stopped at the first entry
    assert_eq!(h.remote.call_count(RemoteOp::Create), 1);
    assert_eq!(store.pending_change_count().unwrap(), 2);
    assert!(!h.coordinator().is_running());
}
