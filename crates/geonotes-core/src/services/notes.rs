//! Note mutations with offline fallback.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::LocalNoteStore;
use crate::error::{Error, Result};
use crate::models::{validate_position, ChangeKind, NewNote, Note, NoteChange, NoteId, SyncState};
use crate::remote::{RemoteError, RemoteNoteStore};
use crate::sync::SyncCoordinator;
use crate::util::not_before;

/// Entry point for creating, editing and deleting notes.
///
/// Each mutation is tried against the remote first. When the remote is
/// unreachable the cache is updated with a `pending` copy and the change is
/// queued for the coordinator, so the edit is never lost.
pub struct NoteService<R, L> {
    sync: Arc<SyncCoordinator<R, L>>,
}

impl<R, L> Clone for NoteService<R, L> {
    fn clone(&self) -> Self {
        Self {
            sync: Arc::clone(&self.sync),
        }
    }
}

impl<R: RemoteNoteStore, L: LocalNoteStore> NoteService<R, L> {
    pub const fn new(sync: Arc<SyncCoordinator<R, L>>) -> Self {
        Self { sync }
    }

    pub const fn coordinator(&self) -> &Arc<SyncCoordinator<R, L>> {
        &self.sync
    }

    fn store(&self) -> &L {
        self.sync.store()
    }

    fn remote(&self) -> &R {
        self.sync.remote()
    }

    /// Failures the queue can absorb: the same request may succeed later.
    fn can_defer(error: &Error) -> bool {
        matches!(error, Error::Remote(remote) if remote.is_retryable() || *remote == RemoteError::NotAuthenticated)
    }

    fn stage(&self, kind: ChangeKind, note: Note) -> Result<Note> {
        let queued = self.store().stage_change(&NoteChange::new(kind, note))?;
        let pending = self.sync.refresh_pending()?;
        self.sync.trigger();
        info!(
            "Queued {} of {} for sync ({pending} pending)",
            kind, queued.change.note.id
        );
        Ok(queued.change.note.with_status(SyncState::Pending))
    }

    /// A temporary id, queued changes, or a conflict flag means the local
    /// copy is not based on the latest remote version
    fn needs_replay(note: &Note) -> bool {
        note.id.is_temporary()
            || matches!(note.sync_state(), SyncState::Pending | SyncState::Conflict)
    }

    fn require(&self, id: &NoteId) -> Result<Note> {
        self.store()
            .get_note(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Create a note, queueing it when the remote cannot be reached
    pub async fn create_note(&self, draft: NewNote) -> Result<Note> {
        draft.validate()?;
        let placeholder = Note::from_draft(&draft);

        match self.sync.call(self.remote().create_note(&placeholder)).await {
            Ok(created) => {
                let stored = self
                    .store()
                    .save_note(&created.with_status(SyncState::Synced))?;
                info!("Created note {}", stored.id);
                Ok(stored)
            }
            Err(error) if Self::can_defer(&error) => {
                warn!("Create deferred: {error}");
                self.stage(ChangeKind::Create, placeholder)
            }
            Err(error) => Err(error),
        }
    }

    /// Replace a note's content and position.
    ///
    /// `note.version` is the version the edit was based on.
    pub async fn update_note(&self, note: Note) -> Result<Note> {
        note.validate()?;
        let current = self.require(&note.id)?;
        let edited = Note {
            id: current.id.clone(),
            user_id: current.user_id.clone(),
            content: note.content.trim().to_string(),
            created_at: current.created_at,
            updated_at: not_before(current.updated_at),
            sync_status: None,
            ..note
        };

        // Queued work and unresolved conflicts must be settled by replay
        if Self::needs_replay(&current) {
            debug!("{} has unsynced changes; queueing update", edited.id);
            return self.stage(ChangeKind::Update, edited);
        }

        match self.sync.call(self.remote().update_note(&edited)).await {
            Ok(updated) => {
                let stored = self
                    .store()
                    .save_note(&updated.with_status(SyncState::Synced))?;
                info!("Updated note {} (version {})", stored.id, stored.version);
                Ok(stored)
            }
            Err(error) if Self::can_defer(&error) => {
                warn!("Update deferred: {error}");
                self.stage(ChangeKind::Update, edited)
            }
            Err(error) => Err(error),
        }
    }

    /// Replace only the content of a note
    pub async fn edit_content(&self, id: &NoteId, content: impl Into<String>) -> Result<Note> {
        let mut note = self.require(id)?;
        note.content = content.into();
        self.update_note(note).await
    }

    /// Move a note to a new position
    pub async fn move_note(
        &self,
        id: &NoteId,
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
    ) -> Result<Note> {
        validate_position(latitude, longitude, accuracy)?;
        let mut note = self.require(id)?;
        note.latitude = latitude;
        note.longitude = longitude;
        note.accuracy = accuracy;
        self.update_note(note).await
    }

    /// Delete a note; an already-deleted remote copy counts as success
    pub async fn delete_note(&self, id: &NoteId) -> Result<()> {
        let current = self.require(id)?;

        if Self::needs_replay(&current) {
            self.stage(ChangeKind::Delete, current)?;
            return Ok(());
        }

        match self.sync.call(self.remote().delete_note(&current.id)).await {
            Ok(()) | Err(Error::Remote(RemoteError::NotFound(_))) => {
                self.store().remove_note(&current.id)?;
                info!("Deleted note {}", current.id);
                Ok(())
            }
            Err(error) if Self::can_defer(&error) => {
                warn!("Delete deferred: {error}");
                self.stage(ChangeKind::Delete, current)?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.store().get_note(id)
    }

    /// Cached notes, oldest first
    pub fn list_notes(&self) -> Result<Vec<Note>> {
        self.store().get_local_notes()
    }

    /// Pull the remote list into the cache; falls back to cached notes
    pub async fn refresh_notes(&self) -> Result<Vec<Note>> {
        match self.sync.call(self.remote().get_notes()).await {
            Ok(notes) => self.store().apply_remote_snapshot(&notes)?,
            Err(Error::Remote(error)) => warn!("Showing cached notes; refresh failed: {error}"),
            Err(error) => return Err(error),
        }
        self.list_notes()
    }
}
