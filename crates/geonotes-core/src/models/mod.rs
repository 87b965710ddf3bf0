//! Data models for geonotes

mod change;
mod note;
mod sync_conflict;

pub use change::{ChangeKind, NoteChange, QueuedChange};
pub use note::{validate_position, NewNote, Note, NoteId, SyncState, MAX_CONTENT_CHARS};
pub use sync_conflict::{NewSyncConflict, SyncConflict};
