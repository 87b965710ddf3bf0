//! Remote store boundary.
//!
//! The authoritative note backend is reached through [`RemoteNoteStore`].
//! [`HttpNoteStore`] talks to a REST endpoint; [`InMemoryNoteStore`] is an
//! in-process backend with fault injection for tests and offline demos.

mod http;
mod memory;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::models::{Note, NoteId};

pub use http::HttpNoteStore;
pub use memory::{InMemoryNoteStore, RemoteOp};

/// Result type for remote store calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failures surfaced by the remote store, by retry class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No valid session for the current principal
    #[error("Not authenticated")]
    NotAuthenticated,
    /// The note does not exist remotely
    #[error("Note not found on remote: {0}")]
    NotFound(String),
    /// The note belongs to another principal
    #[error("Access to note {0} is forbidden")]
    Forbidden(String),
    /// The backend refused the payload
    #[error("Remote rejected the request: {0}")]
    Rejected(String),
    /// Network or server-side failure
    #[error("Transient remote failure: {0}")]
    Transient(String),
    /// The call did not complete in time
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered with something that is not a note
    #[error("Invalid remote response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Only network-level failures are worth retrying with the same payload.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Operations against the authoritative note backend.
///
/// Implementations return fully populated notes (server id, version and
/// timestamps) and never set `sync_status`.
pub trait RemoteNoteStore: Send + Sync {
    /// Create a note; the server assigns id, `version = 1` and `created_at`
    fn create_note(&self, note: &Note) -> impl Future<Output = RemoteResult<Note>> + Send;

    /// Update a note by id; the server increments `version`
    fn update_note(&self, note: &Note) -> impl Future<Output = RemoteResult<Note>> + Send;

    /// Delete a note by id
    fn delete_note(&self, id: &NoteId) -> impl Future<Output = RemoteResult<()>> + Send;

    /// All notes owned by the current principal, oldest first
    fn get_notes(&self) -> impl Future<Output = RemoteResult<Vec<Note>>> + Send;
}
