//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum note length, in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

const TEMPORARY_ID_PREFIX: &str = "temp-";

/// Identifier of a note.
///
/// Server-issued ids are opaque strings. Notes created while offline carry a
/// placeholder of the form `temp-<uuid v7>` until the server responds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Wrap an id issued by the server
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create a new local placeholder id (time-sortable)
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMPORARY_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Whether this id is a local placeholder not yet known to the server
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("note id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<Uuid> for NoteId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// Local-only synchronization state of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local copy matches (or was pushed to) the remote
    Synced,
    /// A queued mutation has not been acknowledged yet
    Pending,
    /// A queued mutation could not be reconciled automatically
    Conflict,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// A geotagged note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Server id, or a temporary placeholder
    pub id: NoteId,
    /// Owner; enforced by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Plain text content
    pub content: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Measurement uncertainty in metres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Server revision, starts at 1
    #[serde(default = "initial_version")]
    pub version: i64,
    /// Local-only; never sent to the remote
    #[serde(default, skip_serializing)]
    pub sync_status: Option<SyncState>,
}

const fn initial_version() -> i64 {
    1
}

impl Note {
    /// Build a placeholder note from a draft, pending its first sync.
    #[must_use]
    pub fn from_draft(draft: &NewNote) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: NoteId::temporary(),
            user_id: None,
            content: draft.content.trim().to_string(),
            latitude: draft.latitude,
            longitude: draft.longitude,
            accuracy: draft.accuracy,
            created_at: now,
            updated_at: now,
            version: initial_version(),
            sync_status: Some(SyncState::Pending),
        }
    }

    /// Return a copy carrying the given local status.
    #[must_use]
    pub fn with_status(mut self, status: SyncState) -> Self {
        self.sync_status = Some(status);
        self
    }

    /// Status as stored locally; unset means "not yet synced".
    pub fn sync_state(&self) -> SyncState {
        self.sync_status.unwrap_or(SyncState::Pending)
    }

    /// Get first line as title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.content
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Validate content and coordinates.
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.content, self.latitude, self.longitude, self.accuracy)
    }
}

/// Input for creating a note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    pub content: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl NewNote {
    pub fn new(content: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            content: content.into(),
            latitude,
            longitude,
            accuracy: None,
        }
    }

    #[must_use]
    pub const fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.content, self.latitude, self.longitude, self.accuracy)
    }
}

fn validate_fields(content: &str, latitude: f64, longitude: f64, accuracy: Option<f64>) -> Result<()> {
    if content.trim().is_empty() {
        return Err(Error::InvalidInput("note content cannot be empty".into()));
    }
    let length = content.chars().count();
    if length > MAX_CONTENT_CHARS {
        return Err(Error::InvalidInput(format!(
            "note content is {length} characters (max {MAX_CONTENT_CHARS})"
        )));
    }
    validate_position(latitude, longitude, accuracy)
}

/// Check coordinate ranges and accuracy.
pub fn validate_position(latitude: f64, longitude: f64, accuracy: Option<f64>) -> Result<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(Error::InvalidInput(format!(
            "latitude {latitude} is outside [-90, 90]"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::InvalidInput(format!(
            "longitude {longitude} is outside [-180, 180]"
        )));
    }
    if let Some(accuracy) = accuracy {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(Error::InvalidInput(format!(
                "accuracy {accuracy} must be a non-negative number"
            )));
        }
    }
    Ok(())
}
