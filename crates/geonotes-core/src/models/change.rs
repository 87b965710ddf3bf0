//! Deferred mutation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Note, NoteId};
use crate::error::{Error, Result};

/// Kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown change kind '{other}'"))),
        }
    }
}

/// A mutation that could not reach the remote store yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteChange {
    pub kind: ChangeKind,
    /// Full payload at queue time (`delete` only needs the id)
    pub note: Note,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
}

impl NoteChange {
    pub fn new(kind: ChangeKind, note: Note) -> Self {
        Self {
            kind,
            note,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn create(note: Note) -> Self {
        Self::new(ChangeKind::Create, note)
    }

    pub fn update(note: Note) -> Self {
        Self::new(ChangeKind::Update, note)
    }

    pub fn delete(note: Note) -> Self {
        Self::new(ChangeKind::Delete, note)
    }

    pub const fn note_id(&self) -> &NoteId {
        &self.note.id
    }
}

/// A persisted queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedChange {
    /// Queue key, strictly increasing in append order
    pub seq: i64,
    pub change: NoteChange,
    /// Replay attempts that failed transiently
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedChange {
    pub const fn kind(&self) -> ChangeKind {
        self.change.kind
    }

    pub const fn note_id(&self) -> &NoteId {
        self.change.note_id()
    }
}
