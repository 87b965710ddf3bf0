//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded conflict or dead-lettered change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Note involved in the conflict
    pub note_id: String,
    /// Base version of the local edit
    pub local_version: i64,
    /// Remote version at detection time, when known
    pub remote_version: Option<i64>,
    /// Resolution strategy name
    pub strategy: String,
    /// Why the change could not be applied as queued
    pub reason: String,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}

/// Conflict details before they are persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncConflict {
    pub note_id: String,
    pub local_version: i64,
    pub remote_version: Option<i64>,
    pub strategy: String,
    pub reason: String,
}
