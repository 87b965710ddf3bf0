//! Observable sync engine state.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the sync engine is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

/// Snapshot published to status subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// End of the last successful run
    pub last_synced: Option<DateTime<Utc>>,
    /// Queue length as of the last update
    pub pending_changes: usize,
    /// Why the last run failed or left changes unsynced; cleared when a run starts
    pub error: Option<String>,
}

impl SyncStatus {
    pub const fn is_syncing(&self) -> bool {
        matches!(self.phase, SyncPhase::Syncing)
    }
}
