use std::path::Path;

use geonotes_core::db::LocalNoteStore;
use geonotes_core::SyncState;
use serde::Serialize;

use crate::backend::{Context, Notes};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub cached_notes: usize,
    pub pending_notes: usize,
    pub conflicted_notes: usize,
    pub queued_changes: usize,
    pub db_path: String,
}

pub fn collect_status(
    remote: Option<&str>,
    db_path: &Path,
    notes: &Notes,
) -> Result<StatusReport, CliError> {
    let store = notes.coordinator().store();
    let cached = store.get_local_notes()?;
    let count = |state: SyncState| {
        cached
            .iter()
            .filter(|note| note.sync_state() == state)
            .count()
    };

    Ok(StatusReport {
        remote: remote.map(str::to_string),
        cached_notes: cached.len(),
        pending_notes: count(SyncState::Pending),
        conflicted_notes: count(SyncState::Conflict),
        queued_changes: store.pending_change_count()?,
        db_path: db_path.display().to_string(),
    })
}

pub fn run_status(as_json: bool, context: &Context, notes: &Notes) -> Result<(), CliError> {
    let report = collect_status(
        context.config.api_base_url.as_deref(),
        &context.db_path,
        notes,
    )?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "remote:    {}",
        report.remote.as_deref().unwrap_or("not configured (local only)")
    );
    println!("cache:     {}", report.db_path);
    println!(
        "notes:     {} cached, {} pending, {} in conflict",
        report.cached_notes, report.pending_notes, report.conflicted_notes
    );
    println!("queue:     {} changes waiting", report.queued_changes);
    if report.conflicted_notes > 0 {
        println!("Run `geonotes sync conflicts` and `geonotes sync resolve <id>` to settle conflicts.");
    }
    Ok(())
}
