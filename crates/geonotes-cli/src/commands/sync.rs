use std::time::Duration;

use geonotes_core::db::LocalNoteStore;
use geonotes_core::models::SyncConflict;
use geonotes_core::sync::{SyncOutcome, SyncReport};
use geonotes_core::SyncState;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::backend::Notes;
use crate::cli::Strategy;
use crate::commands::common::{
    format_pending_lines, format_status_line, format_sync_timestamp, normalize_note_identifier,
    pending_change_to_item, resolve_note, short_id, PendingChangeItem,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub note_id: String,
    pub local_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<i64>,
    pub strategy: String,
    pub reason: String,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
}

fn require_remote(notes: &Notes) -> Result<(), CliError> {
    if notes.coordinator().remote().is_connected() {
        Ok(())
    } else {
        Err(CliError::SyncNotConfigured)
    }
}

pub async fn run_sync(notes: &Notes) -> Result<(), CliError> {
    require_remote(notes)?;

    match notes.coordinator().sync().await? {
        SyncOutcome::Completed(report) => println!("{}", format_sync_report(&report)),
        SyncOutcome::Coalesced => println!("Sync already running"),
    }
    Ok(())
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Sync completed: {} synced, {} conflicts",
        report.synced, report.conflicts
    );
    if report.retried > 0 || report.skipped > 0 {
        line.push_str(&format!(
            ", {} retrying, {} held back",
            report.retried, report.skipped
        ));
    }
    if report.dead_lettered > 0 {
        line.push_str(&format!(", {} gave up", report.dead_lettered));
    }
    line
}

/// Sync on an interval, printing every status change, until Ctrl-C
pub async fn run_sync_watch(interval: Duration, notes: &Notes) -> Result<(), CliError> {
    require_remote(notes)?;

    let coordinator = notes.coordinator();
    let mut status = coordinator.subscribe();
    let shutdown = CancellationToken::new();
    let worker = coordinator.spawn_background(interval, shutdown.clone());
    coordinator.trigger();
    println!("Watching for changes every {}s (Ctrl-C to stop)", interval.as_secs());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                println!("{}", format_status_line(&current));
            }
        }
    }

    shutdown.cancel();
    coordinator.cancel();
    if let Err(error) = worker.await {
        warn!("Background sync ended abnormally: {error}");
    }
    Ok(())
}

pub fn run_sync_pending(as_json: bool, notes: &Notes) -> Result<(), CliError> {
    let queued = notes.coordinator().store().get_pending_changes()?;

    if as_json {
        let items = queued
            .iter()
            .map(pending_change_to_item)
            .collect::<Vec<PendingChangeItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if queued.is_empty() {
        println!("No queued changes.");
        return Ok(());
    }

    for line in format_pending_lines(&queued) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_sync_drop(seqs: &[i64], notes: &Notes) -> Result<(), CliError> {
    let coordinator = notes.coordinator();
    let removed = coordinator.store().clear_pending_changes(seqs)?;
    let remaining = coordinator.refresh_pending()?;
    println!("Dropped {removed} queued changes ({remaining} remaining)");
    Ok(())
}

pub fn run_sync_conflicts(limit: usize, as_json: bool, notes: &Notes) -> Result<(), CliError> {
    let conflicts = notes.coordinator().store().list_conflicts(limit)?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_resolve(id: &str, keep: Strategy, notes: &Notes) -> Result<(), CliError> {
    require_remote(notes)?;
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, notes)?;
    if note.sync_state() != SyncState::Conflict {
        println!("{} is not in conflict ({})", short_id(&note.id), note.sync_state());
        return Ok(());
    }

    let resolved = notes
        .coordinator()
        .resolve_conflict(&note, keep.into())
        .await?;
    println!("{}", resolved.id);
    Ok(())
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        note_id: conflict.note_id.clone(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        strategy: conflict.strategy.clone(),
        reason: conflict.reason.clone(),
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let remote = conflict
                .remote_version
                .map_or_else(|| "-".to_string(), |version| version.to_string());
            format!(
                "{}  {:<6}  note={}  local=v{} remote=v{}  {}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.note_id,
                conflict.local_version,
                remote,
                conflict.reason
            )
        })
        .collect()
}
