use geonotes_core::SyncState;

use crate::backend::Notes;
use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_note_identifier, resolve_note,
};
use crate::error::CliError;

pub async fn run_edit(id: &str, content_parts: &[String], notes: &Notes) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, notes)?;

    let edited_content = match normalize_content(&content_parts.join(" ")) {
        Some(content) => content,
        None => capture_editor_input_with_initial(&note.content)?
            .ok_or(CliError::EmptyEditedContent)?,
    };

    if edited_content == note.content {
        println!("{}", note.id);
        return Ok(());
    }

    let updated = notes.edit_content(&note.id, edited_content).await?;
    report_saved(updated.id.as_str(), updated.sync_state());
    Ok(())
}

pub async fn run_move(
    id: &str,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    notes: &Notes,
) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, notes)?;

    let moved = notes
        .move_note(&note.id, latitude, longitude, accuracy)
        .await?;
    report_saved(moved.id.as_str(), moved.sync_state());
    Ok(())
}

fn report_saved(id: &str, status: SyncState) {
    println!("{id}");
    if status == SyncState::Pending {
        eprintln!("Saved offline; queued for the next sync");
    }
}
