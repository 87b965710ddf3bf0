use geonotes_core::{NewNote, SyncState};

use crate::backend::Notes;
use crate::commands::common::resolve_note_content;
use crate::error::CliError;

pub async fn run_add(
    content_parts: &[String],
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    notes: &Notes,
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let mut draft = NewNote::new(content, latitude, longitude);
    draft.accuracy = accuracy;

    let note = notes.create_note(draft).await?;

    println!("{}", note.id);
    if note.sync_state() == SyncState::Pending {
        eprintln!("Saved offline; queued for the next sync");
    }
    Ok(())
}
