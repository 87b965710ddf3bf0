use crate::backend::Notes;
use crate::commands::common::{normalize_note_identifier, resolve_note};
use crate::error::CliError;

pub async fn run_delete(id: &str, notes: &Notes) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, notes)?;

    notes.delete_note(&note.id).await?;
    println!("{}", note.id);
    Ok(())
}
