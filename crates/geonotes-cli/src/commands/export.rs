use std::path::Path;

use geonotes_core::export::render_notes_export;

use crate::backend::Notes;
use crate::cli::ExportFormat;
use crate::error::CliError;

pub fn run_export(
    format: ExportFormat,
    output_path: Option<&Path>,
    notes: &Notes,
) -> Result<(), CliError> {
    let all_notes = notes.list_notes()?;
    let rendered = render_notes_export(&all_notes, format.into())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
