use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use geonotes_core::models::QueuedChange;
use geonotes_core::search::GeoPoint;
use geonotes_core::state::SyncStatus;
use geonotes_core::{Note, NoteId, SyncState};
use serde::Serialize;

use crate::backend::Notes;
use crate::error::CliError;

const SHORT_ID_LEN: usize = 13;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub preview: String,
    pub content: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub version: i64,
    pub sync_status: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PendingChangeItem {
    pub seq: i64,
    pub kind: String,
    pub note_id: String,
    pub preview: String,
    pub queued_at: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Find a note by exact id, falling back to a unique id prefix
pub fn resolve_note(note_query: &str, notes: &Notes) -> Result<Note, CliError> {
    let note_id = note_query.parse::<NoteId>()?;
    if let Some(note) = notes.get_note(&note_id)? {
        return Ok(note);
    }

    let mut matching = notes
        .list_notes()?
        .into_iter()
        .filter(|note| note.id.as_str().starts_with(note_query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::NoteNotFound(note_query.to_string())),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| short_id(&note.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{note_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &NoteId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

pub fn format_note_lines(notes: &[Note], origin: Option<GeoPoint>) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(&note.id);
            let status = note.sync_state().as_str();
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.created_at, now_ms);
            let place = origin.map_or_else(
                || format_position(note),
                |origin| format_distance(origin.distance_to(GeoPoint::of(note))),
            );

            format!("{short_id:<13}  {status:<8}  {preview:<40}  {relative_time:<10}  {place}")
        })
        .collect()
}

pub fn note_to_list_item(note: &Note, origin: Option<GeoPoint>) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();

    NoteListItem {
        id: note.id.to_string(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        latitude: note.latitude,
        longitude: note.longitude,
        accuracy: note.accuracy,
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.created_at, now_ms),
        version: note.version,
        sync_status: note.sync_state(),
        distance_m: origin.map(|origin| origin.distance_to(GeoPoint::of(note)).round()),
    }
}

pub fn pending_change_to_item(entry: &QueuedChange) -> PendingChangeItem {
    PendingChangeItem {
        seq: entry.seq,
        kind: entry.kind().to_string(),
        note_id: entry.note_id().to_string(),
        preview: note_preview(&entry.change.note, 40),
        queued_at: format_sync_timestamp(entry.change.timestamp),
        attempts: entry.attempts,
        last_error: entry.last_error.clone(),
    }
}

pub fn format_pending_lines(entries: &[QueuedChange]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let mut line = format!(
                "#{:<5} {:<6}  {:<13}  {}",
                entry.seq,
                entry.kind().as_str(),
                short_id(entry.note_id()),
                note_preview(&entry.change.note, 40)
            );
            if entry.attempts > 0 {
                line.push_str(&format!("  attempts={}", entry.attempts));
            }
            if let Some(error) = entry.last_error.as_deref() {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_status_line(status: &SyncStatus) -> String {
    let mut line = format!(
        "{}  pending={}",
        status.phase.as_str(),
        status.pending_changes
    );
    if let Some(last) = status.last_synced {
        line.push_str(&format!(
            "  last_synced={}",
            last.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(error) = status.error.as_deref() {
        line.push_str(&format!("  error={error}"));
    }
    line
}

pub fn format_position(note: &Note) -> String {
    let mut position = format!("{:.5},{:.5}", note.latitude, note.longitude);
    if let Some(accuracy) = note.accuracy {
        position.push_str(&format!(" ±{accuracy:.0}m"));
    }
    position
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let first_line = note.content.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

/// Unix ms at the first instant of a local calendar day
pub fn parse_day_start(value: &str) -> Result<i64, CliError> {
    local_millis(value, NaiveTime::MIN)
}

/// Unix ms at the last millisecond of a local calendar day
pub fn parse_day_end(value: &str) -> Result<i64, CliError> {
    let end_of_day = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| CliError::InvalidDate(value.to_string()))?;
    local_millis(value, end_of_day)
}

fn local_millis(value: &str, time: NaiveTime) -> Result<i64, CliError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(value.to_string()))?;
    Local
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .earliest()
        .map(|date_time| date_time.timestamp_millis())
        .ok_or_else(|| CliError::InvalidDate(value.to_string()))
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // EDITOR may carry arguments, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("geonotes-{}-{now}.txt", std::process::id()))
}
