use chrono::Local;
use geonotes_core::search::{group_by_day, GeoPoint, NoteFilter, SortBy};
use geonotes_core::Note;
use serde_json::json;

use crate::backend::Notes;
use crate::commands::common::{
    format_note_lines, format_position, format_sync_timestamp, normalize_note_identifier,
    note_to_list_item, parse_day_end, parse_day_start, resolve_note, NoteListItem,
};
use crate::error::CliError;

/// How `geonotes list` narrows and renders the cache
#[derive(Debug, Default)]
pub struct ListOptions {
    pub limit: usize,
    pub filter: NoteFilter,
    pub group: bool,
    pub refresh: bool,
    pub json: bool,
}

pub fn build_filter(
    search: Option<String>,
    since: Option<&str>,
    until: Option<&str>,
    near: Option<GeoPoint>,
) -> Result<NoteFilter, CliError> {
    Ok(NoteFilter {
        text: search,
        start: since.map(parse_day_start).transpose()?,
        end: until.map(parse_day_end).transpose()?,
        sort: near.map_or(SortBy::Newest, SortBy::Distance),
    })
}

pub async fn run_list(options: &ListOptions, notes: &Notes) -> Result<(), CliError> {
    let all_notes = if options.refresh {
        notes.refresh_notes().await?
    } else {
        notes.list_notes()?
    };
    let mut matching = options.filter.apply(all_notes);
    matching.truncate(options.limit);

    let origin = match options.filter.sort {
        SortBy::Distance(origin) => Some(origin),
        SortBy::Newest => None,
    };

    if options.group {
        let groups = group_by_day(matching, &Local::now());
        if options.json {
            let payload = json!({
                "today": to_items(&groups.today, origin),
                "older": to_items(&groups.older, origin),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            print_section("Today", &groups.today, origin);
            print_section("Earlier", &groups.older, origin);
        }
        return Ok(());
    }

    if options.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&to_items(&matching, origin))?
        );
    } else {
        for line in format_note_lines(&matching, origin) {
            println!("{line}");
        }
    }

    Ok(())
}

fn to_items(notes: &[Note], origin: Option<GeoPoint>) -> Vec<NoteListItem> {
    notes
        .iter()
        .map(|note| note_to_list_item(note, origin))
        .collect()
}

fn print_section(title: &str, notes: &[Note], origin: Option<GeoPoint>) {
    if notes.is_empty() {
        return;
    }
    println!("{title}");
    for line in format_note_lines(notes, origin) {
        println!("  {line}");
    }
}

pub fn run_show(id: &str, as_json: bool, notes: &Notes) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let note = resolve_note(&normalized_id, notes)?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&note_to_list_item(&note, None))?
        );
        return Ok(());
    }

    println!("id:       {}", note.id);
    println!("status:   {}", note.sync_state());
    println!("version:  {}", note.version);
    println!("position: {}", format_position(&note));
    println!("created:  {}", format_sync_timestamp(note.created_at));
    println!("updated:  {}", format_sync_timestamp(note.updated_at));
    println!();
    println!("{}", note.content);
    Ok(())
}
