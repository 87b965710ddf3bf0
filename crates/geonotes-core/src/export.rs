//! Note export renderings.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{Note, SyncState};

/// Export output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    GeoJson,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::GeoJson => "geojson",
        }
    }
}

/// Serializable note representation, including the local sync status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNote {
    pub id: String,
    pub content: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub sync_status: SyncState,
}

#[must_use]
pub fn note_to_export_item(note: &Note) -> ExportNote {
    ExportNote {
        id: note.id.to_string(),
        content: note.content.clone(),
        latitude: note.latitude,
        longitude: note.longitude,
        accuracy: note.accuracy,
        created_at: note.created_at,
        updated_at: note.updated_at,
        version: note.version,
        sync_status: note.sync_state(),
    }
}

/// Render notes as pretty-printed JSON.
pub fn render_json_export(notes: &[Note]) -> serde_json::Result<String> {
    let items = notes
        .iter()
        .map(note_to_export_item)
        .collect::<Vec<ExportNote>>();
    serde_json::to_string_pretty(&items)
}

/// Render notes as a GeoJSON `FeatureCollection` of points.
///
/// Coordinates are `[longitude, latitude]` per RFC 7946.
pub fn render_geojson_export(notes: &[Note]) -> serde_json::Result<String> {
    let features = notes
        .iter()
        .map(|note| {
            let item = note_to_export_item(note);
            json!({
                "type": "Feature",
                "id": item.id,
                "geometry": {
                    "type": "Point",
                    "coordinates": [item.longitude, item.latitude],
                },
                "properties": {
                    "content": item.content,
                    "accuracy": item.accuracy,
                    "created_at": item.created_at,
                    "updated_at": item.updated_at,
                    "version": item.version,
                    "sync_status": item.sync_status,
                },
            })
        })
        .collect::<Vec<Value>>();

    serde_json::to_string_pretty(&json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

pub fn render_notes_export(notes: &[Note], format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(notes),
        ExportFormat::GeoJson => render_geojson_export(notes),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("geonotes-export-{timestamp_ms}.{}", format.extension())
}
