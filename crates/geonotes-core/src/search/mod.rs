//! Filtering, sorting and grouping of cached notes.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::models::Note;

/// Mean Earth radius used for great-circle distances
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A position on the WGS84 globe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub const fn of(note: &Note) -> Self {
        Self::new(note.latitude, note.longitude)
    }

    /// Haversine distance in metres
    pub fn distance_to(self, other: Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum SortBy {
    /// Most recently created first
    #[default]
    Newest,
    /// Closest to the origin first
    Distance(GeoPoint),
}

/// Criteria for narrowing a note list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteFilter {
    /// Case-insensitive substring of the content
    pub text: Option<String>,
    /// Earliest `created_at` (Unix ms, inclusive)
    pub start: Option<i64>,
    /// Latest `created_at` (Unix ms, inclusive)
    pub end: Option<i64>,
    pub sort: SortBy,
}

impl NoteFilter {
    pub fn matches(&self, note: &Note) -> bool {
        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            if !note
                .content
                .to_lowercase()
                .contains(&text.to_lowercase())
            {
                return false;
            }
        }
        if self.start.is_some_and(|start| note.created_at < start) {
            return false;
        }
        if self.end.is_some_and(|end| note.created_at > end) {
            return false;
        }
        true
    }

    /// Keep matching notes, in the requested order
    pub fn apply(&self, notes: Vec<Note>) -> Vec<Note> {
        let mut matching = notes
            .into_iter()
            .filter(|note| self.matches(note))
            .collect::<Vec<_>>();

        match self.sort {
            SortBy::Newest => matching.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortBy::Distance(origin) => matching.sort_by(|a, b| {
                origin
                    .distance_to(GeoPoint::of(a))
                    .total_cmp(&origin.distance_to(GeoPoint::of(b)))
            }),
        }
        matching
    }
}

/// Notes split by creation day
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteGroups {
    pub today: Vec<Note>,
    pub older: Vec<Note>,
}

/// Split notes into those created on `now`'s calendar day and the rest.
///
/// The day boundary follows `now`'s time zone. Input order is preserved
/// within each group.
pub fn group_by_day<Tz: TimeZone>(notes: Vec<Note>, now: &DateTime<Tz>) -> NoteGroups {
    let today = now.date_naive();
    let zone = now.timezone();
    let mut groups = NoteGroups::default();

    for note in notes {
        let created_today = zone
            .timestamp_millis_opt(note.created_at)
            .single()
            .is_some_and(|created| created.date_naive() == today);
        if created_today {
            groups.today.push(note);
        } else {
            groups.older.push(note);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewNote, NoteId};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn note(id: &str, content: &str, created_at: i64, lat: f64, lon: f64) -> Note {
        let mut note = Note::from_draft(&NewNote::new(content, lat, lon));
        note.id = NoteId::new(id);
        note.created_at = created_at;
        note.updated_at = created_at;
        note
    }

    fn ids(notes: &[Note]) -> Vec<&str> {
        notes.iter().map(|note| note.id.as_str()).collect()
    }

    #[test]
    fn distance_between_known_cities() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        let london = GeoPoint::new(51.5074, -0.1278);
        let km = paris.distance_to(london) / 1000.0;
        assert!((km - 343.5).abs() < 2.0, "got {km}");
        assert!(paris.distance_to(paris).abs() < f64::EPSILON);
    }

    #[test]
    fn text_and_date_filters_combine() {
        let notes = vec![
            note("a", "Coffee at the corner", 100, 0.0, 0.0),
            note("b", "coffee beans", 300, 0.0, 0.0),
            note("c", "Bus stop", 200, 0.0, 0.0),
        ];
        let filter = NoteFilter {
            text: Some("COFFEE".to_string()),
            start: Some(150),
            ..NoteFilter::default()
        };
        assert_eq!(ids(&filter.apply(notes.clone())), vec!["b"]);

        let everything = NoteFilter::default().apply(notes);
        assert_eq!(ids(&everything), vec!["b", "c", "a"]);
    }

    #[test]
    fn sort_by_distance_from_origin() {
        let notes = vec![
            note("far", "x", 1, 10.0, 10.0),
            note("near", "x", 2, 0.1, 0.1),
            note("mid", "x", 3, 1.0, 1.0),
        ];
        let filter = NoteFilter {
            sort: SortBy::Distance(GeoPoint::new(0.0, 0.0)),
            ..NoteFilter::default()
        };
        assert_eq!(ids(&filter.apply(notes)), vec!["near", "mid", "far"]);
    }

    #[test]
    fn group_by_day_splits_on_calendar_day() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        let midnight = Utc
            .with_ymd_and_hms(2026, 3, 14, 0, 0, 0)
            .unwrap()
            .timestamp_millis();
        let notes = vec![
            note("late-yesterday", "x", midnight - 1, 0.0, 0.0),
            note("this-morning", "x", midnight + 5_000, 0.0, 0.0),
        ];

        let groups = group_by_day(notes, &now);
        assert_eq!(ids(&groups.today), vec!["this-morning"]);
        assert_eq!(ids(&groups.older), vec!["late-yesterday"]);
    }
}
