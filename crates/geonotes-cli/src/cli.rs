use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use geonotes_core::search::GeoPoint;
use geonotes_core::sync::ConflictStrategy;

#[derive(Parser)]
#[command(name = "geonotes")]
#[command(about = "Geotagged sticky notes that keep working offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local cache file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pin a new note at a position
    #[command(alias = "new")]
    Add {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Horizontal accuracy in metres
        #[arg(long)]
        accuracy: Option<f64>,
        /// Note content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
    /// List cached notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only notes whose content contains this text
        #[arg(short, long)]
        search: Option<String>,
        /// Only notes created on or after this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        since: Option<String>,
        /// Only notes created on or before this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        until: Option<String>,
        /// Sort by distance from a point instead of recency
        #[arg(long, value_name = "LAT,LON", value_parser = parse_point, allow_hyphen_values = true)]
        near: Option<GeoPoint>,
        /// Split output into today and earlier
        #[arg(long)]
        group: bool,
        /// Refresh from the remote before listing
        #[arg(long)]
        refresh: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one note
    Show {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit the content of a note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New content ($EDITOR when omitted)
        content: Vec<String>,
    },
    /// Move a note to another position
    Move {
        /// Note ID or unique ID prefix
        id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long)]
        accuracy: Option<f64>,
    },
    /// Delete a note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Export cached notes
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Replay queued changes against the remote store
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show queue and cache status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read or change client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign out: discard every cached note and queued change
    Reset {
        /// Confirm that unsynced changes may be lost
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Geojson,
}

impl From<ExportFormat> for geonotes_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Geojson => Self::GeoJson,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Strategy {
    /// Keep this device's edit
    Client,
    /// Keep the remote copy
    Server,
}

impl From<Strategy> for ConflictStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Client => Self::Client,
            Strategy::Server => Self::Server,
        }
    }
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between runs (config value when omitted)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// List queued changes in replay order
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop queued changes by sequence number
    Drop {
        /// Sequence numbers from `geonotes sync pending`
        #[arg(required = true)]
        seqs: Vec<i64>,
    },
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflicted note
    Resolve {
        /// Note ID or unique ID prefix
        id: String,
        /// Which copy wins
        #[arg(long, value_enum, default_value_t = Strategy::Server)]
        keep: Strategy,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one config key
    Set {
        /// Config key
        key: String,
        /// New value (empty clears optional keys)
        value: String,
    },
    /// Print the config file location
    Path,
}

/// Parse `LAT,LON` into a point
pub fn parse_point(value: &str) -> Result<GeoPoint, String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{value}'"))?;
    let latitude = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid latitude '{}'", lat.trim()))?;
    let longitude = lon
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid longitude '{}'", lon.trim()))?;
    geonotes_core::models::validate_position(latitude, longitude, None)
        .map_err(|error| error.to_string())?;
    Ok(GeoPoint::new(latitude, longitude))
}
