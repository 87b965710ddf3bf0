//! Local durable cache for geonotes

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::{ChangeResolution, LocalNoteStore, SqliteNoteStore};
