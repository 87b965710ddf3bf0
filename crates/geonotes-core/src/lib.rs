//! geonotes-core - Core library for geonotes
//!
//! Models, the local durable cache, the remote store boundary, and the sync
//! coordinator that replays offline edits. Used by the CLI and any other
//! geonotes client.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod remote;
pub mod search;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{NewNote, Note, NoteId, SyncState};
