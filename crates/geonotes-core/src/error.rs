//! Error types for geonotes-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using geonotes-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in geonotes-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error from the local cache
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Note not found
    #[error("Note not found: {0}")]
    NotFound(String),

    /// Invalid input (rejected before any cache or network write)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store failure that could not be absorbed by the offline queue
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Conflict strategy without a handler
    #[error("Conflict strategy '{0}' is not supported")]
    UnsupportedStrategy(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cache lock was poisoned by a panicking writer
    #[error("Local cache lock poisoned")]
    LockPoisoned,

    /// The sync run was cancelled (e.g. on sign-out)
    #[error("Sync run cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error came from the local durability layer.
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::LockPoisoned
        )
    }
}
