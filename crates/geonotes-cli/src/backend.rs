//! Remote store selection and cache wiring for CLI commands.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geonotes_core::config::ClientConfig;
use geonotes_core::db::SqliteNoteStore;
use geonotes_core::remote::{HttpNoteStore, RemoteError, RemoteNoteStore, RemoteResult};
use geonotes_core::services::NoteService;
use geonotes_core::sync::SyncCoordinator;
use geonotes_core::{Note, NoteId};

use crate::error::CliError;

pub const ENV_CONFIG_PATH: &str = "GEONOTES_CONFIG";

pub type Notes = NoteService<Backend, SqliteNoteStore>;
pub type Coordinator = SyncCoordinator<Backend, SqliteNoteStore>;

/// The remote the CLI talks to.
///
/// Without an API URL every mutation is kept in the local queue until a
/// remote is configured.
#[derive(Debug)]
pub enum Backend {
    Http(HttpNoteStore),
    Disconnected,
}

impl Backend {
    pub fn from_config(config: &ClientConfig) -> Result<Self, CliError> {
        let Some(url) = config.api_base_url.as_deref() else {
            return Ok(Self::Disconnected);
        };
        let store = HttpNoteStore::new(
            url,
            config.access_token.clone(),
            config.request_timeout(),
        )?;
        Ok(Self::Http(store))
    }

    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

fn disconnected() -> RemoteError {
    RemoteError::Transient("no remote store configured".to_string())
}

impl RemoteNoteStore for Backend {
    async fn create_note(&self, note: &Note) -> RemoteResult<Note> {
        match self {
            Self::Http(store) => store.create_note(note).await,
            Self::Disconnected => Err(disconnected()),
        }
    }

    async fn update_note(&self, note: &Note) -> RemoteResult<Note> {
        match self {
            Self::Http(store) => store.update_note(note).await,
            Self::Disconnected => Err(disconnected()),
        }
    }

    async fn delete_note(&self, id: &NoteId) -> RemoteResult<()> {
        match self {
            Self::Http(store) => store.delete_note(id).await,
            Self::Disconnected => Err(disconnected()),
        }
    }

    async fn get_notes(&self) -> RemoteResult<Vec<Note>> {
        match self {
            Self::Http(store) => store.get_notes().await,
            Self::Disconnected => Err(disconnected()),
        }
    }
}

/// Paths and configuration shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub config: ClientConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl Context {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_config_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = resolve_config_path(cli_config_path)?;
        let config = ClientConfig::load(&config_path)?.with_env();
        let db_path = match cli_db_path.or_else(|| config.db_path()) {
            Some(path) => path,
            None => default_db_path()?,
        };

        Ok(Self {
            config,
            config_path,
            db_path,
        })
    }

    /// Open the cache and wire the coordinator to the configured remote
    pub fn open_notes(&self) -> Result<Notes, CliError> {
        let store = open_store(&self.db_path)?;
        let backend = Backend::from_config(&self.config)?;
        let coordinator = SyncCoordinator::new(
            Arc::new(backend),
            Arc::new(store),
            self.config.sync_options(),
        );
        coordinator.refresh_pending()?;
        Ok(NoteService::new(Arc::new(coordinator)))
    }
}

pub fn open_store(path: &Path) -> Result<SqliteNoteStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteNoteStore::open(path)?)
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_config_path.or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from)) {
        return Ok(path);
    }
    dirs::config_dir()
        .map(|dir| dir.join("geonotes").join("config.json"))
        .ok_or_else(|| CliError::Config("failed to resolve config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("geonotes").join("geonotes.db"))
        .ok_or_else(|| CliError::Config("failed to resolve data directory".to_string()))
}
