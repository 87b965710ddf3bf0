//! Client configuration.
//!
//! `ClientConfig` is read from a JSON file, then environment overrides are
//! applied on top. The file location is chosen by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::{ConflictStrategy, RetryPolicy, SyncOptions};
use crate::util::{is_http_url, non_blank};

pub const ENV_API_URL: &str = "GEONOTES_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "GEONOTES_ACCESS_TOKEN";
pub const ENV_DB_PATH: &str = "GEONOTES_DB_PATH";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Keys accepted by [`ClientConfig::set`]
pub const CONFIG_KEYS: &[&str] = &[
    "api_base_url",
    "access_token",
    "db_path",
    "request_timeout_secs",
    "max_attempts",
    "conflict_strategy",
    "sync_interval_secs",
];

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the notes API; unset means local-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Cache file override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            access_token: None,
            db_path: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            conflict_strategy: ConflictStrategy::default(),
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("conflict_strategy", &self.conflict_strategy)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Read the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!("invalid config file '{}': {error}", path.display()))
        })?;
        config.normalized()
    }

    /// Write the config file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let config = self.clone().normalized()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, format!("{payload}\n"))?;
        Ok(())
    }

    /// Apply process environment overrides
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (keyed by the `GEONOTES_*` names)
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = non_blank(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = non_blank(lookup(ENV_ACCESS_TOKEN)) {
            self.access_token = Some(token);
        }
        if let Some(path) = non_blank(lookup(ENV_DB_PATH)) {
            self.db_path = Some(path);
        }
        self
    }

    /// Trim text fields and check value ranges.
    pub fn normalized(mut self) -> Result<Self> {
        self.api_base_url = non_blank(self.api_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        self.access_token = non_blank(self.access_token);
        self.db_path = non_blank(self.db_path);

        if let Some(url) = self.api_base_url.as_deref() {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::Config(
                "sync_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }

    /// Set one key from its string form; `self` is unchanged on error
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        let text = non_blank(Some(value.to_string()));
        match key {
            "api_base_url" => next.api_base_url = text,
            "access_token" => next.access_token = text,
            "db_path" => next.db_path = text,
            "request_timeout_secs" => next.request_timeout_secs = parse_number(key, value)?,
            "max_attempts" => next.max_attempts = parse_number(key, value)?,
            "conflict_strategy" => next.conflict_strategy = value.parse()?,
            "sync_interval_secs" => next.sync_interval_secs = parse_number(key, value)?,
            other => {
                return Err(Error::Config(format!(
                    "unknown config key '{other}' (expected one of: {})",
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        *self = next.normalized()?;
        Ok(())
    }

    /// Whether a remote backend is configured
    pub const fn is_remote_enabled(&self) -> bool {
        self.api_base_url.is_some()
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.db_path.as_deref().map(PathBuf::from)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            strategy: self.conflict_strategy,
            retry: RetryPolicy::default().with_max_attempts(self.max_attempts),
            request_timeout: self.request_timeout(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be a positive integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let config = ClientConfig::load(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync_options().retry.max_attempts, 5);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let mut config = ClientConfig::default();
        config.set("api_base_url", " https://api.example.com/ ").unwrap();
        config.set("conflict_strategy", "client").unwrap();
        config.set("max_attempts", "3").unwrap();
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(loaded.conflict_strategy, ConflictStrategy::Client);
        assert_eq!(loaded.max_attempts, 3);
    }

    #[test]
    fn rejects_unknown_fields_and_bad_values() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url":"https://x.test","colour":"red"}"#).unwrap();
        assert!(ClientConfig::load(&path).is_err());

        let mut config = ClientConfig::default();
        assert!(config.set("api_base_url", "ftp://x.test").is_err());
        assert!(config.set("max_attempts", "0").is_err());
        assert!(config.set("max_attempts", "many").is_err());
        assert!(config.set("colour", "red").is_err());
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn env_overrides_apply_over_file_values() {
        let config = ClientConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..ClientConfig::default()
        }
        .with_overrides(|key| match key {
            ENV_API_URL => Some("https://env.example.com".to_string()),
            ENV_ACCESS_TOKEN => Some("  ".to_string()),
            ENV_DB_PATH => Some("/tmp/geonotes.db".to_string()),
            _ => None,
        });

        assert_eq!(config.api_base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.access_token, None);
        assert_eq!(config.db_path(), Some(PathBuf::from("/tmp/geonotes.db")));
    }

    #[test]
    fn debug_redacts_access_token() {
        let config = ClientConfig {
            access_token: Some("secret".to_string()),
            ..ClientConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
