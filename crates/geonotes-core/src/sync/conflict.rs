//! Conflict strategies

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Note;

/// Which side wins when a queued update is based on an outdated version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Local content overwrites the remote copy
    Client,
    /// The remote copy is kept; the local edit is flagged for review
    #[default]
    Server,
    /// Nothing is applied automatically
    Manual,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" | "local" => Ok(Self::Client),
            "server" | "remote" => Ok(Self::Server),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict strategy '{other}' (expected client, server or manual)"
            ))),
        }
    }
}

/// The copy that survives a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Winner {
    /// Push this content on top of the remote version
    Local(Note),
    /// Adopt the remote copy as-is
    Remote(Note),
}

/// Pick the surviving copy of a conflicted note.
///
/// `Manual` has no automatic winner and is rejected with
/// [`Error::UnsupportedStrategy`].
pub fn choose(local: &Note, remote: &Note, strategy: ConflictStrategy) -> Result<Winner> {
    match strategy {
        ConflictStrategy::Client => {
            let mut winner = local.clone();
            winner.id = remote.id.clone();
            winner.version = remote.version;
            winner.created_at = remote.created_at;
            winner.user_id.clone_from(&remote.user_id);
            Ok(Winner::Local(winner))
        }
        ConflictStrategy::Server => Ok(Winner::Remote(remote.clone())),
        ConflictStrategy::Manual => Err(Error::UnsupportedStrategy(strategy.to_string())),
    }
}

/// Whether a queued update was made on top of an outdated copy
pub const fn is_stale(queued: &Note, remote: &Note) -> bool {
    remote.version > queued.version
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewNote, NoteId};
    use pretty_assertions::assert_eq;

    fn pair() -> (Note, Note) {
        let mut local = Note::from_draft(&NewNote::new("local edit", 1.0, 2.0));
        local.id = NoteId::new("n1");
        let mut remote = local.clone();
        remote.content = "remote edit".to_string();
        remote.version = 3;
        remote.user_id = Some("alice".to_string());
        remote.sync_status = None;
        (local, remote)
    }

    #[test]
    fn client_keeps_local_content_on_remote_version() {
        let (local, remote) = pair();
        let Winner::Local(winner) = choose(&local, &remote, ConflictStrategy::Client).unwrap()
        else {
            panic!("expected local winner");
        };
        assert_eq!(winner.content, "local edit");
        assert_eq!(winner.version, 3);
        assert_eq!(winner.user_id.as_deref(), Some("alice"));
    }

    #[test]
    fn server_keeps_remote_copy() {
        let (local, remote) = pair();
        assert_eq!(
            choose(&local, &remote, ConflictStrategy::Server).unwrap(),
            Winner::Remote(remote)
        );
    }

    #[test]
    fn manual_is_unsupported() {
        let (local, remote) = pair();
        assert!(matches!(
            choose(&local, &remote, ConflictStrategy::Manual),
            Err(Error::UnsupportedStrategy(name)) if name == "manual"
        ));
    }

    #[test]
    fn stale_when_remote_is_ahead() {
        let (local, remote) = pair();
        assert!(is_stale(&local, &remote));
        assert!(!is_stale(&remote, &local));
    }

    #[test]
    fn parse_strategy_names() {
        assert_eq!("Client".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Client);
        assert_eq!("remote".parse::<ConflictStrategy>().unwrap(), ConflictStrategy::Server);
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::Server);
        assert!("newest".parse::<ConflictStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&ConflictStrategy::Manual).unwrap(),
            "\"manual\""
        );
    }
}
