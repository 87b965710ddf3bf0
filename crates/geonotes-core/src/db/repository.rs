//! Local durable cache: notes and the pending change queue

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{
    ChangeKind, NewSyncConflict, Note, NoteChange, NoteId, QueuedChange, SyncConflict, SyncState,
};
use crate::util::unix_millis_now;

/// How a replayed queue entry was settled.
///
/// Applied atomically together with the removal of the entry, so a crash
/// never leaves an acknowledged change in the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeResolution {
    /// The remote acknowledged the change and returned its copy
    Stored(Note),
    /// A queued create was acknowledged; the placeholder gets the server id
    Replaced { temp_id: NoteId, note: Note },
    /// The remote no longer has the note
    Removed(NoteId),
    /// The change cannot be applied; the local copy is flagged `conflict`
    Flagged {
        id: NoteId,
        conflict: NewSyncConflict,
    },
}

/// Trait for local note storage operations
pub trait LocalNoteStore: Send + Sync {
    /// Upsert a note by id; an unset status is stored as `pending`
    fn save_note(&self, note: &Note) -> Result<Note>;

    /// Get a note by id (temporary ids follow their server alias)
    fn get_note(&self, id: &NoteId) -> Result<Option<Note>>;

    /// All cached notes, oldest first
    fn get_local_notes(&self) -> Result<Vec<Note>>;

    /// Notes waiting for a queued mutation to be acknowledged
    fn get_pending_notes(&self) -> Result<Vec<Note>>;

    /// Delete a note from the cache
    fn remove_note(&self, id: &NoteId) -> Result<bool>;

    /// Set a note's status in place; no-op when the note is absent
    fn update_sync_status(&self, id: &NoteId, status: SyncState) -> Result<()>;

    /// Merge an authoritative note list into the cache
    ///
    /// Remote copies replace `synced` notes, `pending` and `conflict` notes
    /// are kept, and `synced` notes the remote no longer has are removed.
    fn apply_remote_snapshot(&self, notes: &[Note]) -> Result<()>;

    /// Append a change to the queue
    fn queue_change(&self, change: &NoteChange) -> Result<QueuedChange>;

    /// Save the change's note as `pending` and queue the change in one step
    fn stage_change(&self, change: &NoteChange) -> Result<QueuedChange>;

    /// Queue in replay order
    fn get_pending_changes(&self) -> Result<Vec<QueuedChange>>;

    /// Replace a placeholder id with the server-assigned note.
    ///
    /// Queued entries for `temp_id` are rewritten to the server id and later
    /// lookups of `temp_id` resolve to it.
    fn replace_note_id(&self, temp_id: &NoteId, server_note: &Note) -> Result<()>;

    /// Number of queued changes
    fn pending_change_count(&self) -> Result<usize>;

    /// Remove exactly the given queue entries
    fn clear_pending_changes(&self, processed: &[i64]) -> Result<usize>;

    /// Count a transient replay failure; returns the new attempt count
    fn record_failed_attempt(&self, seq: i64, error: &str) -> Result<u32>;

    /// Settle a replayed queue entry
    fn complete_change(&self, seq: i64, resolution: &ChangeResolution) -> Result<()>;

    /// Persist a conflict record
    fn record_conflict(&self, conflict: &NewSyncConflict) -> Result<SyncConflict>;

    /// Most recent conflict records first
    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Wipe notes, queue, aliases and conflict records
    fn clear_storage(&self) -> Result<()>;
}

/// `SQLite` implementation of `LocalNoteStore`
pub struct SqliteNoteStore {
    db: Mutex<Database>,
}

const NOTE_COLUMNS: &str =
    "id, user_id, content, latitude, longitude, accuracy, created_at, updated_at, version, sync_status";

impl SqliteNoteStore {
    /// Open (or create) the cache file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Open an in-memory cache (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| Error::LockPoisoned)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(db.connection())
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.lock()?;
        let tx = db.connection_mut().transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Parse a note from a database row
    fn parse_note(row: &Row<'_>) -> rusqlite::Result<Note> {
        let status = row
            .get::<_, String>(9)?
            .parse::<SyncState>()
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    error.to_string().into(),
                )
            })?;
        Ok(Note {
            id: NoteId::new(row.get::<_, String>(0)?),
            user_id: row.get(1)?,
            content: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            accuracy: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            version: row.get(8)?,
            sync_status: Some(status),
        })
    }

    fn query_notes(conn: &Connection, filter: &str) -> Result<Vec<Note>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM notes {filter} ORDER BY created_at ASC, id ASC"
        ))?;
        let notes = stmt
            .query_map([], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }

    fn fetch_note(conn: &Connection, id: &NoteId) -> Result<Option<Note>> {
        let note = conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                params![id.as_str()],
                Self::parse_note,
            )
            .optional()?;
        Ok(note)
    }

    fn upsert_note(conn: &Connection, note: &Note, status: SyncState) -> Result<()> {
        conn.execute(
            "INSERT INTO notes (id, user_id, content, latitude, longitude, accuracy, created_at, updated_at, version, sync_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                content = excluded.content,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                accuracy = excluded.accuracy,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                version = excluded.version,
                sync_status = excluded.sync_status",
            params![
                note.id.as_str(),
                note.user_id,
                note.content,
                note.latitude,
                note.longitude,
                note.accuracy,
                note.created_at,
                note.updated_at,
                note.version,
                status.as_str()
            ],
        )?;
        Ok(())
    }

    /// Follow the alias of a temporary id that was already reconciled
    fn canonical_id(conn: &Connection, id: &NoteId) -> Result<NoteId> {
        if !id.is_temporary() {
            return Ok(id.clone());
        }

        let server_id: Option<String> = conn
            .query_row(
                "SELECT server_id FROM note_id_aliases WHERE temp_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(server_id.map_or_else(|| id.clone(), NoteId::new))
    }

    /// Point queued entries of `old_id` at the acknowledged note.
    ///
    /// Later entries for the same note were made on top of the acknowledged
    /// one, so they adopt its server version as their base.
    fn rebase_queued(conn: &Connection, old_id: &NoteId, acknowledged: &Note) -> Result<usize> {
        let queued = {
            let mut stmt =
                conn.prepare("SELECT seq, payload FROM pending_changes WHERE note_id = ?1")?;
            let rows = stmt
                .query_map(params![old_id.as_str()], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for (seq, payload) in &queued {
            let mut note: Note = serde_json::from_str(payload)?;
            note.id = acknowledged.id.clone();
            note.version = acknowledged.version;
            conn.execute(
                "UPDATE pending_changes SET note_id = ?1, payload = ?2 WHERE seq = ?3",
                params![acknowledged.id.as_str(), serde_json::to_string(&note)?, seq],
            )?;
        }

        Ok(queued.len())
    }

    /// Store an acknowledged note, keeping newer local edits that are still queued
    fn store_acknowledged(
        conn: &Connection,
        local: Option<Note>,
        acknowledged: &Note,
        remaining: usize,
    ) -> Result<()> {
        if remaining == 0 {
            return Self::upsert_note(conn, acknowledged, SyncState::Synced);
        }

        let merged = match local {
            Some(local) => Note {
                id: acknowledged.id.clone(),
                user_id: acknowledged.user_id.clone().or(local.user_id),
                created_at: acknowledged.created_at,
                version: acknowledged.version,
                ..local
            },
            None => acknowledged.clone(),
        };
        Self::upsert_note(conn, &merged, SyncState::Pending)
    }

    /// Swap a placeholder row for the server's copy and remember the alias
    fn reconcile_id(conn: &Connection, temp_id: &NoteId, server_note: &Note) -> Result<()> {
        let local = Self::fetch_note(conn, temp_id)?;
        conn.execute("DELETE FROM notes WHERE id = ?1", params![temp_id.as_str()])?;
        conn.execute(
            "INSERT OR REPLACE INTO note_id_aliases (temp_id, server_id) VALUES (?1, ?2)",
            params![temp_id.as_str(), server_note.id.as_str()],
        )?;
        let remaining = Self::rebase_queued(conn, temp_id, server_note)?;
        Self::store_acknowledged(conn, local, server_note, remaining)
    }

    fn insert_change(conn: &Connection, change: &NoteChange) -> Result<QueuedChange> {
        let mut note = change.note.clone();
        note.id = Self::canonical_id(conn, &change.note.id)?;
        note.sync_status = None;

        // Keep enqueue time non-decreasing even if the wall clock steps back
        let last_timestamp: i64 = conn.query_row(
            "SELECT COALESCE(MAX(timestamp), 0) FROM pending_changes",
            [],
            |row| row.get(0),
        )?;
        let timestamp = change.timestamp.max(last_timestamp);

        conn.execute(
            "INSERT INTO pending_changes (kind, note_id, payload, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![
                change.kind.as_str(),
                note.id.as_str(),
                serde_json::to_string(&note)?,
                timestamp
            ],
        )?;

        Ok(QueuedChange {
            seq: conn.last_insert_rowid(),
            change: NoteChange {
                kind: change.kind,
                note,
                timestamp,
            },
            attempts: 0,
            last_error: None,
        })
    }

    fn delete_entry(conn: &Connection, seq: i64) -> Result<()> {
        conn.execute("DELETE FROM pending_changes WHERE seq = ?1", params![seq])?;
        Ok(())
    }

    fn insert_conflict(conn: &Connection, conflict: &NewSyncConflict) -> Result<SyncConflict> {
        let resolved_at = unix_millis_now();
        conn.execute(
            "INSERT INTO sync_conflicts (note_id, local_version, remote_version, strategy, reason, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conflict.note_id,
                conflict.local_version,
                conflict.remote_version,
                conflict.strategy,
                conflict.reason,
                resolved_at
            ],
        )?;

        Ok(SyncConflict {
            id: conn.last_insert_rowid(),
            note_id: conflict.note_id.clone(),
            local_version: conflict.local_version,
            remote_version: conflict.remote_version,
            strategy: conflict.strategy.clone(),
            reason: conflict.reason.clone(),
            resolved_at,
        })
    }
}

impl LocalNoteStore for SqliteNoteStore {
    fn save_note(&self, note: &Note) -> Result<Note> {
        self.write(|tx| {
            let status = note.sync_status.unwrap_or(SyncState::Pending);
            let mut stored = note.clone();
            stored.id = Self::canonical_id(tx, &note.id)?;
            stored.sync_status = Some(status);
            Self::upsert_note(tx, &stored, status)?;
            Ok(stored)
        })
    }

    fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.read(|conn| {
            let id = Self::canonical_id(conn, id)?;
            Self::fetch_note(conn, &id)
        })
    }

    fn get_local_notes(&self) -> Result<Vec<Note>> {
        self.read(|conn| Self::query_notes(conn, ""))
    }

    fn get_pending_notes(&self) -> Result<Vec<Note>> {
        self.read(|conn| Self::query_notes(conn, "WHERE sync_status = 'pending'"))
    }

    fn remove_note(&self, id: &NoteId) -> Result<bool> {
        self.write(|tx| {
            let id = Self::canonical_id(tx, id)?;
            let rows = tx.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
            Ok(rows > 0)
        })
    }

    fn update_sync_status(&self, id: &NoteId, status: SyncState) -> Result<()> {
        self.write(|tx| {
            let id = Self::canonical_id(tx, id)?;
            tx.execute(
                "UPDATE notes SET sync_status = ?1 WHERE id = ?2",
                params![status.as_str(), id.as_str()],
            )?;
            Ok(())
        })
    }

    fn apply_remote_snapshot(&self, notes: &[Note]) -> Result<()> {
        self.write(|tx| {
            let mut remote_ids = HashSet::with_capacity(notes.len());
            for note in notes {
                remote_ids.insert(note.id.as_str());
                let local_status: Option<String> = tx
                    .query_row(
                        "SELECT sync_status FROM notes WHERE id = ?1",
                        params![note.id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;

                if matches!(local_status.as_deref(), Some("pending" | "conflict")) {
                    continue;
                }
                Self::upsert_note(tx, note, SyncState::Synced)?;
            }

            let synced_ids = {
                let mut stmt = tx.prepare("SELECT id FROM notes WHERE sync_status = 'synced'")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let mut removed = 0usize;
            for id in synced_ids
                .iter()
                .filter(|id| !remote_ids.contains(id.as_str()))
            {
                removed += tx.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
            }

            tracing::debug!(
                "Applied remote snapshot: {} notes, {} stale removed",
                notes.len(),
                removed
            );
            Ok(())
        })
    }

    fn queue_change(&self, change: &NoteChange) -> Result<QueuedChange> {
        self.write(|tx| Self::insert_change(tx, change))
    }

    fn stage_change(&self, change: &NoteChange) -> Result<QueuedChange> {
        self.write(|tx| {
            let mut note = change.note.clone();
            note.id = Self::canonical_id(tx, &change.note.id)?;
            Self::upsert_note(tx, &note, SyncState::Pending)?;
            Self::insert_change(tx, change)
        })
    }

    fn get_pending_changes(&self) -> Result<Vec<QueuedChange>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, kind, payload, timestamp, attempts, last_error
                 FROM pending_changes
                 ORDER BY timestamp ASC, seq ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(seq, kind, payload, timestamp, attempts, last_error)| -> Result<QueuedChange> {
                    Ok(QueuedChange {
                        seq,
                        change: NoteChange {
                            kind: kind.parse::<ChangeKind>()?,
                            note: serde_json::from_str(&payload)?,
                            timestamp,
                        },
                        attempts,
                        last_error,
                    })
                })
                .collect()
        })
    }

    fn replace_note_id(&self, temp_id: &NoteId, server_note: &Note) -> Result<()> {
        self.write(|tx| Self::reconcile_id(tx, temp_id, server_note))
    }

    fn pending_change_count(&self) -> Result<usize> {
        self.read(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| {
                row.get::<_, usize>(0)
            })?;
            Ok(count)
        })
    }

    fn clear_pending_changes(&self, processed: &[i64]) -> Result<usize> {
        self.write(|tx| {
            let mut removed = 0;
            for seq in processed {
                removed += tx.execute("DELETE FROM pending_changes WHERE seq = ?1", params![seq])?;
            }
            Ok(removed)
        })
    }

    fn record_failed_attempt(&self, seq: i64, error: &str) -> Result<u32> {
        self.write(|tx| {
            tx.execute(
                "UPDATE pending_changes SET attempts = attempts + 1, last_error = ?1 WHERE seq = ?2",
                params![error, seq],
            )?;
            let attempts = tx
                .query_row(
                    "SELECT attempts FROM pending_changes WHERE seq = ?1",
                    params![seq],
                    |row| row.get::<_, u32>(0),
                )
                .optional()?;
            Ok(attempts.unwrap_or(0))
        })
    }

    fn complete_change(&self, seq: i64, resolution: &ChangeResolution) -> Result<()> {
        self.write(|tx| {
            Self::delete_entry(tx, seq)?;

            match resolution {
                ChangeResolution::Stored(note) => {
                    let local = Self::fetch_note(tx, &note.id)?;
                    let remaining = Self::rebase_queued(tx, &note.id, note)?;
                    Self::store_acknowledged(tx, local, note, remaining)?;
                }
                ChangeResolution::Replaced { temp_id, note } => {
                    Self::reconcile_id(tx, temp_id, note)?;
                }
                ChangeResolution::Removed(id) => {
                    tx.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
                }
                ChangeResolution::Flagged { id, conflict } => {
                    tx.execute(
                        "UPDATE notes SET sync_status = 'conflict' WHERE id = ?1",
                        params![id.as_str()],
                    )?;
                    Self::insert_conflict(tx, conflict)?;
                }
            }

            Ok(())
        })
    }

    fn record_conflict(&self, conflict: &NewSyncConflict) -> Result<SyncConflict> {
        self.write(|tx| Self::insert_conflict(tx, conflict))
    }

    fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, note_id, local_version, remote_version, strategy, reason, resolved_at
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let conflicts = stmt
                .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                    Ok(SyncConflict {
                        id: row.get(0)?,
                        note_id: row.get(1)?,
                        local_version: row.get(2)?,
                        remote_version: row.get(3)?,
                        strategy: row.get(4)?,
                        reason: row.get(5)?,
                        resolved_at: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(conflicts)
        })
    }

    fn clear_storage(&self) -> Result<()> {
        self.write(|tx| {
            tx.execute_batch(
                "DELETE FROM pending_changes;
                 DELETE FROM notes;
                 DELETE FROM note_id_aliases;
                 DELETE FROM sync_conflicts;",
            )?;
            Ok(())
        })?;
        tracing::info!("Local cache cleared");
        Ok(())
    }
}
