//! In-process remote store with fault injection

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::{RemoteError, RemoteNoteStore, RemoteResult};
use crate::models::{Note, NoteId};
use crate::util::{not_before, unix_millis_now};

/// Remote operation, as seen by [`InMemoryNoteStore::on_call`] hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    List,
}

type CallHook = Arc<dyn Fn(RemoteOp) + Send + Sync>;

struct MemoryState {
    notes: BTreeMap<String, Note>,
    principal: Option<String>,
    offline: bool,
    scripted: VecDeque<RemoteError>,
    latency: Option<Duration>,
    hook: Option<CallHook>,
    calls: Vec<RemoteOp>,
}

/// Versioned note backend kept in memory.
///
/// Behaves like the hosted backend: ids are assigned on create, `version`
/// increments on every update and notes are scoped to the signed-in
/// principal. Clones share state.
#[derive(Clone)]
pub struct InMemoryNoteStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for InMemoryNoteStore {
    fn default() -> Self {
        Self::new("local-user")
    }
}

impl fmt::Debug for InMemoryNoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryNoteStore")
            .field("notes", &state.notes.len())
            .field("principal", &state.principal)
            .field("offline", &state.offline)
            .finish_non_exhaustive()
    }
}

impl InMemoryNoteStore {
    /// Create an empty backend signed in as `principal`
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                notes: BTreeMap::new(),
                principal: Some(principal.into()),
                offline: false,
                scripted: VecDeque::new(),
                latency: None,
                hook: None,
                calls: Vec::new(),
            })),
        }
    }

    // A panicking test hook must not wedge every later call
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every call with a transient error until switched back
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Change the signed-in principal; `None` signs out
    pub fn set_principal(&self, principal: Option<&str>) {
        self.lock().principal = principal.map(str::to_string);
    }

    /// Fail the next call with `error`; scripted errors are consumed in order
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted.push_back(error);
    }

    /// Delay each call before it is handled
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Run `hook` at the start of every call, before faults are applied
    pub fn on_call(&self, hook: impl Fn(RemoteOp) + Send + Sync + 'static) {
        self.lock().hook = Some(Arc::new(hook));
    }

    /// Store a note as-is, bypassing versioning (seeds server-side state)
    pub fn insert(&self, mut note: Note) {
        note.sync_status = None;
        self.lock().notes.insert(note.id.to_string(), note);
    }

    /// Current server copy of a note
    pub fn get(&self, id: &NoteId) -> Option<Note> {
        self.lock().notes.get(id.as_str()).cloned()
    }

    /// Every stored note regardless of owner, oldest first
    pub fn notes(&self) -> Vec<Note> {
        let mut notes = self.lock().notes.values().cloned().collect::<Vec<_>>();
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        notes
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<RemoteOp> {
        self.lock().calls.clone()
    }

    /// Number of calls of one kind received so far
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.lock().calls.iter().filter(|call| **call == op).count()
    }

    /// Record the call, run the hook, wait out latency, then apply faults.
    async fn enter(&self, op: RemoteOp) -> RemoteResult<String> {
        let (hook, latency) = {
            let mut state = self.lock();
            state.calls.push(op);
            (state.hook.clone(), state.latency)
        };

        if let Some(hook) = hook {
            hook(op);
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.scripted.pop_front() {
            debug!("In-memory remote failing {:?} with scripted error: {}", op, error);
            return Err(error);
        }
        if state.offline {
            return Err(RemoteError::Transient("remote store is offline".to_string()));
        }
        state.principal.clone().ok_or(RemoteError::NotAuthenticated)
    }

    fn owned<'a>(
        notes: &'a mut BTreeMap<String, Note>,
        id: &NoteId,
        principal: &str,
    ) -> RemoteResult<&'a mut Note> {
        let note = notes
            .get_mut(id.as_str())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        match note.user_id.as_deref() {
            Some(owner) if owner != principal => Err(RemoteError::Forbidden(id.to_string())),
            _ => Ok(note),
        }
    }
}

impl RemoteNoteStore for InMemoryNoteStore {
    async fn create_note(&self, note: &Note) -> RemoteResult<Note> {
        let principal = self.enter(RemoteOp::Create).await?;
        let now = unix_millis_now();
        let created = Note {
            id: NoteId::from(uuid::Uuid::now_v7()),
            user_id: Some(principal),
            content: note.content.clone(),
            latitude: note.latitude,
            longitude: note.longitude,
            accuracy: note.accuracy,
            created_at: now,
            updated_at: now,
            version: 1,
            sync_status: None,
        };
        self.lock()
            .notes
            .insert(created.id.to_string(), created.clone());
        Ok(created)
    }

    async fn update_note(&self, note: &Note) -> RemoteResult<Note> {
        let principal = self.enter(RemoteOp::Update).await?;
        let mut state = self.lock();
        let stored = Self::owned(&mut state.notes, &note.id, &principal)?;
        stored.content.clone_from(&note.content);
        stored.latitude = note.latitude;
        stored.longitude = note.longitude;
        stored.accuracy = note.accuracy;
        stored.updated_at = not_before(stored.updated_at + 1);
        stored.version += 1;
        Ok(stored.clone())
    }

    async fn delete_note(&self, id: &NoteId) -> RemoteResult<()> {
        let principal = self.enter(RemoteOp::Delete).await?;
        let mut state = self.lock();
        Self::owned(&mut state.notes, id, &principal)?;
        state.notes.remove(id.as_str());
        Ok(())
    }

    async fn get_notes(&self) -> RemoteResult<Vec<Note>> {
        let principal = self.enter(RemoteOp::List).await?;
        Ok(self
            .notes()
            .into_iter()
            .filter(|note| !matches!(note.user_id.as_deref(), Some(owner) if owner != principal))
            .collect())
    }
}
