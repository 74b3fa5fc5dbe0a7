//! Shared registry of explorer sessions.
//!
//! Tracks every connected explorer, the world it is in, and its tracker
//! slot, and broadcasts join/leave events for the dashboard.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use explorers_engine::tracker::{MapTracker, TrackerSlot};
use explorers_engine::world::WorldId;
use explorers_engine::world::position::WorldPos;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::host::ClientSink;

/// One connected explorer.
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub world: WorldId,
    /// The host's map-tracker field for this client.
    pub slot: TrackerSlot,
    pub client: Arc<ClientSink>,
    position: Mutex<WorldPos>,
    active: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(id: Uuid, name: impl Into<String>, world: WorldId, spawn: WorldPos) -> Self {
        Self {
            id,
            name: name.into(),
            world,
            slot: TrackerSlot::new(),
            client: Arc::new(ClientSink::new()),
            position: Mutex::new(spawn),
            active: AtomicBool::new(true),
            ticker: Mutex::new(None),
        }
    }

    pub fn position(&self) -> WorldPos {
        *self.position.lock().expect("session position poisoned")
    }

    pub fn set_position(&self, position: WorldPos) {
        *self.position.lock().expect("session position poisoned") = position;
    }

    /// The explorer tracker, if one was installed.
    pub fn tracker(&self) -> Option<Arc<MapTracker>> {
        self.slot.explorer()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark the session finished; its tracker task stops after the current tick.
    pub fn end(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn set_ticker(&self, task: JoinHandle<()>) {
        *self.ticker.lock().expect("session ticker poisoned") = Some(task);
    }

    /// The tracker task, so the caller can wait for its last tick.
    pub fn take_ticker(&self) -> Option<JoinHandle<()>> {
        self.ticker.lock().expect("session ticker poisoned").take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("world", &self.world)
            .field("position", &self.position())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Lifecycle events broadcast to subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Joined { id: Uuid, name: String, world: String },
    Left { id: Uuid, world: String },
}

/// What the dashboard shows per session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub name: String,
    pub world: String,
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub explorer_tracker: bool,
    pub client_tiles: usize,
}

/// Thread-safe registry of all sessions, in join order.
///
/// Uses `std::sync::RwLock` because every operation is brief (no awaits while
/// the lock is held) and the access pattern is read-heavy.
pub struct SessionRegistry {
    sessions: RwLock<IndexMap<Uuid, Arc<Session>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            sessions: RwLock::new(IndexMap::new()),
            event_tx,
        }
    }

    /// Register a session and broadcast `SessionEvent::Joined`. Returns the
    /// session it replaced, if the id was already registered.
    pub fn register(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let event = SessionEvent::Joined {
            id: session.id,
            name: session.name.clone(),
            world: session.world.name().to_string(),
        };
        let previous = self
            .sessions
            .write()
            .expect("session registry poisoned")
            .insert(session.id, session);
        // Best-effort: if no subscribers yet, the send fails silently.
        let _ = self.event_tx.send(event);
        previous
    }

    /// Remove a session and broadcast `SessionEvent::Left`.
    pub fn deregister(&self, id: Uuid) -> Option<Arc<Session>> {
        let session = self
            .sessions
            .write()
            .expect("session registry poisoned")
            .shift_remove(&id);
        if let Some(session) = &session {
            let _ = self.event_tx.send(SessionEvent::Left {
                id,
                world: session.world.name().to_string(),
            });
        }
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .get(&id)
            .cloned()
    }

    /// Sessions currently in `world`, in join order.
    pub fn in_world(&self, world: &WorldId) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .values()
            .filter(|s| &s.world == world)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.all()
            .into_iter()
            .map(|s| {
                let chunk = s.position().chunk();
                SessionInfo {
                    id: s.id,
                    name: s.name.clone(),
                    world: s.world.name().to_string(),
                    chunk_x: chunk.x,
                    chunk_z: chunk.z,
                    explorer_tracker: s.tracker().is_some(),
                    client_tiles: s.client.tile_count(),
                }
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
