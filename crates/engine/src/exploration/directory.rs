//! Registry of loaded exploration stores: world name -> identity -> store.
//!
//! One directory is created at startup and passed down to every tracker.
//! The directory lock covers structure changes and the final save of an
//! unload, so a get-or-load racing an unload of the same key always observes
//! either the fully saved record or the live store, never a half-written
//! file. Saves of loaded stores write after the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::Identity;
use super::data::ExplorationData;
use crate::world::position::ChunkKey;

/// Durable storage for exploration records, one per (world, identity).
pub trait ExplorationStore: Send + Sync {
    /// Read the record. `Ok(None)` if nothing has been saved yet.
    fn load(&self, world: &str, identity: Identity) -> anyhow::Result<Option<Vec<ChunkKey>>>;

    /// Replace the record atomically.
    fn save(&self, world: &str, identity: Identity, chunks: &[ChunkKey]) -> anyhow::Result<()>;
}

/// The identities loaded for one world.
#[derive(Default)]
struct WorldExploration {
    identities: HashMap<Identity, Arc<ExplorationData>>,
}

impl WorldExploration {
    fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

pub struct ExplorationDirectory {
    store: Arc<dyn ExplorationStore>,
    worlds: Mutex<HashMap<String, WorldExploration>>,
}

impl ExplorationDirectory {
    pub fn new(store: Arc<dyn ExplorationStore>) -> Self {
        Self {
            store,
            worlds: Mutex::new(HashMap::new()),
        }
    }

    /// The loaded store for `(world, identity)`, loading it first if needed.
    /// A missing or unreadable record yields an empty store.
    pub fn get_or_load(&self, world: &str, identity: Identity) -> Arc<ExplorationData> {
        let mut worlds = self.worlds.lock().expect("exploration directory poisoned");
        let entry = worlds.entry(world.to_string()).or_default();
        if let Some(data) = entry.identities.get(&identity) {
            return Arc::clone(data);
        }
        let data = Arc::new(self.read_record(world, identity));
        entry.identities.insert(identity, Arc::clone(&data));
        data
    }

    /// The store for `(world, identity)` if it is loaded.
    pub fn get(&self, world: &str, identity: Identity) -> Option<Arc<ExplorationData>> {
        self.worlds
            .lock()
            .expect("exploration directory poisoned")
            .get(world)
            .and_then(|w| w.identities.get(&identity))
            .cloned()
    }

    /// Load `(world, identity)` unless it is already loaded.
    pub fn load(&self, world: &str, identity: Identity) {
        self.get_or_load(world, identity);
    }

    /// Save and evict `(world, identity)`. The world entry goes away with
    /// its last identity.
    pub fn unload(&self, world: &str, identity: Identity) {
        let mut worlds = self.worlds.lock().expect("exploration directory poisoned");
        let Some(entry) = worlds.get_mut(world) else {
            return;
        };
        if let Some(data) = entry.identities.remove(&identity) {
            let chunks = data.close_with(|keys| {
                self.write_record(world, identity, keys);
                keys.len()
            });
            tracing::debug!("Unloaded exploration {}/{} ({} chunks)", world, identity, chunks);
        }
        if entry.is_empty() {
            worlds.remove(world);
        }
    }

    /// Save `(world, identity)` without evicting it. Unchanged stores are
    /// skipped. The file is written after the directory lock is released.
    pub fn save(&self, world: &str, identity: Identity) {
        if let Some(data) = self.get(world, identity) {
            self.save_store(world, identity, &data);
        }
    }

    /// Unload `identity` from every loaded world (client disconnect, shutdown).
    pub fn unload_from_all(&self, identity: Identity) {
        for world in self.world_names() {
            self.unload(&world, identity);
        }
    }

    /// Save `identity` in every loaded world.
    pub fn save_all(&self, identity: Identity) {
        for world in self.world_names() {
            self.save(&world, identity);
        }
    }

    /// Save every loaded identity of `world` (periodic autosave).
    pub fn save_world(&self, world: &str) -> usize {
        let stores: Vec<(Identity, Arc<ExplorationData>)> = {
            let worlds = self.worlds.lock().expect("exploration directory poisoned");
            let Some(entry) = worlds.get(world) else {
                return 0;
            };
            entry
                .identities
                .iter()
                .map(|(&identity, data)| (identity, Arc::clone(data)))
                .collect()
        };
        stores
            .iter()
            .filter(|(identity, data)| self.save_store(world, *identity, data))
            .count()
    }

    pub fn world_names(&self) -> Vec<String> {
        self.worlds
            .lock()
            .expect("exploration directory poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of identities loaded for `world`.
    pub fn loaded_identities(&self, world: &str) -> usize {
        self.worlds
            .lock()
            .expect("exploration directory poisoned")
            .get(world)
            .map_or(0, |w| w.identities.len())
    }

    fn read_record(&self, world: &str, identity: Identity) -> ExplorationData {
        match self.store.load(world, identity) {
            Ok(Some(keys)) => {
                tracing::debug!("Loaded exploration {}/{} ({} chunks)", world, identity, keys.len());
                ExplorationData::from_keys(keys)
            }
            Ok(None) => ExplorationData::new(),
            Err(e) => {
                tracing::error!("Failed to load exploration {}/{}: {:#}", world, identity, e);
                ExplorationData::new()
            }
        }
    }

    /// Returns whether anything was written.
    fn save_store(&self, world: &str, identity: Identity, data: &ExplorationData) -> bool {
        data.save_with(|keys| self.write_record(world, identity, keys))
    }

    fn write_record(&self, world: &str, identity: Identity, keys: &[ChunkKey]) -> bool {
        match self.store.save(world, identity, keys) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to save exploration {}/{}: {:#}", world, identity, e);
                false
            }
        }
    }
}
