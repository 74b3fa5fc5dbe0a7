//! Per-client map tracker: streams map tiles to one client as its avatar
//! explores.
//!
//! Each tick spends two budgets across three queues, in this order:
//!
//! 1. **Spiral scan**: chunks around the avatar not yet sent, rendered live.
//! 2. **Reload**: chunks sent earlier but invalidated by terrain edits.
//! 3. **Replay**: chunks explored in earlier sessions, read back from the
//!    tile cache nearest region first.
//!
//! Steps 1 and 2 share the generation budget, step 3 has the disk budget.
//! A budget unit is charged only for a request that is *not yet resolved*:
//! the budget caps outstanding work, so with a backend that resolves
//! immediately one tick may deliver every chunk in range.
//!
//! Locking: `tick` serializes whole ticks and resets; `sets` guards the
//! chunk bookkeeping and is the only lock `clear_chunks`/`is_loaded` take,
//! so the simulation thread never waits for a whole tick. Lock order is
//! always `tick` then `sets`.

pub mod bridge;
pub mod config;
pub mod slot;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use indexmap::IndexSet;
use tokio::sync::watch;
use uuid::Uuid;

use crate::exploration::{ExplorationData, ExplorationDirectory, Identity, ReplayQueue};
use crate::tiles::{MapChunk, Pending, TileBroadcast, TileCache, TileImage, UpdateSink, WorldMap};
use crate::world::WorldId;
use crate::world::position::{ChunkKey, ChunkPos, WorldPos};
use crate::world::spiral::Spiral;

pub use bridge::PositionBridge;
pub use config::TrackerConfig;
pub use slot::{InstallError, TrackerSlot};

/// Upper bound on the encoded size of one outbound update.
pub const MAX_UPDATE_BYTES: usize = 2_621_427;

/// Encoded size of one map chunk entry without its pixels.
const CHUNK_ENTRY_OVERHEAD: usize = 23;

/// Everything a tracker needs from its host.
#[derive(Clone)]
pub struct TrackerHost {
    pub world_map: Arc<dyn WorldMap>,
    pub cache: Arc<dyn TileCache>,
    pub directory: Arc<ExplorationDirectory>,
    pub sink: Arc<dyn UpdateSink>,
    pub broadcast: Arc<dyn TileBroadcast>,
    pub config: watch::Receiver<TrackerConfig>,
}

/// What one tick did. Returned for metrics and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// New tiles from the spiral scan.
    pub generated: u32,
    /// Invalidated tiles sent again.
    pub reloaded: u32,
    /// Tiles replayed from the tile cache.
    pub replayed: u32,
    /// Requests still outstanding when polled (each charged one budget unit).
    pub deferred: u32,
    /// Cached tiles that were missing or had the wrong size.
    pub cache_misses: u32,
    /// Tile write-backs that completed with an error since the last tick.
    pub write_failures: u32,
    /// Entries in the flushed update.
    pub sent: u32,
}

/// Copy of a tracker's bookkeeping, for inspection.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub loaded: HashSet<ChunkKey>,
    pub pending_reload: Vec<ChunkKey>,
    pub replay: Vec<ChunkKey>,
}

struct TickState {
    started: bool,
    config: TrackerConfig,
    view_radius_override: Option<i32>,
    /// This player's store, resolved on the first tick after a reset.
    exploration: Option<Arc<ExplorationData>>,
    writes: Vec<Pending<anyhow::Result<()>>>,
}

#[derive(Default)]
struct ChunkSets {
    /// Sent to the client this session.
    loaded: HashSet<ChunkKey>,
    /// Sent, then invalidated. Never overlaps `loaded`.
    pending_reload: IndexSet<ChunkKey>,
    /// Explored in earlier sessions, not sent yet. `None` until seeded.
    replay: Option<ReplayQueue>,
}

pub struct MapTracker {
    player: Uuid,
    world: WorldId,
    client_view_radius: i32,
    host: TrackerHost,
    position: PositionBridge,
    tick: Mutex<TickState>,
    sets: Mutex<ChunkSets>,
}

impl MapTracker {
    pub fn new(player: Uuid, world: WorldId, client_view_radius: i32, host: TrackerHost) -> Self {
        let config = host.config.borrow().clone();
        Self {
            player,
            world,
            client_view_radius,
            host,
            position: PositionBridge::new(),
            tick: Mutex::new(TickState {
                started: false,
                config,
                view_radius_override: None,
                exploration: None,
                writes: Vec::new(),
            }),
            sets: Mutex::new(ChunkSets::default()),
        }
    }

    pub fn player(&self) -> Uuid {
        self.player
    }

    pub fn world(&self) -> &WorldId {
        &self.world
    }

    /// Called from the simulation thread every world tick.
    pub fn push_position(&self, position: WorldPos) {
        self.position.push(position);
    }

    pub fn position(&self) -> WorldPos {
        self.position.read()
    }

    pub fn set_view_radius_override(&self, radius: Option<i32>) {
        self.tick.lock().expect("tracker tick lock poisoned").view_radius_override = radius;
    }

    /// Run one tracker tick.
    pub fn tick(&self) -> TickStats {
        let mut state = self.tick.lock().expect("tracker tick lock poisoned");
        let mut stats = TickStats::default();
        self.drain_writes(&mut state, &mut stats);

        if !state.started {
            state.started = true;
            tracing::info!("Started generating map for {} in {}", self.player, self.world);
        }

        let center = self.position.read().chunk();
        let map = Arc::clone(&self.host.world_map);
        let view_radius = state
            .view_radius_override
            .unwrap_or_else(|| map.view_radius(self.client_view_radius));

        if state.exploration.is_none() {
            self.seed_replay(&mut state, center);
        }

        if map.is_compass_updating() {
            map.update_points_of_interest(self.player, view_radius, center.x, center.z);
        }

        if map.is_enabled() {
            self.tick_world_map(&mut state, center, &mut stats);
        }
        stats
    }

    /// Resolve this player's store and queue everything explored before,
    /// nearest first. With a shared map the global store is replayed.
    fn seed_replay(&self, state: &mut TickState, center: ChunkPos) {
        let directory = &self.host.directory;
        let storage = self.world.storage_name();
        let own = directory.get_or_load(&storage, Identity::Player(self.player));
        let source = if state.config.per_player_map {
            Arc::clone(&own)
        } else {
            directory.get_or_load(&storage, Identity::Global)
        };
        let queue = ReplayQueue::new(source.copy_pending_near(center.x, center.z));
        tracing::debug!(
            "Queued {} explored chunks in {} regions for {}",
            queue.pending_chunks(),
            queue.regions().len(),
            self.player
        );
        self.sets.lock().expect("tracker sets poisoned").replay = Some(queue);
        state.exploration = Some(own);
    }

    fn tick_world_map(&self, state: &mut TickState, center: ChunkPos, stats: &mut TickStats) {
        let config = state.config.clone();
        let persist = config.should_persist(&self.world);
        let mut out = Vec::new();
        let mut explored = Vec::new();
        let mut budget = config.generation_rate;

        {
            let mut sets = self.sets.lock().expect("tracker sets poisoned");
            self.load_area(&mut sets, state, center, &mut budget, &mut out, &mut explored, stats);
        }

        if !out.is_empty() && !config.per_player_map {
            self.host.broadcast.broadcast(&self.world, self.player, &out);
        }

        {
            let mut sets = self.sets.lock().expect("tracker sets poisoned");
            self.reload_pending(&mut sets, state, &mut budget, &mut out, &mut explored, stats);
            self.load_stored(&mut sets, &config, &mut out, stats);
        }

        if persist {
            self.mark_explored(state, &explored);
        }

        if !out.is_empty() {
            stats.sent = out.len() as u32;
            self.host.sink.send_update(out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_area(
        &self,
        sets: &mut ChunkSets,
        state: &mut TickState,
        center: ChunkPos,
        budget: &mut u32,
        out: &mut Vec<MapChunk>,
        explored: &mut Vec<ChunkKey>,
        stats: &mut TickStats,
    ) {
        for key in Spiral::new(center, state.config.exploration_radius) {
            if *budget == 0 {
                break;
            }
            if sets.loaded.contains(&key) {
                continue;
            }
            let request = self.host.world_map.request_image(key);
            match request.get() {
                None => {
                    *budget -= 1;
                    stats.deferred += 1;
                }
                Some(image) => {
                    self.accept_live(sets, state, key, image, out);
                    explored.push(key);
                    stats.generated += 1;
                }
            }
        }
    }

    fn reload_pending(
        &self,
        sets: &mut ChunkSets,
        state: &mut TickState,
        budget: &mut u32,
        out: &mut Vec<MapChunk>,
        explored: &mut Vec<ChunkKey>,
        stats: &mut TickStats,
    ) {
        let keys: Vec<ChunkKey> = sets.pending_reload.iter().copied().collect();
        for key in keys {
            if *budget == 0 {
                break;
            }
            if sets.loaded.contains(&key) {
                sets.pending_reload.shift_remove(&key);
                continue;
            }
            let request = self.host.world_map.request_image(key);
            match request.get() {
                None => {
                    *budget -= 1;
                    stats.deferred += 1;
                }
                Some(image) => {
                    self.accept_live(sets, state, key, image, out);
                    explored.push(key);
                    stats.reloaded += 1;
                }
            }
        }
    }

    /// Record a freshly rendered tile as sent, queue its write-back, and add
    /// the downscaled tile to `out`.
    fn accept_live(
        &self,
        sets: &mut ChunkSets,
        state: &mut TickState,
        key: ChunkKey,
        image: &TileImage,
        out: &mut Vec<MapChunk>,
    ) {
        sets.loaded.insert(key);
        sets.pending_reload.shift_remove(&key);
        if let Some(replay) = sets.replay.as_mut() {
            replay.discard(key);
        }

        let pos = key.pos();
        let resolution = state.config.resolution;
        if state.config.should_persist(&self.world) {
            let write = self.host.cache.write_image(
                &self.world,
                pos.x,
                pos.z,
                self.host.world_map.image_scale(),
                resolution,
                image.clone(),
            );
            state.writes.push(write);
        }
        out.push(MapChunk::tile(pos, resolution.rescale(image)));
    }

    fn load_stored(
        &self,
        sets: &mut ChunkSets,
        config: &TrackerConfig,
        out: &mut Vec<MapChunk>,
        stats: &mut TickStats,
    ) {
        let ChunkSets { loaded, replay, .. } = sets;
        let Some(queue) = replay.as_mut() else {
            return;
        };

        let resolution = config.resolution;
        let expected_size = resolution.image_size();
        let scale = self.host.world_map.image_scale();
        let mut budget = config.disk_load_rate;
        let regions = queue.regions_mut();
        let mut idx = 0;

        while budget > 0 && idx < regions.len() {
            let region = &mut regions[idx];
            let keys: Vec<ChunkKey> = region.chunks().collect();
            for key in keys {
                if budget == 0 {
                    break;
                }
                if loaded.contains(&key) {
                    region.remove(key);
                    continue;
                }
                let pos = key.pos();
                let request =
                    self.host
                        .cache
                        .request_cached_image(&self.world, pos.x, pos.z, scale, resolution);
                match request.get() {
                    None => {
                        budget -= 1;
                        stats.deferred += 1;
                    }
                    Some(None) => {
                        // Nothing stored: nothing to replay.
                        region.remove(key);
                        stats.cache_misses += 1;
                    }
                    Some(Some(image)) if !image.has_size(expected_size) => {
                        // Stale or corrupt entry. Leave it queued for a later tick.
                        stats.cache_misses += 1;
                    }
                    Some(Some(image)) => {
                        loaded.insert(key);
                        region.remove(key);
                        out.push(MapChunk::tile(pos, image.clone()));
                        stats.replayed += 1;
                    }
                }
            }
            if region.is_done() {
                regions.remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    /// Best-effort: the player's store and the global store are marked
    /// independently.
    fn mark_explored(&self, state: &TickState, keys: &[ChunkKey]) {
        if keys.is_empty() {
            return;
        }
        let global = self
            .host
            .directory
            .get_or_load(&self.world.storage_name(), Identity::Global);
        for &key in keys {
            if let Some(own) = &state.exploration {
                own.mark_explored(key);
            }
            global.mark_explored(key);
        }
    }

    /// Log write-backs that finished with an error. Nothing is retried.
    fn drain_writes(&self, state: &mut TickState, stats: &mut TickStats) {
        state.writes.retain(|write| match write.get() {
            None => true,
            Some(Ok(())) => false,
            Some(Err(e)) => {
                tracing::error!("Failed to save map tile for {}: {:#}", self.world, e);
                stats.write_failures += 1;
                false
            }
        });
    }

    /// Send an update straight to this client (shared-map broadcasts).
    pub fn write_update(&self, chunks: &[MapChunk]) {
        if !chunks.is_empty() {
            self.host.sink.send_update(chunks.to_vec());
        }
    }

    /// Invalidate chunks, e.g. after terrain edits. Chunks that were sent or
    /// still queued for replay move to the reload queue; others are ignored.
    pub fn clear_chunks(&self, keys: impl IntoIterator<Item = ChunkKey>) {
        let mut sets = self.sets.lock().expect("tracker sets poisoned");
        let ChunkSets {
            loaded,
            pending_reload,
            replay,
        } = &mut *sets;
        for key in keys {
            let was_loaded = loaded.remove(&key);
            let was_queued = replay.as_mut().is_some_and(|q| q.discard(key));
            if was_loaded || was_queued {
                pending_reload.insert(key);
            }
        }
    }

    pub fn is_loaded(&self, chunk_x: i32, chunk_z: i32) -> bool {
        self.sets
            .lock()
            .expect("tracker sets poisoned")
            .loaded
            .contains(&ChunkKey::pack(chunk_x, chunk_z))
    }

    /// Forget everything sent and remove it from the client's map.
    pub fn clear(&self) {
        self.reset(true);
    }

    /// Start the session over. With `unload`, the client is first told to
    /// drop every tile it was sent. The config snapshot is refreshed, so
    /// config changes take effect from here.
    pub fn reset(&self, unload: bool) {
        let mut state = self.tick.lock().expect("tracker tick lock poisoned");
        let mut sets = self.sets.lock().expect("tracker sets poisoned");

        if unload {
            for batch in removal_batches(&sets.loaded, state.config.resolution.image_size()) {
                self.host.sink.send_update(batch);
            }
        }

        sets.loaded.clear();
        sets.pending_reload.clear();
        sets.replay = None;
        state.exploration = None;
        state.config = self.host.config.borrow().clone();
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let sets = self.sets.lock().expect("tracker sets poisoned");
        TrackerSnapshot {
            loaded: sets.loaded.clone(),
            pending_reload: sets.pending_reload.iter().copied().collect(),
            replay: sets
                .replay
                .iter()
                .flat_map(|q| q.regions())
                .flat_map(|r| r.chunks())
                .collect(),
        }
    }
}

/// Removal entries for `keys`, split so no update exceeds
/// [`MAX_UPDATE_BYTES`] assuming full tiles of `image_size`.
pub fn removal_batches<'a>(
    keys: impl IntoIterator<Item = &'a ChunkKey>,
    image_size: u32,
) -> Vec<Vec<MapChunk>> {
    let image_size = image_size as usize;
    let entry_size = CHUNK_ENTRY_OVERHEAD + 4 * image_size * image_size;
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut remaining = MAX_UPDATE_BYTES;
    for key in keys {
        batch.push(MapChunk::removal(key.pos()));
        remaining = remaining.saturating_sub(entry_size);
        if remaining < entry_size {
            batches.push(std::mem::take(&mut batch));
            remaining = MAX_UPDATE_BYTES;
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_batches_respect_byte_budget() {
        let keys: Vec<ChunkKey> = (0..1000).map(|i| ChunkKey::pack(i, 0)).collect();
        let batches = removal_batches(&keys, 32);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 636);
        assert_eq!(batches[1].len(), 364);
        assert!(batches.iter().flatten().all(|c| c.image.is_none()));
    }

    #[test]
    fn no_keys_no_batches() {
        let keys: Vec<ChunkKey> = Vec::new();
        assert!(removal_batches(&keys, 32).is_empty());
    }

    #[test]
    fn small_tiles_fit_in_one_update() {
        let keys: Vec<ChunkKey> = (0..2000).map(|i| ChunkKey::pack(0, i)).collect();
        assert_eq!(removal_batches(&keys, 8).len(), 1);
    }
}
