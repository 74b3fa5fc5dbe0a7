//! Tracker session tests against in-memory hosts: renderers that resolve
//! immediately, never, or on demand; a memory tile cache and exploration
//! store; and sinks that record everything sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use explorers_engine::exploration::{ExplorationDirectory, ExplorationStore, Identity};
use explorers_engine::tiles::{
    Completer, MapChunk, Pending, Resolution, TileBroadcast, TileCache, TileImage, UpdateSink,
    WorldMap,
};
use explorers_engine::tracker::{
    InstallError, MapTracker, TrackerConfig, TrackerHost, TrackerSlot,
};
use explorers_engine::world::WorldId;
use explorers_engine::world::position::{ChunkKey, WorldPos};
use tokio::sync::watch;
use uuid::Uuid;

const PLAYER: Uuid = Uuid::from_u128(0x5eed_0000_0000_4000_8000_0000_0000_0001);
const WORLD: &str = "overworld";

// ---------------------------------------------------------------------------
// Mocks
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq)]
enum Render {
    Immediate,
    Never,
    Manual,
}

fn tile_for(key: ChunkKey, size: u32) -> TileImage {
    let argb = 0xFF00_0000 | ((key.x() as u32 & 0xFF) << 8) | (key.z() as u32 & 0xFF);
    TileImage::filled(size, size, argb)
}

struct TestMap {
    render: Render,
    enabled: AtomicBool,
    compass: AtomicBool,
    requests: AtomicUsize,
    manual: Mutex<HashMap<ChunkKey, (Pending<TileImage>, Option<Completer<TileImage>>)>>,
    poi: Mutex<Vec<(Uuid, i32, i32, i32)>>,
}

impl TestMap {
    fn new(render: Render) -> Self {
        Self {
            render,
            enabled: AtomicBool::new(true),
            compass: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            manual: Mutex::new(HashMap::new()),
            poi: Mutex::new(Vec::new()),
        }
    }

    fn resolve_all(&self) {
        for (key, (_, completer)) in self.manual.lock().unwrap().iter_mut() {
            if let Some(completer) = completer.take() {
                completer.complete(tile_for(*key, 32));
            }
        }
    }
}

impl WorldMap for TestMap {
    fn is_enabled(&self) -> bool {
        self.enabled.load(SeqCst)
    }

    fn image_scale(&self) -> f32 {
        1.0
    }

    fn request_image(&self, key: ChunkKey) -> Pending<TileImage> {
        self.requests.fetch_add(1, SeqCst);
        match self.render {
            Render::Immediate => Pending::ready(tile_for(key, 32)),
            Render::Never => Pending::new().1,
            Render::Manual => {
                let mut manual = self.manual.lock().unwrap();
                let entry = manual.entry(key).or_insert_with(|| {
                    let (completer, pending) = Pending::new();
                    (pending, Some(completer))
                });
                entry.0.clone()
            }
        }
    }

    fn is_compass_updating(&self) -> bool {
        self.compass.load(SeqCst)
    }

    fn update_points_of_interest(&self, player: Uuid, view_radius: i32, chunk_x: i32, chunk_z: i32) {
        self.poi
            .lock()
            .unwrap()
            .push((player, view_radius, chunk_x, chunk_z));
    }
}

#[derive(Default)]
struct MemCache {
    tiles: Mutex<HashMap<(i32, i32), TileImage>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemCache {
    fn put(&self, x: i32, z: i32, image: TileImage) {
        self.tiles.lock().unwrap().insert((x, z), image);
    }
}

impl TileCache for MemCache {
    fn request_cached_image(
        &self,
        _world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        _scale: f32,
        _resolution: Resolution,
    ) -> Pending<Option<TileImage>> {
        Pending::ready(self.tiles.lock().unwrap().get(&(chunk_x, chunk_z)).cloned())
    }

    fn write_image(
        &self,
        _world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        _scale: f32,
        resolution: Resolution,
        image: TileImage,
    ) -> Pending<anyhow::Result<()>> {
        self.writes.fetch_add(1, SeqCst);
        if self.fail_writes.load(SeqCst) {
            return Pending::ready(Err(anyhow::anyhow!("disk full")));
        }
        self.put(chunk_x, chunk_z, resolution.rescale(&image));
        Pending::ready(Ok(()))
    }
}

#[derive(Default)]
struct MemStore {
    records: Mutex<HashMap<(String, Identity), Vec<ChunkKey>>>,
}

impl MemStore {
    fn seed(&self, world: &str, identity: Identity, keys: &[ChunkKey]) {
        self.records
            .lock()
            .unwrap()
            .insert((world.to_string(), identity), keys.to_vec());
    }
}

impl ExplorationStore for MemStore {
    fn load(&self, world: &str, identity: Identity) -> anyhow::Result<Option<Vec<ChunkKey>>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(world.to_string(), identity))
            .cloned())
    }

    fn save(&self, world: &str, identity: Identity, chunks: &[ChunkKey]) -> anyhow::Result<()> {
        self.seed(world, identity, chunks);
        Ok(())
    }
}

#[derive(Default)]
struct CollectSink {
    updates: Mutex<Vec<Vec<MapChunk>>>,
}

impl CollectSink {
    fn take(&self) -> Vec<Vec<MapChunk>> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }
}

impl UpdateSink for CollectSink {
    fn send_update(&self, chunks: Vec<MapChunk>) {
        self.updates.lock().unwrap().push(chunks);
    }
}

#[derive(Default)]
struct CollectBroadcast {
    batches: Mutex<Vec<(String, Uuid, usize)>>,
}

impl TileBroadcast for CollectBroadcast {
    fn broadcast(&self, world: &WorldId, origin: Uuid, chunks: &[MapChunk]) {
        self.batches
            .lock()
            .unwrap()
            .push((world.name().to_string(), origin, chunks.len()));
    }
}

struct Harness {
    map: Arc<TestMap>,
    cache: Arc<MemCache>,
    store: Arc<MemStore>,
    directory: Arc<ExplorationDirectory>,
    sink: Arc<CollectSink>,
    bus: Arc<CollectBroadcast>,
    config_tx: watch::Sender<TrackerConfig>,
}

impl Harness {
    fn new(render: Render, config: TrackerConfig) -> Self {
        let store = Arc::new(MemStore::default());
        let (config_tx, _) = watch::channel(config);
        Self {
            map: Arc::new(TestMap::new(render)),
            cache: Arc::new(MemCache::default()),
            directory: Arc::new(ExplorationDirectory::new(store.clone())),
            store,
            sink: Arc::new(CollectSink::default()),
            bus: Arc::new(CollectBroadcast::default()),
            config_tx,
        }
    }

    fn host(&self) -> TrackerHost {
        TrackerHost {
            world_map: self.map.clone(),
            cache: self.cache.clone(),
            directory: Arc::clone(&self.directory),
            sink: self.sink.clone(),
            broadcast: self.bus.clone(),
            config: self.config_tx.subscribe(),
        }
    }

    fn tracker(&self) -> MapTracker {
        self.tracker_in(WORLD)
    }

    fn tracker_in(&self, world: &str) -> MapTracker {
        MapTracker::new(PLAYER, WorldId::new(world), 6, self.host())
    }
}

fn config(radius: i32, generation_rate: u32) -> TrackerConfig {
    TrackerConfig {
        exploration_radius: radius,
        generation_rate,
        ..TrackerConfig::default()
    }
}

fn keys_of(update: &[MapChunk]) -> Vec<ChunkKey> {
    update
        .iter()
        .map(|c| ChunkKey::pack(c.chunk_x, c.chunk_z))
        .collect()
}

fn at_chunk(x: i32, z: i32) -> WorldPos {
    WorldPos::new(x as f64 * 32.0 + 16.0, 64.0, z as f64 * 32.0 + 16.0)
}

fn assert_disjoint(tracker: &MapTracker) {
    let snap = tracker.snapshot();
    for key in &snap.pending_reload {
        assert!(!snap.loaded.contains(key), "{key:?} loaded and pending reload");
        assert!(!snap.replay.contains(key), "{key:?} pending reload and replay");
    }
    for key in &snap.replay {
        assert!(!snap.loaded.contains(key), "{key:?} loaded and queued for replay");
    }
}

// ---------------------------------------------------------------------------
// Spiral scan
// ---------------------------------------------------------------------------

#[test]
fn radius_one_sends_three_by_three_in_one_update() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();

    let stats = tracker.tick();
    assert_eq!(stats.generated, 9);
    assert_eq!(stats.sent, 9);

    let updates = h.sink.take();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].len(), 9);
    for x in -1..=1 {
        for z in -1..=1 {
            assert!(tracker.is_loaded(x, z));
        }
    }
    assert!(!tracker.is_loaded(2, 0));
}

#[test]
fn center_tile_is_sent_first() {
    let h = Harness::new(Render::Immediate, config(2, 20));
    let tracker = h.tracker();
    tracker.push_position(at_chunk(5, -3));
    tracker.tick();

    let updates = h.sink.take();
    assert_eq!(keys_of(&updates[0])[0], ChunkKey::pack(5, -3));
    assert_eq!(updates[0].len(), 25);
}

#[test]
fn immediate_renderer_is_not_limited_by_generation_budget() {
    let h = Harness::new(Render::Immediate, config(1, 2));
    let tracker = h.tracker();

    let stats = tracker.tick();
    assert_eq!(stats.generated, 9);
    assert_eq!(stats.deferred, 0);
    assert_eq!(tracker.snapshot().loaded.len(), 9);
}

#[test]
fn unresolved_renders_stop_at_the_budget() {
    let h = Harness::new(Render::Never, config(3, 2));
    let tracker = h.tracker();

    let stats = tracker.tick();
    assert_eq!(stats.deferred, 2);
    assert_eq!(h.map.requests.load(SeqCst), 2);
    assert!(h.sink.take().is_empty());

    tracker.tick();
    assert_eq!(h.map.requests.load(SeqCst), 4);
    assert!(tracker.snapshot().loaded.is_empty());
}

#[test]
fn slow_renderer_converges() {
    let h = Harness::new(Render::Manual, config(2, 4));
    let tracker = h.tracker();

    for _ in 0..20 {
        tracker.tick();
        h.map.resolve_all();
    }
    tracker.tick();

    assert_eq!(tracker.snapshot().loaded.len(), 25);
    let sent: usize = h.sink.take().iter().map(Vec::len).sum();
    assert_eq!(sent, 25);
}

#[test]
fn nothing_is_resent_once_loaded() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();
    h.sink.take();

    let stats = tracker.tick();
    assert_eq!(stats.sent, 0);
    assert!(h.sink.take().is_empty());
}

#[test]
fn half_resolution_sends_downscaled_tiles() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            resolution: Resolution::Half,
            ..config(0, 20)
        },
    );
    let tracker = h.tracker();
    tracker.tick();

    let updates = h.sink.take();
    let image = updates[0][0].image.as_ref().unwrap();
    assert!(image.has_size(16));
}

// ---------------------------------------------------------------------------
// Persistence of generated tiles
// ---------------------------------------------------------------------------

#[test]
fn generated_tiles_are_cached_and_marked_explored() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();

    assert_eq!(h.cache.writes.load(SeqCst), 9);
    let own = h.directory.get(WORLD, Identity::Player(PLAYER)).unwrap();
    let global = h.directory.get(WORLD, Identity::Global).unwrap();
    assert_eq!(own.len(), 9);
    assert_eq!(global.len(), 9);
    assert!(own.is_explored(ChunkKey::pack(-1, 1)));
}

#[test]
fn instance_worlds_are_not_persisted_by_default() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker_in("instance-dungeon-0f8fad5b-d9cb-469f-a165-70867728950e");
    tracker.tick();

    assert_eq!(h.cache.writes.load(SeqCst), 0);
    let own = h
        .directory
        .get("instance-dungeon", Identity::Player(PLAYER))
        .unwrap();
    assert!(own.is_empty());
    assert_eq!(h.sink.take()[0].len(), 9);
}

#[test]
fn failed_write_backs_are_counted_on_the_next_tick() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    h.cache.fail_writes.store(true, SeqCst);
    let tracker = h.tracker();

    let first = tracker.tick();
    assert_eq!(first.write_failures, 0);
    let second = tracker.tick();
    assert_eq!(second.write_failures, 9);
    let third = tracker.tick();
    assert_eq!(third.write_failures, 0);
}

// ---------------------------------------------------------------------------
// Replay from the tile cache
// ---------------------------------------------------------------------------

#[test]
fn explored_chunks_are_replayed_from_cache() {
    let h = Harness::new(Render::Immediate, config(0, 20));
    let far = [ChunkKey::pack(100, 100), ChunkKey::pack(101, 100)];
    h.store.seed(WORLD, Identity::Player(PLAYER), &far);
    for key in far {
        h.cache.put(key.x(), key.z(), tile_for(key, 32));
    }
    let tracker = h.tracker();

    let stats = tracker.tick();
    assert_eq!(stats.generated, 1);
    assert_eq!(stats.replayed, 2);
    assert!(tracker.is_loaded(100, 100));
    assert!(tracker.is_loaded(101, 100));
    assert!(tracker.snapshot().replay.is_empty());
    assert_eq!(h.sink.take()[0].len(), 3);
}

#[test]
fn replay_goes_nearest_region_first() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            disk_load_rate: 0,
            ..config(0, 20)
        },
    );
    let keys = [
        ChunkKey::pack(200, 0),
        ChunkKey::pack(20, 0),
        ChunkKey::pack(-40, 0),
    ];
    h.store.seed(WORLD, Identity::Player(PLAYER), &keys);
    let tracker = h.tracker();
    tracker.tick();

    assert_eq!(
        tracker.snapshot().replay,
        vec![
            ChunkKey::pack(20, 0),
            ChunkKey::pack(-40, 0),
            ChunkKey::pack(200, 0)
        ]
    );
}

#[test]
fn missing_cached_tile_is_dropped_from_replay() {
    let h = Harness::new(Render::Immediate, config(0, 20));
    h.store
        .seed(WORLD, Identity::Player(PLAYER), &[ChunkKey::pack(50, 50)]);
    let tracker = h.tracker();

    let stats = tracker.tick();
    assert_eq!(stats.cache_misses, 1);
    assert!(!tracker.is_loaded(50, 50));
    assert!(tracker.snapshot().replay.is_empty());
}

#[test]
fn wrong_size_cached_tile_is_retried() {
    let h = Harness::new(Render::Immediate, config(0, 20));
    let key = ChunkKey::pack(50, 50);
    h.store.seed(WORLD, Identity::Player(PLAYER), &[key]);
    h.cache.put(50, 50, tile_for(key, 16));
    let tracker = h.tracker();

    assert_eq!(tracker.tick().cache_misses, 1);
    assert_eq!(tracker.snapshot().replay, vec![key]);
    assert_eq!(tracker.tick().cache_misses, 1);

    h.cache.put(50, 50, tile_for(key, 32));
    let stats = tracker.tick();
    assert_eq!(stats.replayed, 1);
    assert!(tracker.is_loaded(50, 50));
}

#[test]
fn shared_map_replays_the_global_store() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            per_player_map: false,
            ..config(0, 20)
        },
    );
    let key = ChunkKey::pack(-30, 12);
    h.store.seed(WORLD, Identity::Global, &[key]);
    h.cache.put(key.x(), key.z(), tile_for(key, 32));
    let tracker = h.tracker();

    assert_eq!(tracker.tick().replayed, 1);
    assert!(tracker.is_loaded(-30, 12));
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[test]
fn clearing_an_unknown_chunk_does_nothing() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();

    tracker.clear_chunks([ChunkKey::pack(99, 99)]);
    let snap = tracker.snapshot();
    assert!(snap.pending_reload.is_empty());
    assert_eq!(snap.loaded.len(), 9);
}

#[test]
fn cleared_chunk_in_range_is_regenerated() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();
    h.sink.take();

    tracker.clear_chunks([ChunkKey::pack(0, 0)]);
    assert!(!tracker.is_loaded(0, 0));
    assert_eq!(tracker.snapshot().pending_reload, vec![ChunkKey::pack(0, 0)]);

    tracker.tick();
    assert!(tracker.is_loaded(0, 0));
    assert!(tracker.snapshot().pending_reload.is_empty());
    assert_eq!(keys_of(&h.sink.take()[0]), vec![ChunkKey::pack(0, 0)]);
}

#[test]
fn cleared_chunk_out_of_range_is_reloaded() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();
    tracker.push_position(at_chunk(10, 0));
    tracker.tick();
    h.sink.take();

    tracker.clear_chunks([ChunkKey::pack(0, 0)]);
    let stats = tracker.tick();
    assert_eq!(stats.generated, 0);
    assert_eq!(stats.reloaded, 1);
    assert!(tracker.is_loaded(0, 0));
}

#[test]
fn clearing_a_queued_replay_chunk_moves_it_to_reload() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            disk_load_rate: 0,
            ..config(0, 20)
        },
    );
    let key = ChunkKey::pack(50, 50);
    h.store.seed(WORLD, Identity::Player(PLAYER), &[key]);
    let tracker = h.tracker();
    tracker.tick();
    assert_eq!(tracker.snapshot().replay, vec![key]);

    tracker.clear_chunks([key]);
    let snap = tracker.snapshot();
    assert!(snap.replay.is_empty());
    assert_eq!(snap.pending_reload, vec![key]);

    assert_eq!(tracker.tick().reloaded, 1);
    assert!(tracker.is_loaded(50, 50));
}

#[test]
fn reload_budget_applies_to_unresolved_renders() {
    let h = Harness::new(Render::Manual, config(0, 1));
    let tracker = h.tracker();
    tracker.tick();
    h.map.resolve_all();
    tracker.tick();
    assert!(tracker.is_loaded(0, 0));

    tracker.push_position(at_chunk(40, 40));
    tracker.tick();
    h.map.resolve_all();
    tracker.tick();
    h.map.manual.lock().unwrap().clear();

    // The spiral's unresolved render uses the only unit; (0, 0) waits.
    tracker.clear_chunks([ChunkKey::pack(0, 0), ChunkKey::pack(40, 40)]);
    let before = h.map.requests.load(SeqCst);
    let stats = tracker.tick();
    assert_eq!(stats.deferred, 1);
    assert_eq!(h.map.requests.load(SeqCst) - before, 1);
}

// ---------------------------------------------------------------------------
// Reset
// ---------------------------------------------------------------------------

#[test]
fn unloading_reset_removes_every_tile_in_bounded_batches() {
    let h = Harness::new(Render::Immediate, config(16, 20));
    let tracker = h.tracker();
    tracker.tick();
    assert_eq!(tracker.snapshot().loaded.len(), 1089);
    h.sink.take();

    tracker.clear();
    let updates = h.sink.take();
    let sizes: Vec<usize> = updates.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![636, 453]);
    assert!(updates.iter().flatten().all(|c| c.image.is_none()));
    assert!(tracker.snapshot().loaded.is_empty());
}

#[test]
fn plain_reset_sends_nothing_and_picks_up_new_config() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    tracker.tick();
    h.sink.take();

    h.config_tx.send_replace(config(0, 20));
    tracker.reset(false);
    assert!(h.sink.take().is_empty());
    assert!(!tracker.is_loaded(0, 0));

    // Radius 0 now; the other eight come back from the cache.
    let stats = tracker.tick();
    assert_eq!(stats.generated, 1);
    assert_eq!(stats.replayed, 8);
    assert_eq!(tracker.snapshot().loaded.len(), 9);
}

#[test]
fn config_changes_wait_for_reset() {
    let h = Harness::new(Render::Immediate, config(0, 20));
    let tracker = h.tracker();
    h.config_tx.send_replace(config(1, 20));

    assert_eq!(tracker.tick().generated, 1);
    tracker.reset(false);
    tracker.tick();
    assert_eq!(tracker.snapshot().loaded.len(), 9);
}

// ---------------------------------------------------------------------------
// Host hooks
// ---------------------------------------------------------------------------

#[test]
fn disabled_map_streams_nothing() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    h.map.enabled.store(false, SeqCst);
    let tracker = h.tracker();

    assert_eq!(tracker.tick().sent, 0);
    assert_eq!(h.map.requests.load(SeqCst), 0);
    assert!(h.sink.take().is_empty());

    h.map.enabled.store(true, SeqCst);
    assert_eq!(tracker.tick().generated, 9);
}

#[test]
fn points_of_interest_follow_the_avatar() {
    let h = Harness::new(Render::Immediate, config(0, 20));
    h.map.compass.store(true, SeqCst);
    let tracker = h.tracker();
    tracker.push_position(at_chunk(3, -7));
    tracker.tick();
    tracker.set_view_radius_override(Some(12));
    tracker.tick();

    let poi = h.map.poi.lock().unwrap().clone();
    assert_eq!(poi, vec![(PLAYER, 6, 3, -7), (PLAYER, 12, 3, -7)]);
}

#[test]
fn shared_map_broadcasts_generated_tiles() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            per_player_map: false,
            ..config(1, 20)
        },
    );
    let tracker = h.tracker();
    tracker.tick();
    tracker.tick();

    let batches = h.bus.batches.lock().unwrap().clone();
    assert_eq!(batches, vec![(WORLD.to_string(), PLAYER, 9)]);
}

#[test]
fn per_player_maps_do_not_broadcast() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    h.tracker().tick();
    assert!(h.bus.batches.lock().unwrap().is_empty());
}

#[test]
fn write_update_goes_straight_to_the_client() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let tracker = h.tracker();
    let chunk = MapChunk::tile(
        ChunkKey::pack(7, 7).pos(),
        tile_for(ChunkKey::pack(7, 7), 32),
    );
    tracker.write_update(std::slice::from_ref(&chunk));

    assert_eq!(h.sink.take(), vec![vec![chunk]]);
    assert!(!tracker.is_loaded(7, 7));
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[test]
fn queues_stay_disjoint_through_a_session() {
    let h = Harness::new(
        Render::Immediate,
        TrackerConfig {
            disk_load_rate: 2,
            ..config(2, 3)
        },
    );
    let history: Vec<ChunkKey> = (0..40).map(|i| ChunkKey::pack(i - 20, i % 7)).collect();
    h.store.seed(WORLD, Identity::Player(PLAYER), &history);
    for key in &history {
        h.cache.put(key.x(), key.z(), tile_for(*key, 32));
    }
    let tracker = h.tracker();

    for step in 0..30 {
        tracker.push_position(at_chunk(step - 15, step % 5));
        tracker.tick();
        assert_disjoint(&tracker);
        tracker.clear_chunks([
            ChunkKey::pack(step - 15, 0),
            ChunkKey::pack(-step, step % 7),
        ]);
        assert_disjoint(&tracker);
    }
}

#[test]
fn concurrent_invalidation_keeps_queues_disjoint() {
    let h = Harness::new(Render::Immediate, config(2, 4));
    let tracker = Arc::new(h.tracker());

    let ticker = {
        let tracker = Arc::clone(&tracker);
        std::thread::spawn(move || {
            for step in 0..200 {
                tracker.push_position(at_chunk(step % 9, step % 4));
                tracker.tick();
            }
        })
    };
    for i in 0..200 {
        tracker.clear_chunks([ChunkKey::pack(i % 9, i % 4), ChunkKey::pack(i % 3, 0)]);
    }
    ticker.join().unwrap();

    assert_disjoint(&tracker);
}

// ---------------------------------------------------------------------------
// Tracker slot
// ---------------------------------------------------------------------------

#[test]
fn slot_installs_once_and_reuses_the_explorer() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let slot = TrackerSlot::new();

    let first = slot.install(|| h.tracker()).unwrap();
    first.tick();
    assert!(first.is_loaded(0, 0));

    let second = slot
        .install(|| panic!("explorer tracker already installed"))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!second.is_loaded(0, 0));
    assert!(slot.explorer().is_some());
}

#[test]
fn foreign_slot_is_left_alone() {
    let h = Harness::new(Render::Immediate, config(1, 20));
    let slot = TrackerSlot::foreign("other-map-mod");

    let err = slot.install(|| h.tracker()).err().unwrap();
    assert_eq!(
        err,
        InstallError::Occupied {
            owner: "other-map-mod".into()
        }
    );
    assert!(slot.explorer().is_none());
    assert!(slot.uninstall().is_none());
}
