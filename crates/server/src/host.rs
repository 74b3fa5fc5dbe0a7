//! Demo host: a procedurally generated world map and simulated clients.
//!
//! Stands in for a game server so the binary runs end to end. Tiles are
//! rendered from Perlin height noise on the blocking pool, optionally with
//! an artificial delay so trackers see unresolved requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use explorers_engine::tiles::{
    MapChunk, Pending, TILE_SIZE, TileImage, UpdateSink, WorldMap, WorldMapSettings,
};
use explorers_engine::world::WorldId;
use explorers_engine::world::position::{ChunkKey, MAP_CHUNK_SHIFT};
use noise::{NoiseFn, Perlin};
use tokio::runtime::Handle;
use uuid::Uuid;

/// Map view radius cap, in chunks.
const MAX_VIEW_RADIUS: i32 = 32;

/// Finished renders nobody came back for are swept once this many
/// handles are held.
const RETAINED_RENDERS: usize = 1024;

/// Blocks per noise period of the continent layer.
const CONTINENT_SCALE: f64 = 1024.0;
const DETAIL_SCALE: f64 = 96.0;

/// Stable seed for a world, so the same name always renders the same map.
pub fn world_seed(name: &str) -> u32 {
    name.bytes()
        .fold(0x811c_9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193))
}

/// Height-based tile renderer.
pub struct Terrain {
    continents: Perlin,
    detail: Perlin,
}

impl Terrain {
    pub fn new(seed: u32) -> Self {
        Self {
            continents: Perlin::new(seed),
            detail: Perlin::new(seed.wrapping_add(0x51ED)),
        }
    }

    /// Height in roughly `[-1, 1]` at a block position.
    pub fn height(&self, block_x: f64, block_z: f64) -> f64 {
        let base = self
            .continents
            .get([block_x / CONTINENT_SCALE, block_z / CONTINENT_SCALE]);
        let detail = self.detail.get([block_x / DETAIL_SCALE, block_z / DETAIL_SCALE]);
        base * 0.8 + detail * 0.2
    }

    /// Render one full-size map tile. `scars` darkens the tile once per
    /// terrain edit so changed chunks are visible on the client.
    pub fn render(&self, key: ChunkKey, scars: u32) -> TileImage {
        let origin_x = (key.x() as i64) << MAP_CHUNK_SHIFT;
        let origin_z = (key.z() as i64) << MAP_CHUNK_SHIFT;
        let mut pixels = Vec::with_capacity((TILE_SIZE * TILE_SIZE) as usize);
        for pz in 0..TILE_SIZE {
            for px in 0..TILE_SIZE {
                let h = self.height(
                    (origin_x + px as i64) as f64,
                    (origin_z + pz as i64) as f64,
                );
                pixels.push(shade(color_for(h), scars));
            }
        }
        TileImage::new(TILE_SIZE, TILE_SIZE, pixels)
    }
}

fn color_for(height: f64) -> u32 {
    match height {
        h if h < -0.25 => 0xFF1E_3A8A,
        h if h < 0.0 => 0xFF25_63EB,
        h if h < 0.06 => 0xFFE6_D59A,
        h if h < 0.4 => 0xFF4C_9A2A,
        h if h < 0.65 => 0xFF7D_7D7D,
        _ => 0xFFF5_F5F5,
    }
}

fn shade(argb: u32, scars: u32) -> u32 {
    if scars == 0 {
        return argb;
    }
    let factor = 0.75f32.powi(scars.min(8) as i32);
    let channel = |shift: u32| (((argb >> shift) & 0xFF) as f32 * factor) as u32;
    (argb & 0xFF00_0000) | (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

/// The live world map of one demo world.
pub struct ProceduralWorldMap {
    world: WorldId,
    terrain: Arc<Terrain>,
    settings: WorldMapSettings,
    enabled: AtomicBool,
    compass_updating: AtomicBool,
    latency: Duration,
    runtime: Handle,
    /// One handle per chunk, kept after the render finishes until a
    /// request picks it up resolved.
    renders: DashMap<ChunkKey, Pending<TileImage>>,
    scars: DashMap<ChunkKey, u32>,
    /// Last compass refresh per player: (view radius, chunk x, chunk z).
    compass: DashMap<Uuid, (i32, i32, i32)>,
}

impl ProceduralWorldMap {
    /// Must be called inside a tokio runtime.
    pub fn new(world: WorldId, latency: Duration) -> Self {
        Self::with_runtime(world, latency, Handle::current())
    }

    pub fn with_runtime(world: WorldId, latency: Duration, runtime: Handle) -> Self {
        let seed = world_seed(world.storage_name().as_str());
        Self {
            world,
            terrain: Arc::new(Terrain::new(seed)),
            settings: WorldMapSettings {
                min_scale: 32.0,
                max_scale: 256.0,
            },
            enabled: AtomicBool::new(true),
            compass_updating: AtomicBool::new(true),
            latency,
            runtime,
            renders: DashMap::new(),
            scars: DashMap::new(),
            compass: DashMap::new(),
        }
    }

    pub fn world(&self) -> &WorldId {
        &self.world
    }

    pub fn settings(&self) -> WorldMapSettings {
        self.settings
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Relaxed);
    }

    pub fn set_compass_updating(&self, updating: bool) {
        self.compass_updating.store(updating, Relaxed);
    }

    /// Simulate a terrain change in `key`. The next render of that chunk
    /// differs from what clients were sent before.
    pub fn apply_edit(&self, key: ChunkKey) {
        *self.scars.entry(key).or_insert(0) += 1;
        self.renders.remove(&key);
    }

    pub fn compass_state(&self, player: Uuid) -> Option<(i32, i32, i32)> {
        self.compass.get(&player).map(|entry| *entry)
    }

    /// Renders currently in flight.
    pub fn pending_renders(&self) -> usize {
        self.renders.iter().filter(|r| !r.is_done()).count()
    }

    /// Finished renders waiting to be picked up.
    pub fn retained_renders(&self) -> usize {
        self.renders.iter().filter(|r| r.is_done()).count()
    }
}

impl WorldMap for ProceduralWorldMap {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Relaxed)
    }

    fn image_scale(&self) -> f32 {
        1.0
    }

    fn view_radius(&self, client_radius: i32) -> i32 {
        client_radius.min(MAX_VIEW_RADIUS)
    }

    fn request_image(&self, key: ChunkKey) -> Pending<TileImage> {
        if self.renders.len() >= RETAINED_RENDERS {
            self.renders.retain(|_, render| !render.is_done());
        }
        let (completer, pending) = match self.renders.entry(key) {
            Entry::Occupied(render) if render.get().is_done() => return render.remove(),
            Entry::Occupied(render) => return render.get().clone(),
            Entry::Vacant(slot) => {
                let (completer, pending) = Pending::new();
                slot.insert(pending.clone());
                (completer, pending)
            }
        };

        let scars = self.scars.get(&key).map_or(0, |s| *s);
        let terrain = Arc::clone(&self.terrain);
        let latency = self.latency;
        self.runtime.spawn_blocking(move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            completer.complete(terrain.render(key, scars));
        });
        pending
    }

    fn is_compass_updating(&self) -> bool {
        self.compass_updating.load(Relaxed)
    }

    fn update_points_of_interest(&self, player: Uuid, view_radius: i32, chunk_x: i32, chunk_z: i32) {
        self.compass.insert(player, (view_radius, chunk_x, chunk_z));
    }
}

/// A simulated client: applies map updates to its own copy of the map.
#[derive(Default)]
pub struct ClientSink {
    tiles: Mutex<HashMap<ChunkKey, TileImage>>,
    settings: Mutex<Option<WorldMapSettings>>,
    updates: AtomicU64,
}

impl ClientSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.lock().expect("client map poisoned").len()
    }

    pub fn tile(&self, key: ChunkKey) -> Option<TileImage> {
        self.tiles
            .lock()
            .expect("client map poisoned")
            .get(&key)
            .cloned()
    }

    pub fn settings(&self) -> Option<WorldMapSettings> {
        *self.settings.lock().expect("client settings poisoned")
    }

    pub fn update_count(&self) -> u64 {
        self.updates.load(Relaxed)
    }
}

impl UpdateSink for ClientSink {
    fn send_update(&self, chunks: Vec<MapChunk>) {
        self.updates.fetch_add(1, Relaxed);
        let mut tiles = self.tiles.lock().expect("client map poisoned");
        for chunk in chunks {
            let key = ChunkKey::pack(chunk.chunk_x, chunk.chunk_z);
            match chunk.image {
                Some(image) => {
                    tiles.insert(key, image);
                }
                None => {
                    tiles.remove(&key);
                }
            }
        }
    }

    fn send_settings(&self, settings: WorldMapSettings) {
        *self.settings.lock().expect("client settings poisoned") = Some(settings);
    }
}
