//! Per-world tick: the "world thread" of the demo host.
//!
//! Each tick runs the world's [`SimulationLayer`]s (explorer movement,
//! terrain edits), pushes every explorer's position into its tracker, and
//! forwards shared-map batches from the update bus to the other explorers
//! of the world.
//!
//! # Adding a new layer
//!
//! 1. Implement [`SimulationLayer`] for your struct.
//! 2. Add it to the layer list built in `lifecycle.rs`.

use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use explorers_engine::world::WorldId;
use explorers_engine::world::position::{ChunkKey, WorldPos};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

use crate::dashboard::Metrics;
use crate::event_bus::MapUpdateBatch;
use crate::host::ProceduralWorldMap;
use crate::player_registry::{Session, SessionRegistry};

/// Everything a layer may touch in one world.
pub struct WorldContext {
    pub world: WorldId,
    pub map: Arc<ProceduralWorldMap>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<Metrics>,
}

impl WorldContext {
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry.in_world(&self.world)
    }
}

/// A pluggable piece of world behavior, run once per world tick.
///
/// Layers are expected to be cheap per tick -- heavy work belongs on the
/// blocking pool.
pub trait SimulationLayer: Send + Sync + 'static {
    /// Human-readable name (used for logging).
    fn name(&self) -> &'static str;

    fn tick(&self, world: &WorldContext);
}

/// Explorers wander: each keeps a heading that drifts a little every tick.
pub struct Wander {
    rng: Mutex<ChaCha8Rng>,
    headings: Mutex<HashMap<Uuid, f64>>,
    /// Blocks per tick.
    speed: f64,
}

impl Wander {
    pub fn new(seed: u64, speed: f64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            headings: Mutex::new(HashMap::new()),
            speed,
        }
    }
}

impl SimulationLayer for Wander {
    fn name(&self) -> &'static str {
        "wander"
    }

    fn tick(&self, world: &WorldContext) {
        let sessions = world.sessions();
        let mut rng = self.rng.lock().expect("wander rng poisoned");
        let mut headings = self.headings.lock().expect("wander headings poisoned");
        headings.retain(|id, _| sessions.iter().any(|s| s.id == *id));

        for session in &sessions {
            let heading = headings
                .entry(session.id)
                .or_insert_with(|| rng.gen_range(0.0..TAU));
            *heading += rng.gen_range(-0.15..0.15);
            let pos = session.position();
            session.set_position(WorldPos::new(
                pos.x + heading.cos() * self.speed,
                pos.y,
                pos.z + heading.sin() * self.speed,
            ));
        }
    }
}

/// Now and then some explorer changes the terrain near where it stands;
/// every tracker in the world is told to invalidate that chunk.
pub struct TerrainEdits {
    rng: Mutex<ChaCha8Rng>,
    /// Probability of an edit per world tick.
    chance: f64,
    /// Max distance, in chunks, from the editing explorer.
    reach: i32,
}

impl TerrainEdits {
    pub fn new(seed: u64, chance: f64, reach: i32) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            chance: chance.clamp(0.0, 1.0),
            reach: reach.max(0),
        }
    }
}

impl SimulationLayer for TerrainEdits {
    fn name(&self) -> &'static str {
        "terrain_edits"
    }

    fn tick(&self, world: &WorldContext) {
        let sessions = world.sessions();
        if sessions.is_empty() {
            return;
        }
        let key = {
            let mut rng = self.rng.lock().expect("terrain edit rng poisoned");
            if !rng.gen_bool(self.chance) {
                return;
            }
            let editor = &sessions[rng.gen_range(0..sessions.len())];
            let center = editor.position().chunk();
            ChunkKey::pack(
                center.x + rng.gen_range(-self.reach..=self.reach),
                center.z + rng.gen_range(-self.reach..=self.reach),
            )
        };

        world.map.apply_edit(key);
        for session in &sessions {
            if let Some(tracker) = session.tracker() {
                tracker.clear_chunks([key]);
            }
        }
        world.metrics.record_terrain_edit();
        tracing::debug!(
            "Terrain edit at chunk ({}, {}) in {}",
            key.x(),
            key.z(),
            world.world
        );
    }
}

/// Deliver one shared-map batch to every explorer of its world except the
/// one it came from. Returns how many trackers received it.
pub fn forward_batch(world: &WorldContext, batch: &MapUpdateBatch) -> u64 {
    if batch.world != world.world {
        return 0;
    }
    let mut delivered = 0;
    for session in world.sessions() {
        if session.id == batch.origin {
            continue;
        }
        if let Some(tracker) = session.tracker() {
            tracker.write_update(&batch.chunks);
            delivered += 1;
        }
    }
    delivered
}

/// Run one world tick.
pub fn tick_world(
    world: &WorldContext,
    layers: &[Box<dyn SimulationLayer>],
    bus: &mut broadcast::Receiver<MapUpdateBatch>,
) {
    for layer in layers {
        layer.tick(world);
    }

    for session in world.sessions() {
        if let Some(tracker) = session.tracker() {
            tracker.push_position(session.position());
        }
    }

    loop {
        match bus.try_recv() {
            Ok(batch) => {
                let delivered = forward_batch(world, &batch);
                world.metrics.record_broadcast(delivered);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "World {} skipped {} shared map batches",
                    world.world,
                    skipped
                );
            }
        }
    }
}

/// Spawn the tick task for one world.
pub fn start(
    world: Arc<WorldContext>,
    layers: Vec<Box<dyn SimulationLayer>>,
    mut bus: broadcast::Receiver<MapUpdateBatch>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; skip it so the world has time to initialize.
        interval.tick().await;

        let names: Vec<&str> = layers.iter().map(|l| l.name()).collect();
        tracing::info!(
            "World tick for {} started (interval {:?}, layers {:?})",
            world.world,
            period,
            names
        );

        loop {
            interval.tick().await;
            tick_world(&world, &layers, &mut bus);
        }
    })
}
