//! Connection and world lifecycle.
//!
//! Turns host events into exploration directory calls and tracker tasks:
//!
//! | event          | directory                          | tasks                         |
//! |----------------|------------------------------------|-------------------------------|
//! | world added    | `load(world, GLOBAL)`              | world tick, autosave          |
//! | world removed  | `unload(world, GLOBAL)`            | aborted                       |
//! | session start  | `load(world, player)`              | tracker tick                  |
//! | session end    | `unload_from_all(player)`          | tracker tick stops            |
//! | shutdown       | `unload_from_all(GLOBAL)`          | all aborted                   |
//!
//! Directory calls do file I/O and always run on the blocking pool.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use explorers_engine::exploration::{ExplorationDirectory, Identity};
use explorers_engine::tiles::{TileCache, UpdateSink};
use explorers_engine::tracker::{MapTracker, TrackerHost};
use explorers_engine::world::WorldId;
use explorers_engine::world::position::WorldPos;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ConfigHandle;
use crate::dashboard::Metrics;
use crate::event_bus::MapUpdateBus;
use crate::host::ProceduralWorldMap;
use crate::player_registry::{Session, SessionRegistry};
use crate::simulation::{self, SimulationLayer, TerrainEdits, Wander, WorldContext};

/// View radius every simulated client asks for, in chunks.
pub const CLIENT_VIEW_RADIUS: i32 = 6;

/// Shared services, created once at startup.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ConfigHandle>,
    pub directory: Arc<ExplorationDirectory>,
    pub cache: Arc<dyn TileCache>,
    pub bus: MapUpdateBus,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<Metrics>,
}

/// Knobs for the demo world.
#[derive(Debug, Clone, Copy)]
pub struct WorldOptions {
    /// Artificial delay on every tile render.
    pub render_latency: Duration,
    /// Chance of a terrain edit per world tick.
    pub terrain_edit_chance: f64,
    /// Explorer speed in blocks per world tick.
    pub wander_speed: f64,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            render_latency: Duration::from_millis(5),
            terrain_edit_chance: 0.02,
            wander_speed: 2.0,
        }
    }
}

struct WorldRuntime {
    context: Arc<WorldContext>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorldRuntime {
    fn abort(&self) {
        for task in self.tasks.lock().expect("world tasks poisoned").drain(..) {
            task.abort();
        }
    }
}

pub struct Lifecycle {
    services: Services,
    options: WorldOptions,
    worlds: DashMap<String, Arc<WorldRuntime>>,
}

impl Lifecycle {
    pub fn new(services: Services, options: WorldOptions) -> Self {
        Self {
            services,
            options,
            worlds: DashMap::new(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn world_map(&self, world: &str) -> Option<Arc<ProceduralWorldMap>> {
        self.worlds
            .get(world)
            .map(|runtime| Arc::clone(&runtime.context.map))
    }

    pub fn world_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.worlds.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }

    /// Bring a world online: load its shared store, start its tick and
    /// its autosave. Adding a world twice is a no-op.
    pub async fn add_world(&self, name: &str) -> Result<()> {
        if self.worlds.contains_key(name) {
            return Ok(());
        }
        let world = WorldId::new(name);
        let storage = world.storage_name();

        let directory = Arc::clone(&self.services.directory);
        let key = storage.clone();
        run_blocking(move || directory.load(&key, Identity::Global)).await?;

        let context = Arc::new(WorldContext {
            map: Arc::new(ProceduralWorldMap::new(
                world.clone(),
                self.options.render_latency,
            )),
            world: world.clone(),
            registry: Arc::clone(&self.services.registry),
            metrics: Arc::clone(&self.services.metrics),
        });

        let seed = crate::host::world_seed(&storage) as u64;
        let layers: Vec<Box<dyn SimulationLayer>> = vec![
            Box::new(Wander::new(seed, self.options.wander_speed)),
            Box::new(TerrainEdits::new(
                seed ^ 0x5eed,
                self.options.terrain_edit_chance,
                CLIENT_VIEW_RADIUS,
            )),
        ];
        let config = self.services.config.current();
        let tick = simulation::start(
            Arc::clone(&context),
            layers,
            self.services.bus.subscribe(),
            config.world_tick(),
        );
        let autosave = spawn_autosave(
            storage,
            Arc::clone(&self.services.directory),
            Arc::clone(&self.services.metrics),
            config.autosave_interval(),
        );

        self.worlds.insert(
            name.to_string(),
            Arc::new(WorldRuntime {
                context,
                tasks: Mutex::new(vec![tick, autosave]),
            }),
        );
        self.services.metrics.world_added();
        tracing::info!("World {} added", world);
        Ok(())
    }

    /// Take a world offline. Its explorers must have left first.
    pub async fn remove_world(&self, name: &str) -> Result<()> {
        let Some((_, runtime)) = self.worlds.remove(name) else {
            return Ok(());
        };
        runtime.abort();

        let directory = Arc::clone(&self.services.directory);
        let storage = runtime.context.world.storage_name();
        run_blocking(move || directory.unload(&storage, Identity::Global)).await?;

        self.services.metrics.world_removed();
        tracing::info!("World {} removed", runtime.context.world);
        Ok(())
    }

    /// Start a session for `id` in `world` and install its map tracker.
    ///
    /// Joining again with the same id in the same world reuses the session;
    /// its tracker is reset and keeps what the client already has.
    pub async fn join(&self, id: Uuid, name: &str, world: &str) -> Result<Arc<Session>> {
        let Some(runtime) = self.worlds.get(world).map(|r| Arc::clone(r.value())) else {
            bail!("world {world} is not loaded");
        };
        let context = &runtime.context;

        if let Some(existing) = self.services.registry.get(id) {
            if existing.world == context.world && existing.is_active() {
                self.install_tracker(&existing, context);
                return Ok(existing);
            }
            self.leave(id).await?;
        }

        let directory = Arc::clone(&self.services.directory);
        let storage = context.world.storage_name();
        run_blocking(move || directory.load(&storage, Identity::Player(id))).await?;

        let session = Arc::new(Session::new(id, name, context.world.clone(), WorldPos::ORIGIN));
        let min_zoom = self.services.config.current().min_zoom;
        let settings = context.map.settings();
        session
            .client
            .send_settings(settings.with_min_zoom(min_zoom).unwrap_or(settings));

        self.services.registry.register(Arc::clone(&session));
        self.services.metrics.session_started();

        if self.install_tracker(&session, context) {
            session.set_ticker(spawn_tracker_task(
                Arc::clone(&session),
                Arc::clone(&self.services.metrics),
                self.services.config.current().tracker_tick(),
            ));
        }
        Ok(session)
    }

    fn install_tracker(&self, session: &Arc<Session>, context: &WorldContext) -> bool {
        let host = TrackerHost {
            world_map: Arc::clone(&context.map) as _,
            cache: Arc::clone(&self.services.cache),
            directory: Arc::clone(&self.services.directory),
            sink: Arc::clone(&session.client) as _,
            broadcast: Arc::new(self.services.bus.clone()),
            config: self.services.config.tracker_config(),
        };
        let installed = session.slot.install(|| {
            MapTracker::new(session.id, session.world.clone(), CLIENT_VIEW_RADIUS, host)
        });
        match installed {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Explorer map disabled for {} ({}): {}",
                    session.name,
                    session.id,
                    e
                );
                false
            }
        }
    }

    /// End a session: stop its tracker and save and unload the player's
    /// stores in every world.
    pub async fn leave(&self, id: Uuid) -> Result<()> {
        let Some(session) = self.services.registry.deregister(id) else {
            return Ok(());
        };
        session.end();
        if let Some(task) = session.take_ticker() {
            // A tick in flight must not touch the player's stores after unload.
            if let Err(e) = task.await {
                tracing::warn!("Map tracker task for {} ended abnormally: {}", session.name, e);
            }
        }
        session.slot.uninstall();
        self.services.metrics.session_ended();

        let directory = Arc::clone(&self.services.directory);
        run_blocking(move || directory.unload_from_all(Identity::Player(id))).await?;
        tracing::info!("{} left {}", session.name, session.world);
        Ok(())
    }

    /// End every session, stop every world, and persist the shared stores.
    pub async fn shutdown(&self) -> Result<()> {
        for session in self.services.registry.all() {
            self.leave(session.id).await?;
        }
        for world in self.world_names() {
            if let Some((_, runtime)) = self.worlds.remove(&world) {
                runtime.abort();
                self.services.metrics.world_removed();
            }
        }
        let directory = Arc::clone(&self.services.directory);
        run_blocking(move || directory.unload_from_all(Identity::Global)).await?;
        tracing::info!("Exploration data saved");
        Ok(())
    }
}

/// Run directory I/O on the blocking pool.
async fn run_blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task failed")
}

/// Tick the session's tracker until the session ends or its tracker is
/// removed. Ticks run on the blocking pool since they wait on locks.
fn spawn_tracker_task(session: Arc<Session>, metrics: Arc<Metrics>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            interval.tick().await;
            if !session.is_active() {
                break;
            }
            let Some(tracker) = session.tracker() else {
                break;
            };
            let started = Instant::now();
            match tokio::task::spawn_blocking(move || tracker.tick()).await {
                Ok(stats) => metrics.record_tick(&stats, started.elapsed()),
                Err(e) => {
                    tracing::error!("Map tracker tick for {} failed: {}", session.name, e);
                    break;
                }
            }
        }
        tracing::debug!("Map tracker for {} stopped", session.name);
    })
}

fn spawn_autosave(
    storage: String,
    directory: Arc<ExplorationDirectory>,
    metrics: Arc<Metrics>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick is immediate, skip it
        loop {
            interval.tick().await;
            let dir = Arc::clone(&directory);
            let world = storage.clone();
            match tokio::task::spawn_blocking(move || dir.save_world(&world)).await {
                Ok(0) => tracing::debug!("Autosave of {}: nothing changed", storage),
                Ok(n) => tracing::info!("Autosaved {} exploration records of {}", n, storage),
                Err(e) => tracing::error!("Autosave of {} failed: {}", storage, e),
            }
            match serde_json::to_string(&metrics.snapshot()) {
                Ok(json) => tracing::info!("Metrics: {}", json),
                Err(e) => tracing::warn!("Failed to serialize metrics: {}", e),
            }
        }
    })
}
