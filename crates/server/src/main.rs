use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use explorers_engine::exploration::ExplorationDirectory;
use explorers_server::config::{self, CONFIG_FILE, ConfigHandle, ExplorersConfig};
use explorers_server::dashboard::{self, DashboardState, Metrics};
use explorers_server::event_bus::MapUpdateBus;
use explorers_server::lifecycle::{Lifecycle, Services, WorldOptions};
use explorers_server::persistence::JsonExplorationStore;
use explorers_server::player_registry::SessionRegistry;
use explorers_server::tile_cache::DiskTileCache;
use uuid::Uuid;

fn arg(name: &str) -> Option<String> {
    std::env::args().skip_while(|a| a != name).nth(1)
}

#[tokio::main]
async fn main() {
    let data_dir: PathBuf = arg("--data").unwrap_or_else(|| "data".into()).into();
    let players: u32 = arg("--players").and_then(|s| s.parse().ok()).unwrap_or(4);
    let worlds: Vec<String> = arg("--worlds")
        .unwrap_or_else(|| "overworld".into())
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();
    let duration: Option<Duration> = arg("--duration")
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs);
    let dashboard_port: Option<u16> = arg("--dashboard-port").and_then(|s| s.parse().ok());
    let mut options = WorldOptions::default();
    if let Some(ms) = arg("--latency-ms").and_then(|s| s.parse().ok()) {
        options.render_latency = Duration::from_millis(ms);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    tracing::info!("Explorer map host, data in {}", data_dir.display());

    if let Err(e) = run(data_dir, players, worlds, duration, dashboard_port, options).await {
        tracing::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(
    data_dir: PathBuf,
    players: u32,
    worlds: Vec<String>,
    duration: Option<Duration>,
    dashboard_port: Option<u16>,
    options: WorldOptions,
) -> anyhow::Result<()> {
    anyhow::ensure!(!worlds.is_empty(), "--worlds names no world");
    let config_path = data_dir.join(CONFIG_FILE);
    let initial = ExplorersConfig::load_or_create(&config_path)?;
    let config = Arc::new(ConfigHandle::new(config_path, initial));
    config::spawn_watcher(Arc::clone(&config));

    let directory = Arc::new(ExplorationDirectory::new(Arc::new(JsonExplorationStore::new(
        &data_dir,
    ))));
    let services = Services {
        config,
        directory: Arc::clone(&directory),
        cache: Arc::new(DiskTileCache::new(&data_dir)),
        bus: MapUpdateBus::new(),
        registry: Arc::new(SessionRegistry::new()),
        metrics: Arc::new(Metrics::new()),
    };

    if let Some(port) = dashboard_port {
        let state = Arc::new(DashboardState::new(
            Arc::clone(&services.metrics),
            Arc::clone(&services.registry),
            directory,
        ));
        tokio::spawn(dashboard::server::start(state, port));
    }

    let lifecycle = Lifecycle::new(services, options);
    for world in &worlds {
        lifecycle.add_world(world).await?;
    }

    // Explorers are spread over the worlds round-robin. Ids are stable so a
    // restart replays what each explorer saw last time.
    for n in 0..players {
        let world = &worlds[n as usize % worlds.len()];
        let id = Uuid::from_u128(0xE0_0000 + n as u128);
        lifecycle.join(id, &format!("explorer-{n}"), world).await?;
    }
    tracing::info!(
        "{} explorers in {} worlds",
        lifecycle.services().registry.session_count(),
        worlds.len()
    );

    let until_done = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = until_done => {
            tracing::info!("Run time elapsed, shutting down...");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down...");
        }
    }

    lifecycle.shutdown().await?;
    let metrics = lifecycle.services().metrics.snapshot();
    tracing::info!(
        "Sent {} tiles in {} updates ({} generated, {} replayed, {} reloaded)",
        metrics.tiles_sent,
        metrics.updates_sent,
        metrics.tiles_generated,
        metrics.tiles_replayed,
        metrics.tiles_reloaded
    );
    Ok(())
}
