//! `<data>/config.json`: loading, first-run defaults, and live reload.
//!
//! Trackers read their settings through a `watch` channel and only apply a
//! new value when their session resets, so reloading never disturbs a tick
//! in progress.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use explorers_engine::tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::persistence::write_atomic;

pub const CONFIG_FILE: &str = "config.json";

/// How often the watcher checks the config file for changes.
const RELOAD_POLL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExplorersConfig {
    #[serde(flatten)]
    pub tracker: TrackerConfig,
    /// Lowest zoom-out scale clients may use (clamped to at least 2).
    pub min_zoom: f32,
    pub autosave_interval_secs: u64,
    pub tracker_tick_millis: u64,
    pub world_tick_millis: u64,
}

impl Default for ExplorersConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            min_zoom: 8.0,
            autosave_interval_secs: 60,
            tracker_tick_millis: 100,
            world_tick_millis: 50,
        }
    }
}

impl ExplorersConfig {
    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!("Wrote default config to {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        write_atomic(path, text.as_bytes())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    pub fn tracker_tick(&self) -> Duration {
        Duration::from_millis(self.tracker_tick_millis.max(1))
    }

    pub fn world_tick(&self) -> Duration {
        Duration::from_millis(self.world_tick_millis.max(1))
    }
}

/// Current configuration, published to everything that reads it.
pub struct ConfigHandle {
    path: PathBuf,
    full: watch::Sender<ExplorersConfig>,
    tracker: watch::Sender<TrackerConfig>,
}

impl ConfigHandle {
    pub fn new(path: PathBuf, initial: ExplorersConfig) -> Self {
        let (tracker, _) = watch::channel(initial.tracker.clone());
        let (full, _) = watch::channel(initial);
        Self {
            path,
            full,
            tracker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> ExplorersConfig {
        self.full.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExplorersConfig> {
        self.full.subscribe()
    }

    /// Receiver handed to every tracker.
    pub fn tracker_config(&self) -> watch::Receiver<TrackerConfig> {
        self.tracker.subscribe()
    }

    /// Replace the configuration. Returns `false` if nothing changed.
    pub fn publish(&self, config: ExplorersConfig) -> bool {
        if *self.full.borrow() == config {
            return false;
        }
        self.tracker.send_replace(config.tracker.clone());
        self.full.send_replace(config);
        true
    }

    /// Re-read the file now.
    pub fn reload(&self) -> Result<bool> {
        let config = ExplorersConfig::load(&self.path)?;
        Ok(self.publish(config))
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll the config file's modification time and republish on change. A file
/// that fails to parse is reported and the previous settings stay in effect.
pub fn spawn_watcher(handle: Arc<ConfigHandle>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = modified(handle.path());
        let mut interval = tokio::time::interval(RELOAD_POLL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let now = modified(handle.path());
            if now == last {
                continue;
            }
            last = now;
            match handle.reload() {
                Ok(true) => tracing::info!(
                    "Reloaded {}; sessions pick it up on their next reset",
                    handle.path().display()
                ),
                Ok(false) => {}
                Err(e) => tracing::warn!("Keeping previous config: {:#}", e),
            }
        }
    })
}
