//! Live status dashboard: tile streaming counters, sessions, and loaded
//! exploration stores.
//!
//! Trackers only ever touch the atomic [`Metrics`]; the web server builds
//! its status from the registries on its own tasks and never takes a
//! tracker lock.

pub mod metrics;
pub mod server;

use std::sync::Arc;

use explorers_engine::exploration::ExplorationDirectory;
use serde::Serialize;

use crate::player_registry::{SessionInfo, SessionRegistry};

pub use metrics::{Metrics, MetricsSnapshot};

/// Central state shared via `Arc<DashboardState>`.
pub struct DashboardState {
    pub metrics: Arc<Metrics>,
    pub registry: Arc<SessionRegistry>,
    pub directory: Arc<ExplorationDirectory>,
}

impl DashboardState {
    pub fn new(
        metrics: Arc<Metrics>,
        registry: Arc<SessionRegistry>,
        directory: Arc<ExplorationDirectory>,
    ) -> Self {
        Self {
            metrics,
            registry,
            directory,
        }
    }

    pub fn status(&self) -> Status {
        let worlds = self
            .directory
            .world_names()
            .into_iter()
            .map(|name| WorldStatus {
                loaded_stores: self.directory.loaded_identities(&name),
                name,
            })
            .collect();
        Status {
            metrics: self.metrics.snapshot(),
            sessions: self.registry.snapshot(),
            worlds,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub metrics: MetricsSnapshot,
    pub sessions: Vec<SessionInfo>,
    pub worlds: Vec<WorldStatus>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorldStatus {
    pub name: String,
    /// Exploration stores currently held in memory for this world.
    pub loaded_stores: usize,
}
