//! Explorer map host: wires the exploration engine to disk persistence, a
//! disk tile cache, and simulated clients.

pub mod config;
pub mod dashboard;
pub mod event_bus;
pub mod host;
pub mod lifecycle;
pub mod persistence;
pub mod player_registry;
pub mod simulation;
pub mod tile_cache;
