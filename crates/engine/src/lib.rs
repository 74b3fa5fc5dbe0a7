//! Incremental world map exploration.
//!
//! A [`tracker::MapTracker`] per connected client streams map tiles around
//! the client's avatar under per-tick budgets, invalidates tiles on terrain
//! edits, and replays the client's persisted exploration from the tile
//! cache. Rendering, tile storage, persistence and transport belong to the
//! host and are reached through the traits in [`tiles`] and [`exploration`].

pub mod exploration;
pub mod tiles;
pub mod tracker;
pub mod world;
