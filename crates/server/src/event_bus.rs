//! Shared-map update bus.
//!
//! With per-player maps off, every tile a tracker generates is published
//! here as a [`MapUpdateBatch`]. Each world's tick task drains the bus and
//! forwards batches for its world to every other explorer session, skipping
//! the session the batch came from.

use std::sync::Arc;

use explorers_engine::tiles::{MapChunk, TileBroadcast};
use explorers_engine::world::WorldId;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Recommended capacity for the broadcast channel.
/// 256 batches in flight should handle bursty activity without lagging.
pub const BUS_CAPACITY: usize = 256;

/// Freshly generated tiles from one tracker tick.
///
/// Uses `Arc<[...]>` so cloning per broadcast subscriber is just a refcount bump.
#[derive(Clone, Debug)]
pub struct MapUpdateBatch {
    pub world: WorldId,
    /// Session whose tracker produced the tiles.
    pub origin: Uuid,
    pub chunks: Arc<[MapChunk]>,
}

/// [`TileBroadcast`] over a `tokio::sync::broadcast` channel.
#[derive(Clone)]
pub struct MapUpdateBus {
    tx: broadcast::Sender<MapUpdateBatch>,
}

impl MapUpdateBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MapUpdateBatch> {
        self.tx.subscribe()
    }

    pub fn publish(&self, batch: MapUpdateBatch) {
        // Ignore send errors (no subscribers = no problem).
        let _ = self.tx.send(batch);
    }
}

impl Default for MapUpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl TileBroadcast for MapUpdateBus {
    fn broadcast(&self, world: &WorldId, origin: Uuid, chunks: &[MapChunk]) {
        self.publish(MapUpdateBatch {
            world: world.clone(),
            origin,
            chunks: chunks.into(),
        });
    }
}
