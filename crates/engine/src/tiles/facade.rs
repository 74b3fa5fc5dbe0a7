//! Interfaces the host supplies to a map tracker.

use uuid::Uuid;

use super::pending::Pending;
use super::{MapChunk, Resolution, TileImage};
use crate::world::WorldId;
use crate::world::position::ChunkKey;

/// The host's live world map for one world.
pub trait WorldMap: Send + Sync {
    /// Tiles are only streamed while the map is enabled.
    fn is_enabled(&self) -> bool;

    /// Host-defined pixel scale of rendered tiles. Part of the cache key.
    fn image_scale(&self) -> f32;

    /// Map view radius (chunks) for a client that asked for `client_radius`.
    fn view_radius(&self, client_radius: i32) -> i32 {
        client_radius
    }

    /// Request a freshly rendered tile.
    ///
    /// The tracker drops a handle it finds unresolved and asks again by
    /// coordinate on a later tick. Once a render has completed, the next
    /// request for that chunk must return the completed handle, unless the
    /// chunk changed in between.
    fn request_image(&self, key: ChunkKey) -> Pending<TileImage>;

    /// Whether compass markers need refreshing this tick.
    fn is_compass_updating(&self) -> bool {
        false
    }

    /// Refresh points of interest around a player. Called by the tracker
    /// when [`WorldMap::is_compass_updating`] is set.
    fn update_points_of_interest(
        &self,
        _player: Uuid,
        _view_radius: i32,
        _chunk_x: i32,
        _chunk_z: i32,
    ) {
    }
}

/// Durable per-world tile storage.
pub trait TileCache: Send + Sync {
    /// Read a previously stored tile. Resolves to `None` when nothing is
    /// stored for that chunk. As with [`WorldMap::request_image`], a read
    /// that has completed must be returned by the next request for the same
    /// tile until that tile is written again.
    fn request_cached_image(
        &self,
        world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        scale: f32,
        resolution: Resolution,
    ) -> Pending<Option<TileImage>>;

    /// Store a tile. The cache downscales to `resolution` itself.
    fn write_image(
        &self,
        world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        scale: f32,
        resolution: Resolution,
        image: TileImage,
    ) -> Pending<anyhow::Result<()>>;
}

/// Map settings the client renders with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldMapSettings {
    pub min_scale: f32,
    pub max_scale: f32,
}

impl WorldMapSettings {
    /// Lower `min_scale` towards `min_zoom` (never below 2). Returns the
    /// adjusted settings if anything changed.
    pub fn with_min_zoom(self, min_zoom: f32) -> Option<WorldMapSettings> {
        if self.min_scale > min_zoom && min_zoom < self.max_scale {
            Some(WorldMapSettings {
                min_scale: min_zoom.max(2.0),
                ..self
            })
        } else {
            None
        }
    }
}

/// Outbound transport to a single client.
pub trait UpdateSink: Send + Sync {
    /// Deliver one map update. Must not block the caller for long.
    fn send_update(&self, chunks: Vec<MapChunk>);

    fn send_settings(&self, _settings: WorldMapSettings) {}
}

/// Fan-out of freshly generated tiles to the other explorers of a world,
/// used when every player shares one map.
pub trait TileBroadcast: Send + Sync {
    fn broadcast(&self, world: &WorldId, origin: Uuid, chunks: &[MapChunk]);
}
