//! Map tile images and the contracts used to obtain and store them.
//!
//! Rendering and on-disk layout live with the host. The engine only needs
//! to ask for a tile, poll whether it is ready, and hand finished tiles to
//! the outbound transport.

pub mod facade;
pub mod pending;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::world::position::ChunkPos;

pub use facade::{TileBroadcast, TileCache, UpdateSink, WorldMap, WorldMapSettings};
pub use pending::{Completer, Pending};

/// Edge length, in pixels, of a full-resolution map tile.
pub const TILE_SIZE: u32 = 32;

/// Downscale applied to tiles before they are sent or cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    Full,
    Half,
    Quarter,
}

impl Resolution {
    pub const fn scale(self) -> f32 {
        match self {
            Resolution::Full => 1.0,
            Resolution::Half => 0.5,
            Resolution::Quarter => 0.25,
        }
    }

    /// Edge length of a tile at this resolution.
    pub fn image_size(self) -> u32 {
        (TILE_SIZE as f32 * self.scale()).floor() as u32
    }

    /// Short lowercase tag, used in cache paths.
    pub const fn tag(self) -> &'static str {
        match self {
            Resolution::Full => "full",
            Resolution::Half => "half",
            Resolution::Quarter => "quarter",
        }
    }

    /// Resample `image` to this resolution's tile size (nearest neighbour).
    pub fn rescale(self, image: &TileImage) -> TileImage {
        let size = self.image_size();
        if image.width == size && image.height == size {
            return image.clone();
        }
        image.resample(size, size)
    }
}

/// A rendered map tile: row-major ARGB pixels.
///
/// Pixels sit behind an `Arc` so handing one tile to several clients is a
/// refcount bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u32]>,
}

impl TileImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height) as usize);
        Self {
            width,
            height,
            pixels: pixels.into(),
        }
    }

    pub fn filled(width: u32, height: u32, argb: u32) -> Self {
        Self::new(width, height, vec![argb; (width * height) as usize])
    }

    pub fn has_size(&self, size: u32) -> bool {
        self.width == size && self.height == size
    }

    fn resample(&self, width: u32, height: u32) -> TileImage {
        if self.width == 0 || self.height == 0 || width == 0 || height == 0 {
            return TileImage::new(width, height, vec![0; (width * height) as usize]);
        }
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            let sy = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let sx = (x as u64 * self.width as u64 / width as u64) as u32;
                pixels.push(self.pixels[(sy * self.width + sx) as usize]);
            }
        }
        TileImage::new(width, height, pixels)
    }
}

/// One entry of an outbound map update. `image: None` tells the client to
/// drop the tile.
#[derive(Debug, Clone, PartialEq)]
pub struct MapChunk {
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub image: Option<TileImage>,
}

impl MapChunk {
    pub fn tile(pos: ChunkPos, image: TileImage) -> Self {
        Self {
            chunk_x: pos.x,
            chunk_z: pos.z,
            image: Some(image),
        }
    }

    pub fn removal(pos: ChunkPos) -> Self {
        Self {
            chunk_x: pos.x,
            chunk_z: pos.z,
            image: None,
        }
    }

    pub const fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.chunk_x, self.chunk_z)
    }
}
