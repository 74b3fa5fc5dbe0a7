use indexmap::IndexSet;

use crate::world::position::{ChunkKey, ChunkPos};

/// Log2 of a region's edge in chunks (16x16 chunks per region).
pub const REGION_SHIFT: u32 = 4;

/// Region coordinate containing `pos`.
pub const fn region_of(pos: ChunkPos) -> (i32, i32) {
    (pos.x >> REGION_SHIFT, pos.z >> REGION_SHIFT)
}

/// A square group of explored chunks still waiting to be sent.
///
/// Regions are built on demand from the flat explored set and are never
/// persisted. Once every chunk is sent the region is done.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    origin: (i32, i32),
    chunks: IndexSet<ChunkKey>,
}

impl Region {
    pub fn new(origin: (i32, i32)) -> Self {
        Self {
            origin,
            chunks: IndexSet::new(),
        }
    }

    /// Region coordinate (chunk coordinate >> [`REGION_SHIFT`]).
    pub const fn origin(&self) -> (i32, i32) {
        self.origin
    }

    /// Chunk at the middle of this region.
    pub const fn center(&self) -> ChunkPos {
        let half = 1 << (REGION_SHIFT - 1);
        ChunkPos::new(
            (self.origin.0 << REGION_SHIFT) + half,
            (self.origin.1 << REGION_SHIFT) + half,
        )
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains(&key)
    }

    pub fn insert(&mut self, key: ChunkKey) -> bool {
        self.chunks.insert(key)
    }

    /// Remove `key`, keeping the order of the remaining chunks.
    pub fn remove(&mut self, key: ChunkKey) -> bool {
        self.chunks.shift_remove(&key)
    }

    /// Chunks still to send, nearest first.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.chunks.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True once every chunk has been sent.
    pub fn is_done(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn sort_by_distance(&mut self, center: ChunkPos) {
        self.chunks.sort_by(|a, b| {
            (a.pos().distance_sq(center), *a).cmp(&(b.pos().distance_sq(center), *b))
        });
    }
}

/// The replay queue of a session: regions ordered nearest first.
#[derive(Debug, Clone, Default)]
pub struct ReplayQueue {
    regions: Vec<Region>,
}

impl ReplayQueue {
    pub fn new(regions: Vec<Region>) -> Self {
        let mut queue = Self { regions };
        queue.prune();
        queue
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub(crate) fn regions_mut(&mut self) -> &mut Vec<Region> {
        &mut self.regions
    }

    /// Total chunks still queued.
    pub fn pending_chunks(&self) -> usize {
        self.regions.iter().map(Region::len).sum()
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        let origin = region_of(key.pos());
        self.regions
            .iter()
            .any(|r| r.origin == origin && r.contains(key))
    }

    /// Drop `key` from whichever region holds it. Returns whether it was queued.
    pub fn discard(&mut self, key: ChunkKey) -> bool {
        let origin = region_of(key.pos());
        let Some(idx) = self.regions.iter().position(|r| r.origin == origin) else {
            return false;
        };
        let removed = self.regions[idx].remove(key);
        if self.regions[idx].is_done() {
            self.regions.remove(idx);
        }
        removed
    }

    /// Remove regions with nothing left to send.
    pub fn prune(&mut self) {
        self.regions.retain(|r| !r.is_done());
    }
}
