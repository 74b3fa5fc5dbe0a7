/// Log2 of the map chunk width in blocks. Map chunks are 32x32 blocks.
pub const MAP_CHUNK_SHIFT: u32 = 5;

/// Absolute avatar position in the world, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorldPos {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPos {
    pub const ORIGIN: WorldPos = WorldPos::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The map chunk this position falls in.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: (self.x.floor() as i32) >> MAP_CHUNK_SHIFT,
            z: (self.z.floor() as i32) >> MAP_CHUNK_SHIFT,
        }
    }
}

/// Map chunk column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub const fn key(&self) -> ChunkKey {
        ChunkKey::pack(self.x, self.z)
    }

    /// Squared euclidean distance in chunks. Used for nearest-first ordering.
    pub const fn distance_sq(&self, other: ChunkPos) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dz * dz
    }
}

impl From<ChunkKey> for ChunkPos {
    fn from(key: ChunkKey) -> Self {
        let (x, z) = key.unpack();
        Self { x, z }
    }
}

/// A chunk coordinate packed into one 64-bit value: `x` in the high half,
/// `z` in the low half. Every `(i32, i32)` pair round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey(pub i64);

impl ChunkKey {
    #[inline]
    pub const fn pack(x: i32, z: i32) -> Self {
        Self(((x as i64) << 32) | (z as u32 as i64))
    }

    #[inline]
    pub const fn unpack(self) -> (i32, i32) {
        (self.x(), self.z())
    }

    #[inline]
    pub const fn x(self) -> i32 {
        (self.0 >> 32) as i32
    }

    #[inline]
    pub const fn z(self) -> i32 {
        self.0 as i32
    }

    pub const fn pos(self) -> ChunkPos {
        ChunkPos::new(self.x(), self.z())
    }
}
