use super::position::{ChunkKey, ChunkPos};

/// Expanding square rings around a center chunk, nearest ring first.
///
/// Ring 0 is the center itself; ring `r` is every chunk at Chebyshev
/// distance `r` (`8r` chunks), walked clockwise from the north-west corner.
/// Radius 1 therefore covers the 3x3 block around the center.
#[derive(Debug, Clone)]
pub struct Spiral {
    center: ChunkPos,
    max_radius: i32,
    ring: i32,
    step: i32,
}

impl Spiral {
    pub fn new(center: ChunkPos, max_radius: i32) -> Self {
        Self {
            center,
            max_radius: max_radius.max(0),
            ring: 0,
            step: 0,
        }
    }

    /// Number of chunks covered out to `radius`.
    pub const fn area(radius: i32) -> usize {
        let side = 2 * radius as usize + 1;
        side * side
    }

    fn offset(ring: i32, step: i32) -> (i32, i32) {
        let side = 2 * ring;
        match step / side {
            0 => (-ring + step, -ring),
            1 => (ring, -ring + (step - side)),
            2 => (ring - (step - 2 * side), ring),
            _ => (-ring, ring - (step - 3 * side)),
        }
    }
}

impl Iterator for Spiral {
    type Item = ChunkKey;

    fn next(&mut self) -> Option<ChunkKey> {
        if self.ring > self.max_radius {
            return None;
        }
        let (dx, dz) = if self.ring == 0 {
            self.ring = 1;
            (0, 0)
        } else {
            let offset = Self::offset(self.ring, self.step);
            self.step += 1;
            if self.step == 8 * self.ring {
                self.ring += 1;
                self.step = 0;
            }
            offset
        };
        Some(ChunkKey::pack(
            self.center.x.wrapping_add(dx),
            self.center.z.wrapping_add(dz),
        ))
    }
}
