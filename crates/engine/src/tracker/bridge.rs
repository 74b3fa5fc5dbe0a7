use tokio::sync::watch;

use crate::world::position::WorldPos;

/// Latest avatar position, handed from the simulation thread to the tracker.
///
/// A single overwrite-latest slot: `push` never blocks on a reader and keeps
/// no history; `read` returns whatever was pushed last, or the origin
/// before the first push.
#[derive(Debug)]
pub struct PositionBridge {
    tx: watch::Sender<WorldPos>,
}

impl PositionBridge {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(WorldPos::ORIGIN);
        Self { tx }
    }

    pub fn push(&self, position: WorldPos) {
        self.tx.send_replace(position);
    }

    pub fn read(&self) -> WorldPos {
        *self.tx.borrow()
    }
}

impl Default for PositionBridge {
    fn default() -> Self {
        Self::new()
    }
}
