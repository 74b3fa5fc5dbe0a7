//! Persisted exploration progress: which map chunks each player (or the
//! shared global map) has revealed, per world.

pub mod data;
pub mod directory;
pub mod region;

use std::fmt;

use uuid::Uuid;

pub use data::ExplorationData;
pub use directory::{ExplorationDirectory, ExplorationStore};
pub use region::{Region, ReplayQueue};

/// Whose exploration a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The world-wide map shared by everyone.
    Global,
    Player(Uuid),
}

impl Identity {
    /// Reserved id of the global map on disk.
    pub const GLOBAL_UUID: Uuid = Uuid::nil();

    pub const fn uuid(self) -> Uuid {
        match self {
            Identity::Global => Self::GLOBAL_UUID,
            Identity::Player(uuid) => uuid,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        if uuid.is_nil() {
            Identity::Global
        } else {
            Identity::Player(uuid)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Global => f.write_str("global"),
            Identity::Player(uuid) => write!(f, "{uuid}"),
        }
    }
}
