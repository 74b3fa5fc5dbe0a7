use std::fmt;
use std::sync::{Arc, RwLock};

use super::MapTracker;

/// The host's map-tracker field for one client.
///
/// The host hands this out when it creates the client; installing the
/// explorer tracker is a checked substitution instead of an overwrite.
pub struct TrackerSlot {
    state: RwLock<SlotState>,
}

enum SlotState {
    /// The host's built-in tracker.
    Default,
    Explorer(Arc<MapTracker>),
    /// Some other extension got there first.
    Foreign(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// The slot holds a tracker we do not own.
    Occupied { owner: String },
}

impl fmt::Display for InstallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallError::Occupied { owner } => {
                write!(f, "map tracker slot already taken by {owner}")
            }
        }
    }
}

impl std::error::Error for InstallError {}

impl TrackerSlot {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SlotState::Default),
        }
    }

    /// A slot some other extension has already claimed.
    pub fn foreign(owner: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(SlotState::Foreign(owner.into())),
        }
    }

    /// Install the tracker built by `make`, unless one is already present.
    ///
    /// An explorer tracker already in the slot is reset (keeping what the
    /// client has) and returned as is; `make` is not called.
    pub fn install(
        &self,
        make: impl FnOnce() -> MapTracker,
    ) -> Result<Arc<MapTracker>, InstallError> {
        let mut state = self.state.write().expect("tracker slot poisoned");
        match &*state {
            SlotState::Default => {
                let tracker = Arc::new(make());
                *state = SlotState::Explorer(Arc::clone(&tracker));
                Ok(tracker)
            }
            SlotState::Explorer(tracker) => {
                let tracker = Arc::clone(tracker);
                drop(state);
                tracker.reset(false);
                Ok(tracker)
            }
            SlotState::Foreign(owner) => Err(InstallError::Occupied {
                owner: owner.clone(),
            }),
        }
    }

    /// The explorer tracker, if installed.
    pub fn explorer(&self) -> Option<Arc<MapTracker>> {
        match &*self.state.read().expect("tracker slot poisoned") {
            SlotState::Explorer(tracker) => Some(Arc::clone(tracker)),
            _ => None,
        }
    }

    /// Return the slot to the host default, handing back the explorer
    /// tracker if there was one.
    pub fn uninstall(&self) -> Option<Arc<MapTracker>> {
        let mut state = self.state.write().expect("tracker slot poisoned");
        match std::mem::replace(&mut *state, SlotState::Default) {
            SlotState::Explorer(tracker) => Some(tracker),
            other => {
                *state = other;
                None
            }
        }
    }
}

impl Default for TrackerSlot {
    fn default() -> Self {
        Self::new()
    }
}
