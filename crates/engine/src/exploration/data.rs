use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use super::region::{Region, region_of};
use crate::world::position::{ChunkKey, ChunkPos};

/// Every chunk a player (or the shared global map) has explored in one world.
///
/// Thread-safe: marks from the tracker thread, snapshots for replay and
/// saves from the directory all go through one `RwLock`. Once the owning
/// directory unloads the store it is closed, and later marks are dropped
/// instead of being lost silently after the final save.
///
/// Record writes go through [`ExplorationData::save_with`] and
/// [`ExplorationData::close_with`], which take turns on a separate lock so
/// marks never wait on file I/O and no save lands after the final one.
pub struct ExplorationData {
    state: RwLock<ExploredState>,
    saving: Mutex<()>,
}

#[derive(Default)]
struct ExploredState {
    chunks: HashSet<ChunkKey>,
    /// Changed since the last successful save.
    dirty: bool,
    closed: bool,
}

impl ExplorationData {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ExploredState::default()),
            saving: Mutex::new(()),
        }
    }

    /// Bulk-load from persisted keys. The result starts clean.
    pub fn from_keys(keys: impl IntoIterator<Item = ChunkKey>) -> Self {
        Self {
            state: RwLock::new(ExploredState {
                chunks: keys.into_iter().collect(),
                dirty: false,
                closed: false,
            }),
            saving: Mutex::new(()),
        }
    }

    /// Record `key` as explored. Idempotent. Returns `true` if the key was
    /// new; `false` if it was already known or the store has been unloaded.
    pub fn mark_explored(&self, key: ChunkKey) -> bool {
        let mut state = self.state.write().expect("exploration data poisoned");
        if state.closed {
            tracing::debug!(
                "Dropping explored chunk ({}, {}) for an unloaded store",
                key.x(),
                key.z()
            );
            return false;
        }
        let added = state.chunks.insert(key);
        state.dirty |= added;
        added
    }

    pub fn is_explored(&self, key: ChunkKey) -> bool {
        self.state
            .read()
            .expect("exploration data poisoned")
            .chunks
            .contains(&key)
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("exploration data poisoned").chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().expect("exploration data poisoned").dirty
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().expect("exploration data poisoned").closed
    }

    /// Snapshot of every explored chunk grouped into regions, nearest region
    /// to `(center_x, center_z)` first. The snapshot owns its storage: later
    /// marks do not show up in it and draining it does not touch the store.
    pub fn copy_pending_near(&self, center_x: i32, center_z: i32) -> Vec<Region> {
        let center = ChunkPos::new(center_x, center_z);
        let mut regions: HashMap<(i32, i32), Region> = HashMap::new();
        {
            let state = self.state.read().expect("exploration data poisoned");
            for &key in &state.chunks {
                let origin = region_of(key.pos());
                regions
                    .entry(origin)
                    .or_insert_with(|| Region::new(origin))
                    .insert(key);
            }
        }

        let mut regions: Vec<Region> = regions.into_values().collect();
        for region in &mut regions {
            region.sort_by_distance(center);
        }
        regions.sort_by_key(|r| (r.center().distance_sq(center), r.origin()));
        regions
    }

    /// Sorted copy of the explored keys for saving. Clears the dirty flag;
    /// call [`ExplorationData::mark_unsaved`] if the save then fails.
    pub fn take_snapshot(&self) -> Vec<ChunkKey> {
        let mut state = self.state.write().expect("exploration data poisoned");
        state.dirty = false;
        let mut keys: Vec<ChunkKey> = state.chunks.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn mark_unsaved(&self) {
        self.state.write().expect("exploration data poisoned").dirty = true;
    }

    /// Hand the explored keys to `write` if anything changed since the last
    /// successful save. Closed stores are skipped. Returns whether `write`
    /// ran and succeeded; on failure the store stays dirty.
    pub fn save_with(&self, write: impl FnOnce(&[ChunkKey]) -> bool) -> bool {
        let _saving = self.saving.lock().expect("exploration save poisoned");
        let keys = {
            let state = self.state.read().expect("exploration data poisoned");
            if state.closed || !state.dirty {
                return false;
            }
            drop(state);
            self.take_snapshot()
        };
        if write(&keys) {
            true
        } else {
            self.mark_unsaved();
            false
        }
    }

    /// Close the store and hand its final contents to `write`. Waits for a
    /// save in progress.
    pub fn close_with<R>(&self, write: impl FnOnce(&[ChunkKey]) -> R) -> R {
        let _saving = self.saving.lock().expect("exploration save poisoned");
        write(&self.close())
    }

    /// Close the store and return its final contents. Waits for in-flight
    /// marks; any mark after this returns `false`.
    pub fn close(&self) -> Vec<ChunkKey> {
        let mut state = self.state.write().expect("exploration data poisoned");
        state.closed = true;
        state.dirty = false;
        let mut keys: Vec<ChunkKey> = state.chunks.iter().copied().collect();
        keys.sort_unstable();
        keys
    }
}

impl Default for ExplorationData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_idempotent_and_dirties() {
        let data = ExplorationData::new();
        assert!(!data.is_dirty());
        assert!(data.mark_explored(ChunkKey::pack(1, 2)));
        assert!(!data.mark_explored(ChunkKey::pack(1, 2)));
        assert_eq!(data.len(), 1);
        assert!(data.is_dirty());
        data.take_snapshot();
        assert!(!data.is_dirty());
    }

    #[test]
    fn regions_come_nearest_first() {
        let data = ExplorationData::new();
        for key in [
            ChunkKey::pack(100, 100),
            ChunkKey::pack(1, 1),
            ChunkKey::pack(-40, 3),
            ChunkKey::pack(20, 0),
        ] {
            data.mark_explored(key);
        }
        let regions = data.copy_pending_near(0, 0);
        let origins: Vec<_> = regions.iter().map(Region::origin).collect();
        assert_eq!(origins, vec![(0, 0), (1, 0), (-3, 0), (6, 6)]);
    }

    #[test]
    fn chunks_inside_a_region_are_nearest_first() {
        let data = ExplorationData::new();
        for x in (0..16).rev() {
            data.mark_explored(ChunkKey::pack(x, 0));
        }
        let regions = data.copy_pending_near(0, 0);
        let xs: Vec<i32> = regions[0].chunks().map(|k| k.x()).collect();
        assert_eq!(xs, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn snapshot_is_independent_of_later_marks() {
        let data = ExplorationData::new();
        data.mark_explored(ChunkKey::pack(0, 0));
        let mut regions = data.copy_pending_near(0, 0);
        data.mark_explored(ChunkKey::pack(1, 0));
        assert_eq!(regions[0].len(), 1);

        regions[0].remove(ChunkKey::pack(0, 0));
        assert!(data.is_explored(ChunkKey::pack(0, 0)));
    }

    #[test]
    fn save_with_skips_clean_and_closed_stores() {
        let data = ExplorationData::new();
        assert!(!data.save_with(|_| panic!("nothing to save")));

        data.mark_explored(ChunkKey::pack(2, 0));
        data.mark_explored(ChunkKey::pack(1, 0));
        let mut written = Vec::new();
        assert!(data.save_with(|keys| {
            written = keys.to_vec();
            true
        }));
        assert_eq!(written, vec![ChunkKey::pack(1, 0), ChunkKey::pack(2, 0)]);

        data.mark_explored(ChunkKey::pack(3, 0));
        assert!(!data.save_with(|_| false));
        assert!(data.is_dirty());

        assert_eq!(data.close_with(|keys| keys.len()), 3);
        assert!(!data.save_with(|_| panic!("closed store saved")));
    }

    #[test]
    fn closed_store_rejects_marks() {
        let data = ExplorationData::from_keys([ChunkKey::pack(3, 3)]);
        assert_eq!(data.close(), vec![ChunkKey::pack(3, 3)]);
        assert!(!data.mark_explored(ChunkKey::pack(4, 4)));
        assert!(data.is_closed());
        assert_eq!(data.len(), 1);
    }
}
