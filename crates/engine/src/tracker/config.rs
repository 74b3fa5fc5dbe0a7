use serde::{Deserialize, Serialize};

use crate::tiles::Resolution;
use crate::world::WorldId;

/// Settings a tracker reads. A session keeps a snapshot and only picks up
/// changes when it is reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrackerConfig {
    /// Radius, in chunks, of the square revealed around the avatar.
    pub exploration_radius: i32,
    /// When off, every player of a world shares the global map.
    pub per_player_map: bool,
    /// Outstanding disk reads allowed per tick.
    pub disk_load_rate: u32,
    /// Outstanding live renders allowed per tick.
    pub generation_rate: u32,
    pub resolution: Resolution,
    /// Persist tiles and progress for instance worlds too.
    pub save_instance_tiles: bool,
}

impl TrackerConfig {
    /// Instance worlds are throwaway unless explicitly persisted.
    pub fn should_persist(&self, world: &WorldId) -> bool {
        !world.is_instance() || self.save_instance_tiles
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            exploration_radius: 3,
            per_player_map: true,
            disk_load_rate: 16,
            generation_rate: 20,
            resolution: Resolution::Full,
            save_instance_tiles: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_worlds_persist_only_when_enabled() {
        let instance = WorldId::new("instance-arena-1b4e28ba-2fa1-11d2-883f-0016d3cca427");
        let normal = WorldId::new("default");
        let mut config = TrackerConfig::default();
        assert!(config.should_persist(&normal));
        assert!(!config.should_persist(&instance));
        config.save_instance_tiles = true;
        assert!(config.should_persist(&instance));
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"ExplorationRadius": 5, "Resolution": "Half"}"#).unwrap();
        assert_eq!(config.exploration_radius, 5);
        assert_eq!(config.resolution, Resolution::Half);
        assert_eq!(config.generation_rate, 20);
        assert!(config.per_player_map);
    }
}
