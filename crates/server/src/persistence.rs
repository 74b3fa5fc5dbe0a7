//! Exploration records as JSON files.
//!
//! One file per world and identity, under
//! `<data>/discovered/<world>/<uuid>.json`:
//!
//! ```json
//! { "Explored": [4294967297, 8589934594] }
//! ```
//!
//! Each entry is a packed chunk key (x in the high 32 bits, z in the low 32
//! bits), sorted ascending. The global map uses the nil UUID.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use explorers_engine::exploration::{ExplorationStore, Identity};
use explorers_engine::world::position::ChunkKey;
use serde::{Deserialize, Serialize};

pub const DISCOVERED_DIR: &str = "discovered";

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "PascalCase")]
struct ExplorationRecord {
    explored: Vec<i64>,
}

/// Write `bytes` to a sibling temp file, then rename it over `path`, so a
/// crash mid-write never leaves a truncated file behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))
}

pub struct JsonExplorationStore {
    root: PathBuf,
}

impl JsonExplorationStore {
    /// Records live under `<data_dir>/discovered`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(DISCOVERED_DIR),
        }
    }

    pub fn record_path(&self, world: &str, identity: Identity) -> PathBuf {
        self.root
            .join(world)
            .join(format!("{}.json", identity.uuid()))
    }
}

impl ExplorationStore for JsonExplorationStore {
    fn load(&self, world: &str, identity: Identity) -> Result<Option<Vec<ChunkKey>>> {
        let path = self.record_path(world, identity);
        if !path.exists() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let record: ExplorationRecord =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(record.explored.into_iter().map(ChunkKey).collect()))
    }

    fn save(&self, world: &str, identity: Identity, chunks: &[ChunkKey]) -> Result<()> {
        let start = Instant::now();
        let path = self.record_path(world, identity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let mut explored: Vec<i64> = chunks.iter().map(|k| k.0).collect();
        explored.sort_unstable();
        let bytes = serde_json::to_vec(&ExplorationRecord { explored })
            .with_context(|| format!("serializing exploration {world}/{identity}"))?;
        write_atomic(&path, &bytes)?;

        tracing::debug!(
            "Saved {} explored chunks to {} ({:.2?})",
            chunks.len(),
            path.display(),
            start.elapsed()
        );
        Ok(())
    }
}
