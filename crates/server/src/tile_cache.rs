//! Rendered map tiles on disk.
//!
//! Layout: `<data>/tiles/<world>/<scale>/<resolution>/<x>.<z>.tile`.
//! File format: 4-byte magic `EXMT`, width and height as little-endian
//! `u32`, then the gzip-compressed little-endian ARGB pixels, row-major.
//!
//! All file I/O runs on the blocking pool; callers get a [`Pending`] back
//! right away. Concurrent reads of the same tile share one handle, and a
//! finished read is kept until a request picks it up resolved.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use explorers_engine::tiles::{Pending, Resolution, TileCache, TileImage};
use explorers_engine::world::WorldId;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::runtime::Handle;

use crate::persistence::write_atomic;

pub const TILES_DIR: &str = "tiles";

const MAGIC: [u8; 4] = *b"EXMT";
const HEADER_LEN: usize = 12;
/// Largest edge accepted when decoding; anything bigger is corruption.
const MAX_EDGE: u32 = 4096;
/// Finished reads nobody came back for are swept once this many handles
/// are held.
const RETAINED_READS: usize = 1024;

/// Identifies one cached tile file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TileKey {
    world: String,
    scale_bits: u32,
    resolution: Resolution,
    chunk_x: i32,
    chunk_z: i32,
}

impl TileKey {
    fn new(world: &WorldId, chunk_x: i32, chunk_z: i32, scale: f32, resolution: Resolution) -> Self {
        Self {
            world: world.storage_name(),
            scale_bits: scale.to_bits(),
            resolution,
            chunk_x,
            chunk_z,
        }
    }
}

pub struct DiskTileCache {
    root: PathBuf,
    runtime: Handle,
    read_latency: Duration,
    reads: DashMap<TileKey, Pending<Option<TileImage>>>,
}

impl DiskTileCache {
    /// Tiles live under `<data_dir>/tiles`. Must be called inside a tokio
    /// runtime; its blocking pool does the file I/O.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_runtime(data_dir, Handle::current())
    }

    pub fn with_runtime(data_dir: &Path, runtime: Handle) -> Self {
        Self {
            root: data_dir.join(TILES_DIR),
            runtime,
            read_latency: Duration::ZERO,
            reads: DashMap::new(),
        }
    }

    /// Delay every tile read, as a slow disk would.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    pub fn tile_path(
        &self,
        world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        scale: f32,
        resolution: Resolution,
    ) -> PathBuf {
        self.root
            .join(world.storage_name())
            .join(scale.to_string())
            .join(resolution.tag())
            .join(format!("{chunk_x}.{chunk_z}.tile"))
    }

    /// Reads currently in flight.
    pub fn pending_reads(&self) -> usize {
        self.reads.iter().filter(|r| !r.is_done()).count()
    }

    /// Finished reads waiting to be picked up.
    pub fn retained_reads(&self) -> usize {
        self.reads.iter().filter(|r| r.is_done()).count()
    }
}

impl TileCache for DiskTileCache {
    fn request_cached_image(
        &self,
        world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        scale: f32,
        resolution: Resolution,
    ) -> Pending<Option<TileImage>> {
        if self.reads.len() >= RETAINED_READS {
            self.reads.retain(|_, read| !read.is_done());
        }
        let key = TileKey::new(world, chunk_x, chunk_z, scale, resolution);
        let (completer, pending) = match self.reads.entry(key) {
            Entry::Occupied(read) if read.get().is_done() => return read.remove(),
            Entry::Occupied(read) => return read.get().clone(),
            Entry::Vacant(slot) => {
                let (completer, pending) = Pending::new();
                slot.insert(pending.clone());
                (completer, pending)
            }
        };

        let path = self.tile_path(world, chunk_x, chunk_z, scale, resolution);
        let latency = self.read_latency;
        self.runtime.spawn_blocking(move || {
            if !latency.is_zero() {
                std::thread::sleep(latency);
            }
            let image = match read_tile(&path) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable map tile: {:#}", e);
                    None
                }
            };
            completer.complete(image);
        });
        pending
    }

    fn write_image(
        &self,
        world: &WorldId,
        chunk_x: i32,
        chunk_z: i32,
        scale: f32,
        resolution: Resolution,
        image: TileImage,
    ) -> Pending<Result<()>> {
        // A finished read of this tile is stale from here on.
        self.reads
            .remove(&TileKey::new(world, chunk_x, chunk_z, scale, resolution));
        let (completer, pending) = Pending::new();
        let path = self.tile_path(world, chunk_x, chunk_z, scale, resolution);
        self.runtime.spawn_blocking(move || {
            let image = resolution.rescale(&image);
            completer.complete(write_tile(&path, &image));
        });
        pending
    }
}

/// `Ok(None)` when no tile is stored at `path`.
pub fn read_tile(path: &Path) -> Result<Option<TileImage>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    decode(&bytes)
        .map(Some)
        .with_context(|| format!("decoding {}", path.display()))
}

pub fn write_tile(path: &Path, image: &TileImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    write_atomic(path, &encode(image)?)
}

pub fn encode(image: &TileImage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(HEADER_LEN + image.pixels.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&image.width.to_le_bytes());
    out.extend_from_slice(&image.height.to_le_bytes());

    let mut encoder = GzEncoder::new(out, Compression::default());
    for pixel in image.pixels.iter() {
        encoder.write_all(&pixel.to_le_bytes())?;
    }
    Ok(encoder.finish()?)
}

pub fn decode(bytes: &[u8]) -> Result<TileImage> {
    ensure!(bytes.len() >= HEADER_LEN, "truncated header");
    if bytes[..4] != MAGIC {
        bail!("bad magic");
    }
    let width = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let height = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    ensure!(
        width <= MAX_EDGE && height <= MAX_EDGE,
        "implausible size {}x{}",
        width,
        height
    );
    let expected = width as usize * height as usize * 4;

    let mut raw = Vec::with_capacity(expected);
    GzDecoder::new(&bytes[HEADER_LEN..])
        .read_to_end(&mut raw)
        .context("decompressing pixels")?;
    ensure!(
        raw.len() == expected,
        "expected {} pixel bytes for {}x{}, found {}",
        expected,
        width,
        height,
        raw.len()
    );

    let pixels = raw
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(TileImage::new(width, height, pixels))
}
