//! The surface chunk store.
//!
//! Cells are read through the generator until something writes to their
//! chunk; the first write materializes the whole 16x16 chunk from the
//! generator and from then on the stored copy is authoritative. Only
//! materialized chunks are digested and snapshotted, so a world's
//! fingerprint depends on what was changed, never on what was looked at.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::debug;
use voxelcraft_types::Vec3i;

use crate::catalogs::Catalogs;
use crate::error::WorldError;
use crate::terrain::{TerrainGen, WorldGenParams};

/// Side length of a chunk.
pub const CHUNK_SIZE: i32 = 16;

/// Cells per chunk.
pub const CHUNK_CELLS: usize = 256;

/// Chunk coordinate `(cx, cz)`, ordered by `cx` then `cz`.
pub type ChunkKey = (i32, i32);

/// One materialized 16x16 chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk x index.
    pub cx: i32,
    /// Chunk z index.
    pub cz: i32,
    blocks: Vec<u16>,
    hash: [u8; 32],
}

impl Chunk {
    fn new(cx: i32, cz: i32, blocks: Vec<u16>) -> Self {
        let hash = hash_blocks(&blocks);
        Self { cx, cz, blocks, hash }
    }

    /// Cells in x-fastest order.
    pub fn blocks(&self) -> &[u16] {
        &self.blocks
    }

    /// SHA-256 over the cells as little-endian `u16`.
    pub const fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    fn get(&self, lx: usize, lz: usize) -> Option<u16> {
        self.blocks.get(cell_index(lx, lz)).copied()
    }

    fn set(&mut self, lx: usize, lz: usize, b: u16) {
        if let Some(slot) = self.blocks.get_mut(cell_index(lx, lz)) {
            if *slot != b {
                *slot = b;
                self.hash = hash_blocks(&self.blocks);
            }
        }
    }
}

#[allow(clippy::arithmetic_side_effects)]
const fn cell_index(lx: usize, lz: usize) -> usize {
    lx + lz * 16
}

fn hash_blocks(blocks: &[u16]) -> [u8; 32] {
    let mut h = Sha256::new();
    for b in blocks {
        h.update(b.to_le_bytes());
    }
    h.finalize().into()
}

/// Split a world coordinate into chunk index and local offset.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
const fn split(v: i32) -> (i32, usize) {
    (v.div_euclid(CHUNK_SIZE), v.rem_euclid(CHUNK_SIZE) as usize)
}

/// Generated terrain plus the materialized overlay.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    terrain: TerrainGen,
    boundary_r: i32,
    palette_len: usize,
    chunks: BTreeMap<ChunkKey, Chunk>,
}

impl ChunkStore {
    /// Create an empty store for `seed`.
    pub fn new(
        seed: i64,
        boundary_r: i32,
        params: WorldGenParams,
        catalogs: &Catalogs,
    ) -> Result<Self, WorldError> {
        Ok(Self {
            terrain: TerrainGen::new(seed, params, catalogs)?,
            boundary_r,
            palette_len: catalogs.palette.len(),
            chunks: BTreeMap::new(),
        })
    }

    /// World seed.
    pub const fn seed(&self) -> i64 {
        self.terrain.seed()
    }

    /// Boundary radius; zero means unbounded.
    pub const fn boundary_r(&self) -> i32 {
        self.boundary_r
    }

    /// The terrain generator.
    pub const fn terrain(&self) -> &TerrainGen {
        &self.terrain
    }

    /// Palette index of AIR.
    pub const fn air(&self) -> u16 {
        self.terrain.air()
    }

    /// Whether `pos` is on the surface plane and inside the boundary.
    pub const fn in_bounds(&self, pos: Vec3i) -> bool {
        if pos.y != 0 {
            return false;
        }
        let r = self.boundary_r;
        r <= 0 || (pos.x >= -r && pos.x <= r && pos.z >= -r && pos.z <= r)
    }

    /// Block at `pos`; out-of-bounds cells read as AIR.
    pub fn get(&self, pos: Vec3i) -> u16 {
        if !self.in_bounds(pos) {
            return self.air();
        }
        let (cx, lx) = split(pos.x);
        let (cz, lz) = split(pos.z);
        match self.chunks.get(&(cx, cz)) {
            Some(ch) => ch.get(lx, lz).unwrap_or_else(|| self.air()),
            None => self.terrain.block_at(pos.x, pos.z),
        }
    }

    /// Write `block` at `pos`, materializing its chunk.
    pub fn set(&mut self, pos: Vec3i, block: u16) -> Result<(), WorldError> {
        if !self.in_bounds(pos) {
            return Err(WorldError::OutOfBounds(pos));
        }
        if usize::from(block) >= self.palette_len {
            return Err(WorldError::UnknownBlockId(block));
        }
        let (cx, lx) = split(pos.x);
        let (cz, lz) = split(pos.z);
        let terrain = &self.terrain;
        let chunk = self
            .chunks
            .entry((cx, cz))
            .or_insert_with(|| generate_chunk(terrain, cx, cz));
        chunk.set(lx, lz, block);
        Ok(())
    }

    /// Materialized chunks in key order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Keys of materialized chunks in order.
    pub fn loaded_keys(&self) -> Vec<ChunkKey> {
        self.chunks.keys().copied().collect()
    }

    /// Number of materialized chunks.
    pub fn materialized(&self) -> usize {
        self.chunks.len()
    }

    /// Install a chunk from a snapshot.
    pub fn import_chunk(&mut self, cx: i32, cz: i32, blocks: Vec<u16>) -> Result<(), WorldError> {
        if blocks.len() != CHUNK_CELLS {
            return Err(WorldError::ChunkSize {
                cx,
                cz,
                len: blocks.len(),
                expected: CHUNK_CELLS,
            });
        }
        if let Some(bad) = blocks.iter().find(|b| usize::from(**b) >= self.palette_len) {
            return Err(WorldError::UnknownBlockId(*bad));
        }
        self.chunks.insert((cx, cz), Chunk::new(cx, cz, blocks));
        Ok(())
    }

    /// Drop every materialized chunk and regenerate from `seed`.
    pub fn reset(&mut self, seed: i64, catalogs: &Catalogs) -> Result<(), WorldError> {
        let params = *self.terrain.params();
        self.terrain = TerrainGen::new(seed, params, catalogs)?;
        let dropped = self.chunks.len();
        self.chunks.clear();
        debug!(seed, dropped, "Chunk store reset");
        Ok(())
    }
}

#[allow(clippy::arithmetic_side_effects, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn generate_chunk(terrain: &TerrainGen, cx: i32, cz: i32) -> Chunk {
    let mut blocks = Vec::with_capacity(CHUNK_CELLS);
    for lz in 0..CHUNK_SIZE {
        for lx in 0..CHUNK_SIZE {
            let wx = cx.saturating_mul(CHUNK_SIZE).saturating_add(lx);
            let wz = cz.saturating_mul(CHUNK_SIZE).saturating_add(lz);
            blocks.push(terrain.block_at(wx, wz));
        }
    }
    Chunk::new(cx, cz, blocks)
}
