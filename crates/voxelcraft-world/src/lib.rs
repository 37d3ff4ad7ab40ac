//! Content catalogs, deterministic terrain, and block storage for the
//! Voxelcraft simulation.
//!
//! # Modules
//!
//! - [`catalogs`] -- Blocks, items, recipes, blueprints, law and event
//!   templates, and the mining tool table, loaded from YAML.
//! - [`chunk`] -- [`ChunkStore`]: generated terrain plus materialized
//!   16x16 chunks with per-chunk SHA-256 hashes.
//! - [`error`] -- Error types for catalog loading and block storage.
//! - [`noise`] -- Integer hashes and cluster placement used by worldgen and
//!   the director.
//! - [`terrain`] -- Biomes, ore clusters, and surface clutter.

pub mod catalogs;
pub mod chunk;
pub mod error;
pub mod noise;
pub mod terrain;

pub use catalogs::{
    BlockDef, BlueprintBlock, BlueprintDef, Catalogs, EventTemplate, ItemCount, ItemDef,
    ItemKind, LawTemplate, MiningTable, MiningTier, RecipeDef, ToolDef,
};
pub use chunk::{CHUNK_CELLS, CHUNK_SIZE, Chunk, ChunkKey, ChunkStore};
pub use error::{CatalogError, WorldError};
pub use terrain::{TerrainGen, WorldGenParams};
