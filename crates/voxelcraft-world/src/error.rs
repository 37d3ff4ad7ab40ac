//! Error types for the `voxelcraft-world` crate.
//!
//! Catalog loading fails with [`CatalogError`]; block-store operations
//! fail with [`WorldError`].

use voxelcraft_types::Vec3i;

/// Errors raised while loading or validating a content catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Reading the catalog file failed.
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog document is not valid YAML for the catalog schema.
    #[error("failed to parse catalog YAML: {0}")]
    Yaml(String),

    /// The block list does not start with `AIR`.
    #[error("block catalog must define AIR")]
    MissingAir,

    /// Two entries of the same section share an id.
    #[error("duplicate {section} id: {id}")]
    Duplicate {
        /// Catalog section (`blocks`, `items`, ...).
        section: &'static str,
        /// The repeated id.
        id: String,
    },

    /// An entry refers to an id that is not defined.
    #[error("{section} entry {id} references unknown {reference}")]
    UnknownReference {
        /// Catalog section of the referring entry.
        section: &'static str,
        /// The referring entry.
        id: String,
        /// The missing id.
        reference: String,
    },

    /// More blocks than the 16-bit palette can address.
    #[error("block palette too large: {0} entries")]
    PaletteOverflow(usize),
}

impl From<serde_yml::Error> for CatalogError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

/// Errors raised by chunk-store operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The position lies outside the world boundary or off the surface plane.
    #[error("position {0} is out of bounds")]
    OutOfBounds(Vec3i),

    /// A block id is not in the palette.
    #[error("unknown block id {0}")]
    UnknownBlockId(u16),

    /// A block name needed by worldgen is missing from the catalog.
    #[error("catalog is missing block {0}")]
    MissingBlock(String),

    /// An imported chunk has the wrong number of cells.
    #[error("chunk ({cx},{cz}) has {len} cells, expected {expected}")]
    ChunkSize {
        /// Chunk x index.
        cx: i32,
        /// Chunk z index.
        cz: i32,
        /// Cells supplied.
        len: usize,
        /// Cells required.
        expected: usize,
    },
}
