//! Error types for the server binary.

use std::path::PathBuf;

/// Startup and shutdown failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: voxelcraft_core::config::ConfigError,
    },

    /// Catalog loading failed.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: voxelcraft_world::CatalogError,
    },

    /// World construction failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: voxelcraft_core::EngineError,
    },

    /// A snapshot on disk could not be read or applied.
    #[error("snapshot {path}: {source}")]
    Snapshot {
        /// File that failed.
        path: PathBuf,
        /// The underlying snapshot error.
        source: voxelcraft_core::SnapshotError,
    },

    /// Filesystem failure.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
