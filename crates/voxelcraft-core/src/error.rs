//! Error types for the `voxelcraft-core` crate.
//!
//! Per-action failures never surface here: they travel to the agent as
//! `ACTION_RESULT`/`TASK_FAIL` events carrying an [`ErrorCode`]. These
//! enums cover construction, snapshot import, and the request channels.
//!
//! [`ErrorCode`]: voxelcraft_types::ErrorCode

use voxelcraft_types::AgentId;

use crate::config::ConfigError;

/// Errors raised while building or mutating a world outside the action
/// pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration was rejected.
    #[error("config error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// The block store rejected an operation.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: voxelcraft_world::WorldError,
    },

    /// A catalog could not be loaded.
    #[error("catalog error: {source}")]
    Catalog {
        /// The underlying catalog error.
        #[from]
        source: voxelcraft_world::CatalogError,
    },

    /// An inventory or parameter operation failed.
    #[error("agent error: {source}")]
    Agent {
        /// The underlying agent error.
        #[from]
        source: voxelcraft_agents::AgentError,
    },

    /// A snapshot could not be imported.
    #[error("snapshot error: {source}")]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: SnapshotError,
    },

    /// The instant or task dispatch table disagrees with the supported set.
    #[error("dispatch table for {table} is inconsistent: missing {missing:?}, extra {extra:?}")]
    DispatchMismatch {
        /// `instants` or `tasks`.
        table: &'static str,
        /// Supported types without a handler.
        missing: Vec<String>,
        /// Handlers for unsupported types.
        extra: Vec<String>,
    },

    /// No snapshot sink is attached.
    #[error("snapshot sink not configured")]
    NoSnapshotSink,

    /// The snapshot sink is full; nothing was enqueued.
    #[error("snapshot sink backpressure")]
    SnapshotBackpressure,

    /// The agent does not exist in this world.
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),

    /// The agent already exists in this world.
    #[error("agent {0} already present")]
    AgentExists(AgentId),

    /// The agent may not leave this world yet.
    #[error("agent {agent_id} is on world-switch cooldown until tick {until}")]
    SwitchCooldown {
        /// The agent.
        agent_id: AgentId,
        /// First tick a switch is allowed again.
        until: u64,
    },
}

/// Errors raised while importing a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The snapshot was written by an unsupported codec version.
    #[error("unsupported snapshot version {found}, expected {expected}")]
    Version {
        /// Version in the snapshot.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// An identity field differs from the target world's configuration.
    #[error("snapshot {field} mismatch: snapshot has {snapshot}, world has {world}")]
    Mismatch {
        /// Which field.
        field: &'static str,
        /// Value in the snapshot.
        snapshot: String,
        /// Value in the world.
        world: String,
    },

    /// A chunk or block in the snapshot is invalid.
    #[error("invalid snapshot chunk: {source}")]
    Chunk {
        /// The underlying world error.
        #[from]
        source: voxelcraft_world::WorldError,
    },

    /// The snapshot could not be decoded.
    #[error("snapshot decode failed: {source}")]
    Decode {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Errors returned by the world request API.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The caller's cancellation signal fired first.
    #[error("request canceled")]
    Canceled,

    /// The world owner task has stopped.
    #[error("world is shut down")]
    Closed,

    /// The owner rejected the request.
    #[error("{0}")]
    Rejected(String),

    /// The snapshot sink is full.
    #[error("snapshot sink backpressure")]
    Backpressure,
}

impl From<EngineError> for RequestError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::SnapshotBackpressure => Self::Backpressure,
            other => Self::Rejected(other.to_string()),
        }
    }
}
