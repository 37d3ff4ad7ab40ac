//! World state, tick cycle, and owner loop for the Voxelcraft simulation.
//!
//! A [`World`] is stepped one tick at a time by a single owner task. All
//! agent intent arrives as [`ActionEnvelope`]s, is validated and applied in
//! arrival order, and then the per-tick systems advance movement, work,
//! governance, logistics, and the director. Every tick ends with an
//! observation frame per connected agent and a SHA-256 digest of the state.
//!
//! # Modules
//!
//! - [`actions`] -- Instant and task handlers behind the envelope pipeline
//! - [`admin`] -- Admin snapshots and season rollover
//! - [`audit`] -- Audit and tick-log records
//! - [`claims`] -- Land permission queries over the world
//! - [`config`] -- [`WorldConfig`] loading and normalization
//! - [`dedupe`] -- Act-id acknowledgement gate
//! - [`digest`] -- Canonical state hashing
//! - [`entities`] -- Containers, dropped items, signs, belts, boards, contracts
//! - [`error`] -- [`EngineError`], [`SnapshotError`], [`RequestError`]
//! - [`obs`] -- Per-agent observation frames
//! - [`runtime`] -- Owner task and [`WorldHandle`]
//! - [`snapshot`] -- Versioned snapshot export and import
//! - [`stats`] -- Rolling activity window feeding the director
//! - [`step`] -- The tick cycle
//! - [`systems`] -- Per-tick systems
//! - [`transfer`] -- Cross-world agent transfer and org sync
//! - [`world`] -- The [`World`] container
//!
//! [`ActionEnvelope`]: voxelcraft_types::ActionEnvelope

pub mod actions;
pub mod admin;
pub mod audit;
pub mod claims;
pub mod config;
pub mod dedupe;
pub mod digest;
pub mod entities;
pub mod error;
pub mod obs;
pub mod runtime;
pub mod snapshot;
pub mod stats;
pub mod step;
pub mod systems;
pub mod transfer;
pub mod world;

pub use audit::{AuditEntry, RecordedJoin, TickEntry};
pub use config::WorldConfig;
pub use digest::state_digest;
pub use error::{EngineError, RequestError, SnapshotError};
pub use runtime::{EventsPage, WorldHandle, spawn_world};
pub use snapshot::SnapshotV1;
pub use step::{TickInputs, TickSummary};
pub use transfer::{AgentTransfer, OrgTransfer};
pub use world::{Sinks, World};
