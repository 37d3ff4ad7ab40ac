//! Shared type definitions for the Voxelcraft simulation.
//!
//! This crate is the single source of truth for identifiers, grid
//! geometry, enumerations, and the wire protocol exchanged between clients
//! and the world engine.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe string wrappers for all entity identifiers
//! - [`enums`] -- Error codes, weather, governance and economy enums
//! - [`geometry`] -- [`Vec3i`] grid coordinates and rotation helpers
//! - [`protocol`] -- Action envelopes, events, and observation frames

pub mod enums;
pub mod geometry;
pub mod ids;
pub mod protocol;

// Re-export all public types at crate root for convenience.
pub use enums::{
    Biome, ClaimType, ContractKind, ContractState, ErrorCode, FunDim, LawStatus, MoveKind,
    OrgKind, OrgRole, VoteChoice, Weather, WorkKind,
};
pub use geometry::{Vec3i, rotate_offset, yaw_to_dir};
pub use ids::{
    AgentId, ContractId, ItemEntityId, LandId, LawId, OrgId, PostId, StructureId, TaskId,
    TradeId,
};
pub use protocol::{
    ActAck, ActionEnvelope, EntityView, Event, EventKind, InstantReq, ItemPair, ItemStack,
    MemoryKv, Obs, SelfView, TaskReq, TaskView, VoxelOp, VoxelView, Welcome, WorldView,
    encode_item_pairs,
};
