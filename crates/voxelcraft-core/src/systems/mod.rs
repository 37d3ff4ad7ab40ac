//! Per-tick systems.
//!
//! Each system is a free function over `&mut World` and the current tick.
//! The scheduler in [`crate::step`] runs them in a fixed order:
//!
//! 1. [`movement`] -- MOVE_TO and FOLLOW steps, detours, access passes
//! 2. [`work`] -- mining, placing, containers, crafting, blueprints
//! 3. [`environment`] and [`director`] -- vitals, weather, world events
//! 4. [`laws`] -- notice, voting, and activation
//! 5. [`maintenance`] -- daily claim upkeep
//! 6. [`conveyors`] -- belts, switches, wires, sensors
//! 7. [`contracts`] -- deadline expiry
//! 8. [`fun`] -- delayed structure awards
//!
//! Within a system agents are visited in ascending id order.

pub mod blueprint;
pub mod contracts;
pub mod conveyors;
pub mod director;
pub mod environment;
pub mod fun;
pub mod laws;
pub mod maintenance;
pub mod movement;
pub mod work;

use voxelcraft_types::AgentId;

use crate::world::World;

/// Agent ids in processing order.
pub(crate) fn agent_ids(w: &World) -> Vec<AgentId> {
    w.agents.keys().cloned().collect()
}
