//! Shared fixtures for the integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::sync::Arc;

use voxelcraft_core::step::JoinInput;
use voxelcraft_core::{TickInputs, TickSummary, World, WorldConfig};
use voxelcraft_types::{ActionEnvelope, AgentId, Event, EventKind, InstantReq, TaskReq, Vec3i};
use voxelcraft_world::Catalogs;

/// Shared builtin catalogs.
pub fn catalogs() -> Arc<Catalogs> {
    Arc::new(Catalogs::builtin().unwrap())
}

/// A fresh world with the default configuration.
pub fn world() -> World {
    world_with(WorldConfig::default())
}

/// A fresh world with `cfg`.
pub fn world_with(cfg: WorldConfig) -> World {
    World::new(cfg, catalogs()).unwrap()
}

/// Join `names` in one tick and return their ids.
pub fn join_all(w: &mut World, names: &[&str]) -> Vec<AgentId> {
    let joins = names
        .iter()
        .map(|n| JoinInput {
            name: (*n).to_owned(),
            delta_voxels: false,
            tx: None,
        })
        .collect();
    let s = w.step(TickInputs {
        joins,
        ..TickInputs::default()
    });
    s.joins.into_iter().map(|j| j.agent_id).collect()
}

/// Run `n` idle ticks.
pub fn idle(w: &mut World, n: u64) {
    for _ in 0..n {
        w.step(TickInputs::default());
    }
}

/// Envelope authored at the world's current tick.
pub fn envelope(w: &World, agent: &str) -> ActionEnvelope {
    ActionEnvelope {
        agent_id: AgentId::from(agent),
        tick: w.tick(),
        ..ActionEnvelope::default()
    }
}

/// Step one tick with a single instant from `agent`.
pub fn act_instant(w: &mut World, agent: &str, req: InstantReq) -> TickSummary {
    let mut env = envelope(w, agent);
    env.instants.push(req);
    step_envelopes(w, vec![env])
}

/// Step one tick with a single task from `agent`.
pub fn act_task(w: &mut World, agent: &str, req: TaskReq) -> TickSummary {
    let mut env = envelope(w, agent);
    env.tasks.push(req);
    step_envelopes(w, vec![env])
}

/// Step one tick with `envelopes`.
pub fn step_envelopes(w: &mut World, envelopes: Vec<ActionEnvelope>) -> TickSummary {
    w.step(TickInputs {
        envelopes,
        ..TickInputs::default()
    })
}

/// Instant request of `kind`.
pub fn instant(kind: &str) -> InstantReq {
    InstantReq {
        id: "I1".to_owned(),
        kind: kind.to_owned(),
        ..InstantReq::default()
    }
}

/// Task request of `kind`.
pub fn task(kind: &str) -> TaskReq {
    TaskReq {
        id: "K_REQ".to_owned(),
        kind: kind.to_owned(),
        ..TaskReq::default()
    }
}

/// Every logged event of `kind` for `agent`, oldest first.
pub fn events(w: &World, agent: &str, kind: EventKind) -> Vec<Event> {
    let (items, _) = w.agents.get(agent).unwrap().events_after(0, 1000);
    items
        .into_iter()
        .map(|c| c.event)
        .filter(|e| e.kind == kind)
        .collect()
}

/// Most recent logged event of `kind` for `agent`.
pub fn last_event(w: &World, agent: &str, kind: EventKind) -> Option<Event> {
    events(w, agent, kind).pop()
}

/// Set every cell in `cells` to AIR.
pub fn clear(w: &mut World, cells: impl IntoIterator<Item = Vec3i>) {
    for p in cells {
        w.set_block_named(p, "AIR", "TEST", "TEST").unwrap();
    }
}

/// Put `agent` at `pos` on open ground.
pub fn place_agent(w: &mut World, agent: &str, pos: Vec3i) {
    clear(w, [pos]);
    let a = w.agents.get_mut(agent).unwrap();
    a.pos = pos;
    a.move_task = None;
}
