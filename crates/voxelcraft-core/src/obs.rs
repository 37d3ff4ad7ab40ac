//! Per-agent observation frames.
//!
//! After the systems run, every connected client gets one OBS frame: self
//! state, a square voxel slab around the agent, nearby entities, running
//! tasks, memory loaded this tick, and the events queued since the last
//! frame. Frames are JSON-encoded and offered to the client buffer with
//! `try_send`; a full buffer drops the frame.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use voxelcraft_agents::governance::time_of_day;
use voxelcraft_agents::{Agent, MoveTask, WorkTask};
use voxelcraft_types::{
    AgentId, EntityView, Obs, SelfView, TaskView, Vec3i, VoxelOp, VoxelView, WorkKind, WorldView,
};

use crate::entities::{entity_id, parse_entity_id};
use crate::world::World;

/// Full slab encoding.
pub const ENCODING_FULL: &str = "FULL";

/// Changed-cells encoding.
pub const ENCODING_DELTA: &str = "DELTA";

/// Build and push a frame for every connected client, then drain the
/// queues of agents nobody is watching.
pub fn system_observations(w: &mut World, now: u64) {
    let ids: Vec<AgentId> = w.agents.keys().cloned().collect();
    for agent_id in ids {
        if !w.clients.contains_key(&agent_id) {
            if let Some(a) = w.agents.get_mut(&agent_id) {
                a.take_events();
                a.pending_memory = None;
            }
            continue;
        }
        let Some(obs) = build_obs(w, &agent_id, now) else {
            continue;
        };
        push_frame(w, &agent_id, &obs, now);
    }
}

fn push_frame(w: &mut World, agent_id: &AgentId, obs: &Obs, now: u64) {
    let bytes = match serde_json::to_vec(obs) {
        Ok(b) => b,
        Err(e) => {
            warn!(tick = now, agent_id = %agent_id, error = %e, "OBS encode failed");
            return;
        }
    };
    let Some(client) = w.clients.get(agent_id) else {
        return;
    };
    match client.tx.try_send(bytes) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            debug!(tick = now, agent_id = %agent_id, "Client buffer full, frame dropped");
        }
        Err(TrySendError::Closed(_)) => {
            w.clients.remove(agent_id);
            debug!(tick = now, agent_id = %agent_id, "Client buffer closed, detached");
        }
    }
}

/// Build one frame, consuming the agent's pending events and memory.
///
/// The voxel section is delta-encoded only when the client asked for it
/// and its previous slab had the same center.
pub fn build_obs(w: &mut World, agent_id: &AgentId, now: u64) -> Option<Obs> {
    let a = w.agents.get(agent_id)?;
    let center = a.pos;
    let self_state = self_view(w, a);
    let entities = entities_near(w, a);
    let tasks = task_views(w, a);
    let world = world_view(w, now);

    let radius = w.cfg.obs_radius;
    let slab = voxel_slab(w, center, radius);
    let voxels = match w.clients.get_mut(agent_id) {
        Some(client) => {
            let previous = client.last_voxels.replace(slab.clone());
            let same_center = client.last_center.replace(center) == Some(center);
            match previous {
                Some(prev) if client.delta_voxels && same_center && prev.len() == slab.len() => VoxelView {
                    center,
                    radius,
                    encoding: ENCODING_DELTA.to_owned(),
                    data: Vec::new(),
                    ops: slab_delta(&prev, &slab, center, radius),
                },
                _ => full_view(center, radius, slab),
            }
        }
        None => full_view(center, radius, slab),
    };

    let a = w.agents.get_mut(agent_id)?;
    let memory = a.pending_memory.take();
    let events = a.take_events();
    Some(Obs {
        tick: now,
        agent_id: agent_id.clone(),
        world,
        self_state,
        voxels,
        entities,
        tasks,
        memory,
        events,
        events_cursor: a.event_cursor,
    })
}

fn full_view(center: Vec3i, radius: u32, data: Vec<u16>) -> VoxelView {
    VoxelView {
        center,
        radius,
        encoding: ENCODING_FULL.to_owned(),
        data,
        ops: Vec::new(),
    }
}

fn world_view(w: &World, now: u64) -> WorldView {
    let live = w.active_event.as_ref().filter(|e| e.is_live(now));
    let season_len = w.cfg.season_length_ticks.max(1);
    WorldView {
        world_id: w.cfg.id.clone(),
        time_of_day: time_of_day(now, w.cfg.day_ticks),
        weather: w.weather.as_str().to_owned(),
        active_event: live.map(|e| e.id.clone()),
        active_event_ends_tick: live.map_or(0, |e| e.ends_tick),
        season: (now / season_len).saturating_add(1),
    }
}

fn self_view(w: &World, a: &Agent) -> SelfView {
    let reputation = [
        ("trade", a.rep.trade),
        ("build", a.rep.build),
        ("social", a.rep.social),
        ("law", a.rep.law),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect();
    SelfView {
        pos: a.pos,
        yaw: a.yaw,
        hp: a.hp,
        hunger: a.hunger,
        stamina_milli: a.stamina_milli,
        reputation,
        fun: a.fun.to_map(),
        inventory: a.inventory.clone(),
        main_hand: w
            .catalogs
            .main_hand(&a.inventory)
            .unwrap_or_else(|| a.equipment.main_hand.clone()),
        org_id: w.org_of(a.id.as_str()).map(|o| o.org_id.as_str().to_owned()),
    }
}

/// Row-major `(z, x)` slab of the surface plane.
pub fn voxel_slab(w: &World, center: Vec3i, radius: u32) -> Vec<u16> {
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    let side = usize::try_from(radius).unwrap_or(0).saturating_mul(2).saturating_add(1);
    let mut out = Vec::with_capacity(side.saturating_mul(side));
    for dz in -r..=r {
        for dx in -r..=r {
            out.push(w.block_at(Vec3i::new(center.x.saturating_add(dx), 0, center.z.saturating_add(dz))));
        }
    }
    out
}

fn slab_delta(prev: &[u16], next: &[u16], center: Vec3i, radius: u32) -> Vec<VoxelOp> {
    let r = i32::try_from(radius).unwrap_or(i32::MAX);
    let side = r.saturating_mul(2).saturating_add(1);
    prev.iter()
        .zip(next)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .filter_map(|(i, (_, block))| {
            let i = i32::try_from(i).ok()?;
            let pos = Vec3i::new(
                center.x.saturating_add(i % side).saturating_sub(r),
                0,
                center.z.saturating_add(i / side).saturating_sub(r),
            );
            Some(VoxelOp { pos, block: *block })
        })
        .collect()
}

fn entities_near(w: &World, me: &Agent) -> Vec<EntityView> {
    let r = w.cfg.obs_radius;
    let near = |p: Vec3i| p.x.abs_diff(me.pos.x) <= r && p.z.abs_diff(me.pos.z) <= r;
    let view = |id: String, kind: &str, pos: Vec3i| EntityView {
        id,
        kind: kind.to_owned(),
        pos,
        item: None,
        count: None,
    };
    let now = w.tick();
    let mut out = Vec::new();

    for a in w.agents.values().filter(|a| a.id != me.id && near(a.pos)) {
        out.push(view(a.id.as_str().to_owned(), "AGENT", a.pos));
    }
    for e in w.items.values().filter(|e| e.is_live(now) && near(e.pos)) {
        out.push(EntityView {
            item: Some(e.item.clone()),
            count: Some(e.count),
            ..view(e.id.as_str().to_owned(), "ITEM", e.pos)
        });
    }
    for c in w.containers.values().filter(|c| near(c.pos) && w.block_is(c.pos, &c.kind)) {
        out.push(view(c.id(), &c.kind, c.pos));
    }
    let block_meta = w
        .signs
        .keys()
        .map(|p| ("SIGN", *p))
        .chain(w.conveyors.keys().map(|p| ("CONVEYOR", *p)))
        .chain(w.switches.keys().map(|p| ("SWITCH", *p)))
        .chain(w.boards.keys().filter_map(|id| parse_entity_id(id)).map(|(_, p)| ("BULLETIN_BOARD", p)));
    for (kind, pos) in block_meta {
        if near(pos) && w.block_is(pos, kind) {
            out.push(view(entity_id(kind, pos), kind, pos));
        }
    }
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn task_views(w: &World, a: &Agent) -> Vec<TaskView> {
    let mut out = Vec::new();
    if let Some(t) = &a.move_task {
        out.push(move_view(t, a.pos));
    }
    if let Some(t) = &a.work_task {
        out.push(TaskView {
            task_id: t.task_id.clone(),
            kind: t.kind.as_str().to_owned(),
            progress: work_progress(w, a, t),
            target: match t.kind {
                WorkKind::Mine | WorkKind::Place => Some(t.block_pos),
                WorkKind::BuildBlueprint => Some(t.anchor),
                _ => None,
            },
        });
    }
    out
}

fn move_view(t: &MoveTask, pos: Vec3i) -> TaskView {
    TaskView {
        task_id: t.task_id.clone(),
        kind: t.kind.as_str().to_owned(),
        progress: t.progress(pos),
        target: Some(t.target),
    }
}

/// Fraction of a work task done, in `[0, 1]`.
#[allow(clippy::cast_precision_loss)]
pub fn work_progress(w: &World, a: &Agent, t: &WorkTask) -> f64 {
    let ratio = |done: u32, needed: u32| {
        if needed == 0 {
            0.0
        } else {
            (f64::from(done) / f64::from(needed)).clamp(0.0, 1.0)
        }
    };
    match t.kind {
        WorkKind::Mine => {
            let tool = w.catalogs.block_def(w.block_at(t.block_pos)).and_then(|d| d.tool.clone());
            let tier = tool.map_or(0, |family| w.catalogs.best_tool_tier(&family, &a.inventory));
            ratio(t.work_ticks, w.catalogs.mining.work_ticks(tier))
        }
        WorkKind::Craft | WorkKind::Smelt => {
            ratio(t.work_ticks, w.catalogs.recipes.get(&t.recipe_id).map_or(0, |r| r.time_ticks))
        }
        WorkKind::BuildBlueprint => {
            let total = w.catalogs.blueprints.get(&t.blueprint_id).map_or(0, |bp| bp.blocks.len());
            if total == 0 {
                0.0
            } else {
                (f64::from(t.build_index) / total as f64).clamp(0.0, 1.0)
            }
        }
        WorkKind::Gather | WorkKind::Place | WorkKind::Open | WorkKind::Transfer => 0.0,
    }
}
