//! MOVE_TO and FOLLOW.
//!
//! An agent takes at most one step per tick along the axis with the larger
//! remaining delta, falling back to the other axis and then to a bounded
//! breadth-first detour. Detour neighbours are expanded in the order
//! −Z, +Z, −X, +X.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;
use voxelcraft_agents::MoveTask;
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, MoveKind, Vec3i, Weather};

use super::agent_ids;
use crate::world::World;

/// Stamina spent per step.
pub const STEP_STAMINA_MILLI: i32 = 8;

/// How far the detour search may wander.
pub const DETOUR_DEPTH: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Progress {
    Moved,
    Waiting,
    Arrived,
    Failed(ErrorCode, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Passage {
    Open,
    Solid,
    Wanted,
}

fn passage(w: &World, agent_id: &str, from: Vec3i, to: Vec3i) -> Passage {
    if w.wanted_blocked(agent_id, from, to) {
        Passage::Wanted
    } else if w.walkable(to) {
        Passage::Open
    } else {
        Passage::Solid
    }
}

/// Advance every movement task by one step.
pub fn system_movement(w: &mut World, now: u64) {
    for agent_id in agent_ids(w) {
        let Some(task) = w.agents.get(&agent_id).and_then(|a| a.move_task.clone()) else {
            continue;
        };
        match advance(w, &agent_id, &task, now) {
            Progress::Moved | Progress::Waiting => {}
            Progress::Arrived => {
                finish(w, &agent_id, Event::task_done(now, &task.task_id, task.kind.as_str()));
            }
            Progress::Failed(code, message) => {
                debug!(tick = now, agent_id = %agent_id, task_id = %task.task_id, code = code.as_str(), message, "Move failed");
                finish(w, &agent_id, Event::task_fail(now, &task.task_id, code, message));
            }
        }
    }
}

fn finish(w: &mut World, agent_id: &AgentId, event: Event) {
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.move_task = None;
        a.push_event(event);
    }
}

fn advance(w: &mut World, agent_id: &AgentId, task: &MoveTask, now: u64) -> Progress {
    let Some((pos, stamina)) = w.agents.get(agent_id).map(|a| (a.pos, a.stamina_milli)) else {
        return Progress::Waiting;
    };
    let (target, within) = match task.kind {
        MoveKind::MoveTo => (task.target, task.tolerance),
        MoveKind::Follow => {
            let Some(target) = w.entity_pos(&task.target_id) else {
                return Progress::Failed(ErrorCode::InvalidTarget, "follow target not found");
            };
            if let Some(slot) = w.agents.get_mut(agent_id).and_then(|a| a.move_task.as_mut()) {
                slot.target = target;
            }
            (target, task.distance)
        }
    };
    if pos.dist_xz(target) <= within {
        return match task.kind {
            MoveKind::MoveTo => Progress::Arrived,
            MoveKind::Follow => Progress::Waiting,
        };
    }
    if w.weather == Weather::Storm && now % 2 == 1 {
        return Progress::Waiting;
    }
    if stamina < STEP_STAMINA_MILLI {
        return Progress::Waiting;
    }

    let next = match choose_step(w, agent_id.as_str(), pos, target) {
        Ok(next) => next,
        Err(failed) => return failed,
    };
    if let Err(failed) = charge_access_pass(w, agent_id, pos, next, now) {
        return failed;
    }
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.yaw = step_yaw(pos, next);
        a.pos = next;
        a.spend_stamina(STEP_STAMINA_MILLI);
    }
    w.record_structure_usage(agent_id, next, now);
    w.fun_on_biome(agent_id, now);
    Progress::Moved
}

/// Yaw facing from `from` to the adjacent cell `to`.
fn step_yaw(from: Vec3i, to: Vec3i) -> i32 {
    match (to.x.saturating_sub(from.x), to.z.saturating_sub(from.z)) {
        (-1, _) => 90,
        (_, -1) => 180,
        (1, _) => 270,
        _ => 0,
    }
}

/// Primary axis step, secondary axis step, then detour.
fn choose_step(w: &World, agent_id: &str, pos: Vec3i, target: Vec3i) -> Result<Vec3i, Progress> {
    let dx = target.x.saturating_sub(pos.x);
    let dz = target.z.saturating_sub(pos.z);
    let along_x = (dx != 0).then(|| pos.offset(dx.signum(), 0, 0));
    let along_z = (dz != 0).then(|| pos.offset(0, 0, dz.signum()));
    let steps = if dx.unsigned_abs() >= dz.unsigned_abs() {
        [along_x, along_z]
    } else {
        [along_z, along_x]
    };

    let mut wanted = false;
    for step in steps.into_iter().flatten() {
        match passage(w, agent_id, pos, step) {
            Passage::Open => return Ok(step),
            Passage::Wanted => wanted = true,
            Passage::Solid => {}
        }
    }
    if let Some(step) = detour(w, agent_id, pos, target) {
        return Ok(step);
    }
    if wanted {
        Err(Progress::Failed(ErrorCode::NoPermission, "wanted: law reputation too low"))
    } else {
        Err(Progress::Failed(ErrorCode::Blocked, "blocked"))
    }
}

/// First step of the shortest open path to any cell strictly closer to
/// `target` than `pos`, searching at most [`DETOUR_DEPTH`] steps out.
fn detour(w: &World, agent_id: &str, pos: Vec3i, target: Vec3i) -> Option<Vec3i> {
    let start = pos.manhattan(target);
    let mut first_step: BTreeMap<Vec3i, Vec3i> = BTreeMap::from([(pos, pos)]);
    let mut queue = VecDeque::from([(pos, 0_u32)]);
    while let Some((cur, depth)) = queue.pop_front() {
        if depth >= DETOUR_DEPTH {
            continue;
        }
        let via = first_step.get(&cur).copied().unwrap_or(cur);
        for next in cur.neighbors4() {
            if first_step.contains_key(&next) || passage(w, agent_id, cur, next) != Passage::Open {
                continue;
            }
            let step = if cur == pos { next } else { via };
            if next.manhattan(target) < start {
                return Some(step);
            }
            first_step.insert(next, step);
            queue.push_back((next, depth.saturating_add(1)));
        }
    }
    None
}

/// Charge the ticket when a non-member steps into the core of land with
/// an access pass law.
fn charge_access_pass(w: &mut World, agent_id: &AgentId, from: Vec3i, to: Vec3i, now: u64) -> Result<(), Progress> {
    let core = w.cfg.access_pass_core_radius;
    let Some(land) = w.land_at(to) else {
        return Ok(());
    };
    if !land.access_pass_enabled
        || !land.core_contains(to, core)
        || land.core_contains(from, core)
        || w.is_land_member(agent_id.as_str(), land)
    {
        return Ok(());
    }
    let (land_id, item, cost) = (land.land_id.clone(), land.access_ticket_item.clone(), land.access_ticket_cost);
    if item.is_empty() || cost == 0 {
        return Err(Progress::Failed(ErrorCode::NoPermission, "access pass required"));
    }
    let paid = w
        .agents
        .get_mut(agent_id)
        .is_some_and(|a| inventory::has(&a.inventory, &item, cost) && inventory::remove(&mut a.inventory, &item, cost).is_ok());
    if !paid {
        return Err(Progress::Failed(ErrorCode::NoResource, "need access ticket"));
    }
    let ticket = Inventory::from([(item.clone(), cost)]);
    w.pay_land_owner(&land_id, &ticket);
    let entry = w
        .audit_entry(agent_id.as_str(), "ACCESS_PASS", to, "MOVE")
        .detail("land_id", land_id.as_str())
        .detail("item", item.as_str())
        .detail("count", cost);
    w.audit(entry);
    w.emit(
        agent_id.as_str(),
        Event::new(now, EventKind::AccessPass)
            .with("land_id", land_id.as_str())
            .with("item", item.as_str())
            .with("count", cost),
    );
    Ok(())
}
