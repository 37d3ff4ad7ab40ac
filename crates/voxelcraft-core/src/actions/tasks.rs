//! Task submissions.
//!
//! Submitting a task only validates it and fills a slot; the movement and
//! work systems advance it on later ticks. CLAIM_LAND is the exception and
//! settles immediately.

use voxelcraft_agents::governance::{clamp_claim_radius, claim_type_for_world};
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::tasks::{clamp_follow_distance, clamp_tolerance, normalize_rotation};
use voxelcraft_agents::{LandClaim, MoveTask, WorkTask};
use voxelcraft_types::{AgentId, ErrorCode, LandId, MoveKind, TaskId, TaskReq, Vec3i, WorkKind};

use super::{Accepted, Outcome, Rejection, positive_count, required};
use crate::world::{Counters, World};

fn vec(a: [i32; 3]) -> Vec3i {
    Vec3i::new(a[0], a[1], a[2])
}

fn next_task_id(w: &mut World) -> TaskId {
    TaskId::from_counter(Counters::next(&mut w.counters.task))
}

fn move_slot_free(w: &World, agent_id: &str) -> Result<(), Rejection> {
    match w.agents.get(agent_id) {
        Some(a) if a.move_task.is_none() => Ok(()),
        Some(_) => Err(Rejection::new(ErrorCode::Conflict, "movement task slot occupied")),
        None => Err(Rejection::new(ErrorCode::InvalidTarget, "agent not found")),
    }
}

fn work_slot_free(w: &World, agent_id: &str) -> Result<(), Rejection> {
    match w.agents.get(agent_id) {
        Some(a) if a.work_task.is_none() => Ok(()),
        Some(_) => Err(Rejection::new(ErrorCode::Conflict, "work task slot occupied")),
        None => Err(Rejection::new(ErrorCode::InvalidTarget, "agent not found")),
    }
}

fn flat_target(pos: Vec3i) -> Result<Vec3i, Rejection> {
    if pos.y != 0 {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "2D world requires y==0"));
    }
    Ok(pos)
}

fn start_work(w: &mut World, agent_id: &AgentId, task: WorkTask) -> Outcome {
    let task_id = task.task_id.clone();
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    a.work_task = Some(task);
    Ok(Accepted::new("").with("task_id", task_id.as_str()))
}

fn start_move(w: &mut World, agent_id: &AgentId, task: MoveTask) -> Outcome {
    let task_id = task.task_id.clone();
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    a.move_task = Some(task);
    Ok(Accepted::new("").with("task_id", task_id.as_str()))
}

/// STOP: clear the movement slot.
pub fn stop(w: &mut World, agent_id: &AgentId, _req: &TaskReq, _now: u64) -> Outcome {
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.move_task = None;
    }
    Ok(Accepted::new("stopped"))
}

/// MOVE_TO a cell inside the world boundary.
pub fn move_to(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    move_slot_free(w, agent_id.as_str())?;
    let target = Vec3i::flat(req.target[0], req.target[2]);
    if !w.chunks.in_bounds(target) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "out of bounds"));
    }
    let start_pos = super::actor_pos(w, agent_id.as_str())?;
    let task = MoveTask {
        task_id: next_task_id(w),
        kind: MoveKind::MoveTo,
        target,
        tolerance: clamp_tolerance(req.tolerance),
        target_id: String::new(),
        distance: 0.0,
        start_pos,
        started_tick: now,
    };
    start_move(w, agent_id, task)
}

/// FOLLOW another entity at a distance.
pub fn follow(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    move_slot_free(w, agent_id.as_str())?;
    let target_id = required(&req.target_id, "target_id")?;
    let target = w
        .entity_pos(target_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "target not found"))?;
    let start_pos = super::actor_pos(w, agent_id.as_str())?;
    let task = MoveTask {
        task_id: next_task_id(w),
        kind: MoveKind::Follow,
        target,
        tolerance: 0.0,
        target_id: target_id.to_owned(),
        distance: clamp_follow_distance(req.distance),
        start_pos,
        started_tick: now,
    };
    start_move(w, agent_id, task)
}

/// MINE the block at `block_pos`.
pub fn mine(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    if !w.cfg.allow_mine {
        return Err(Rejection::new(ErrorCode::NoPermission, "mining disabled in this world"));
    }
    work_slot_free(w, agent_id.as_str())?;
    let pos = flat_target(vec(req.block_pos))?;
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Mine, now);
    task.block_pos = pos;
    start_work(w, agent_id, task)
}

/// GATHER a dropped stack.
pub fn gather(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    work_slot_free(w, agent_id.as_str())?;
    let target_id = required(&req.target_id, "target_id")?;
    if !w.items.get(target_id).is_some_and(|e| e.is_live(now)) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "item entity not found"));
    }
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Gather, now);
    target_id.clone_into(&mut task.target_id);
    start_work(w, agent_id, task)
}

/// PLACE an item as a block.
pub fn place(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    if !w.cfg.allow_place {
        return Err(Rejection::new(ErrorCode::NoPermission, "placing disabled in this world"));
    }
    work_slot_free(w, agent_id.as_str())?;
    let item_id = required(&req.item_id, "item_id")?;
    let pos = flat_target(vec(req.block_pos))?;
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Place, now);
    item_id.clone_into(&mut task.item_id);
    task.block_pos = pos;
    start_work(w, agent_id, task)
}

/// OPEN a container, board, or sign.
pub fn open(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    work_slot_free(w, agent_id.as_str())?;
    let target_id = required(&req.target_id, "target_id")?;
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Open, now);
    target_id.clone_into(&mut task.target_id);
    start_work(w, agent_id, task)
}

/// TRANSFER items between `SELF` and containers.
pub fn transfer(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    work_slot_free(w, agent_id.as_str())?;
    let missing = || Rejection::new(ErrorCode::BadRequest, "missing src/dst/item_id/count");
    if req.src.trim().is_empty() || req.dst.trim().is_empty() || req.item_id.trim().is_empty() || req.count <= 0 {
        return Err(missing());
    }
    let count = u32::try_from(req.count).map_err(|_range| missing())?;
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Transfer, now);
    req.src.trim().clone_into(&mut task.src);
    req.dst.trim().clone_into(&mut task.dst);
    req.item_id.trim().clone_into(&mut task.item_id);
    task.count = count;
    start_work(w, agent_id, task)
}

/// CRAFT a recipe `count` times.
pub fn craft(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    work_slot_free(w, agent_id.as_str())?;
    if req.recipe_id.trim().is_empty() || req.count <= 0 {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing recipe_id/count"));
    }
    let count = positive_count(req.count, 1)?;
    let recipe_id = req.recipe_id.trim();
    if !w.catalogs.recipes.contains_key(recipe_id) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "unknown recipe"));
    }
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Craft, now);
    recipe_id.clone_into(&mut task.recipe_id);
    task.count = count;
    start_work(w, agent_id, task)
}

/// SMELT an input item `count` times at a furnace.
pub fn smelt(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    work_slot_free(w, agent_id.as_str())?;
    if req.item_id.trim().is_empty() || req.count <= 0 {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing item_id/count"));
    }
    let count = positive_count(req.count, 1)?;
    let item_id = req.item_id.trim();
    let recipe_id = w
        .catalogs
        .smelt_by_input
        .get(item_id)
        .cloned()
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "unsupported smelt item"))?;
    let mut task = WorkTask::new(next_task_id(w), WorkKind::Smelt, now);
    item_id.clone_into(&mut task.item_id);
    task.recipe_id = recipe_id;
    task.count = count;
    start_work(w, agent_id, task)
}

/// Items consumed by CLAIM_LAND.
pub fn claim_cost() -> Inventory {
    Inventory::from([("BATTERY".to_owned(), 1), ("CRYSTAL_SHARD".to_owned(), 1)])
}

/// CLAIM_LAND: settle a new claim around `anchor` immediately.
pub fn claim_land(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    if !w.cfg.allow_claims {
        return Err(Rejection::new(ErrorCode::NoPermission, "claims disabled in this world"));
    }
    let radius = clamp_claim_radius(req.radius);
    let anchor = flat_target(vec(req.anchor))?;
    if !w.chunks.in_bounds(anchor) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "out of bounds"));
    }
    if !w.can_build_at(agent_id.as_str(), anchor, now) {
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "cannot claim here"));
    }
    let cost = claim_cost();
    let has_cost = w
        .agents
        .get(agent_id)
        .is_some_and(|a| inventory::has_all(&a.inventory, &cost));
    if !has_cost {
        return Err(Rejection::new(ErrorCode::NoResource, "need BATTERY and CRYSTAL_SHARD"));
    }
    if w.claim_overlaps(anchor, radius, None) {
        return Err(Rejection::new(ErrorCode::Conflict, "claim overlaps existing land"));
    }
    if w.block_at(anchor) != w.chunks.air() {
        return Err(Rejection::new(ErrorCode::Blocked, "anchor occupied"));
    }

    w.set_block_named(anchor, "CLAIM_TOTEM", agent_id.as_str(), "CLAIM_LAND")
        .map_err(|e| Rejection::new(ErrorCode::Internal, e.to_string()))?;
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::remove_all(&mut a.inventory, &cost)?;
    }
    let land_id = LandId::from_counter(agent_id.as_str(), Counters::next(&mut w.counters.land));
    let claim_type = claim_type_for_world(&w.cfg.world_type);
    let due = now.saturating_add(w.cfg.day_ticks);
    w.claims.insert(
        land_id.clone(),
        LandClaim::new(land_id.clone(), agent_id.as_str(), claim_type, anchor, radius, due),
    );
    let entry = w
        .audit_entry(agent_id.as_str(), "CLAIM_CREATE", anchor, "CLAIM_LAND")
        .detail("land_id", land_id.as_str())
        .detail("radius", radius)
        .detail("claim_type", claim_type.as_str());
    w.audit(entry);
    tracing::info!(tick = now, agent_id = %agent_id, land_id = %land_id, radius, "Land claimed");
    Ok(Accepted::new("claimed").with("land_id", land_id.as_str()))
}

/// BUILD_BLUEPRINT at `anchor` with `rotation` quarter turns.
pub fn build_blueprint(w: &mut World, agent_id: &AgentId, req: &TaskReq, now: u64) -> Outcome {
    if !w.cfg.allow_build {
        return Err(Rejection::new(ErrorCode::NoPermission, "building disabled in this world"));
    }
    work_slot_free(w, agent_id.as_str())?;
    let blueprint_id = required(&req.blueprint_id, "blueprint_id")?;
    let anchor = flat_target(vec(req.anchor))?;
    if !w.catalogs.blueprints.contains_key(blueprint_id) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "unknown blueprint"));
    }
    let mut task = WorkTask::new(next_task_id(w), WorkKind::BuildBlueprint, now);
    blueprint_id.clone_into(&mut task.blueprint_id);
    task.anchor = anchor;
    task.rotation = normalize_rotation(req.rotation);
    start_work(w, agent_id, task)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_types::ClaimType;

    use super::super::tests::{run_task, task, world};
    use super::*;

    fn give(w: &mut World, agent: &str, item: &str, n: u32) {
        inventory::add(&mut w.agents.get_mut(agent).unwrap().inventory, item, n).unwrap();
    }

    #[test]
    fn move_slot_is_exclusive() {
        let mut w = world();
        w.join("alice", false, None);
        let req = TaskReq {
            target: [4, 0, 4],
            ..task("MOVE_TO")
        };
        let first = run_task(&mut w, "A1", req.clone());
        assert_eq!(first.get_str("task_id"), Some("K1"));
        let second = run_task(&mut w, "A1", req);
        assert!(second.has_code(ErrorCode::Conflict));
        run_task(&mut w, "A1", task("STOP"));
        assert!(w.agents.get("A1").unwrap().move_task.is_none());
    }

    #[test]
    fn move_target_must_be_in_bounds() {
        let mut w = world();
        w.join("alice", false, None);
        let ev = run_task(
            &mut w,
            "A1",
            TaskReq {
                target: [999_999, 0, 0],
                ..task("MOVE_TO")
            },
        );
        assert!(ev.has_code(ErrorCode::InvalidTarget));
    }

    #[test]
    fn mine_requires_flat_target() {
        let mut w = world();
        w.join("alice", false, None);
        let ev = run_task(
            &mut w,
            "A1",
            TaskReq {
                block_pos: [1, 1, 1],
                ..task("MINE")
            },
        );
        assert_eq!(ev.get_str("message"), Some("2D world requires y==0"));
        let ev = run_task(
            &mut w,
            "A1",
            TaskReq {
                block_pos: [1, 0, 1],
                ..task("MINE")
            },
        );
        assert_eq!(ev.get("ok").and_then(serde_json::Value::as_bool), Some(true));
        let again = run_task(&mut w, "A1", TaskReq { block_pos: [2, 0, 1], ..task("MINE") });
        assert_eq!(again.get_str("message"), Some("work task slot occupied"));
    }

    #[test]
    fn craft_and_smelt_validate_catalog_ids() {
        let mut w = world();
        w.join("alice", false, None);
        let ev = run_task(&mut w, "A1", TaskReq { recipe_id: "nope".to_owned(), count: 1, ..task("CRAFT") });
        assert!(ev.has_code(ErrorCode::InvalidTarget));
        let ev = run_task(&mut w, "A1", TaskReq { item_id: "PLANK".to_owned(), count: 1, ..task("SMELT") });
        assert_eq!(ev.get_str("message"), Some("unsupported smelt item"));
        let ev = run_task(&mut w, "A1", TaskReq { recipe_id: "plank".to_owned(), count: 0, ..task("CRAFT") });
        assert!(ev.has_code(ErrorCode::BadRequest));
    }

    #[test]
    fn claim_land_consumes_cost_and_places_totem() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = w.agents.get("A1").unwrap().pos;
        let anchor = w.find_spawn_air(pos.x + 2, pos.z, 4);
        let req = TaskReq {
            anchor: anchor.to_array(),
            ..task("CLAIM_LAND")
        };
        let ev = run_task(&mut w, "A1", req.clone());
        assert!(ev.has_code(ErrorCode::NoResource));

        give(&mut w, "A1", "BATTERY", 1);
        give(&mut w, "A1", "CRYSTAL_SHARD", 1);
        let ev = run_task(&mut w, "A1", req);
        assert_eq!(ev.get_str("land_id"), Some("LAND_A1_001"));
        assert!(w.block_is(anchor, "CLAIM_TOTEM"));
        let land = w.claims.values().next().unwrap();
        assert_eq!(land.radius, 32);
        assert_eq!(land.claim_type, ClaimType::Default);
        assert_eq!(land.maintenance_due_tick, w.cfg.day_ticks);
        assert_eq!(inventory::count(&w.agents.get("A1").unwrap().inventory, "BATTERY"), 0);
    }

    #[test]
    fn unknown_blueprint_is_rejected() {
        let mut w = world();
        w.join("alice", false, None);
        let ev = run_task(&mut w, "A1", TaskReq { blueprint_id: "castle".to_owned(), ..task("BUILD_BLUEPRINT") });
        assert_eq!(ev.get_str("message"), Some("unknown blueprint"));
        let ev = run_task(&mut w, "A1", TaskReq { blueprint_id: "road_segment".to_owned(), rotation: 5, ..task("BUILD_BLUEPRINT") });
        assert!(ev.get_str("task_id").is_some());
        assert_eq!(w.agents.get("A1").unwrap().work_task.as_ref().unwrap().rotation, 1);
    }
}
