//! Work tasks: mining, gathering, placing, containers, crafting, and
//! blueprints.
//!
//! Each tick every agent with a work task gets one call into the handler
//! for its kind. A handler either keeps the task running, finishes it
//! with `TASK_DONE`, or fails it with `TASK_FAIL`; in the last two cases
//! the slot is cleared.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info};
use voxelcraft_agents::WorkTask;
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, FunDim, Vec3i, WorkKind, encode_item_pairs};
use voxelcraft_world::ItemCount;
use voxelcraft_world::catalogs::STATION_HAND;

use super::{agent_ids, blueprint};
use crate::actions::boards::post_json;
use crate::actions::{REACH_CONTAINER, REACH_MINE, REACH_STATION, Rejection, actor_pos};
use crate::entities::{CONTAINER_KINDS, entity_id, parse_entity_id};
use crate::world::World;

/// Event that spawns crystal ore and pays a bonus shard per mined block.
pub const CRYSTAL_RIFT: &str = "CRYSTAL_RIFT";

/// Event that guards a loot chest.
pub const RUINS_GATE: &str = "RUINS_GATE";

/// Posts shown when a board is opened.
const OPEN_BOARD_POSTS: usize = 20;

/// Result of one tick of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Keep the task.
    Working,
    /// Finished; emit `TASK_DONE`.
    Done,
}

/// Advance every work task by one tick.
pub fn system_work(w: &mut World, now: u64) {
    w.purge_expired_items(now);
    for agent_id in agent_ids(w) {
        let Some(mut task) = w.agents.get(&agent_id).and_then(|a| a.work_task.clone()) else {
            continue;
        };
        let result = match task.kind {
            WorkKind::Mine => tick_mine(w, &agent_id, &mut task, now),
            WorkKind::Gather => tick_gather(w, &agent_id, &task, now),
            WorkKind::Place => tick_place(w, &agent_id, &task, now),
            WorkKind::Open => tick_open(w, &agent_id, &task, now),
            WorkKind::Transfer => tick_transfer(w, &agent_id, &task),
            WorkKind::Craft | WorkKind::Smelt => tick_recipe(w, &agent_id, &mut task, now),
            WorkKind::BuildBlueprint => blueprint::tick_build(w, &agent_id, &mut task, now),
        };
        let event = match result {
            Ok(Step::Working) => {
                if let Some(a) = w.agents.get_mut(&agent_id) {
                    a.work_task = Some(task);
                }
                continue;
            }
            Ok(Step::Done) => Event::task_done(now, &task.task_id, task.kind.as_str()),
            Err(r) => {
                debug!(
                    tick = now,
                    agent_id = %agent_id,
                    task_id = %task.task_id,
                    kind = task.kind.as_str(),
                    code = r.code.as_str(),
                    message = %r.message,
                    "Work task failed"
                );
                Event::task_fail(now, &task.task_id, r.code, &r.message)
            }
        };
        if let Some(a) = w.agents.get_mut(&agent_id) {
            // A handler may have replaced the slot; only clear our own task.
            if a.work_task.as_ref().is_some_and(|t| t.task_id == task.task_id) {
                a.work_task = None;
            }
        }
        w.emit(agent_id.as_str(), event);
    }
}

/// Recipe stacks as an inventory.
pub(crate) fn to_inventory(items: &[ItemCount]) -> Inventory {
    let mut inv = Inventory::new();
    for ic in items {
        let slot = inv.entry(ic.item.clone()).or_insert(0);
        *slot = slot.saturating_add(ic.count);
    }
    inv
}

/// Whether a `name` block lies within Manhattan `dist` of `pos`.
fn near_block(w: &World, pos: Vec3i, name: &str, dist: u32) -> bool {
    let Some(id) = w.catalogs.block_id(name) else {
        return false;
    };
    let d = i32::try_from(dist).unwrap_or(i32::MAX);
    (-d..=d).any(|dz| {
        (-d..=d).any(|dx| {
            let p = Vec3i::flat(pos.x.saturating_add(dx), pos.z.saturating_add(dz));
            pos.manhattan(p) <= dist && w.block_at(p) == id
        })
    })
}

fn internal(e: impl std::fmt::Display) -> Rejection {
    Rejection::new(ErrorCode::Internal, e.to_string())
}

// ---------------------------------------------------------------------------
// MINE
// ---------------------------------------------------------------------------

/// Charge the land's vandalism fine for a denied break.
fn charge_break_fine(w: &mut World, agent_id: &AgentId, pos: Vec3i, now: u64) {
    let Some(land) = w.land_at(pos) else {
        return;
    };
    if w.is_land_member(agent_id.as_str(), land)
        || !land.fine_break_enabled
        || land.fine_break_per_block == 0
        || land.fine_break_item.is_empty()
    {
        return;
    }
    let (land_id, item, fine) = (land.land_id.clone(), land.fine_break_item.clone(), land.fine_break_per_block);
    let have = w.agents.get(agent_id).map_or(0, |a| inventory::count(&a.inventory, &item));
    let pay = fine.min(have);
    if pay == 0 {
        return;
    }
    if let Some(a) = w.agents.get_mut(agent_id) {
        if inventory::remove(&mut a.inventory, &item, pay).is_err() {
            return;
        }
    }
    w.pay_land_owner(&land_id, &Inventory::from([(item.clone(), pay)]));
    w.emit(
        agent_id.as_str(),
        Event::new(now, EventKind::Fine)
            .with("land_id", land_id.as_str())
            .with("item", item.as_str())
            .with("count", pay)
            .with("reason", "BREAK_DENIED"),
    );
    let entry = w
        .audit_entry(agent_id.as_str(), "FINE", pos, "BREAK_DENIED")
        .detail("land_id", land_id.as_str())
        .detail("item", item.as_str())
        .detail("count", pay);
    w.audit(entry);
}

fn tick_mine(w: &mut World, agent_id: &AgentId, task: &mut WorkTask, now: u64) -> Result<Step, Rejection> {
    let pos = task.block_pos;
    if actor_pos(w, agent_id.as_str())?.manhattan(pos) > REACH_MINE {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "too far"));
    }
    if !w.can_break_at(agent_id.as_str(), pos, now) {
        charge_break_fine(w, agent_id, pos, now);
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "break denied"));
    }
    let block = w.block_at(pos);
    if block == w.chunks.air() {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "no block"));
    }
    let catalogs = Arc::clone(&w.catalogs);
    let def = catalogs
        .block_def(block)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "unknown block"))?;
    if !def.breakable {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "block not breakable"));
    }

    let tier = match (&def.tool, w.agents.get(agent_id)) {
        (Some(family), Some(a)) => catalogs.best_tool_tier(family, &a.inventory),
        _ => 0,
    };
    let row = catalogs.mining.tier(tier);
    let Some(a) = w.agents.get_mut(agent_id) else {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "agent not found"));
    };
    if a.stamina_milli < row.stamina_milli {
        return Ok(Step::Working);
    }
    a.spend_stamina(row.stamina_milli);
    task.work_ticks = task.work_ticks.saturating_add(1);
    if task.work_ticks < catalogs.mining.work_ticks(tier) {
        return Ok(Step::Working);
    }

    if let Some(c) = w.live_container(pos) {
        if !c.reserved.values().all(|n| *n == 0) {
            return Err(Rejection::new(ErrorCode::Blocked, "container has reserved items"));
        }
        if let Some(mut c) = w.containers.remove(&pos) {
            let owed = c.take_owed(agent_id.as_str()).unwrap_or_default();
            if let Some(a) = w.agents.get_mut(agent_id) {
                inventory::add_all(&mut a.inventory, &c.inventory)?;
                inventory::add_all(&mut a.inventory, &owed)?;
            }
            let entry = w
                .audit_entry(agent_id.as_str(), "CONTAINER_REMOVE", pos, "MINE")
                .detail("container", c.id())
                .detail("items", encode_item_pairs(&c.inventory));
            w.audit(entry);
        }
    }
    w.remove_block_meta(pos, agent_id.as_str(), "MINE");
    if def.id == "CLAIM_TOTEM" {
        w.remove_claim_at(pos, agent_id.as_str(), "MINE_TOTEM");
    }
    let air = w.chunks.air();
    w.set_block(pos, air, agent_id.as_str(), "MINE").map_err(internal)?;
    if let Some(drop) = &def.drops {
        w.spawn_item(pos, drop, 1, agent_id.as_str(), "MINE_DROP");
    }
    if def.id == "CRYSTAL_ORE" {
        crystal_rift_bonus(w, agent_id, pos, now)?;
    }
    debug!(tick = now, agent_id = %agent_id, pos = %pos, block = %def.id, "Block mined");
    Ok(Step::Done)
}

fn crystal_rift_bonus(w: &mut World, agent_id: &AgentId, pos: Vec3i, now: u64) -> Result<(), Rejection> {
    let in_rift = w
        .active_event
        .as_ref()
        .is_some_and(|e| e.id == CRYSTAL_RIFT && e.is_live(now) && e.contains(pos));
    if !in_rift {
        return Ok(());
    }
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::add(&mut a.inventory, "CRYSTAL_SHARD", 1)?;
    }
    w.fun_on_event_participation(agent_id, CRYSTAL_RIFT, now);
    w.award_fun(agent_id, FunDim::Narrative, "event_mine", "narrative:event_mine:CRYSTAL_RIFT", 5, now);
    w.event_goal(agent_id, CRYSTAL_RIFT, "MINE_CRYSTAL", now);
    Ok(())
}

// ---------------------------------------------------------------------------
// GATHER, PLACE
// ---------------------------------------------------------------------------

fn tick_gather(w: &mut World, agent_id: &AgentId, task: &WorkTask, now: u64) -> Result<Step, Rejection> {
    if task.target_id.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing target_id"));
    }
    let entity = w
        .items
        .get(task.target_id.as_str())
        .filter(|e| e.is_live(now))
        .cloned()
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "item entity not found"))?;
    if actor_pos(w, agent_id.as_str())?.manhattan(entity.pos) > REACH_MINE {
        return Err(Rejection::new(ErrorCode::Blocked, "too far"));
    }
    if !w.can_withdraw_at(agent_id.as_str(), entity.pos) {
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "pickup denied"));
    }
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::add(&mut a.inventory, &entity.item, entity.count)?;
    }
    w.remove_item(&entity.id);
    let entry = w
        .audit_entry(agent_id.as_str(), "ITEM_PICKUP", entity.pos, "GATHER")
        .detail("entity_id", entity.id.as_str())
        .detail("item", entity.item.as_str())
        .detail("count", entity.count);
    w.audit(entry);
    Ok(Step::Done)
}

fn tick_place(w: &mut World, agent_id: &AgentId, task: &WorkTask, now: u64) -> Result<Step, Rejection> {
    let pos = task.block_pos;
    if !w.chunks.in_bounds(pos) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "out of bounds"));
    }
    if !w.can_build_at(agent_id.as_str(), pos, now) {
        return Err(Rejection::new(w.deny(agent_id.as_str(), now), "build denied"));
    }
    if w.block_at(pos) != w.chunks.air() {
        return Err(Rejection::new(ErrorCode::Blocked, "space occupied"));
    }
    let has_item = w
        .agents
        .get(agent_id)
        .is_some_and(|a| inventory::has(&a.inventory, &task.item_id, 1));
    if !has_item {
        return Err(Rejection::new(ErrorCode::NoResource, "missing item"));
    }
    let block = w
        .catalogs
        .items
        .get(&task.item_id)
        .and_then(|d| d.place_as.clone())
        .unwrap_or_else(|| task.item_id.clone());
    if w.catalogs.block_id(&block).is_none() {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "item not placeable"));
    }
    let yaw = w.agents.get(agent_id).map_or(0, |a| a.yaw);
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::remove(&mut a.inventory, &task.item_id, 1)?;
    }
    w.set_block_named(pos, &block, agent_id.as_str(), "PLACE").map_err(internal)?;
    w.instantiate_block_meta(pos, &block, yaw);
    Ok(Step::Done)
}

// ---------------------------------------------------------------------------
// OPEN
// ---------------------------------------------------------------------------

fn contracts_at(w: &World, terminal: Vec3i) -> Vec<Value> {
    w.contracts
        .values()
        .filter(|c| c.terminal_pos == terminal)
        .map(|c| {
            json!({
                "contract_id": c.contract_id.as_str(),
                "kind": c.kind.as_str(),
                "state": c.state.as_str(),
                "poster": c.poster.as_str(),
                "acceptor": c.acceptor.as_ref().map_or("", AgentId::as_str),
                "requirements": encode_item_pairs(&c.requirements),
                "reward": encode_item_pairs(&c.reward),
                "deadline_tick": c.deadline_tick,
            })
        })
        .collect()
}

fn tick_open(w: &mut World, agent_id: &AgentId, task: &WorkTask, now: u64) -> Result<Step, Rejection> {
    let (kind, pos) = parse_entity_id(&task.target_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "container not found"))?;
    let here = actor_pos(w, agent_id.as_str())?;

    if CONTAINER_KINDS.contains(&kind) {
        let c = w
            .live_container(pos)
            .filter(|c| c.kind == kind)
            .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "container not found"))?;
        if here.manhattan(pos) > REACH_CONTAINER {
            return Err(Rejection::new(ErrorCode::Blocked, "too far"));
        }
        let owed = c.owed.get(agent_id).cloned().unwrap_or_default();
        let mut ev = Event::new(now, EventKind::Container)
            .with("container", c.id())
            .with("container_type", c.kind.as_str())
            .with_pos("pos", pos)
            .with("inventory", encode_item_pairs(&c.inventory))
            .with("owed", encode_item_pairs(&owed));
        if c.kind == "CONTRACT_TERMINAL" {
            ev = ev.with("contracts", contracts_at(w, pos));
        }
        let ruins = c.kind == "CHEST"
            && w
                .active_event
                .as_ref()
                .is_some_and(|e| e.id == RUINS_GATE && e.is_live(now) && e.contains(pos));
        w.emit(agent_id.as_str(), ev);
        if ruins {
            w.fun_on_event_participation(agent_id, RUINS_GATE, now);
            w.award_fun(agent_id, FunDim::Narrative, "ruins_open", "narrative:ruins_open", 12, now);
            w.event_goal(agent_id, RUINS_GATE, "OPEN_RUINS", now);
        }
        return Ok(Step::Done);
    }

    match kind {
        "BULLETIN_BOARD" if w.block_is(pos, kind) => {
            if here.manhattan(pos) > REACH_CONTAINER {
                return Err(Rejection::new(ErrorCode::Blocked, "too far"));
            }
            let board_id = entity_id(kind, pos);
            let (posts, total): (Vec<Value>, usize) = w
                .boards
                .get(&board_id)
                .map_or((Vec::new(), 0), |b| (b.newest(OPEN_BOARD_POSTS).map(post_json).collect(), b.posts.len()));
            let ev = Event::new(now, EventKind::Board)
                .with("board_id", board_id)
                .with("posts", posts)
                .with("total_posts", total);
            w.emit(agent_id.as_str(), ev);
            Ok(Step::Done)
        }
        "SIGN" if w.block_is(pos, kind) => {
            if here.manhattan(pos) > REACH_CONTAINER {
                return Err(Rejection::new(ErrorCode::Blocked, "too far"));
            }
            let sign = w.signs.get(&pos).cloned().unwrap_or_default();
            let ev = Event::new(now, EventKind::Sign)
                .with("sign_id", entity_id(kind, pos))
                .with("text", sign.text)
                .with("updated_tick", sign.updated_tick)
                .with("updated_by", sign.updated_by);
            w.emit(agent_id.as_str(), ev);
            Ok(Step::Done)
        }
        _ => Err(Rejection::new(ErrorCode::InvalidTarget, "container not found")),
    }
}

// ---------------------------------------------------------------------------
// TRANSFER
// ---------------------------------------------------------------------------

const SELF_ID: &str = "SELF";

fn reach_container(w: &World, agent_id: &AgentId, id: &str) -> Result<Vec3i, Rejection> {
    let pos = w
        .container_pos(id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "container not found"))?;
    if actor_pos(w, agent_id.as_str())?.manhattan(pos) > REACH_CONTAINER {
        return Err(Rejection::new(ErrorCode::Blocked, "too far"));
    }
    Ok(pos)
}

fn tick_transfer(w: &mut World, agent_id: &AgentId, task: &WorkTask) -> Result<Step, Rejection> {
    if task.src == task.dst {
        return Err(Rejection::new(ErrorCode::BadRequest, "src equals dst"));
    }
    let (item, n) = (task.item_id.as_str(), task.count);
    let src = if task.src == SELF_ID {
        None
    } else {
        let pos = reach_container(w, agent_id, &task.src)?;
        if !w.can_withdraw_at(agent_id.as_str(), pos) {
            return Err(Rejection::new(ErrorCode::NoPermission, "withdraw denied"));
        }
        Some(pos)
    };
    let dst = if task.dst == SELF_ID {
        None
    } else {
        Some(reach_container(w, agent_id, &task.dst)?)
    };

    match src {
        None => {
            let have = w.agents.get(agent_id).map_or(0, |a| inventory::count(&a.inventory, item));
            if have < n {
                return Err(Rejection::new(ErrorCode::NoResource, "insufficient self items"));
            }
            if let Some(a) = w.agents.get_mut(agent_id) {
                inventory::remove(&mut a.inventory, item, n)?;
            }
        }
        Some(pos) => {
            let c = w
                .containers
                .get_mut(&pos)
                .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "container not found"))?;
            if c.available(item) < n {
                return Err(Rejection::new(ErrorCode::NoResource, "insufficient src items"));
            }
            c.take_available(item, n)?;
        }
    }
    match dst {
        None => {
            if let Some(a) = w.agents.get_mut(agent_id) {
                inventory::add(&mut a.inventory, item, n)?;
            }
        }
        Some(pos) => {
            if let Some(c) = w.containers.get_mut(&pos) {
                inventory::add(&mut c.inventory, item, n)?;
            }
        }
    }
    let at = src.or(dst).unwrap_or(Vec3i::ZERO);
    let entry = w
        .audit_entry(agent_id.as_str(), "TRANSFER", at, "TRANSFER")
        .detail("src", task.src.as_str())
        .detail("dst", task.dst.as_str())
        .detail("item", item)
        .detail("count", n);
    w.audit(entry);
    Ok(Step::Done)
}

// ---------------------------------------------------------------------------
// CRAFT, SMELT
// ---------------------------------------------------------------------------

fn tick_recipe(w: &mut World, agent_id: &AgentId, task: &mut WorkTask, now: u64) -> Result<Step, Rejection> {
    let catalogs = Arc::clone(&w.catalogs);
    let recipe = catalogs
        .recipes
        .get(&task.recipe_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "unknown recipe"))?;
    let here = actor_pos(w, agent_id.as_str())?;
    match (task.kind, recipe.station.as_str()) {
        (WorkKind::Craft, STATION_HAND) => {}
        (WorkKind::Craft, "CRAFTING_BENCH") => {
            if !near_block(w, here, "CRAFTING_BENCH", REACH_STATION) {
                return Err(Rejection::new(ErrorCode::Blocked, "need crafting bench nearby"));
            }
        }
        (WorkKind::Smelt, "FURNACE") => {
            if !near_block(w, here, "FURNACE", REACH_STATION) {
                return Err(Rejection::new(ErrorCode::Blocked, "need furnace nearby"));
            }
        }
        _ => return Err(Rejection::new(ErrorCode::InvalidTarget, "unsupported station")),
    }

    let inputs = to_inventory(&recipe.inputs);
    let has_inputs = w
        .agents
        .get(agent_id)
        .is_some_and(|a| inventory::has_all(&a.inventory, &inputs));
    if !has_inputs {
        return Err(Rejection::new(ErrorCode::NoResource, "missing inputs"));
    }
    task.work_ticks = task.work_ticks.saturating_add(1);
    if task.work_ticks < recipe.time_ticks {
        return Ok(Step::Working);
    }
    task.work_ticks = 0;
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::remove_all(&mut a.inventory, &inputs)?;
        inventory::add_all(&mut a.inventory, &to_inventory(&recipe.outputs))?;
    }
    w.fun_on_recipe(agent_id, &recipe.recipe_id, recipe.tier, now);
    info!(tick = now, agent_id = %agent_id, recipe_id = %recipe.recipe_id, "Recipe finished");
    task.count = task.count.saturating_sub(1);
    if task.count == 0 {
        return Ok(Step::Done);
    }
    Ok(Step::Working)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_agents::LandClaim;
    use voxelcraft_types::{ClaimType, LandId, TaskId, TaskReq};

    use super::*;
    use crate::actions::tests::{run_task, task, world};
    use crate::world::ActiveEvent;

    fn agent_pos(w: &World) -> Vec3i {
        w.agents.get("A1").unwrap().pos
    }

    fn count(w: &World, item: &str) -> u32 {
        inventory::count(&w.agents.get("A1").unwrap().inventory, item)
    }

    fn give(w: &mut World, item: &str, n: u32) {
        inventory::add(&mut w.agents.get_mut("A1").unwrap().inventory, item, n).unwrap();
    }

    fn events(w: &World, kind: EventKind) -> Vec<Event> {
        w.agents
            .get("A1")
            .unwrap()
            .pending_events()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Run the work system until the slot empties or `limit` ticks pass.
    fn run_until_idle(w: &mut World, limit: u64) -> u64 {
        for i in 0..limit {
            let now = w.tick();
            system_work(w, now);
            w.set_tick(now + 1);
            if w.agents.get("A1").unwrap().work_task.is_none() {
                return i + 1;
            }
        }
        limit
    }

    fn submit(w: &mut World, req: TaskReq) -> TaskId {
        let ev = run_task(w, "A1", req);
        TaskId::from(ev.get_str("task_id").unwrap())
    }

    fn mine_at(w: &mut World, pos: Vec3i) -> TaskId {
        submit(
            w,
            TaskReq {
                block_pos: pos.to_array(),
                ..task("MINE")
            },
        )
    }

    fn place_block(w: &mut World, pos: Vec3i, block: &str) {
        w.set_block_named(pos, block, "WORLD", "TEST").unwrap();
        w.instantiate_block_meta(pos, block, 0);
    }

    #[test]
    fn bare_hands_mine_in_ten_ticks_and_drop_the_item() {
        let mut w = world();
        w.join("alice", false, None);
        let target = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, target, "STONE");
        let task_id = mine_at(&mut w, target);
        assert_eq!(run_until_idle(&mut w, 50), 10);
        assert_eq!(w.block_at(target), w.chunks.air());
        let drop = w.items_at(target);
        assert_eq!(drop.len(), 1);
        assert_eq!(w.items.get(&drop[0]).unwrap().item, "STONE");
        let done = events(&w, EventKind::TaskDone);
        assert_eq!(done.last().unwrap().get_str("task_id"), Some(task_id.as_str()));
        assert_eq!(w.agents.get("A1").unwrap().stamina_milli, 1000 - 150);
    }

    #[test]
    fn pickaxe_tier_shortens_mining() {
        let mut w = world();
        w.join("alice", false, None);
        give(&mut w, "IRON_PICKAXE", 1);
        let target = agent_pos(&w).offset(0, 0, 1);
        place_block(&mut w, target, "COAL_ORE");
        mine_at(&mut w, target);
        assert_eq!(run_until_idle(&mut w, 50), 3);
    }

    #[test]
    fn mining_waits_for_stamina() {
        let mut w = world();
        w.join("alice", false, None);
        w.agents.get_mut("A1").unwrap().stamina_milli = 10;
        let target = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, target, "DIRT");
        mine_at(&mut w, target);
        system_work(&mut w, 0);
        let t = w.agents.get("A1").unwrap().work_task.clone().unwrap();
        assert_eq!(t.work_ticks, 0);
    }

    #[test]
    fn mining_too_far_or_air_fails() {
        let mut w = world();
        w.join("alice", false, None);
        let far = agent_pos(&w).offset(5, 0, 0);
        mine_at(&mut w, far);
        run_until_idle(&mut w, 2);
        let fail = events(&w, EventKind::TaskFail);
        assert_eq!(fail.last().unwrap().get_str("message"), Some("too far"));

        let air = agent_pos(&w);
        mine_at(&mut w, air);
        run_until_idle(&mut w, 2);
        let fail = events(&w, EventKind::TaskFail);
        assert_eq!(fail.last().unwrap().get_str("message"), Some("no block"));
    }

    #[test]
    fn denied_break_charges_the_vandalism_fine() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let pos = agent_pos(&w);
        let land_id = LandId::from_counter("A2", 1);
        let mut land = LandClaim::new(land_id.clone(), "A2", ClaimType::Homestead, pos, 16, 6000);
        land.fine_break_enabled = true;
        land.fine_break_item = "COAL".to_owned();
        land.fine_break_per_block = 3;
        w.claims.insert(land_id, land);
        let target = pos.offset(1, 0, 0);
        place_block(&mut w, target, "STONE");
        mine_at(&mut w, target);
        run_until_idle(&mut w, 2);

        assert_eq!(count(&w, "COAL"), 7);
        assert_eq!(inventory::count(&w.agents.get("A2").unwrap().inventory, "COAL"), 13);
        assert_eq!(events(&w, EventKind::Fine).len(), 1);
        let fail = events(&w, EventKind::TaskFail);
        assert_eq!(fail.last().unwrap().get_str("code"), Some("E_NO_PERMISSION"));
        assert!(w.block_is(target, "STONE"));
        assert_eq!(w.agents.get("A1").unwrap().rep.law, 499);
    }

    #[test]
    fn crystal_rift_pays_a_bonus_shard_and_the_drop() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w);
        w.active_event = Some(ActiveEvent {
            id: CRYSTAL_RIFT.to_owned(),
            start_tick: 0,
            ends_tick: 1000,
            center: pos,
            radius: 32,
            goals: Default::default(),
        });
        let target = pos.offset(1, 0, 0);
        place_block(&mut w, target, "CRYSTAL_ORE");
        mine_at(&mut w, target);
        run_until_idle(&mut w, 50);
        assert_eq!(count(&w, "CRYSTAL_SHARD"), 1);
        assert_eq!(events(&w, EventKind::EventGoal).len(), 1);

        let drop = w.items_at(target).remove(0);
        submit(
            &mut w,
            TaskReq {
                target_id: drop.as_str().to_owned(),
                ..task("GATHER")
            },
        );
        run_until_idle(&mut w, 2);
        assert_eq!(count(&w, "CRYSTAL_SHARD"), 2);
        assert!(w.items.is_empty());
    }

    #[test]
    fn mining_a_chest_empties_it_into_the_miner() {
        let mut w = world();
        w.join("alice", false, None);
        let chest = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, chest, "CHEST");
        inventory::add(&mut w.containers.get_mut(&chest).unwrap().inventory, "LOG", 4).unwrap();
        mine_at(&mut w, chest);
        run_until_idle(&mut w, 50);
        assert_eq!(count(&w, "LOG"), 4);
        assert!(w.containers.is_empty());
        let drop = w.items_at(chest).remove(0);
        assert_eq!(w.items.get(&drop).unwrap().item, "CHEST");
    }

    #[test]
    fn reserved_chest_cannot_be_mined() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, pos, "CONTRACT_TERMINAL");
        w.containers
            .get_mut(&pos)
            .unwrap()
            .deposit_reserved(&Inventory::from([("PLANK".to_owned(), 2)]))
            .unwrap();
        mine_at(&mut w, pos);
        run_until_idle(&mut w, 50);
        let fail = events(&w, EventKind::TaskFail);
        assert_eq!(fail.last().unwrap().get_str("message"), Some("container has reserved items"));
        assert!(w.block_is(pos, "CONTRACT_TERMINAL"));
    }

    #[test]
    fn place_checks_cell_and_consumes_the_item() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w).offset(0, 0, 1);
        let air = w.chunks.air();
        w.set_block(pos, air, "WORLD", "TEST").unwrap();
        let req = TaskReq {
            item_id: "CONVEYOR".to_owned(),
            block_pos: pos.to_array(),
            ..task("PLACE")
        };
        submit(&mut w, req.clone());
        run_until_idle(&mut w, 2);
        assert_eq!(events(&w, EventKind::TaskFail).last().unwrap().get_str("message"), Some("missing item"));

        give(&mut w, "CONVEYOR", 1);
        submit(&mut w, req.clone());
        run_until_idle(&mut w, 2);
        assert!(w.block_is(pos, "CONVEYOR"));
        assert!(w.conveyors.contains_key(&pos));
        assert_eq!(count(&w, "CONVEYOR"), 0);

        give(&mut w, "CONVEYOR", 1);
        submit(&mut w, req);
        run_until_idle(&mut w, 2);
        assert_eq!(events(&w, EventKind::TaskFail).last().unwrap().get_str("message"), Some("space occupied"));
    }

    #[test]
    fn open_chest_reports_inventory() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w).offset(2, 0, 0);
        place_block(&mut w, pos, "CHEST");
        inventory::add(&mut w.containers.get_mut(&pos).unwrap().inventory, "COAL", 2).unwrap();
        submit(
            &mut w,
            TaskReq {
                target_id: entity_id("CHEST", pos),
                ..task("OPEN")
            },
        );
        run_until_idle(&mut w, 2);
        let ev = events(&w, EventKind::Container).pop().unwrap();
        assert_eq!(ev.get_str("container_type"), Some("CHEST"));
        assert_eq!(ev.get("inventory"), Some(&json!([["COAL", 2]])));
    }

    #[test]
    fn open_ruins_chest_counts_as_event_goal() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w).offset(1, 0, 1);
        place_block(&mut w, pos, "CHEST");
        w.active_event = Some(ActiveEvent {
            id: RUINS_GATE.to_owned(),
            start_tick: 0,
            ends_tick: 500,
            center: pos,
            radius: 24,
            goals: Default::default(),
        });
        let req = TaskReq {
            target_id: entity_id("CHEST", pos),
            ..task("OPEN")
        };
        submit(&mut w, req.clone());
        run_until_idle(&mut w, 2);
        submit(&mut w, req);
        run_until_idle(&mut w, 2);
        assert_eq!(events(&w, EventKind::EventGoal).len(), 1);
        assert!(w.agents.get("A1").unwrap().fun.narrative > 0);
    }

    #[test]
    fn transfer_respects_reach_and_availability() {
        let mut w = world();
        w.join("alice", false, None);
        let pos = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, pos, "CHEST");
        let chest = entity_id("CHEST", pos);
        let deposit = TaskReq {
            src: "SELF".to_owned(),
            dst: chest.clone(),
            item_id: "PLANK".to_owned(),
            count: 5,
            ..task("TRANSFER")
        };
        submit(&mut w, deposit);
        run_until_idle(&mut w, 2);
        assert_eq!(count(&w, "PLANK"), 15);
        assert_eq!(w.containers.get(&pos).unwrap().available("PLANK"), 5);

        let withdraw = TaskReq {
            src: chest,
            dst: "SELF".to_owned(),
            item_id: "PLANK".to_owned(),
            count: 6,
            ..task("TRANSFER")
        };
        submit(&mut w, withdraw);
        run_until_idle(&mut w, 2);
        assert_eq!(
            events(&w, EventKind::TaskFail).last().unwrap().get_str("message"),
            Some("insufficient src items")
        );
    }

    #[test]
    fn craft_repeats_and_needs_a_bench_for_bench_recipes() {
        let mut w = world();
        w.join("alice", false, None);
        give(&mut w, "LOG", 2);
        submit(
            &mut w,
            TaskReq {
                recipe_id: "plank".to_owned(),
                count: 2,
                ..task("CRAFT")
            },
        );
        assert_eq!(run_until_idle(&mut w, 20), 4);
        assert_eq!(count(&w, "LOG"), 0);
        assert_eq!(count(&w, "PLANK"), 28);

        submit(
            &mut w,
            TaskReq {
                recipe_id: "chest".to_owned(),
                count: 1,
                ..task("CRAFT")
            },
        );
        run_until_idle(&mut w, 2);
        assert_eq!(
            events(&w, EventKind::TaskFail).last().unwrap().get_str("message"),
            Some("need crafting bench nearby")
        );
    }

    #[test]
    fn stations_must_be_orthogonally_adjacent() {
        let mut w = world();
        w.join("alice", false, None);
        let here = agent_pos(&w);
        let chest = TaskReq {
            recipe_id: "chest".to_owned(),
            count: 1,
            ..task("CRAFT")
        };
        place_block(&mut w, here.offset(1, 0, 1), "CRAFTING_BENCH");
        submit(&mut w, chest.clone());
        run_until_idle(&mut w, 2);
        let fail = events(&w, EventKind::TaskFail);
        assert_eq!(fail.last().unwrap().get_str("code"), Some("E_BLOCKED"));
        assert_eq!(count(&w, "CHEST"), 0);

        place_block(&mut w, here.offset(1, 0, 0), "CRAFTING_BENCH");
        submit(&mut w, chest);
        run_until_idle(&mut w, 10);
        assert_eq!(count(&w, "CHEST"), 1);
        assert_eq!(count(&w, "PLANK"), 12);
    }

    #[test]
    fn smelt_needs_a_furnace() {
        let mut w = world();
        w.join("alice", false, None);
        give(&mut w, "IRON_ORE", 1);
        let req = TaskReq {
            item_id: "IRON_ORE".to_owned(),
            count: 1,
            ..task("SMELT")
        };
        submit(&mut w, req.clone());
        run_until_idle(&mut w, 2);
        assert_eq!(
            events(&w, EventKind::TaskFail).last().unwrap().get_str("message"),
            Some("need furnace nearby")
        );
        let furnace_pos = agent_pos(&w).offset(1, 0, 0);
        place_block(&mut w, furnace_pos, "FURNACE");
        submit(&mut w, req);
        run_until_idle(&mut w, 10);
        assert_eq!(count(&w, "IRON_INGOT"), 1);
        assert_eq!(count(&w, "COAL"), 9);
    }

    #[test]
    fn to_inventory_merges_duplicates() {
        let items = vec![
            ItemCount { item: "COAL".to_owned(), count: 1 },
            ItemCount { item: "COAL".to_owned(), count: 2 },
        ];
        assert_eq!(inventory::count(&to_inventory(&items), "COAL"), 3);
    }
}
