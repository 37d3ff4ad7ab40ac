//! Chat, eating, and private memory.

use voxelcraft_agents::inventory;
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, InstantReq};
use voxelcraft_world::ItemKind;

use super::{Accepted, Outcome, Rejection, actor_pos, positive_count, rate_limit, required};
use crate::config::{RATE_MARKET_SAY, RATE_SAY, RATE_WHISPER};
use crate::world::World;

/// Manhattan range of LOCAL chat.
pub const LOCAL_CHAT_RANGE: u32 = 32;

/// SAY on LOCAL, CITY, or MARKET.
pub fn say(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    if req.text.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing text"));
    }
    let channel = match req.channel.trim().to_ascii_uppercase().as_str() {
        "" | "LOCAL" => "LOCAL",
        "CITY" => "CITY",
        "MARKET" => "MARKET",
        _ => return Err(Rejection::new(ErrorCode::BadRequest, "invalid channel")),
    };
    let pos = actor_pos(w, agent_id.as_str())?;
    let org_id = w.org_of(agent_id.as_str()).map(|o| o.org_id.clone());
    if channel == "CITY" && org_id.is_none() {
        return Err(Rejection::new(ErrorCode::NoPermission, "not in org"));
    }
    if channel == "MARKET" {
        if !w.cfg.allow_trade {
            return Err(Rejection::new(ErrorCode::NoPermission, "market disabled in this world"));
        }
        if !w.can_trade_at(agent_id.as_str(), pos) {
            return Err(Rejection::new(ErrorCode::NoPermission, "market chat not allowed here"));
        }
    }
    let kind = if channel == "MARKET" { RATE_MARKET_SAY } else { RATE_SAY };
    rate_limit(w, agent_id.as_str(), kind, now)?;

    let ev = Event::new(now, EventKind::Chat)
        .with("from", agent_id.as_str())
        .with("channel", channel)
        .with("text", req.text.as_str());
    let recipients: Vec<AgentId> = match channel {
        "LOCAL" => w
            .agents
            .values()
            .filter(|a| a.pos.manhattan(pos) <= LOCAL_CHAT_RANGE)
            .map(|a| a.id.clone())
            .collect(),
        "CITY" => org_id
            .and_then(|id| w.orgs.get(&id))
            .map(|o| o.members.keys().cloned().collect())
            .unwrap_or_default(),
        _ => w.agents.keys().cloned().collect(),
    };
    for id in recipients {
        w.emit(id.as_str(), ev.clone());
    }
    Ok(Accepted::new("ok"))
}

/// WHISPER to one agent.
pub fn whisper(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    rate_limit(w, agent_id.as_str(), RATE_WHISPER, now)?;
    if req.to.is_empty() || req.text.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing to/text"));
    }
    if !w.agents.contains_key(req.to.as_str()) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "target not found"));
    }
    let ev = Event::new(now, EventKind::Chat)
        .with("from", agent_id.as_str())
        .with("channel", "WHISPER")
        .with("text", req.text.as_str());
    w.emit(req.to.as_str(), ev);
    Ok(Accepted::new("ok"))
}

/// EAT food from the inventory.
pub fn eat(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let item_id = required(&req.item_id, "item_id")?;
    let n = positive_count(req.count.max(0), 1)?;
    let def = w
        .catalogs
        .items
        .get(item_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "unknown item"))?;
    if def.kind != ItemKind::Food || def.edible_hp <= 0 {
        return Err(Rejection::new(ErrorCode::BadRequest, "item not edible"));
    }
    let edible_hp = def.edible_hp;
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    if !inventory::has(&a.inventory, item_id, n) {
        return Err(Rejection::new(ErrorCode::NoResource, "missing food"));
    }
    inventory::remove(&mut a.inventory, item_id, n)?;
    a.eat(edible_hp, n);
    Ok(Accepted::new("ok"))
}

/// SAVE_MEMORY under the 64 KiB budget.
pub fn save_memory(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    if req.key.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing key"));
    }
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    if a.memory.over_budget(&req.key, &req.value) {
        return Err(Rejection::new(ErrorCode::NoResource, "memory budget exceeded"));
    }
    let ttl = u64::try_from(req.ttl_ticks).unwrap_or(0);
    a.memory.save(&req.key, &req.value, ttl, now);
    Ok(Accepted::new("ok"))
}

/// LOAD_MEMORY into the next OBS frame.
pub fn load_memory(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    let limit = usize::try_from(req.limit).unwrap_or(0);
    let kvs = a.memory.load(&req.prefix, limit, now);
    let n = kvs.len();
    a.pending_memory = Some(kvs);
    Ok(Accepted::new(format!("loaded {n} keys")))
}
