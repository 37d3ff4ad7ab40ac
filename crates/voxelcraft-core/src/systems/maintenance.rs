//! Daily claim upkeep.
//!
//! Each claim is charged the configured maintenance cost once per day,
//! from the owning agent's inventory or the owning org's treasury for
//! this world. A missed payment moves the claim one stage toward
//! unprotected; a successful one resets it.

use tracing::{debug, info};
use voxelcraft_agents::governance::STAGE_UNPROTECTED;
use voxelcraft_agents::inventory;
use voxelcraft_types::{AgentId, Event, EventKind, LandId};

use crate::world::{WORLD_ACTOR, World};

/// Charge every claim whose due tick has arrived.
pub fn system_maintenance(w: &mut World, now: u64) {
    let due: Vec<LandId> = w
        .claims
        .values()
        .filter(|c| c.maintenance_due_tick != 0 && now >= c.maintenance_due_tick)
        .map(|c| c.land_id.clone())
        .collect();
    for land_id in due {
        charge(w, &land_id, now);
    }
}

/// Take the cost from the owner. Returns whether it was paid.
fn collect(w: &mut World, owner: &str) -> bool {
    let cost = w.cfg.maintenance_cost.clone();
    if let Some(a) = w.agents.get_mut(owner) {
        return inventory::has_all(&a.inventory, &cost) && inventory::remove_all(&mut a.inventory, &cost).is_ok();
    }
    let world_id = w.cfg.id.clone();
    if let Some(org) = w.orgs.get_mut(owner) {
        let treasury = org.treasury_mut(&world_id);
        return inventory::has_all(treasury, &cost) && inventory::remove_all(treasury, &cost).is_ok();
    }
    false
}

/// Agents told about a charge: the owning agent or the org's admins.
fn recipients(w: &World, owner: &str) -> Vec<AgentId> {
    if w.agents.contains_key(owner) {
        return vec![AgentId::from(owner)];
    }
    w.orgs.get(owner).map_or_else(Vec::new, |org| {
        org.members
            .keys()
            .filter(|m| org.is_admin(m.as_str()))
            .cloned()
            .collect()
    })
}

fn charge(w: &mut World, land_id: &LandId, now: u64) {
    let Some(owner) = w.claims.get(land_id).map(|c| c.owner.clone()) else {
        return;
    };
    let paid = collect(w, &owner);
    let day_ticks = w.cfg.day_ticks.max(1);
    let Some(claim) = w.claims.get_mut(land_id) else {
        return;
    };
    let before = claim.maintenance_stage;
    claim.maintenance_stage = if paid {
        0
    } else {
        claim.maintenance_stage.saturating_add(1).min(STAGE_UNPROTECTED)
    };
    claim.maintenance_due_tick = now.saturating_add(day_ticks);
    let (stage, next_due) = (claim.maintenance_stage, claim.maintenance_due_tick);
    let anchor = claim.anchor;

    let status = if paid { "PAID" } else { "LATE" };
    let ev = Event::new(now, EventKind::Maintenance)
        .with("land_id", land_id.as_str())
        .with("status", status)
        .with("stage", stage)
        .with("next_due_tick", next_due);
    for agent_id in recipients(w, &owner) {
        w.emit(agent_id.as_str(), ev.clone());
    }
    let entry = w
        .audit_entry(WORLD_ACTOR, "CLAIM_MAINTENANCE", anchor, status)
        .detail("land_id", land_id.as_str())
        .detail("stage", stage);
    w.audit(entry);
    if stage != before {
        info!(tick = now, land_id = %land_id, stage, paid, "Claim maintenance stage changed");
    } else {
        debug!(tick = now, land_id = %land_id, stage, paid, "Claim maintenance charged");
    }
}
