//! Land administration instants. Every handler requires the actor to be
//! the claim owner or an admin of the owning org.

use voxelcraft_agents::LandClaim;
use voxelcraft_agents::governance::upgrade_cost;
use voxelcraft_agents::inventory;
use voxelcraft_types::{AgentId, ErrorCode, InstantReq, LandId, encode_item_pairs};

use super::{Accepted, Outcome, Rejection};
use crate::world::World;

/// The claim `land_id` after the admin check.
fn admin_land(w: &World, agent_id: &str, land_id: &str) -> Result<LandClaim, Rejection> {
    let land = w
        .claims
        .get(land_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "land not found"))?;
    if !w.is_land_admin(agent_id, land) {
        return Err(Rejection::new(ErrorCode::NoPermission, "not land admin"));
    }
    Ok(land.clone())
}

fn store(w: &mut World, land: LandClaim) {
    w.claims.insert(land.land_id.clone(), land);
}

/// SET_PERMISSIONS: overwrite the visitor flags named in `policy`.
pub fn set_permissions(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    if req.land_id.trim().is_empty() || req.policy.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing land_id/policy"));
    }
    let mut land = admin_land(w, agent_id.as_str(), req.land_id.trim())?;
    land.flags = land.flags.with_policy(&req.policy);
    store(w, land);
    Ok(Accepted::new("ok"))
}

/// UPGRADE_CLAIM to radius 64 or 128.
pub fn upgrade_claim(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    if req.land_id.trim().is_empty() || req.radius <= 0 {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing land_id/radius"));
    }
    let mut land = admin_land(w, agent_id.as_str(), req.land_id.trim())?;
    if land.maintenance_stage >= 1 {
        return Err(Rejection::new(
            ErrorCode::NoPermission,
            "land maintenance stage disallows expansion",
        ));
    }
    let target = req.radius;
    if !matches!(target, 64 | 128) {
        return Err(Rejection::new(ErrorCode::BadRequest, "radius must be 64 or 128"));
    }
    if target <= land.radius {
        return Err(Rejection::new(ErrorCode::BadRequest, "radius must increase"));
    }
    if !w.totem_present(&land) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "claim totem missing"));
    }
    let cost = upgrade_cost(land.radius, target)
        .ok_or_else(|| Rejection::new(ErrorCode::BadRequest, "no upgrade needed"))?;
    let affordable = w
        .agents
        .get(agent_id)
        .is_some_and(|a| inventory::has_all(&a.inventory, &cost));
    if !affordable {
        return Err(Rejection::new(ErrorCode::NoResource, "missing upgrade materials"));
    }
    if w.claim_overlaps(land.anchor, target, Some(&land.land_id)) {
        return Err(Rejection::new(ErrorCode::Conflict, "claim overlaps existing land"));
    }
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::remove_all(&mut a.inventory, &cost)?;
    }
    let from = land.radius;
    land.radius = target;
    let land_id = land.land_id.clone();
    let entry = w
        .audit_entry(agent_id.as_str(), "CLAIM_UPGRADE", land.anchor, "UPGRADE_CLAIM")
        .detail("land_id", land_id.as_str())
        .detail("from", from)
        .detail("to", target)
        .detail("cost", encode_item_pairs(&cost));
    w.audit(entry);
    store(w, land);
    tracing::info!(tick = now, agent_id = %agent_id, land_id = %land_id, from, to = target, "Claim upgraded");
    Ok(Accepted::new("upgraded")
        .with("land_id", land_id.as_str())
        .with("radius", target))
}

fn member_args(req: &InstantReq) -> Result<(&str, AgentId), Rejection> {
    let land_id = req.land_id.trim();
    let member = req.member_id.trim();
    if land_id.is_empty() || member.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing land_id/member_id"));
    }
    Ok((land_id, AgentId::from(member)))
}

/// ADD_MEMBER to the land allow-list.
pub fn add_member(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let (land_id, member) = member_args(req)?;
    let mut land = admin_land(w, agent_id.as_str(), land_id)?;
    land.members.insert(member);
    store(w, land);
    Ok(Accepted::new("ok"))
}

/// REMOVE_MEMBER from the land allow-list.
pub fn remove_member(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let (land_id, member) = member_args(req)?;
    let mut land = admin_land(w, agent_id.as_str(), land_id)?;
    land.members.remove(&member);
    store(w, land);
    Ok(Accepted::new("ok"))
}

/// DEED_LAND to another agent or an org.
pub fn deed_land(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    if req.land_id.trim().is_empty() || req.new_owner.trim().is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing land_id/new_owner"));
    }
    let mut land = admin_land(w, agent_id.as_str(), req.land_id.trim())?;
    let new_owner = req.new_owner.trim();
    if new_owner.contains(char::is_whitespace) {
        return Err(Rejection::new(ErrorCode::BadRequest, "bad new_owner"));
    }
    if !w.agents.contains_key(new_owner) && !w.orgs.contains_key(new_owner) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "new owner not found"));
    }
    let from = std::mem::replace(&mut land.owner, new_owner.to_owned());
    let land_id: LandId = land.land_id.clone();
    let entry = w
        .audit_entry(agent_id.as_str(), "CLAIM_DEED", land.anchor, "DEED_LAND")
        .detail("land_id", land_id.as_str())
        .detail("from", from.as_str())
        .detail("to", new_owner);
    w.audit(entry);
    store(w, land);
    tracing::info!(tick = now, land_id = %land_id, from = %from, to = new_owner, "Land deeded");
    Ok(Accepted::new("ok"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use voxelcraft_types::{ClaimType, Vec3i};

    use super::super::tests::{instant, run_instant, world};
    use super::*;

    fn claim_at(w: &mut World, owner: &str, anchor: Vec3i) -> LandId {
        let id = LandId::from_counter(owner, 1);
        w.set_block_named(anchor, "CLAIM_TOTEM", owner, "TEST").unwrap();
        w.claims.insert(
            id.clone(),
            LandClaim::new(id.clone(), owner, ClaimType::Default, anchor, 32, 6000),
        );
        id
    }

    fn give_upgrade_kit(w: &mut World, agent: &str) {
        let inv = &mut w.agents.get_mut(agent).unwrap().inventory;
        inventory::add(inv, "BATTERY", 3).unwrap();
        inventory::add(inv, "CRYSTAL_SHARD", 6).unwrap();
    }

    fn upgrade(w: &mut World, agent: &str, land: &LandId, radius: i32) -> voxelcraft_types::Event {
        run_instant(
            w,
            agent,
            InstantReq {
                land_id: land.as_str().to_owned(),
                radius,
                ..instant("UPGRADE_CLAIM")
            },
        )
    }

    #[test]
    fn upgrade_into_neighbour_is_a_conflict() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let mine = claim_at(&mut w, "A1", Vec3i::ZERO);
        claim_at(&mut w, "A2", Vec3i::flat(80, 0));
        give_upgrade_kit(&mut w, "A1");
        let ev = upgrade(&mut w, "A1", &mine, 64);
        assert!(ev.has_code(ErrorCode::Conflict));
        assert_eq!(w.claims.get(&mine).unwrap().radius, 32);
        assert_eq!(inventory::count(&w.agents.get("A1").unwrap().inventory, "BATTERY"), 3);
    }

    #[test]
    fn upgrade_charges_cumulative_cost() {
        let mut w = world();
        w.join("alice", false, None);
        let mine = claim_at(&mut w, "A1", Vec3i::ZERO);
        give_upgrade_kit(&mut w, "A1");
        let ev = upgrade(&mut w, "A1", &mine, 128);
        assert_eq!(ev.get_str("message"), Some("upgraded"));
        assert_eq!(w.claims.get(&mine).unwrap().radius, 128);
        let inv = &w.agents.get("A1").unwrap().inventory;
        assert_eq!(inventory::count(inv, "BATTERY"), 0);
        assert_eq!(inventory::count(inv, "CRYSTAL_SHARD"), 0);
        assert!(upgrade(&mut w, "A1", &mine, 64).has_code(ErrorCode::BadRequest));
    }

    #[test]
    fn upgrade_needs_totem_and_paid_maintenance() {
        let mut w = world();
        w.join("alice", false, None);
        let mine = claim_at(&mut w, "A1", Vec3i::ZERO);
        give_upgrade_kit(&mut w, "A1");
        w.claims.get_mut(&mine).unwrap().maintenance_stage = 1;
        assert!(upgrade(&mut w, "A1", &mine, 64).has_code(ErrorCode::NoPermission));
        w.claims.get_mut(&mine).unwrap().maintenance_stage = 0;
        w.set_block_named(Vec3i::ZERO, "AIR", "A1", "TEST").unwrap();
        assert_eq!(upgrade(&mut w, "A1", &mine, 64).get_str("message"), Some("claim totem missing"));
    }

    #[test]
    fn only_admins_manage_members_and_flags() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let mine = claim_at(&mut w, "A1", Vec3i::ZERO);
        let add = InstantReq {
            land_id: mine.as_str().to_owned(),
            member_id: "A2".to_owned(),
            ..instant("ADD_MEMBER")
        };
        assert!(run_instant(&mut w, "A2", add.clone()).has_code(ErrorCode::NoPermission));
        run_instant(&mut w, "A1", add);
        assert!(w.claims.get(&mine).unwrap().members.contains("A2"));
        assert!(w.can_build_at("A2", Vec3i::flat(3, 3), 0));

        run_instant(
            &mut w,
            "A1",
            InstantReq {
                land_id: mine.as_str().to_owned(),
                member_id: "A2".to_owned(),
                ..instant("REMOVE_MEMBER")
            },
        );
        assert!(!w.can_build_at("A2", Vec3i::flat(3, 3), 0));

        let policy = BTreeMap::from([("allow_build".to_owned(), true)]);
        run_instant(
            &mut w,
            "A1",
            InstantReq {
                land_id: mine.as_str().to_owned(),
                policy,
                ..instant("SET_PERMISSIONS")
            },
        );
        assert!(w.can_build_at("A2", Vec3i::flat(3, 3), 0));
    }

    #[test]
    fn deed_transfers_ownership() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let mine = claim_at(&mut w, "A1", Vec3i::ZERO);
        let deed = |to: &str| InstantReq {
            land_id: mine.as_str().to_owned(),
            new_owner: to.to_owned(),
            ..instant("DEED_LAND")
        };
        assert!(run_instant(&mut w, "A1", deed("A9")).has_code(ErrorCode::InvalidTarget));
        assert_eq!(run_instant(&mut w, "A1", deed("A2")).get_str("message"), Some("ok"));
        assert_eq!(w.claims.get(&mine).unwrap().owner, "A2");
        assert!(run_instant(&mut w, "A1", deed("A1")).has_code(ErrorCode::NoPermission));
    }
}
