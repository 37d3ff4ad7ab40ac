//! Organizations: founding, membership, and the per-world treasury.

use voxelcraft_agents::inventory;
use voxelcraft_agents::orgs::{normalize_org_name, valid_org_name};
use voxelcraft_agents::{LeaveOutcome, Organization};
use voxelcraft_types::{AgentId, ErrorCode, InstantReq, OrgId, OrgKind, Vec3i};

use super::{Accepted, Outcome, Rejection};
use crate::world::{Counters, World};

fn current_org(w: &World, agent_id: &AgentId) -> Option<OrgId> {
    w.agents.get(agent_id).and_then(|a| a.org_id.clone())
}

fn audit_org(w: &World, actor: &str, action: &str, org_id: &OrgId) -> crate::audit::AuditEntry {
    w.audit_entry(actor, action, Vec3i::ZERO, action)
        .detail("org_id", org_id.as_str())
}

/// CREATE_ORG with the actor as LEADER.
pub fn create_org(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let kind = OrgKind::parse(&req.org_kind).ok_or_else(|| Rejection::new(ErrorCode::BadRequest, "bad org_kind"))?;
    if !valid_org_name(&req.org_name) {
        return Err(Rejection::new(ErrorCode::BadRequest, "bad org_name"));
    }
    let name = normalize_org_name(&req.org_name);
    if current_org(w, agent_id).is_some() {
        return Err(Rejection::new(ErrorCode::Conflict, "already in org"));
    }
    let mut org_id = OrgId::from_counter(Counters::next(&mut w.counters.org));
    while w.orgs.contains_key(&org_id) {
        org_id = OrgId::from_counter(Counters::next(&mut w.counters.org));
    }
    w.orgs.insert(
        org_id.clone(),
        Organization::found(org_id.clone(), kind, &name, agent_id.clone(), now),
    );
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.org_id = Some(org_id.clone());
    }
    let entry = audit_org(w, agent_id.as_str(), "ORG_CREATE", &org_id)
        .detail("org_kind", kind.as_str())
        .detail("org_name", name.as_str())
        .detail("leader", agent_id.as_str());
    w.audit(entry);
    tracing::info!(tick = now, agent_id = %agent_id, org_id = %org_id, kind = kind.as_str(), "Org created");
    Ok(Accepted::new("ok").with("org_id", org_id.as_str()))
}

/// JOIN_ORG as a plain member.
pub fn join_org(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let org_id = req.org_id.trim();
    if org_id.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing org_id"));
    }
    if !w.orgs.contains_key(org_id) {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "org not found"));
    }
    if current_org(w, agent_id).is_some() {
        return Err(Rejection::new(ErrorCode::Conflict, "already in org"));
    }
    let Some(org) = w.orgs.get_mut(org_id) else {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "org not found"));
    };
    org.join(agent_id.clone());
    let (org_id, kind) = (org.org_id.clone(), org.kind);
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.org_id = Some(org_id.clone());
    }
    let entry = audit_org(w, agent_id.as_str(), "ORG_JOIN", &org_id)
        .detail("member", agent_id.as_str())
        .detail("org_kind", kind.as_str());
    w.audit(entry);
    Ok(Accepted::new("ok"))
}

fn treasury_args(req: &InstantReq) -> Result<(&str, &str, u32), Rejection> {
    let org_id = req.org_id.trim();
    let item = req.item_id.trim();
    let count = u32::try_from(req.count).ok().filter(|n| *n > 0);
    match count {
        Some(n) if !org_id.is_empty() && !item.is_empty() => Ok((org_id, item, n)),
        _ => Err(Rejection::new(ErrorCode::BadRequest, "missing org_id/item_id/count")),
    }
}

/// ORG_DEPOSIT into this world's treasury bucket.
pub fn org_deposit(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let (org_id, item, n) = treasury_args(req)?;
    let org = w
        .orgs
        .get(org_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "org not found"))?;
    if !org.is_member(agent_id.as_str()) {
        return Err(Rejection::new(ErrorCode::NoPermission, "not org member"));
    }
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    if !inventory::has(&a.inventory, item, n) {
        return Err(Rejection::new(ErrorCode::NoResource, "missing items"));
    }
    inventory::remove(&mut a.inventory, item, n)?;
    let world_id = w.cfg.id.clone();
    if let Some(org) = w.orgs.get_mut(org_id) {
        inventory::add(org.treasury_mut(&world_id), item, n)?;
    }
    let entry = audit_org(w, agent_id.as_str(), "ORG_DEPOSIT", &OrgId::from(org_id))
        .detail("item", item)
        .detail("count", n);
    w.audit(entry);
    Ok(Accepted::new("ok"))
}

/// ORG_WITHDRAW from this world's treasury bucket; officers and leaders
/// only.
pub fn org_withdraw(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let (org_id, item, n) = treasury_args(req)?;
    let world_id = w.cfg.id.clone();
    let org = w
        .orgs
        .get_mut(org_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "org not found"))?;
    if !org.is_admin(agent_id.as_str()) {
        return Err(Rejection::new(ErrorCode::NoPermission, "not org admin"));
    }
    let treasury = org.treasury_mut(&world_id);
    if !inventory::has(treasury, item, n) {
        return Err(Rejection::new(ErrorCode::NoResource, "treasury lacks items"));
    }
    inventory::remove(treasury, item, n)?;
    if let Some(a) = w.agents.get_mut(agent_id) {
        inventory::add(&mut a.inventory, item, n)?;
    }
    let entry = audit_org(w, agent_id.as_str(), "ORG_WITHDRAW", &OrgId::from(org_id))
        .detail("item", item)
        .detail("count", n);
    w.audit(entry);
    Ok(Accepted::new("ok"))
}

/// LEAVE_ORG; an emptied org is deleted.
pub fn leave_org(w: &mut World, agent_id: &AgentId, _req: &InstantReq, now: u64) -> Outcome {
    let org_id = current_org(w, agent_id).ok_or_else(|| Rejection::new(ErrorCode::Blocked, "not in org"))?;
    if let Some(a) = w.agents.get_mut(agent_id) {
        a.org_id = None;
    }
    let outcome = w
        .orgs
        .get_mut(&org_id)
        .map_or(LeaveOutcome::NotMember, |o| o.leave(agent_id.as_str()));
    match &outcome {
        LeaveOutcome::Emptied => {
            w.orgs.remove(&org_id);
            tracing::info!(tick = now, org_id = %org_id, "Org dissolved");
        }
        LeaveOutcome::LeaderPassed(next) => {
            tracing::debug!(tick = now, org_id = %org_id, leader = %next, "Org leadership passed");
        }
        LeaveOutcome::Left | LeaveOutcome::NotMember => {}
    }
    if outcome != LeaveOutcome::NotMember {
        let entry = audit_org(w, agent_id.as_str(), "ORG_LEAVE", &org_id).detail("member", agent_id.as_str());
        w.audit(entry);
    }
    Ok(Accepted::new("ok"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_types::OrgRole;

    use super::super::tests::{instant, run_instant, world};
    use super::*;

    fn create(w: &mut World, agent: &str) -> voxelcraft_types::Event {
        run_instant(
            w,
            agent,
            InstantReq {
                org_kind: "city".to_owned(),
                org_name: "  River   Town ".to_owned(),
                ..instant("CREATE_ORG")
            },
        )
    }

    fn join(w: &mut World, agent: &str) {
        run_instant(
            w,
            agent,
            InstantReq {
                org_id: "ORG000001".to_owned(),
                ..instant("JOIN_ORG")
            },
        );
    }

    #[test]
    fn create_and_join() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let ev = create(&mut w, "A1");
        assert_eq!(ev.get_str("org_id"), Some("ORG000001"));
        assert!(create(&mut w, "A1").has_code(ErrorCode::Conflict));
        join(&mut w, "A2");
        let org = w.orgs.get("ORG000001").unwrap();
        assert_eq!(org.name, "River Town");
        assert_eq!(org.kind, OrgKind::City);
        assert_eq!(org.meta_version, 2);
        assert_eq!(org.members.get("A2"), Some(&OrgRole::Member));
        assert_eq!(w.agents.get("A2").unwrap().org_id.as_ref().map(OrgId::as_str), Some("ORG000001"));
    }

    #[test]
    fn founding_never_reuses_an_upserted_org_id() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let remote = Organization::found(OrgId::from_counter(1), OrgKind::Guild, "Masons", AgentId::from("A2"), 0);
        w.org_meta_upsert(vec![crate::transfer::OrgTransfer::of(&remote)]);
        assert_eq!(w.counters.org, 1);

        let ev = create(&mut w, "A1");
        assert_eq!(ev.get_str("org_id"), Some("ORG000002"));
        let kept = w.orgs.get("ORG000001").unwrap();
        assert_eq!(kept.name, "Masons");
        assert!(kept.is_member("A2"));
        assert!(!kept.is_member("A1"));
        assert_eq!(w.agents.get("A2").unwrap().org_id.as_ref().map(OrgId::as_str), Some("ORG000001"));
    }

    #[test]
    fn founding_skips_ids_already_taken() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let org_id = OrgId::from_counter(1);
        w.orgs.insert(
            org_id.clone(),
            Organization::found(org_id, OrgKind::Guild, "Masons", AgentId::from("A2"), 0),
        );
        assert_eq!(create(&mut w, "A1").get_str("org_id"), Some("ORG000002"));
        assert_eq!(w.orgs.len(), 2);
    }

    #[test]
    fn treasury_is_per_world_and_withdraw_needs_admin() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        create(&mut w, "A1");
        join(&mut w, "A2");
        let deposit = InstantReq {
            org_id: "ORG000001".to_owned(),
            item_id: "COAL".to_owned(),
            count: 4,
            ..instant("ORG_DEPOSIT")
        };
        assert_eq!(run_instant(&mut w, "A2", deposit).get_str("message"), Some("ok"));
        let world_id = w.cfg.id.clone();
        assert_eq!(inventory::count(w.orgs.get("ORG000001").unwrap().treasury(&world_id), "COAL"), 4);

        let withdraw = InstantReq {
            org_id: "ORG000001".to_owned(),
            item_id: "COAL".to_owned(),
            count: 3,
            ..instant("ORG_WITHDRAW")
        };
        assert!(run_instant(&mut w, "A2", withdraw.clone()).has_code(ErrorCode::NoPermission));
        run_instant(&mut w, "A1", withdraw.clone());
        assert_eq!(inventory::count(&w.agents.get("A1").unwrap().inventory, "COAL"), 13);
        assert!(run_instant(&mut w, "A1", withdraw).has_code(ErrorCode::NoResource));
    }

    #[test]
    fn leader_leaving_passes_leadership_and_last_member_dissolves() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        create(&mut w, "A1");
        join(&mut w, "A2");
        run_instant(&mut w, "A1", instant("LEAVE_ORG"));
        let org = w.orgs.get("ORG000001").unwrap();
        assert_eq!(org.members.get("A2"), Some(&OrgRole::Leader));
        assert!(w.agents.get("A1").unwrap().org_id.is_none());
        run_instant(&mut w, "A2", instant("LEAVE_ORG"));
        assert!(w.orgs.is_empty());
        assert!(run_instant(&mut w, "A2", instant("LEAVE_ORG")).has_code(ErrorCode::Blocked));
    }
}
