//! Law lifecycle: NOTICE, VOTING, then ACTIVE or REJECTED.

use tracing::info;
use voxelcraft_agents::governance::apply_law;
use voxelcraft_types::{LawId, LawStatus, Vec3i};

use crate::actions::laws::law_event;
use crate::world::{WORLD_ACTOR, World};

/// Advance every law whose window closed at or before `now`.
pub fn system_laws(w: &mut World, now: u64) {
    let ids: Vec<LawId> = w.laws.keys().cloned().collect();
    for law_id in ids {
        let Some(status) = w.laws.get(&law_id).map(|l| l.status) else {
            continue;
        };
        match status {
            LawStatus::Notice => open_voting(w, &law_id, now),
            LawStatus::Voting => close_voting(w, &law_id, now),
            LawStatus::Active | LawStatus::Rejected => {}
        }
    }
}

fn open_voting(w: &mut World, law_id: &LawId, now: u64) {
    let Some(law) = w.laws.get_mut(law_id) else {
        return;
    };
    if now < law.notice_ends_tick {
        return;
    }
    law.status = LawStatus::Voting;
    let ev = law_event(now, law, "VOTING");
    w.broadcast(&ev);
    info!(tick = now, law_id = %law_id, "Law voting opened");
}

fn close_voting(w: &mut World, law_id: &LawId, now: u64) {
    let Some(law) = w.laws.get(law_id).cloned() else {
        return;
    };
    if now < law.vote_ends_tick {
        return;
    }
    let (yes, no) = law.tally();
    let (status, reason) = if !law.passes() {
        (LawStatus::Rejected, "VOTE_FAILED")
    } else {
        match w.claims.get_mut(&law.land_id) {
            Some(land) => match apply_law(land, &law.template_id, &law.params) {
                Ok(()) => (LawStatus::Active, "VOTE_PASSED"),
                Err(e) => {
                    tracing::debug!(tick = now, law_id = %law_id, error = %e, "Law could not be applied");
                    (LawStatus::Rejected, "ACTIVATE_FAILED")
                }
            },
            None => (LawStatus::Rejected, "LAND_MISSING"),
        }
    };

    let Some(law) = w.laws.get_mut(law_id) else {
        return;
    };
    law.status = status;
    let ev = law_event(now, law, status.as_str());
    let proposer = law.proposed_by.clone();
    let land_id = law.land_id.clone();
    let template_id = law.template_id.clone();

    let action = if status == LawStatus::Active { "LAW_ACTIVE" } else { "LAW_REJECTED" };
    let entry = w
        .audit_entry(WORLD_ACTOR, action, Vec3i::ZERO, reason)
        .detail("law_id", law_id.as_str())
        .detail("land_id", land_id.as_str())
        .detail("template_id", template_id.as_str())
        .detail("yes", yes)
        .detail("no", no);
    w.audit(entry);
    if status == LawStatus::Active {
        w.fun_on_law_active(&proposer, now);
    }
    w.broadcast(&ev);
    info!(tick = now, law_id = %law_id, status = status.as_str(), yes, no, reason, "Law vote closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use voxelcraft_agents::{LandClaim, Law};
    use voxelcraft_types::{AgentId, ClaimType, EventKind, LandId, VoteChoice};

    use super::*;
    use crate::actions::tests::world;

    fn setup(tax: &str) -> World {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let land_id = LandId::from_counter("A1", 1);
        let mut claim = LandClaim::new(land_id.clone(), "A1", ClaimType::Default, Vec3i::ZERO, 32, 6000);
        claim.members.insert(AgentId::from("A2"));
        w.claims.insert(land_id.clone(), claim);
        let law = Law {
            law_id: LawId::from_counter(1),
            land_id,
            template_id: "MARKET_TAX".to_owned(),
            title: "Market Tax".to_owned(),
            params: BTreeMap::from([("market_tax".to_owned(), tax.to_owned())]),
            proposed_by: AgentId::from("A1"),
            proposed_tick: 0,
            notice_ends_tick: 10,
            vote_ends_tick: 20,
            status: LawStatus::Notice,
            votes: BTreeMap::new(),
        };
        w.laws.insert(law.law_id.clone(), law);
        w
    }

    fn status(w: &World) -> LawStatus {
        w.laws.get("LAW000001").unwrap().status
    }

    #[test]
    fn notice_then_voting_then_active() {
        let mut w = setup("0.1");
        system_laws(&mut w, 9);
        assert_eq!(status(&w), LawStatus::Notice);
        system_laws(&mut w, 10);
        assert_eq!(status(&w), LawStatus::Voting);
        let voting = w.agents.get("A2").unwrap().pending_events().iter().any(|e| {
            e.kind == EventKind::Law && e.get_str("event") == Some("VOTING")
        });
        assert!(voting);

        w.laws.get_mut("LAW000001").unwrap().votes.insert(AgentId::from("A2"), VoteChoice::Yes);
        system_laws(&mut w, 19);
        assert_eq!(status(&w), LawStatus::Voting);
        system_laws(&mut w, 20);
        assert_eq!(status(&w), LawStatus::Active);
        let land = w.claims.values().next().unwrap();
        assert!((land.market_tax - 0.1).abs() < 1e-9);
        assert!(w.agents.get("A1").unwrap().fun.influence > 0);
    }

    #[test]
    fn tie_is_rejected() {
        let mut w = setup("0.1");
        system_laws(&mut w, 10);
        let law = w.laws.get_mut("LAW000001").unwrap();
        law.votes.insert(AgentId::from("A1"), VoteChoice::Yes);
        law.votes.insert(AgentId::from("A2"), VoteChoice::No);
        system_laws(&mut w, 20);
        assert_eq!(status(&w), LawStatus::Rejected);
        assert!(w.claims.values().next().unwrap().market_tax.abs() < 1e-9);
    }

    #[test]
    fn unparseable_params_reject_on_activation() {
        let mut w = setup("lots");
        system_laws(&mut w, 10);
        w.laws.get_mut("LAW000001").unwrap().votes.insert(AgentId::from("A1"), VoteChoice::Yes);
        system_laws(&mut w, 20);
        assert_eq!(status(&w), LawStatus::Rejected);
    }

    #[test]
    fn late_step_catches_up_one_phase_per_tick() {
        let mut w = setup("0.1");
        system_laws(&mut w, 50);
        assert_eq!(status(&w), LawStatus::Voting);
        system_laws(&mut w, 51);
        assert_eq!(status(&w), LawStatus::Rejected);
    }
}
