//! Law proposals and ballots. Status transitions after proposal belong
//! to the law system.

use std::collections::BTreeMap;

use voxelcraft_agents::governance::normalize_law_params;
use voxelcraft_agents::{AgentError, Law};
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, InstantReq, LandId, LawId, LawStatus, Vec3i, VoteChoice};

use super::{Accepted, Outcome, Rejection, required};
use crate::world::{Counters, World};

fn laws_enabled(w: &World) -> Result<(), Rejection> {
    if w.cfg.allow_laws {
        Ok(())
    } else {
        Err(Rejection::new(ErrorCode::NoPermission, "laws disabled in this world"))
    }
}

/// Notice broadcast to every agent when a law changes state.
pub fn law_event(now: u64, law: &Law, what: &str) -> Event {
    Event::new(now, EventKind::Law)
        .with("law_id", law.law_id.as_str())
        .with("land_id", law.land_id.as_str())
        .with("template_id", law.template_id.as_str())
        .with("title", law.title.as_str())
        .with("status", law.status.as_str())
        .with("event", what)
}

/// PROPOSE_LAW on a land the actor belongs to.
pub fn propose_law(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    laws_enabled(w)?;
    let land_id = required(&req.land_id, "land_id")?;
    let template_id = required(&req.template_id, "template_id")?;
    let land = w
        .claims
        .get(land_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "land not found"))?;
    if !w.is_land_member(agent_id.as_str(), land) {
        return Err(Rejection::new(ErrorCode::NoPermission, "not eligible"));
    }
    let template = w
        .catalogs
        .law_templates
        .get(template_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "unknown law template"))?;

    let items = &w.catalogs.items;
    let params = normalize_law_params(template_id, &req.params, &|item: &str| items.contains_key(item))
        .map_err(|e| match e {
            AgentError::UnknownTemplate(_) => Rejection::new(ErrorCode::InvalidTarget, "unsupported template"),
            other => Rejection::new(ErrorCode::BadRequest, other.to_string()),
        })?;
    let title = match req.title.trim() {
        "" => template.title.clone(),
        t => t.to_owned(),
    };

    let notice_ends_tick = now.saturating_add(w.cfg.law_notice_ticks);
    let law = Law {
        law_id: LawId::from_counter(Counters::next(&mut w.counters.law)),
        land_id: LandId::from(land_id),
        template_id: template_id.to_owned(),
        title,
        params,
        proposed_by: agent_id.clone(),
        proposed_tick: now,
        notice_ends_tick,
        vote_ends_tick: notice_ends_tick.saturating_add(w.cfg.law_vote_ticks),
        status: LawStatus::Notice,
        votes: BTreeMap::new(),
    };
    w.broadcast(&law_event(now, &law, "PROPOSED"));
    let entry = w
        .audit_entry(agent_id.as_str(), "LAW_PROPOSE", Vec3i::ZERO, "PROPOSE_LAW")
        .detail("law_id", law.law_id.as_str())
        .detail("land_id", law.land_id.as_str())
        .detail("template_id", law.template_id.as_str())
        .detail("notice_ends_tick", law.notice_ends_tick)
        .detail("vote_ends_tick", law.vote_ends_tick);
    w.audit(entry);
    tracing::info!(tick = now, agent_id = %agent_id, law_id = %law.law_id, template = %law.template_id, "Law proposed");
    let law_id = law.law_id.clone();
    w.laws.insert(law_id.clone(), law);
    Ok(Accepted::new("ok").with("law_id", law_id.as_str()))
}

/// VOTE on a law in VOTING; a later ballot replaces an earlier one.
pub fn vote(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    laws_enabled(w)?;
    let law_id = required(&req.law_id, "law_id")?;
    let choice = required(&req.choice, "choice")?;
    let law = w
        .laws
        .get(law_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "law not found"))?;
    if law.status != LawStatus::Voting {
        return Err(Rejection::new(ErrorCode::Blocked, "law not in voting"));
    }
    let land = w
        .claims
        .get(&law.land_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "land not found"))?;
    if !w.is_land_member(agent_id.as_str(), land) {
        return Err(Rejection::new(ErrorCode::NoPermission, "not eligible to vote"));
    }
    let choice = VoteChoice::parse(choice).ok_or_else(|| Rejection::new(ErrorCode::BadRequest, "bad choice"))?;
    if let Some(law) = w.laws.get_mut(law_id) {
        law.votes.insert(agent_id.clone(), choice);
    }
    let entry = w
        .audit_entry(agent_id.as_str(), "LAW_VOTE", Vec3i::ZERO, "VOTE")
        .detail("law_id", law_id)
        .detail("choice", choice.as_str());
    w.audit(entry);
    w.fun_on_vote(agent_id, now);
    Ok(Accepted::new("ok"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use voxelcraft_agents::LandClaim;
    use voxelcraft_types::ClaimType;

    use super::super::tests::{instant, run_instant, world};
    use super::*;

    fn land(w: &mut World) -> LandId {
        let id = LandId::from_counter("A1", 1);
        let mut claim = LandClaim::new(id.clone(), "A1", ClaimType::Default, Vec3i::ZERO, 32, 6000);
        claim.members.insert(AgentId::from("A2"));
        w.claims.insert(id.clone(), claim);
        id
    }

    fn propose(land_id: &LandId, tax: serde_json::Value) -> InstantReq {
        InstantReq {
            land_id: land_id.as_str().to_owned(),
            template_id: "MARKET_TAX".to_owned(),
            params: BTreeMap::from([("market_tax".to_owned(), tax)]),
            ..instant("PROPOSE_LAW")
        }
    }

    #[test]
    fn proposal_schedules_notice_and_vote() {
        let mut w = world();
        w.join("alice", false, None);
        let land_id = land(&mut w);
        let ev = run_instant(&mut w, "A1", propose(&land_id, json!(0.05)));
        assert_eq!(ev.get_str("law_id"), Some("LAW000001"));
        let law = w.laws.get("LAW000001").unwrap();
        assert_eq!(law.status, LawStatus::Notice);
        assert_eq!(law.title, "Market Tax");
        assert_eq!(law.params.get("market_tax").map(String::as_str), Some("0.05"));
        assert_eq!(law.notice_ends_tick, w.cfg.law_notice_ticks);
        assert_eq!(law.vote_ends_tick, w.cfg.law_notice_ticks + w.cfg.law_vote_ticks);
        let notices = w.agents.get("A1").unwrap().pending_events();
        assert!(notices.iter().any(|e| e.kind == EventKind::Law && e.get_str("event") == Some("PROPOSED")));
    }

    #[test]
    fn proposal_checks_membership_template_and_params() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        w.join("carol", false, None);
        let land_id = land(&mut w);
        assert!(run_instant(&mut w, "A3", propose(&land_id, json!(0.05))).has_code(ErrorCode::NoPermission));
        assert!(run_instant(&mut w, "A2", propose(&land_id, json!("high"))).has_code(ErrorCode::BadRequest));
        let unknown = InstantReq {
            template_id: "TOLL_ROAD".to_owned(),
            ..propose(&land_id, json!(0.05))
        };
        assert!(run_instant(&mut w, "A1", unknown).has_code(ErrorCode::InvalidTarget));
        w.cfg.allow_laws = false;
        assert!(run_instant(&mut w, "A1", propose(&land_id, json!(0.05))).has_code(ErrorCode::NoPermission));
    }

    #[test]
    fn votes_only_during_voting_by_members() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        w.join("carol", false, None);
        let land_id = land(&mut w);
        run_instant(&mut w, "A1", propose(&land_id, json!(0.05)));
        let ballot = |choice: &str| InstantReq {
            law_id: "LAW000001".to_owned(),
            choice: choice.to_owned(),
            ..instant("VOTE")
        };
        assert!(run_instant(&mut w, "A2", ballot("YES")).has_code(ErrorCode::Blocked));

        w.laws.get_mut("LAW000001").unwrap().status = LawStatus::Voting;
        assert!(run_instant(&mut w, "A3", ballot("YES")).has_code(ErrorCode::NoPermission));
        assert!(run_instant(&mut w, "A2", ballot("MAYBE")).has_code(ErrorCode::BadRequest));
        run_instant(&mut w, "A2", ballot("no"));
        run_instant(&mut w, "A2", ballot("yes"));
        run_instant(&mut w, "A1", ballot("abstain"));
        let law = w.laws.get("LAW000001").unwrap();
        assert_eq!(law.tally(), (1, 0));
        assert!(law.passes());
    }
}
