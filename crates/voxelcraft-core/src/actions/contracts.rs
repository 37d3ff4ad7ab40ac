//! Contract terminals: posting, accepting, submitting, and collecting
//! owed stacks.
//!
//! Posting moves reward plus deposit from the poster into the terminal's
//! escrow. Completion pays the reward to the acceptor and leaves the
//! deposit (and any handed-in requirements) owed to the poster, who
//! collects it with CLAIM_OWED.

use voxelcraft_agents::agent::bump;
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::tasks::normalize_rotation;
use voxelcraft_types::{
    AgentId, ContractId, ContractKind, ContractState, ErrorCode, Event, EventKind, InstantReq, Vec3i,
    encode_item_pairs,
};

use super::{Accepted, Outcome, REACH_CONTAINER, Rejection, required, within_reach};
use crate::entities::{Contract, entity_id};
use crate::world::{Counters, World};

/// RepTrade gained by completing a contract.
pub const REP_CONTRACT_COMPLETE: i32 = 2;

fn terminal_at(w: &World, terminal_id: &str) -> Result<Vec3i, Rejection> {
    w.container_pos(terminal_id)
        .filter(|p| w.block_is(*p, "CONTRACT_TERMINAL"))
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "contract terminal not found"))
}

fn lifecycle_ids<'a>(req: &'a InstantReq) -> Result<(&'a str, &'a str), Rejection> {
    let contract_id = req.contract_id.trim();
    let terminal_id = req.terminal_id.trim();
    if contract_id.is_empty() || terminal_id.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing contract_id/terminal_id"));
    }
    Ok((contract_id, terminal_id))
}

/// Resolve the contract and check the terminal, reach, and deadline.
fn contract_at_terminal(
    w: &World,
    agent_id: &str,
    contract_id: &str,
    terminal_id: &str,
    now: u64,
    state_ok: impl Fn(&Contract) -> Result<(), Rejection>,
) -> Result<Contract, Rejection> {
    let c = w
        .contracts
        .get(contract_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "contract not found"))?;
    state_ok(c)?;
    let pos = terminal_at(w, terminal_id).map_err(|_missing| Rejection::new(ErrorCode::InvalidTarget, "terminal mismatch"))?;
    if pos != c.terminal_pos {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "terminal mismatch"));
    }
    within_reach(w, agent_id, pos, REACH_CONTAINER)?;
    if now > c.deadline_tick {
        return Err(Rejection::new(ErrorCode::Conflict, "contract expired"));
    }
    Ok(c.clone())
}

fn internal(e: impl std::fmt::Display) -> Rejection {
    Rejection::new(ErrorCode::Internal, e.to_string())
}

/// Deadline from an explicit tick, a duration, or one day.
pub fn contract_deadline(now: u64, deadline_tick: u64, duration_ticks: i64, day_ticks: u64) -> u64 {
    if deadline_tick > now {
        return deadline_tick;
    }
    match u64::try_from(duration_ticks) {
        Ok(d) if d > 0 => now.saturating_add(d),
        _ => now.saturating_add(day_ticks),
    }
}

/// POST_CONTRACT at a terminal in reach.
pub fn post_contract(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let terminal_id = required(&req.terminal_id, "terminal_id")?;
    let pos = terminal_at(w, terminal_id)?;
    within_reach(w, agent_id.as_str(), pos, REACH_CONTAINER)?;
    let kind = ContractKind::parse(&req.contract_kind)
        .ok_or_else(|| Rejection::new(ErrorCode::BadRequest, "bad contract_kind"))?;
    let bad = |what: &str| Rejection::new(ErrorCode::BadRequest, format!("bad {what}"));
    let requirements = inventory::parse_stacks(&req.requirements).map_err(|_e| bad("requirements"))?;
    let reward = inventory::parse_stacks(&req.reward).map_err(|_e| bad("reward"))?;
    let deposit = inventory::parse_stacks(&req.deposit).map_err(|_e| bad("deposit"))?;
    if reward.is_empty() {
        return Err(bad("reward"));
    }
    if kind != ContractKind::Build && requirements.is_empty() {
        return Err(bad("requirements"));
    }
    let blueprint_id = req.blueprint_id.trim();
    if kind == ContractKind::Build {
        if blueprint_id.is_empty() {
            return Err(Rejection::new(ErrorCode::BadRequest, "missing blueprint_id"));
        }
        if !w.catalogs.blueprints.contains_key(blueprint_id) {
            return Err(Rejection::new(ErrorCode::InvalidTarget, "unknown blueprint"));
        }
    }

    let mut escrow = reward.clone();
    inventory::add_all(&mut escrow, &deposit)?;
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    if !inventory::has_all(&a.inventory, &escrow) {
        return Err(Rejection::new(ErrorCode::NoResource, "insufficient reward items"));
    }
    inventory::remove_all(&mut a.inventory, &escrow)?;
    if let Some(term) = w.containers.get_mut(&pos) {
        term.deposit_reserved(&escrow)?;
    }

    let contract_id = ContractId::from_counter(Counters::next(&mut w.counters.contract));
    let deadline_tick = contract_deadline(now, req.deadline_tick, req.duration_ticks, w.cfg.day_ticks);
    let (blueprint_id, anchor, rotation) = if kind == ContractKind::Build {
        (
            blueprint_id.to_owned(),
            Vec3i::new(req.anchor[0], req.anchor[1], req.anchor[2]),
            normalize_rotation(req.rotation),
        )
    } else {
        (String::new(), Vec3i::ZERO, 0)
    };
    let contract = Contract {
        contract_id: contract_id.clone(),
        terminal_pos: pos,
        poster: agent_id.clone(),
        acceptor: None,
        kind,
        state: ContractState::Open,
        requirements,
        reward,
        deposit,
        blueprint_id,
        anchor,
        rotation,
        created_tick: now,
        deadline_tick,
    };
    let entry = w
        .audit_entry(agent_id.as_str(), "CONTRACT_POST", pos, "POST_CONTRACT")
        .detail("contract_id", contract_id.as_str())
        .detail("terminal_id", entity_id("CONTRACT_TERMINAL", pos))
        .detail("kind", kind.as_str())
        .detail("requirements", encode_item_pairs(&contract.requirements))
        .detail("reward", encode_item_pairs(&contract.reward))
        .detail("deposit", encode_item_pairs(&contract.deposit))
        .detail("deadline_tick", deadline_tick);
    w.audit(entry);
    w.contracts.insert(contract_id.clone(), contract);
    tracing::debug!(tick = now, agent_id = %agent_id, contract_id = %contract_id, kind = kind.as_str(), "Contract posted");
    Ok(Accepted::new("posted").with("contract_id", contract_id.as_str()))
}

/// ACCEPT_CONTRACT: take an open contract at its terminal.
pub fn accept_contract(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let (contract_id, terminal_id) = lifecycle_ids(req)?;
    let c = contract_at_terminal(w, agent_id.as_str(), contract_id, terminal_id, now, |c| {
        if c.state == ContractState::Open {
            Ok(())
        } else {
            Err(Rejection::new(ErrorCode::Conflict, "contract not open"))
        }
    })?;
    if c.poster == *agent_id {
        return Err(Rejection::new(ErrorCode::Conflict, "cannot accept own contract"));
    }
    if let Some(stored) = w.contracts.get_mut(&c.contract_id) {
        stored.acceptor = Some(agent_id.clone());
        stored.state = ContractState::Accepted;
    }
    let entry = w
        .audit_entry(agent_id.as_str(), "CONTRACT_ACCEPT", c.terminal_pos, "ACCEPT_CONTRACT")
        .detail("contract_id", c.contract_id.as_str())
        .detail("kind", c.kind.as_str())
        .detail("poster", c.poster.as_str())
        .detail("acceptor", agent_id.as_str());
    w.audit(entry);
    let ev = Event::new(now, EventKind::Contract)
        .with("contract_id", c.contract_id.as_str())
        .with("state", ContractState::Accepted.as_str())
        .with("acceptor", agent_id.as_str());
    w.emit(c.poster.as_str(), ev);
    Ok(Accepted::new("accepted"))
}

/// Whether the acceptor has met the contract's terms.
fn requirements_met(w: &World, c: &Contract) -> bool {
    match c.kind {
        ContractKind::Gather | ContractKind::Deliver => w
            .live_container(c.terminal_pos)
            .is_some_and(|t| t.has_available(&c.requirements)),
        ContractKind::Build => {
            w.blueprint_placed(&c.blueprint_id, c.anchor, c.rotation)
                && w.blueprint_stable(&c.blueprint_id, c.anchor, c.rotation)
        }
    }
}

/// SUBMIT_CONTRACT: settle an accepted contract.
pub fn submit_contract(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    let (contract_id, terminal_id) = lifecycle_ids(req)?;
    let c = contract_at_terminal(w, agent_id.as_str(), contract_id, terminal_id, now, |c| {
        if c.state == ContractState::Accepted && c.acceptor.as_ref() == Some(agent_id) {
            Ok(())
        } else {
            Err(Rejection::new(ErrorCode::NoPermission, "not acceptor"))
        }
    })?;
    if !requirements_met(w, &c) {
        return Err(Rejection::new(ErrorCode::Blocked, "requirements not met"));
    }

    let mut term = w
        .containers
        .get(&c.terminal_pos)
        .cloned()
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "terminal mismatch"))?;
    if c.kind != ContractKind::Build {
        for (item, n) in &c.requirements {
            term.take_available(item, *n)?;
        }
        term.deposit_reserved(&c.requirements)?;
        term.reserve_as_owed(&c.poster, &c.requirements)?;
    }
    term.withdraw_reserved(&c.reward).map_err(internal)?;
    term.reserve_as_owed(&c.poster, &c.deposit).map_err(internal)?;
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    let mut inv = a.inventory.clone();
    inventory::add_all(&mut inv, &c.reward)?;
    a.inventory = inv;
    bump(&mut a.rep.trade, REP_CONTRACT_COMPLETE);
    if c.kind == ContractKind::Build {
        bump(&mut a.rep.build, REP_CONTRACT_COMPLETE);
    }
    w.containers.insert(c.terminal_pos, term);
    if let Some(stored) = w.contracts.get_mut(&c.contract_id) {
        stored.state = ContractState::Completed;
    }

    let entry = w
        .audit_entry(agent_id.as_str(), "CONTRACT_COMPLETE", c.terminal_pos, "SUBMIT_CONTRACT")
        .detail("contract_id", c.contract_id.as_str())
        .detail("kind", c.kind.as_str())
        .detail("poster", c.poster.as_str())
        .detail("acceptor", agent_id.as_str());
    w.audit(entry);
    w.fun_on_contract_complete(agent_id, c.kind.as_str(), now);
    let ev = Event::new(now, EventKind::Contract)
        .with("contract_id", c.contract_id.as_str())
        .with("state", ContractState::Completed.as_str())
        .with("acceptor", agent_id.as_str());
    w.emit(c.poster.as_str(), ev);
    tracing::debug!(tick = now, agent_id = %agent_id, contract_id = %c.contract_id, "Contract completed");
    Ok(Accepted::new("completed"))
}

/// CLAIM_OWED: collect stacks owed at a terminal.
pub fn claim_owed(w: &mut World, agent_id: &AgentId, req: &InstantReq, _now: u64) -> Outcome {
    let terminal_id = required(&req.terminal_id, "terminal_id")?;
    let pos = w
        .container_pos(terminal_id)
        .filter(|p| w.block_is(*p, "CONTRACT_TERMINAL"))
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "terminal not found"))?;
    within_reach(w, agent_id.as_str(), pos, REACH_CONTAINER)?;
    let mut term = w
        .containers
        .get(&pos)
        .cloned()
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "terminal not found"))?;
    let owed: Inventory = term
        .take_owed(agent_id.as_str())
        .ok_or_else(|| Rejection::new(ErrorCode::NoResource, "nothing owed"))?;
    term.withdraw_reserved(&owed).map_err(internal)?;
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    inventory::add_all(&mut a.inventory, &owed)?;
    w.containers.insert(pos, term);
    let entry = w
        .audit_entry(agent_id.as_str(), "CONTRACT_CLAIM_OWED", pos, "CLAIM_OWED")
        .detail("items", encode_item_pairs(&owed));
    w.audit(entry);
    Ok(Accepted::new("claimed"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_types::ItemStack;

    use super::super::tests::{instant, run_instant, world};
    use super::*;

    fn stack(item: &str, count: i64) -> ItemStack {
        ItemStack {
            item: item.to_owned(),
            count,
        }
    }

    fn give(w: &mut World, agent: &str, item: &str, n: u32) {
        inventory::add(&mut w.agents.get_mut(agent).unwrap().inventory, item, n).unwrap();
    }

    fn count(w: &World, agent: &str, item: &str) -> u32 {
        inventory::count(&w.agents.get(agent).unwrap().inventory, item)
    }

    /// A1 and A2 next to a terminal; returns the terminal id.
    fn setup() -> (World, String) {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let p = w.agents.get("A1").unwrap().pos;
        w.agents.get_mut("A2").unwrap().pos = p;
        let t = p.offset(1, 0, 0);
        w.set_block_named(t, "CONTRACT_TERMINAL", "A1", "TEST").unwrap();
        w.instantiate_block_meta(t, "CONTRACT_TERMINAL", 0);
        (w, entity_id("CONTRACT_TERMINAL", t))
    }

    fn post(w: &mut World, terminal: &str) -> Event {
        run_instant(
            w,
            "A1",
            InstantReq {
                terminal_id: terminal.to_owned(),
                contract_kind: "gather".to_owned(),
                requirements: vec![stack("STONE", 5)],
                reward: vec![stack("COAL", 4)],
                deposit: vec![stack("PLANK", 2)],
                duration_ticks: 100,
                ..instant("POST_CONTRACT")
            },
        )
    }

    fn lifecycle(w: &mut World, agent: &str, kind: &str, terminal: &str) -> Event {
        run_instant(
            w,
            agent,
            InstantReq {
                contract_id: "C000001".to_owned(),
                terminal_id: terminal.to_owned(),
                ..instant(kind)
            },
        )
    }

    #[test]
    fn posting_escrows_reward_and_deposit() {
        let (mut w, terminal) = setup();
        let ev = post(&mut w, &terminal);
        assert_eq!(ev.get_str("contract_id"), Some("C000001"));
        assert_eq!(count(&w, "A1", "COAL"), 6);
        assert_eq!(count(&w, "A1", "PLANK"), 18);
        let term = w.containers.values().next().unwrap();
        assert_eq!(inventory::count(&term.reserved, "COAL"), 4);
        assert_eq!(inventory::count(&term.reserved, "PLANK"), 2);
        assert_eq!(term.available("COAL"), 0);
        let c = w.contracts.values().next().unwrap();
        assert_eq!(c.deadline_tick, 100);
        assert_eq!(c.state, ContractState::Open);
    }

    #[test]
    fn full_gather_lifecycle_pays_out_and_owes_poster() {
        let (mut w, terminal) = setup();
        post(&mut w, &terminal);
        assert!(lifecycle(&mut w, "A1", "ACCEPT_CONTRACT", &terminal).has_code(ErrorCode::Conflict));
        assert_eq!(lifecycle(&mut w, "A2", "ACCEPT_CONTRACT", &terminal).get_str("message"), Some("accepted"));
        assert!(lifecycle(&mut w, "A2", "SUBMIT_CONTRACT", &terminal).has_code(ErrorCode::Blocked));

        let pos = w.containers.keys().next().copied().unwrap();
        inventory::add(&mut w.containers.get_mut(&pos).unwrap().inventory, "STONE", 5).unwrap();
        let ev = lifecycle(&mut w, "A2", "SUBMIT_CONTRACT", &terminal);
        assert_eq!(ev.get_str("message"), Some("completed"));
        assert_eq!(count(&w, "A2", "COAL"), 14);
        assert_eq!(w.agents.get("A2").unwrap().rep.trade, 502);

        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                terminal_id: terminal.clone(),
                ..instant("CLAIM_OWED")
            },
        );
        assert_eq!(ev.get_str("message"), Some("claimed"));
        assert_eq!(count(&w, "A1", "PLANK"), 20);
        assert_eq!(count(&w, "A1", "STONE"), 25);
        let term = w.containers.get(&pos).unwrap();
        assert!(term.is_empty());
        assert!(term.reserved.values().all(|n| *n == 0));
    }

    #[test]
    fn only_the_acceptor_may_submit() {
        let (mut w, terminal) = setup();
        post(&mut w, &terminal);
        lifecycle(&mut w, "A2", "ACCEPT_CONTRACT", &terminal);
        let ev = lifecycle(&mut w, "A1", "SUBMIT_CONTRACT", &terminal);
        assert!(ev.has_code(ErrorCode::NoPermission));
    }

    #[test]
    fn posting_requires_resources_and_terminal() {
        let (mut w, terminal) = setup();
        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                terminal_id: terminal.clone(),
                contract_kind: "GATHER".to_owned(),
                requirements: vec![stack("STONE", 1)],
                reward: vec![stack("IRON_INGOT", 1)],
                ..instant("POST_CONTRACT")
            },
        );
        assert!(ev.has_code(ErrorCode::NoResource));
        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                terminal_id: "CONTRACT_TERMINAL@900,0,900".to_owned(),
                contract_kind: "GATHER".to_owned(),
                ..instant("POST_CONTRACT")
            },
        );
        assert!(ev.has_code(ErrorCode::InvalidTarget));
        give(&mut w, "A1", "IRON_INGOT", 1);
        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                terminal_id: terminal,
                contract_kind: "PAINT".to_owned(),
                ..instant("POST_CONTRACT")
            },
        );
        assert_eq!(ev.get_str("message"), Some("bad contract_kind"));
    }

    #[test]
    fn nothing_owed_is_reported() {
        let (mut w, terminal) = setup();
        let ev = run_instant(
            &mut w,
            "A2",
            InstantReq {
                terminal_id: terminal,
                ..instant("CLAIM_OWED")
            },
        );
        assert!(ev.has_code(ErrorCode::NoResource));
    }

    #[test]
    fn deadline_defaults() {
        assert_eq!(contract_deadline(10, 50, 0, 6000), 50);
        assert_eq!(contract_deadline(10, 5, 20, 6000), 30);
        assert_eq!(contract_deadline(10, 0, 0, 6000), 6010);
    }
}
