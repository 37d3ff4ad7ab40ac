//! Contract deadlines.
//!
//! Once `now` passes a contract's deadline, an OPEN contract is canceled
//! and an ACCEPTED one fails. Either way the reward and deposit held in
//! escrow become owed to the poster at the terminal. A contract whose
//! terminal is gone is canceled at once; its escrow went with the block.

use tracing::info;
use voxelcraft_agents::agent::bump;
use voxelcraft_types::{ContractId, ContractState, Event, EventKind};

use crate::entities::Contract;
use crate::world::{WORLD_ACTOR, World};

/// RepTrade lost by an acceptor who misses the deadline.
pub const REP_CONTRACT_FAILED: i32 = -5;

/// Expire every lapsed contract.
pub fn system_contracts(w: &mut World, now: u64) {
    let ids: Vec<ContractId> = w
        .contracts
        .values()
        .filter(|c| matches!(c.state, ContractState::Open | ContractState::Accepted))
        .map(|c| c.contract_id.clone())
        .collect();
    for contract_id in ids {
        let Some(c) = w.contracts.get(&contract_id).cloned() else {
            continue;
        };
        let terminal_live = w
            .live_container(c.terminal_pos)
            .is_some_and(|t| t.kind == "CONTRACT_TERMINAL");
        if !terminal_live {
            settle(w, &c, ContractState::Canceled, "TERMINAL_MISSING", now);
        } else if now > c.deadline_tick {
            let next = if c.state == ContractState::Open {
                ContractState::Canceled
            } else {
                ContractState::Failed
            };
            settle(w, &c, next, "DEADLINE", now);
        }
    }
}

fn settle(w: &mut World, c: &Contract, next: ContractState, reason: &str, now: u64) {
    if reason != "TERMINAL_MISSING" {
        let escrow = c.escrow().unwrap_or_default();
        if let Some(term) = w.containers.get_mut(&c.terminal_pos) {
            if let Err(e) = term.reserve_as_owed(&c.poster, &escrow) {
                tracing::warn!(tick = now, contract_id = %c.contract_id, error = %e, "Contract escrow inconsistent");
            }
        }
    }
    if next == ContractState::Failed {
        if let Some(a) = c.acceptor.as_ref().and_then(|id| w.agents.get_mut(id)) {
            bump(&mut a.rep.trade, REP_CONTRACT_FAILED);
        }
    }
    if let Some(stored) = w.contracts.get_mut(&c.contract_id) {
        stored.state = next;
    }

    let action = if next == ContractState::Failed { "CONTRACT_FAIL" } else { "CONTRACT_CANCEL" };
    let entry = w
        .audit_entry(WORLD_ACTOR, action, c.terminal_pos, reason)
        .detail("contract_id", c.contract_id.as_str())
        .detail("kind", c.kind.as_str())
        .detail("poster", c.poster.as_str());
    w.audit(entry);

    let ev = Event::new(now, EventKind::Contract)
        .with("contract_id", c.contract_id.as_str())
        .with("state", next.as_str())
        .with("reason", reason);
    w.emit(c.poster.as_str(), ev.clone());
    if let Some(acceptor) = &c.acceptor {
        w.emit(acceptor.as_str(), ev);
    }
    info!(tick = now, contract_id = %c.contract_id, state = next.as_str(), reason, "Contract expired");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use voxelcraft_agents::inventory;
    use voxelcraft_types::{AgentId, ContractKind, Vec3i};

    use super::*;
    use crate::actions::tests::world;

    /// A terminal holding a posted contract's escrow.
    fn setup(state: ContractState) -> (World, Vec3i) {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let t = w.agents.get("A1").unwrap().pos.offset(1, 0, 0);
        w.set_block_named(t, "CONTRACT_TERMINAL", "A1", "TEST").unwrap();
        w.instantiate_block_meta(t, "CONTRACT_TERMINAL", 0);
        let c = Contract {
            contract_id: ContractId::from_counter(1),
            terminal_pos: t,
            poster: AgentId::from("A1"),
            acceptor: (state == ContractState::Accepted).then(|| AgentId::from("A2")),
            kind: ContractKind::Gather,
            state,
            requirements: BTreeMap::from([("STONE".to_owned(), 5)]),
            reward: BTreeMap::from([("COAL".to_owned(), 4)]),
            deposit: BTreeMap::from([("PLANK".to_owned(), 2)]),
            blueprint_id: String::new(),
            anchor: Vec3i::ZERO,
            rotation: 0,
            created_tick: 0,
            deadline_tick: 50,
        };
        let escrow = c.escrow().unwrap();
        w.containers.get_mut(&t).unwrap().deposit_reserved(&escrow).unwrap();
        w.contracts.insert(c.contract_id.clone(), c);
        (w, t)
    }

    fn state(w: &World) -> ContractState {
        w.contracts.get("C000001").unwrap().state
    }

    #[test]
    fn open_contract_is_canceled_after_the_deadline() {
        let (mut w, t) = setup(ContractState::Open);
        system_contracts(&mut w, 50);
        assert_eq!(state(&w), ContractState::Open);
        system_contracts(&mut w, 51);
        assert_eq!(state(&w), ContractState::Canceled);
        let owed = w.containers.get(&t).unwrap().owed.get("A1").unwrap();
        assert_eq!(inventory::count(owed, "COAL"), 4);
        assert_eq!(inventory::count(owed, "PLANK"), 2);
    }

    #[test]
    fn accepted_contract_fails_and_costs_the_acceptor() {
        let (mut w, t) = setup(ContractState::Accepted);
        let rep = w.agents.get("A2").unwrap().rep.trade;
        system_contracts(&mut w, 51);
        assert_eq!(state(&w), ContractState::Failed);
        assert_eq!(w.agents.get("A2").unwrap().rep.trade, rep - 5);
        assert!(w.containers.get(&t).unwrap().owed.contains_key("A1"));
        let told = w.agents.get("A2").unwrap().pending_events().iter().any(|e| {
            e.kind == EventKind::Contract && e.get_str("state") == Some("FAILED")
        });
        assert!(told);
    }

    #[test]
    fn missing_terminal_cancels_immediately() {
        let (mut w, t) = setup(ContractState::Open);
        w.set_block_named(t, "AIR", "A1", "TEST").unwrap();
        system_contracts(&mut w, 1);
        assert_eq!(state(&w), ContractState::Canceled);
        system_contracts(&mut w, 100);
        assert_eq!(state(&w), ContractState::Canceled);
    }
}
