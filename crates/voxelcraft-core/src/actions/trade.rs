//! Trade offers, settlement with market tax, and declines.

use voxelcraft_agents::agent::bump;
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::trade::{tax_for, transfer_with_tax, valuate};
use voxelcraft_agents::Trade;
use voxelcraft_types::{AgentId, ErrorCode, Event, EventKind, FunDim, InstantReq, TradeId, Vec3i, encode_item_pairs};

use super::{Accepted, Outcome, Rejection, actor_pos, rate_limit};
use crate::config::RATE_OFFER_TRADE;
use crate::world::{Counters, World};

/// Event during which market tax is halved and trades count as goals.
pub const MARKET_WEEK: &str = "MARKET_WEEK";

fn trade_enabled(w: &World) -> Result<(), Rejection> {
    if !w.cfg.allow_trade {
        return Err(Rejection::new(ErrorCode::NoPermission, "trade disabled in this world"));
    }
    Ok(())
}

/// OFFER_TRADE to another agent.
pub fn offer_trade(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    trade_enabled(w)?;
    rate_limit(w, agent_id.as_str(), RATE_OFFER_TRADE, now)?;
    let pos = actor_pos(w, agent_id.as_str())?;
    if !w.can_trade_at(agent_id.as_str(), pos) {
        return Err(Rejection::new(ErrorCode::NoPermission, "trade not allowed here"));
    }
    if req.to.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing to"));
    }
    let Some(to) = w.agents.get(req.to.as_str()).map(|a| a.id.clone()) else {
        return Err(Rejection::new(ErrorCode::InvalidTarget, "target not found"));
    };
    let offer = inventory::parse_item_pairs(&req.offer)
        .map_err(|_bad| Rejection::new(ErrorCode::BadRequest, "bad offer"))?;
    let request = inventory::parse_item_pairs(&req.request)
        .map_err(|_bad| Rejection::new(ErrorCode::BadRequest, "bad request"))?;

    let trade_id = TradeId::from_counter(Counters::next(&mut w.counters.trade));
    let ev = Event::new(now, EventKind::TradeOffer)
        .with("trade_id", trade_id.as_str())
        .with("from", agent_id.as_str())
        .with("offer", encode_item_pairs(&offer))
        .with("request", encode_item_pairs(&request));
    w.trades.insert(
        trade_id.clone(),
        Trade {
            trade_id: trade_id.clone(),
            from: agent_id.clone(),
            to: to.clone(),
            offer,
            request,
            created_tick: now,
        },
    );
    w.emit(to.as_str(), ev);
    Ok(Accepted::new("").with("trade_id", trade_id.as_str()))
}

fn pending_trade_for<'a>(w: &'a World, agent_id: &AgentId, req: &InstantReq) -> Result<&'a Trade, Rejection> {
    if req.trade_id.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, "missing trade_id"));
    }
    let tr = w
        .trades
        .get(req.trade_id.as_str())
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "trade not found"))?;
    if tr.to != *agent_id {
        return Err(Rejection::new(ErrorCode::NoPermission, "not your trade"));
    }
    Ok(tr)
}

/// Where market tax on a trade inside `land` is paid.
enum TaxSink {
    Agent(AgentId),
    Org(String),
}

/// ACCEPT_TRADE: settle both sides atomically.
pub fn accept_trade(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    trade_enabled(w)?;
    let tr = pending_trade_for(w, agent_id, req)?.clone();
    let Some(from_pos) = w.agents.get(&tr.from).map(|a| a.pos) else {
        w.trades.remove(&tr.trade_id);
        return Err(Rejection::new(ErrorCode::InvalidTarget, "trader offline"));
    };
    let to_pos = actor_pos(w, agent_id.as_str())?;
    let (land_from, perms_from) = w.permissions_for(tr.from.as_str(), from_pos);
    let (land_to, perms_to) = w.permissions_for(agent_id.as_str(), to_pos);
    if !perms_from.can_trade || !perms_to.can_trade {
        return Err(Rejection::new(ErrorCode::NoPermission, "trade not allowed here"));
    }
    // Tax follows the offerer's land; both parties must stand on land.
    let (tax_land, same_land) = match (land_from, land_to) {
        (Some(a), Some(b)) if a.market_tax > 0.0 => (Some(a.clone()), a.land_id == b.land_id),
        _ => (None, false),
    };
    let can_pay = w.agents.get(&tr.from).is_some_and(|a| inventory::has_all(&a.inventory, &tr.offer))
        && w.agents.get(agent_id).is_some_and(|a| inventory::has_all(&a.inventory, &tr.request));
    if !can_pay {
        return Err(Rejection::new(ErrorCode::NoResource, "missing items"));
    }

    let market_week = w.live_event().is_some_and(|e| e.id == MARKET_WEEK);
    let tax_rate = effective_market_tax(tax_land.as_ref().map_or(0.0, |l| l.market_tax), same_land, market_week);
    let sink = tax_land.as_ref().and_then(|l| {
        if w.agents.contains_key(l.owner.as_str()) {
            Some(TaxSink::Agent(AgentId::from(l.owner.as_str())))
        } else if w.orgs.contains_key(l.owner.as_str()) {
            Some(TaxSink::Org(l.owner.clone()))
        } else {
            None
        }
    });

    settle(w, &tr, sink.as_ref(), tax_rate)?;
    w.trades.remove(&tr.trade_id);

    let val = valuate(&tr.offer, &tr.request);
    let entry = w
        .audit_entry(agent_id.as_str(), "TRADE", Vec3i::ZERO, "ACCEPT_TRADE")
        .detail("trade_id", tr.trade_id.as_str())
        .detail("from", tr.from.as_str())
        .detail("to", tr.to.as_str())
        .detail("offer", encode_item_pairs(&tr.offer))
        .detail("request", encode_item_pairs(&tr.request))
        .detail("value_offer", val.value_offer)
        .detail("value_request", val.value_request)
        .detail("mutual_benefit", val.mutual)
        .detail("tax_rate", tax_rate)
        .detail("tax_paid_off", encode_item_pairs(&tax_for(&tr.offer, tax_rate)))
        .detail("tax_paid_req", encode_item_pairs(&tax_for(&tr.request, tax_rate)))
        .detail("land_id", tax_land.as_ref().map_or("", |l| l.land_id.as_str()))
        .detail("tax_to", tax_land.as_ref().map_or("", |l| l.owner.as_str()));
    w.audit(entry);

    for id in [&tr.from, &tr.to] {
        if let Some(a) = w.agents.get_mut(id) {
            bump(&mut a.rep.trade, 2);
            if val.mutual {
                bump(&mut a.rep.social, 1);
            }
        }
    }
    w.stats.record_trade(now);
    if val.mutual {
        for id in [&tr.from, &tr.to] {
            w.fun_on_trade(id, now);
            if market_week {
                w.fun_on_event_participation(id, MARKET_WEEK, now);
                w.award_fun(id, FunDim::Narrative, "market_week_trade", "narrative:market_week_trade", 5, now);
                w.event_goal(id, MARKET_WEEK, "TRADE", now);
            }
        }
    }

    w.emit(
        tr.from.as_str(),
        Event::new(now, EventKind::TradeDone)
            .with("trade_id", tr.trade_id.as_str())
            .with("with", tr.to.as_str()),
    );
    w.emit(
        tr.to.as_str(),
        Event::new(now, EventKind::TradeDone)
            .with("trade_id", tr.trade_id.as_str())
            .with("with", tr.from.as_str()),
    );
    tracing::debug!(tick = now, trade_id = %tr.trade_id, tax_rate, mutual = val.mutual, "Trade settled");
    Ok(Accepted::new("ok"))
}

/// Land tax rate, halved for trades inside one land and again during
/// MARKET_WEEK.
fn effective_market_tax(rate: f64, same_land: bool, market_week: bool) -> f64 {
    let mut rate = rate.max(0.0);
    if same_land {
        rate *= 0.5;
    }
    if market_week {
        rate *= 0.5;
    }
    rate
}

/// Swap both sides, diverting tax to the sink. All-or-nothing.
fn settle(w: &mut World, tr: &Trade, sink: Option<&TaxSink>, tax_rate: f64) -> Result<(), Rejection> {
    let world_id = w.cfg.id.clone();
    let mut from_inv = w.agents.get(&tr.from).map(|a| a.inventory.clone()).unwrap_or_default();
    let mut to_inv = w.agents.get(&tr.to).map(|a| a.inventory.clone()).unwrap_or_default();
    let mut tax = Inventory::new();
    transfer_with_tax(&mut from_inv, &mut to_inv, &tr.offer, Some(&mut tax), tax_rate)?;
    transfer_with_tax(&mut to_inv, &mut from_inv, &tr.request, Some(&mut tax), tax_rate)?;

    // A sink that is also a party receives its cut on top of the swap.
    match sink {
        Some(TaxSink::Agent(owner)) if *owner == tr.from => inventory::add_all(&mut from_inv, &tax)?,
        Some(TaxSink::Agent(owner)) if *owner == tr.to => inventory::add_all(&mut to_inv, &tax)?,
        Some(TaxSink::Agent(owner)) => {
            if let Some(a) = w.agents.get_mut(owner) {
                inventory::add_all(&mut a.inventory, &tax)?;
            }
        }
        Some(TaxSink::Org(org_id)) => {
            if let Some(org) = w.orgs.get_mut(org_id.as_str()) {
                inventory::add_all(org.treasury_mut(&world_id), &tax)?;
            }
        }
        None => {}
    }
    if let Some(a) = w.agents.get_mut(&tr.from) {
        a.inventory = from_inv;
    }
    if let Some(a) = w.agents.get_mut(&tr.to) {
        a.inventory = to_inv;
    }
    Ok(())
}

/// DECLINE_TRADE: drop the offer and tell the offerer.
pub fn decline_trade(w: &mut World, agent_id: &AgentId, req: &InstantReq, now: u64) -> Outcome {
    trade_enabled(w)?;
    let tr = pending_trade_for(w, agent_id, req)?.clone();
    w.trades.remove(&tr.trade_id);
    w.emit(
        tr.from.as_str(),
        Event::new(now, EventKind::TradeDeclined)
            .with("trade_id", tr.trade_id.as_str())
            .with("by", agent_id.as_str()),
    );
    Ok(Accepted::new("declined"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_agents::LandClaim;
    use voxelcraft_types::{ClaimType, LandId};

    use super::super::tests::{instant, run_instant, world};
    use super::*;

    fn offer(w: &mut World) -> String {
        let ev = run_instant(
            w,
            "A1",
            InstantReq {
                to: "A2".to_owned(),
                offer: vec![("PLANK".to_owned(), 10)],
                request: vec![("STONE".to_owned(), 10)],
                ..instant("OFFER_TRADE")
            },
        );
        ev.get_str("trade_id").unwrap().to_owned()
    }

    fn inv(w: &World, agent: &str, item: &str) -> u32 {
        inventory::count(&w.agents.get(agent).unwrap().inventory, item)
    }

    #[test]
    fn accepted_trade_swaps_items_and_bumps_reputation() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let trade_id = offer(&mut w);
        assert_eq!(trade_id, "TR1");
        let ev = run_instant(
            &mut w,
            "A2",
            InstantReq {
                trade_id,
                ..instant("ACCEPT_TRADE")
            },
        );
        assert_eq!(ev.get_str("message"), Some("ok"));
        assert_eq!(inv(&w, "A1", "PLANK"), 10);
        assert_eq!(inv(&w, "A1", "STONE"), 30);
        assert_eq!(inv(&w, "A2", "PLANK"), 30);
        assert_eq!(w.agents.get("A1").unwrap().rep.trade, 502);
        assert!(w.trades.is_empty());
    }

    #[test]
    fn only_the_recipient_may_accept() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let trade_id = offer(&mut w);
        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                trade_id,
                ..instant("ACCEPT_TRADE")
            },
        );
        assert!(ev.has_code(ErrorCode::NoPermission));
    }

    #[test]
    fn market_tax_goes_to_land_owner() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        w.join("carol", false, None);
        let land_id = LandId::from("LAND_A3_001");
        let mut land = LandClaim::new(land_id.clone(), "A3", ClaimType::CityCore, Vec3i::ZERO, 32, 6000);
        land.market_tax = 0.2;
        w.claims.insert(land_id, land);
        let trade_id = offer(&mut w);
        run_instant(
            &mut w,
            "A2",
            InstantReq {
                trade_id,
                ..instant("ACCEPT_TRADE")
            },
        );
        assert_eq!(inv(&w, "A2", "PLANK"), 29);
        assert_eq!(inv(&w, "A3", "PLANK"), 21);
        assert_eq!(inv(&w, "A3", "STONE"), 21);
    }

    #[test]
    fn cross_land_trades_pay_the_offerer_land_rate() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        w.join("carol", false, None);
        for (id, anchor, rate) in [("LAND_A3_001", Vec3i::flat(-100, 0), 0.2), ("LAND_A3_002", Vec3i::flat(100, 0), 0.0)] {
            let land_id = LandId::from(id);
            let mut land = LandClaim::new(land_id.clone(), "A3", ClaimType::CityCore, anchor, 10, 6000);
            land.market_tax = rate;
            w.claims.insert(land_id, land);
        }
        w.agents.get_mut("A1").unwrap().pos = Vec3i::flat(-100, 0);
        w.agents.get_mut("A2").unwrap().pos = Vec3i::flat(100, 0);
        let trade_id = offer(&mut w);
        run_instant(
            &mut w,
            "A2",
            InstantReq {
                trade_id,
                ..instant("ACCEPT_TRADE")
            },
        );
        assert_eq!(inv(&w, "A2", "PLANK"), 28);
        assert_eq!(inv(&w, "A1", "STONE"), 28);
        assert_eq!(inv(&w, "A3", "PLANK"), 22);
        assert_eq!(inv(&w, "A3", "STONE"), 22);
    }

    #[test]
    fn market_week_halves_the_land_rate_again() {
        assert!((effective_market_tax(0.2, false, false) - 0.2).abs() < 1e-12);
        assert!((effective_market_tax(0.2, true, false) - 0.1).abs() < 1e-12);
        assert!((effective_market_tax(0.2, true, true) - 0.05).abs() < 1e-12);
        assert!(effective_market_tax(-1.0, false, true) <= 0.0);
    }

    #[test]
    fn decline_notifies_the_offerer() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let trade_id = offer(&mut w);
        let ev = run_instant(
            &mut w,
            "A2",
            InstantReq {
                trade_id,
                ..instant("DECLINE_TRADE")
            },
        );
        assert_eq!(ev.get_str("message"), Some("declined"));
        let declined = w
            .agents
            .get("A1")
            .unwrap()
            .pending_events()
            .iter()
            .any(|e| e.kind == EventKind::TradeDeclined);
        assert!(declined);
    }

    #[test]
    fn empty_offer_is_a_bad_request() {
        let mut w = world();
        w.join("alice", false, None);
        w.join("bob", false, None);
        let ev = run_instant(
            &mut w,
            "A1",
            InstantReq {
                to: "A2".to_owned(),
                request: vec![("STONE".to_owned(), 1)],
                ..instant("OFFER_TRADE")
            },
        );
        assert_eq!(ev.get_str("message"), Some("bad offer"));
    }
}
