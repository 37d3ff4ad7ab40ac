//! Pending trades, item valuation, and market tax.
//!
//! A trade is an offer from one agent to another: `offer` leaves the
//! offerer, `request` leaves the recipient. Nothing is escrowed while the
//! trade is pending; both sides are re-checked on accept.
//!
//! Settlement may be taxed by the land both parties stand on. Tax is
//! charged per stack as `floor(count * rate)` and deducted from what the
//! receiving side gets, so the payer always gives up exactly the agreed
//! stacks.

use serde::{Deserialize, Serialize};
use voxelcraft_types::{AgentId, TradeId};

use crate::error::AgentError;
use crate::inventory::{self, Inventory};

/// Two aggregate values count as fair when the smaller is at least this
/// percentage of the larger.
pub const MUTUAL_BENEFIT_MIN_PERCENT: i64 = 50;

/// A pending instant trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade id (`TR<n>`).
    pub trade_id: TradeId,
    /// Offering agent.
    pub from: AgentId,
    /// Receiving agent.
    pub to: AgentId,
    /// Stacks the offerer gives.
    pub offer: Inventory,
    /// Stacks the offerer wants back.
    pub request: Inventory,
    /// Tick the offer was made.
    pub created_tick: u64,
}

impl Trade {
    /// Whether `agent` is either party.
    pub fn involves(&self, agent: &str) -> bool {
        self.from == agent || self.to == agent
    }
}

/// Reference value of one unit of `item`, used only to judge fairness.
pub fn item_value(item: &str) -> i64 {
    match item {
        "LOG" | "COAL" => 2,
        "IRON_ORE" | "COPPER_ORE" | "BREAD" => 3,
        "COPPER_INGOT" => 4,
        "IRON_INGOT" => 5,
        "CRYSTAL_SHARD" => 20,
        "CLAIM_TOTEM" => 26,
        "BATTERY" => 30,
        "CONVEYOR" => 36,
        "SENSOR" => 52,
        "CONTRACT_TERMINAL" => 80,
        _ => 1,
    }
}

/// Aggregate reference value of a set of stacks.
pub fn trade_value(items: &Inventory) -> i64 {
    items
        .iter()
        .map(|(item, n)| item_value(item).saturating_mul(i64::from(*n)))
        .fold(0_i64, i64::saturating_add)
}

/// Fairness verdict for a settled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeValuation {
    /// Value of the offered side.
    pub value_offer: i64,
    /// Value of the requested side.
    pub value_request: i64,
    /// Whether neither side was badly shortchanged.
    pub mutual: bool,
}

/// Value both sides and decide whether the trade benefits both parties.
pub fn valuate(offer: &Inventory, request: &Inventory) -> TradeValuation {
    let value_offer = trade_value(offer);
    let value_request = trade_value(request);
    let mutual = if value_offer <= 0 || value_request <= 0 {
        false
    } else {
        let lo = value_offer.min(value_request);
        let hi = value_offer.max(value_request);
        lo.saturating_mul(100) >= hi.saturating_mul(MUTUAL_BENEFIT_MIN_PERCENT)
    };
    TradeValuation {
        value_offer,
        value_request,
        mutual,
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_nan() || rate <= 0.0 {
        0.0
    } else if rate > 1.0 {
        1.0
    } else {
        rate
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stack_tax(count: u32, rate: f64) -> u32 {
    let tax = (f64::from(count) * rate).floor();
    if tax <= 0.0 { 0 } else { (tax as u32).min(count) }
}

/// Tax owed on each stack at `rate`. Stacks whose tax rounds to zero are
/// omitted.
pub fn tax_for(items: &Inventory, rate: f64) -> Inventory {
    let rate = clamp_rate(rate);
    if rate <= 0.0 {
        return Inventory::new();
    }
    items
        .iter()
        .map(|(item, n)| (item.clone(), stack_tax(*n, rate)))
        .filter(|(_, tax)| *tax > 0)
        .collect()
}

/// Move `items` from `src` to `dst`, diverting the tax share of each
/// stack to `tax_sink`.
///
/// The caller must have verified that `src` holds every stack. With no
/// sink the tax is destroyed.
pub fn transfer_with_tax(
    src: &mut Inventory,
    dst: &mut Inventory,
    items: &Inventory,
    tax_sink: Option<&mut Inventory>,
    rate: f64,
) -> Result<Inventory, AgentError> {
    inventory::remove_all(src, items)?;
    let tax = tax_for(items, rate);
    for (item, n) in items {
        let cut = inventory::count(&tax, item);
        inventory::add(dst, item, n.saturating_sub(cut))?;
    }
    if let Some(sink) = tax_sink {
        inventory::add_all(sink, &tax)?;
    }
    Ok(tax)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn inv(pairs: &[(&str, u32)]) -> Inventory {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    #[test]
    fn values_follow_the_reference_table() {
        assert_eq!(item_value("PLANK"), 1);
        assert_eq!(item_value("IRON_INGOT"), 5);
        assert_eq!(item_value("UNKNOWN_THING"), 1);
        assert_eq!(trade_value(&inv(&[("CRYSTAL_SHARD", 2), ("COAL", 3)])), 46);
    }

    #[test]
    fn lopsided_trades_are_not_mutual() {
        let fair = valuate(&inv(&[("PLANK", 10)]), &inv(&[("IRON_INGOT", 1)]));
        assert!(fair.mutual);
        let scam = valuate(&inv(&[("PLANK", 1)]), &inv(&[("CRYSTAL_SHARD", 1)]));
        assert!(!scam.mutual);
        assert_eq!(scam.value_request, 20);
    }

    #[test]
    fn tax_floors_per_stack() {
        let tax = tax_for(&inv(&[("PLANK", 9), ("COAL", 3)]), 0.25);
        assert_eq!(tax, inv(&[("PLANK", 2)]));
        assert!(tax_for(&inv(&[("PLANK", 9)]), 0.0).is_empty());
        assert_eq!(tax_for(&inv(&[("PLANK", 4)]), 7.0), inv(&[("PLANK", 4)]));
    }

    #[test]
    fn taxed_transfer_conserves_items() {
        let mut src = inv(&[("PLANK", 10)]);
        let mut dst = Inventory::new();
        let mut sink = Inventory::new();
        let paid = transfer_with_tax(&mut src, &mut dst, &inv(&[("PLANK", 10)]), Some(&mut sink), 0.1).unwrap();
        assert!(src.is_empty());
        assert_eq!(inventory::count(&dst, "PLANK"), 9);
        assert_eq!(inventory::count(&sink, "PLANK"), 1);
        assert_eq!(paid, inv(&[("PLANK", 1)]));
    }

    #[test]
    fn short_payer_changes_nothing() {
        let mut src = inv(&[("PLANK", 1)]);
        let mut dst = Inventory::new();
        assert!(transfer_with_tax(&mut src, &mut dst, &inv(&[("PLANK", 2)]), None, 0.0).is_err());
        assert_eq!(inventory::count(&src, "PLANK"), 1);
        assert!(dst.is_empty());
    }

    proptest! {
        #[test]
        fn taxed_transfers_conserve_items(
            plank in 0u32..5_000,
            coal in 0u32..5_000,
            rate in -0.5f64..1.5,
        ) {
            let items = inv(&[("PLANK", plank), ("COAL", coal)]);
            let mut src = items.clone();
            let mut dst = Inventory::new();
            let mut sink = Inventory::new();
            let paid = transfer_with_tax(&mut src, &mut dst, &items, Some(&mut sink), rate).unwrap();
            prop_assert!(src.values().all(|n| *n == 0));
            prop_assert_eq!(&paid, &sink);
            for item in ["PLANK", "COAL"] {
                let moved = inventory::count(&dst, item) + inventory::count(&sink, item);
                prop_assert_eq!(moved, inventory::count(&items, item));
                prop_assert!(inventory::count(&sink, item) <= inventory::count(&items, item));
            }
        }
    }
}
