//! Item-count maps with checked arithmetic.
//!
//! Agent inventories, container contents, escrow reservations, and org
//! treasuries all share the [`Inventory`] shape. Zero counts are never
//! stored: removing the last unit deletes the key, so two maps with the
//! same holdings always compare (and digest) equal.

use std::collections::BTreeMap;

use voxelcraft_types::{ItemPair, ItemStack};

use crate::error::AgentError;

/// Item id to unit count.
pub type Inventory = BTreeMap<String, u32>;

/// Units of `item` held.
pub fn count(inv: &Inventory, item: &str) -> u32 {
    inv.get(item).copied().unwrap_or(0)
}

/// Whether at least `n` units of `item` are held.
pub fn has(inv: &Inventory, item: &str, n: u32) -> bool {
    count(inv, item) >= n
}

/// Whether every stack in `items` is covered.
pub fn has_all(inv: &Inventory, items: &Inventory) -> bool {
    items.iter().all(|(item, n)| has(inv, item, *n))
}

/// Add `n` units of `item`.
pub fn add(inv: &mut Inventory, item: &str, n: u32) -> Result<(), AgentError> {
    if n == 0 {
        return Ok(());
    }
    let slot = inv.entry(item.to_owned()).or_insert(0);
    *slot = slot.checked_add(n).ok_or_else(|| AgentError::Overflow {
        context: format!("adding {n} {item}"),
    })?;
    Ok(())
}

/// Remove `n` units of `item`, deleting the key when it reaches zero.
pub fn remove(inv: &mut Inventory, item: &str, n: u32) -> Result<(), AgentError> {
    if n == 0 {
        return Ok(());
    }
    let available = count(inv, item);
    let Some(remaining) = available.checked_sub(n) else {
        return Err(AgentError::InsufficientItem {
            item: item.to_owned(),
            requested: n,
            available,
        });
    };
    if remaining == 0 {
        inv.remove(item);
    } else {
        inv.insert(item.to_owned(), remaining);
    }
    Ok(())
}

/// Add every stack in `items`.
pub fn add_all(inv: &mut Inventory, items: &Inventory) -> Result<(), AgentError> {
    for (item, n) in items {
        add(inv, item, *n)?;
    }
    Ok(())
}

/// Remove every stack in `items`, or nothing if any stack is short.
pub fn remove_all(inv: &mut Inventory, items: &Inventory) -> Result<(), AgentError> {
    if let Some((item, n)) = items.iter().find(|(item, n)| !has(inv, item, **n)) {
        return Err(AgentError::InsufficientItem {
            item: item.clone(),
            requested: *n,
            available: count(inv, item),
        });
    }
    for (item, n) in items {
        remove(inv, item, *n)?;
    }
    Ok(())
}

/// Move `n` units of `item` between two maps.
pub fn transfer(from: &mut Inventory, to: &mut Inventory, item: &str, n: u32) -> Result<(), AgentError> {
    remove(from, item, n)?;
    add(to, item, n)
}

/// Total units across all stacks, saturating.
pub fn total(inv: &Inventory) -> u64 {
    inv.values().map(|n| u64::from(*n)).sum()
}

fn checked_count(item: &str, n: i64) -> Result<u32, AgentError> {
    if item.trim().is_empty() {
        return Err(AgentError::InvalidItems {
            reason: "empty item id".to_owned(),
        });
    }
    if n <= 0 {
        return Err(AgentError::InvalidItems {
            reason: format!("non-positive count for {item}"),
        });
    }
    u32::try_from(n).map_err(|_overflow| AgentError::InvalidItems {
        reason: format!("count too large for {item}"),
    })
}

fn merge(out: &mut Inventory, item: &str, n: u32) -> Result<(), AgentError> {
    add(out, item, n)
}

/// Parse `[[item, count], ...]` into a non-empty map, merging duplicates.
pub fn parse_item_pairs(pairs: &[ItemPair]) -> Result<Inventory, AgentError> {
    let mut out = Inventory::new();
    for (item, n) in pairs {
        let n = checked_count(item, *n)?;
        merge(&mut out, item, n)?;
    }
    if out.is_empty() {
        return Err(AgentError::InvalidItems {
            reason: "no items".to_owned(),
        });
    }
    Ok(out)
}

/// Parse `[{item, count}, ...]` into a map, merging duplicates.
///
/// An empty list yields an empty map.
pub fn parse_stacks(stacks: &[ItemStack]) -> Result<Inventory, AgentError> {
    let mut out = Inventory::new();
    for s in stacks {
        let n = checked_count(&s.item, s.count)?;
        merge(&mut out, &s.item, n)?;
    }
    Ok(out)
}

/// Render a map as sorted `ItemStack`s.
pub fn to_stacks(inv: &Inventory) -> Vec<ItemStack> {
    inv.iter()
        .filter(|(_, n)| **n > 0)
        .map(|(item, n)| ItemStack {
            item: item.clone(),
            count: i64::from(*n),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_deletes_key() {
        let mut inv = Inventory::new();
        add(&mut inv, "PLANK", 3).unwrap();
        remove(&mut inv, "PLANK", 3).unwrap();
        assert!(inv.is_empty());
    }

    #[test]
    fn remove_short_reports_available() {
        let mut inv = Inventory::new();
        add(&mut inv, "COAL", 1).unwrap();
        let err = remove(&mut inv, "COAL", 2).unwrap_err();
        assert_eq!(
            err,
            AgentError::InsufficientItem {
                item: "COAL".to_owned(),
                requested: 2,
                available: 1
            }
        );
        assert_eq!(count(&inv, "COAL"), 1);
    }

    #[test]
    fn remove_all_is_atomic() {
        let mut inv = Inventory::new();
        add(&mut inv, "STONE", 5).unwrap();
        let mut cost = Inventory::new();
        cost.insert("STONE".to_owned(), 2);
        cost.insert("IRON_INGOT".to_owned(), 1);
        assert!(remove_all(&mut inv, &cost).is_err());
        assert_eq!(count(&inv, "STONE"), 5);
    }

    #[test]
    fn add_overflow_is_an_error() {
        let mut inv = Inventory::new();
        add(&mut inv, "X", u32::MAX).unwrap();
        assert!(matches!(add(&mut inv, "X", 1), Err(AgentError::Overflow { .. })));
    }

    #[test]
    fn item_pairs_merge_and_validate() {
        let parsed = parse_item_pairs(&[("PLANK".into(), 2), ("PLANK".into(), 3)]).unwrap();
        assert_eq!(count(&parsed, "PLANK"), 5);
        assert!(parse_item_pairs(&[]).is_err());
        assert!(parse_item_pairs(&[("PLANK".into(), 0)]).is_err());
        assert!(parse_item_pairs(&[("".into(), 1)]).is_err());
        assert!(parse_item_pairs(&[("PLANK".into(), -4)]).is_err());
    }

    #[test]
    fn stacks_round_trip_sorted() {
        let inv = parse_stacks(&[
            ItemStack { item: "STONE".into(), count: 1 },
            ItemStack { item: "COAL".into(), count: 2 },
        ])
        .unwrap();
        let stacks = to_stacks(&inv);
        assert_eq!(stacks.first().map(|s| s.item.as_str()), Some("COAL"));
        assert_eq!(total(&inv), 3);
    }
}
