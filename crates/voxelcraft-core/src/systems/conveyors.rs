//! Conveyor belts, switches, sensors, and wire.
//!
//! A belt is enabled when an adjacent switch is on or an adjacent sensor
//! sees items, or, failing any adjacent control block, when adjacent wire
//! connects to such a switch or sensor. A belt with no controls and no
//! wire runs unconditionally.
//!
//! Each tick runs two passes. First every stack lying on an enabled belt
//! moves one cell along it, or drops one unit into a container in front.
//! Then every enabled belt with an empty cell pulls one unit from the
//! container behind it.

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;
use voxelcraft_agents::inventory;
use voxelcraft_types::{ItemEntityId, Vec3i};

use crate::world::{WORLD_ACTOR, World};

/// Cap on wire cells visited per enablement query.
pub const WIRE_SEARCH_LIMIT: usize = 1024;

/// Whether the sensor at `pos` sees a neighbouring chest with items.
pub fn sensor_on(w: &World, pos: Vec3i) -> bool {
    pos.neighbors4().into_iter().any(|p| {
        w.live_container(p)
            .is_some_and(|c| c.kind == "CHEST" && c.inventory.values().any(|n| *n > 0))
    })
}

/// Signal from a control block at `pos`: `None` when it is not a control.
fn control_signal(w: &World, pos: Vec3i) -> Option<bool> {
    match w.block_name_at(pos) {
        "SWITCH" => Some(w.switches.get(&pos).copied().unwrap_or(false)),
        "SENSOR" => Some(sensor_on(w, pos)),
        _ => None,
    }
}

/// Whether the belt at `pos` runs this tick.
pub fn conveyor_enabled(w: &World, pos: Vec3i) -> bool {
    let mut found_control = false;
    for p in pos.neighbors4() {
        match control_signal(w, p) {
            Some(true) => return true,
            Some(false) => found_control = true,
            None => {}
        }
    }
    if found_control {
        return false;
    }
    let wires: Vec<Vec3i> = pos.neighbors4().into_iter().filter(|p| w.block_is(*p, "WIRE")).collect();
    if wires.is_empty() {
        return true;
    }
    wire_powered(w, &wires)
}

/// Breadth-first walk over connected wire looking for a live control.
fn wire_powered(w: &World, starts: &[Vec3i]) -> bool {
    let mut seen: BTreeSet<Vec3i> = starts.iter().copied().collect();
    let mut queue: VecDeque<Vec3i> = starts.iter().copied().collect();
    while let Some(p) = queue.pop_front() {
        for n in p.neighbors4() {
            if control_signal(w, n) == Some(true) {
                return true;
            }
            if seen.len() < WIRE_SEARCH_LIMIT && w.block_is(n, "WIRE") && seen.insert(n) {
                queue.push_back(n);
            }
        }
    }
    false
}

/// Run both belt passes.
pub fn system_conveyors(w: &mut World, now: u64) {
    if w.conveyors.is_empty() {
        return;
    }
    move_items(w, now);
    pull_from_containers(w, now);
}

fn move_items(w: &mut World, now: u64) {
    let ids: Vec<ItemEntityId> = w
        .items
        .values()
        .filter(|e| e.is_live(now) && w.conveyors.contains_key(&e.pos) && w.block_is(e.pos, "CONVEYOR"))
        .map(|e| e.id.clone())
        .collect();
    for id in ids {
        let Some((pos, item)) = w.items.get(&id).map(|e| (e.pos, e.item.clone())) else {
            continue;
        };
        let Some(belt) = w.conveyors.get(&pos).copied() else {
            continue;
        };
        if !conveyor_enabled(w, pos) {
            continue;
        }
        let to = belt.front(pos);

        if w.live_container(to).is_some() {
            let Some(c) = w.containers.get_mut(&to) else {
                continue;
            };
            if inventory::add(&mut c.inventory, &item, 1).is_err() {
                continue;
            }
            let container_id = c.id();
            let emptied = w.items.get_mut(&id).is_some_and(|e| {
                e.count = e.count.saturating_sub(1);
                e.count == 0
            });
            if emptied {
                w.remove_item(&id);
            }
            let entry = w
                .audit_entry(WORLD_ACTOR, "CONVEYOR_INSERT", to, "CONVEYOR")
                .detail("entity_id", id.as_str())
                .detail("container_id", container_id)
                .detail("item", item.as_str())
                .detail("count", 1);
            w.audit(entry);
            continue;
        }

        let target = w.block_at(to);
        if !w.chunks.in_bounds(to) || (w.catalogs.is_solid(target) && !w.block_is(to, "CONVEYOR")) {
            continue;
        }
        relocate_item(w, &id, to);
        debug!(tick = now, entity_id = %id, to = %to, "Belt moved stack");
    }
}

fn pull_from_containers(w: &mut World, now: u64) {
    let belts: Vec<Vec3i> = w
        .conveyors
        .keys()
        .copied()
        .filter(|p| w.block_is(*p, "CONVEYOR"))
        .collect();
    for pos in belts {
        if !w.items_at(pos).is_empty() || !conveyor_enabled(w, pos) {
            continue;
        }
        let Some(back) = w.conveyors.get(&pos).map(|b| b.back(pos)) else {
            continue;
        };
        let Some(c) = w.live_container(back) else {
            continue;
        };
        let Some(item) = c.inventory.keys().find(|item| c.available(item) > 0).cloned() else {
            continue;
        };
        let Some(c) = w.containers.get_mut(&back) else {
            continue;
        };
        if c.take_available(&item, 1).is_err() {
            continue;
        }
        w.spawn_item(pos, &item, 1, WORLD_ACTOR, "CONVEYOR_PULL");
        let entry = w
            .audit_entry(WORLD_ACTOR, "CONVEYOR_PULL", pos, "CONVEYOR")
            .detail("from", back.to_array().to_vec())
            .detail("item", item.as_str())
            .detail("count", 1);
        w.audit(entry);
    }
}

/// Move a stack to another cell, keeping the position index current.
fn relocate_item(w: &mut World, id: &ItemEntityId, to: Vec3i) {
    let Some(e) = w.items.get_mut(id) else {
        return;
    };
    let from = std::mem::replace(&mut e.pos, to);
    if let Some(set) = w.items_by_pos.get_mut(&from) {
        set.remove(id);
        if set.is_empty() {
            w.items_by_pos.remove(&from);
        }
    }
    w.items_by_pos.entry(to).or_default().insert(id.clone());
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::actions::tests::world;
    use crate::entities::Conveyor;

    const ORIGIN: Vec3i = Vec3i::ZERO;

    fn put(w: &mut World, pos: Vec3i, block: &str) {
        w.set_block_named(pos, block, WORLD_ACTOR, "TEST").unwrap();
        w.instantiate_block_meta(pos, block, 0);
    }

    /// Belt at the origin running +Z, chests behind and in front.
    fn line() -> World {
        let mut w = world();
        for dx in -3..=3 {
            for dz in -3..=3 {
                put(&mut w, ORIGIN.offset(dx, 0, dz), "AIR");
            }
        }
        put(&mut w, ORIGIN.offset(0, 0, -1), "CHEST");
        put(&mut w, ORIGIN.offset(0, 0, 1), "CHEST");
        put(&mut w, ORIGIN, "CONVEYOR");
        w.conveyors.insert(ORIGIN, Conveyor::facing(0, 1));
        inventory::add(&mut w.containers.get_mut(&ORIGIN.offset(0, 0, -1)).unwrap().inventory, "COAL", 2).unwrap();
        w
    }

    fn front_coal(w: &World) -> u32 {
        inventory::count(&w.containers.get(&ORIGIN.offset(0, 0, 1)).unwrap().inventory, "COAL")
    }

    #[test]
    fn uncontrolled_belt_pulls_then_delivers() {
        let mut w = line();
        system_conveyors(&mut w, 1);
        assert_eq!(w.items_at(ORIGIN).len(), 1);
        system_conveyors(&mut w, 2);
        assert_eq!(front_coal(&w), 1);
        system_conveyors(&mut w, 3);
        assert_eq!(front_coal(&w), 2);
        assert!(w.containers.get(&ORIGIN.offset(0, 0, -1)).unwrap().inventory.is_empty());
        assert!(w.items.is_empty());
    }

    #[test]
    fn sensor_gates_the_belt() {
        let mut w = line();
        put(&mut w, ORIGIN.offset(1, 0, 0), "SENSOR");
        put(&mut w, ORIGIN.offset(2, 0, 0), "CHEST");
        for t in 1..=3 {
            system_conveyors(&mut w, t);
        }
        assert_eq!(front_coal(&w), 0);
        assert!(w.items.is_empty());

        let dummy = w.containers.get_mut(&ORIGIN.offset(2, 0, 0)).unwrap();
        inventory::add(&mut dummy.inventory, "STONE", 1).unwrap();
        for t in 4..=6 {
            system_conveyors(&mut w, t);
        }
        assert_eq!(front_coal(&w), 2);
    }

    #[test]
    fn wire_carries_a_switch_signal() {
        let mut w = line();
        put(&mut w, ORIGIN.offset(1, 0, 0), "WIRE");
        put(&mut w, ORIGIN.offset(2, 0, 0), "WIRE");
        put(&mut w, ORIGIN.offset(2, 0, 1), "SWITCH");
        assert!(!conveyor_enabled(&w, ORIGIN));
        w.switches.insert(ORIGIN.offset(2, 0, 1), true);
        assert!(conveyor_enabled(&w, ORIGIN));
        w.switches.insert(ORIGIN.offset(2, 0, 1), false);
        system_conveyors(&mut w, 1);
        assert!(w.items.is_empty());
    }

    #[test]
    fn stacks_ride_along_chained_belts() {
        let mut w = line();
        put(&mut w, ORIGIN.offset(0, 0, 1), "CONVEYOR");
        w.containers.remove(&ORIGIN.offset(0, 0, 1));
        w.conveyors.insert(ORIGIN.offset(0, 0, 1), Conveyor::facing(0, 1));
        system_conveyors(&mut w, 1);
        system_conveyors(&mut w, 2);
        assert_eq!(w.items_at(ORIGIN.offset(0, 0, 1)).len(), 1);
        assert_eq!(w.items_at(ORIGIN).len(), 1);
    }
}
