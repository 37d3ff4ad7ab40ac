//! Hunger, health, stamina recovery, and soft respawn.

use tracing::info;
use voxelcraft_agents::agent::{MAX_HP, MAX_HUNGER, MAX_STAMINA_MILLI};
use voxelcraft_types::{AgentId, Event, EventKind, Weather};

use super::agent_ids;
use crate::world::{SPAWN_SEARCH_RADIUS, World};

/// Stamina regained per idle tick.
pub const STAMINA_REGEN_MILLI: i32 = 5;

/// Apply one tick of vitals to every agent.
pub fn system_environment(w: &mut World, now: u64) {
    let every = w.cfg.env_every_ticks;
    let metabolic = every > 0 && now > 0 && now.is_multiple_of(every);
    let hunger_drain = if w.weather == Weather::Cold { 2 } else { 1 };

    for agent_id in agent_ids(w) {
        let Some(a) = w.agents.get_mut(&agent_id) else {
            continue;
        };
        if metabolic {
            if a.hunger > 0 {
                a.hunger = a.hunger.saturating_sub(hunger_drain).max(0);
            } else {
                a.hp = a.hp.saturating_sub(1).max(0);
            }
        }
        if a.work_task.is_none() {
            a.stamina_milli = a.stamina_milli.saturating_add(STAMINA_REGEN_MILLI).min(MAX_STAMINA_MILLI);
        }
        if a.hp <= 0 {
            respawn(w, &agent_id, now, "DOWNED");
        }
    }
}

/// Put a downed agent back at its spawn tile with full vitals. Nothing is
/// dropped.
pub fn respawn(w: &mut World, agent_id: &AgentId, now: u64, reason: &str) {
    let Some(spawn) = w.agents.get(agent_id).map(|a| a.spawn_pos) else {
        return;
    };
    let pos = if w.walkable(spawn) {
        spawn
    } else {
        w.find_spawn_air(spawn.x, spawn.z, SPAWN_SEARCH_RADIUS)
    };
    let Some(a) = w.agents.get_mut(agent_id) else {
        return;
    };
    let downed_at = a.pos;
    a.move_task = None;
    a.work_task = None;
    a.pos = pos;
    a.yaw = 0;
    a.hp = MAX_HP;
    a.hunger = MAX_HUNGER;
    a.stamina_milli = MAX_STAMINA_MILLI;
    a.push_event(
        Event::new(now, EventKind::Respawn)
            .with("reason", reason)
            .with_pos("pos", pos)
            .with_pos("downed_pos", downed_at),
    );
    info!(tick = now, agent_id = %agent_id, pos = %pos, reason, "Agent respawned");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_agents::WorkTask;
    use voxelcraft_types::{TaskId, Vec3i, WorkKind};

    use super::*;
    use crate::actions::tests::world;

    #[test]
    fn hunger_drains_on_cadence_and_faster_in_cold() {
        let mut w = world();
        w.join("alice", false, None);
        let every = w.cfg.env_every_ticks;
        system_environment(&mut w, every - 1);
        assert_eq!(w.agents.get("A1").unwrap().hunger, MAX_HUNGER);
        system_environment(&mut w, every);
        assert_eq!(w.agents.get("A1").unwrap().hunger, MAX_HUNGER - 1);
        w.weather = Weather::Cold;
        system_environment(&mut w, every * 2);
        assert_eq!(w.agents.get("A1").unwrap().hunger, MAX_HUNGER - 3);
    }

    #[test]
    fn starving_costs_health() {
        let mut w = world();
        w.join("alice", false, None);
        w.agents.get_mut("A1").unwrap().hunger = 0;
        let now = w.cfg.env_every_ticks;
        system_environment(&mut w, now);
        assert_eq!(w.agents.get("A1").unwrap().hp, MAX_HP - 1);
    }

    #[test]
    fn stamina_recovers_only_while_idle() {
        let mut w = world();
        w.join("alice", false, None);
        let a = w.agents.get_mut("A1").unwrap();
        a.stamina_milli = 500;
        a.work_task = Some(WorkTask::new(TaskId::from_counter(1), WorkKind::Mine, 0));
        system_environment(&mut w, 1);
        assert_eq!(w.agents.get("A1").unwrap().stamina_milli, 500);
        w.agents.get_mut("A1").unwrap().work_task = None;
        system_environment(&mut w, 2);
        assert_eq!(w.agents.get("A1").unwrap().stamina_milli, 505);
        w.agents.get_mut("A1").unwrap().stamina_milli = MAX_STAMINA_MILLI - 2;
        system_environment(&mut w, 3);
        assert_eq!(w.agents.get("A1").unwrap().stamina_milli, MAX_STAMINA_MILLI);
    }

    #[test]
    fn downed_agent_respawns_with_inventory() {
        let mut w = world();
        w.join("alice", false, None);
        let spawn = w.agents.get("A1").unwrap().spawn_pos;
        let a = w.agents.get_mut("A1").unwrap();
        a.hp = 0;
        a.hunger = 0;
        a.pos = Vec3i::flat(spawn.x + 3, spawn.z);
        let before = a.inventory.clone();
        system_environment(&mut w, 7);
        let a = w.agents.get("A1").unwrap();
        assert_eq!(a.pos, spawn);
        assert_eq!((a.hp, a.hunger), (MAX_HP, MAX_HUNGER));
        assert_eq!(a.inventory, before);
        assert!(w.items.is_empty());
        let ev = a.pending_events().iter().find(|e| e.kind == EventKind::Respawn).unwrap();
        assert_eq!(ev.get_str("reason"), Some("DOWNED"));
    }
}
