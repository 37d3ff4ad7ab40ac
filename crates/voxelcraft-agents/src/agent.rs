//! The agent record and its event feed.
//!
//! Every agent keeps two views of the events addressed to it: a pending
//! list that the next observation frame drains, and a bounded log indexed
//! by a monotonic cursor that pollers page through with
//! [`Agent::events_after`].

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use voxelcraft_types::{AgentId, Event, MemoryKv, OrgId, Vec3i};

use crate::fun::{FunDecay, FunScore};
use crate::inventory::Inventory;
use crate::memory::Memory;
use crate::ratelimit::{RateLimitSpec, RateLimiter};
use crate::tasks::{MoveTask, WorkTask};

/// Full health.
pub const MAX_HP: i32 = 20;

/// Full hunger bar.
pub const MAX_HUNGER: i32 = 20;

/// Full stamina in milli-units.
pub const MAX_STAMINA_MILLI: i32 = 1000;

/// Highest reputation score.
pub const MAX_REPUTATION: i32 = 1000;

/// Starting reputation score.
pub const DEFAULT_REPUTATION: i32 = 500;

/// Entries kept in the cursor-indexed event log.
pub const EVENT_LOG_CAP: usize = 4096;

/// Default EventsAfter page size.
pub const DEFAULT_EVENTS_LIMIT: usize = 100;

/// Largest EventsAfter page size.
pub const MAX_EVENTS_LIMIT: usize = 1000;

/// The four reputation scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reputation {
    /// Honest trading.
    pub trade: i32,
    /// Building.
    pub build: i32,
    /// Social standing.
    pub social: i32,
    /// Lawfulness. At 100 or below an agent is wanted in city cores.
    pub law: i32,
}

impl Default for Reputation {
    fn default() -> Self {
        Self {
            trade: DEFAULT_REPUTATION,
            build: DEFAULT_REPUTATION,
            social: DEFAULT_REPUTATION,
            law: DEFAULT_REPUTATION,
        }
    }
}

/// Shift a reputation score, clamping into `0..=1000`.
pub fn bump(score: &mut i32, delta: i32) {
    *score = score.saturating_add(delta).clamp(0, MAX_REPUTATION);
}

/// Held items for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// Main hand item, or `NONE`.
    pub main_hand: String,
    /// Armor slots, `NONE` when empty.
    pub armor: [String; 4],
}

impl Default for Equipment {
    fn default() -> Self {
        Self {
            main_hand: "NONE".to_owned(),
            armor: std::array::from_fn(|_| "NONE".to_owned()),
        }
    }
}

/// An event together with its log cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEvent {
    /// Cursor assigned when the event was recorded.
    pub cursor: u64,
    /// The event.
    pub event: Event,
}

/// A simulated avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent id.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Organization, if any.
    #[serde(default)]
    pub org_id: Option<OrgId>,
    /// Reconnect token; never snapshotted or digested.
    #[serde(skip)]
    pub resume_token: String,
    /// Position.
    pub pos: Vec3i,
    /// Facing in degrees.
    #[serde(default)]
    pub yaw: i32,
    /// Health `0..=20`.
    pub hp: i32,
    /// Hunger `0..=20`.
    pub hunger: i32,
    /// Stamina in milli-units `0..=1000`.
    pub stamina_milli: i32,
    /// Reputation scores.
    #[serde(default)]
    pub rep: Reputation,
    /// Fun scores.
    #[serde(default)]
    pub fun: FunScore,
    /// Held items.
    #[serde(default)]
    pub inventory: Inventory,
    /// Display equipment.
    #[serde(default)]
    pub equipment: Equipment,
    /// Movement slot.
    #[serde(default)]
    pub move_task: Option<MoveTask>,
    /// Work slot.
    #[serde(default)]
    pub work_task: Option<WorkTask>,
    /// Rate-limit windows.
    #[serde(default)]
    pub rate_windows: RateLimiter,
    /// Fun decay windows.
    #[serde(default)]
    pub fun_decay: FunDecay,
    /// Biomes already visited.
    #[serde(default)]
    pub seen_biomes: BTreeSet<String>,
    /// Recipes already crafted.
    #[serde(default)]
    pub seen_recipes: BTreeSet<String>,
    /// World events already joined.
    #[serde(default)]
    pub seen_events: BTreeSet<String>,
    /// Private memory.
    #[serde(default)]
    pub memory: Memory,
    /// World the agent currently lives in.
    #[serde(default)]
    pub current_world_id: String,
    /// Tick before which the agent may not switch worlds again.
    #[serde(default)]
    pub world_switch_cooldown_until: u64,
    /// Respawn point.
    #[serde(default)]
    pub spawn_pos: Vec3i,
    /// Last assigned event cursor.
    #[serde(default)]
    pub event_cursor: u64,
    /// Events not yet delivered in an observation.
    #[serde(skip)]
    pending_events: Vec<Event>,
    /// Cursor-indexed event history.
    #[serde(skip)]
    event_log: VecDeque<CursorEvent>,
    /// Memory loaded this tick, shown in the next observation.
    #[serde(skip)]
    pub pending_memory: Option<Vec<MemoryKv>>,
}

impl Agent {
    /// A freshly joined agent at full vitals.
    pub fn new(id: AgentId, name: &str, pos: Vec3i, world_id: &str, inventory: Inventory) -> Self {
        Self {
            id,
            name: name.to_owned(),
            org_id: None,
            resume_token: String::new(),
            pos,
            yaw: 0,
            hp: MAX_HP,
            hunger: MAX_HUNGER,
            stamina_milli: MAX_STAMINA_MILLI,
            rep: Reputation::default(),
            fun: FunScore::default(),
            inventory,
            equipment: Equipment::default(),
            move_task: None,
            work_task: None,
            rate_windows: RateLimiter::default(),
            fun_decay: FunDecay::default(),
            seen_biomes: BTreeSet::new(),
            seen_recipes: BTreeSet::new(),
            seen_events: BTreeSet::new(),
            memory: Memory::default(),
            current_world_id: world_id.to_owned(),
            world_switch_cooldown_until: 0,
            spawn_pos: pos,
            event_cursor: 0,
            pending_events: Vec::new(),
            event_log: VecDeque::new(),
            pending_memory: None,
        }
    }

    /// Record an event: queue it for the next frame and append it to the
    /// cursor log. Unknown error codes are rewritten first.
    pub fn push_event(&mut self, mut event: Event) {
        event.sanitize_code();
        self.event_cursor = self.event_cursor.saturating_add(1);
        if self.event_log.len() >= EVENT_LOG_CAP {
            self.event_log.pop_front();
        }
        self.event_log.push_back(CursorEvent {
            cursor: self.event_cursor,
            event: event.clone(),
        });
        self.pending_events.push(event);
    }

    /// Drain the events queued since the last frame.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Events queued since the last frame.
    pub fn pending_events(&self) -> &[Event] {
        &self.pending_events
    }

    /// Page through the log after `cursor`.
    ///
    /// `limit == 0` selects the default page size; larger limits are
    /// capped. The returned next cursor is the last cursor returned, or
    /// `cursor` itself when nothing is newer.
    pub fn events_after(&self, cursor: u64, limit: usize) -> (Vec<CursorEvent>, u64) {
        let limit = match limit {
            0 => DEFAULT_EVENTS_LIMIT,
            n => n.min(MAX_EVENTS_LIMIT),
        };
        let items: Vec<CursorEvent> = self
            .event_log
            .iter()
            .filter(|e| e.cursor > cursor)
            .take(limit)
            .cloned()
            .collect();
        let next = items.last().map_or(cursor, |e| e.cursor);
        (items, next)
    }

    /// Count one `kind` action against its window.
    pub fn rate_limit(&mut self, kind: &str, now: u64, spec: RateLimitSpec) -> Result<(), u64> {
        self.rate_windows.allow(kind, now, spec)
    }

    /// Eat `units` of a food restoring `edible_hp` each.
    pub fn eat(&mut self, edible_hp: i32, units: u32) {
        let hunger_gain = edible_hp.saturating_mul(2).max(1);
        let stamina_gain = edible_hp.saturating_mul(50);
        for _ in 0..units {
            self.hp = self.hp.saturating_add(edible_hp).min(MAX_HP);
            self.hunger = self.hunger.saturating_add(hunger_gain).min(MAX_HUNGER);
            self.stamina_milli = self.stamina_milli.saturating_add(stamina_gain).min(MAX_STAMINA_MILLI);
        }
    }

    /// Spend stamina, never going below zero.
    pub fn spend_stamina(&mut self, milli: i32) {
        self.stamina_milli = self.stamina_milli.saturating_sub(milli).max(0);
    }

    /// Whether the agent has any task running.
    pub const fn is_busy(&self) -> bool {
        self.move_task.is_some() || self.work_task.is_some()
    }

    /// Reset physical state for a new season: starter inventory, empty
    /// task slots, full vitals, back at `spawn`. Reputation, memory, fun,
    /// and org membership survive.
    pub fn reset_for_season(&mut self, starter: &Inventory, spawn: Vec3i) {
        self.inventory = starter.clone();
        self.move_task = None;
        self.work_task = None;
        self.pos = spawn;
        self.spawn_pos = spawn;
        self.yaw = 0;
        self.hp = MAX_HP;
        self.hunger = MAX_HUNGER;
        self.stamina_milli = MAX_STAMINA_MILLI;
        self.equipment = Equipment::default();
    }

    /// Re-establish derived defaults after a snapshot import.
    pub fn restore_defaults(&mut self, world_id: &str) {
        if self.current_world_id.is_empty() {
            world_id.clone_into(&mut self.current_world_id);
        }
        if self.equipment.main_hand.is_empty() {
            self.equipment = Equipment::default();
        }
        self.hp = self.hp.clamp(0, MAX_HP);
        self.hunger = self.hunger.clamp(0, MAX_HUNGER);
        self.stamina_milli = self.stamina_milli.clamp(0, MAX_STAMINA_MILLI);
    }
}
