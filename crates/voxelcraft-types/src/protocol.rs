//! Wire protocol between clients and the world engine.
//!
//! Clients submit [`ActionEnvelope`]s; the engine answers with per-agent
//! [`Event`]s and one [`Obs`] frame per tick. Request structs are flat
//! unions: every field is optional on the wire and each instant or task
//! type reads only the fields it needs. Empty strings and zero numbers
//! mean "missing".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enums::ErrorCode;
use crate::geometry::Vec3i;
use crate::ids::{AgentId, TaskId};

/// An item and a signed count as submitted by a client (`["PLANK", 4]`).
///
/// Counts are signed so that negative submissions can be rejected rather
/// than failing to parse.
pub type ItemPair = (String, i64);

/// An item stack in object form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemStack {
    /// Catalog item id.
    pub item: String,
    /// Number of units.
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One authored act: cancels, instants, and tasks from a single agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionEnvelope {
    /// Authoring agent.
    pub agent_id: AgentId,
    /// Client-chosen act id used for dedupe. May be empty.
    pub act_id: String,
    /// World the act was authored against. Empty means the receiving world.
    pub world_id: String,
    /// Tick the client observed when authoring the act.
    pub tick: u64,
    /// Task ids to cancel before anything else runs.
    pub cancel: Vec<TaskId>,
    /// Single-tick actions.
    pub instants: Vec<InstantReq>,
    /// Multi-tick actions.
    pub tasks: Vec<TaskReq>,
}

/// A single-tick action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstantReq {
    /// Client reference echoed on the `ACTION_RESULT`.
    pub id: String,
    /// Instant type, e.g. `SAY` or `OFFER_TRADE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Chat, sign, or search text.
    pub text: String,
    /// Chat channel (`LOCAL`, `CITY`, `MARKET`).
    pub channel: String,
    /// Recipient agent.
    pub to: String,
    /// Item id for EAT and org treasury moves.
    pub item_id: String,
    /// Unit count.
    pub count: i64,
    /// Memory key.
    pub key: String,
    /// Memory value.
    pub value: String,
    /// Memory time-to-live in ticks; 0 keeps the entry forever.
    pub ttl_ticks: i64,
    /// Memory key prefix for LOAD_MEMORY.
    pub prefix: String,
    /// Result limit for LOAD_MEMORY and SEARCH_BOARD.
    pub limit: i64,
    /// Items offered in a trade.
    pub offer: Vec<ItemPair>,
    /// Items requested in a trade.
    pub request: Vec<ItemPair>,
    /// Pending trade id.
    pub trade_id: String,
    /// Virtual board id.
    pub board_id: String,
    /// Physical target id such as `SIGN@1,0,2`.
    pub target_id: String,
    /// Post title.
    pub title: String,
    /// Post body.
    pub body: String,
    /// Contract terminal id (`CONTRACT_TERMINAL@x,y,z`).
    pub terminal_id: String,
    /// Contract kind.
    pub contract_kind: String,
    /// Contract requirements.
    pub requirements: Vec<ItemStack>,
    /// Contract reward.
    pub reward: Vec<ItemStack>,
    /// Contract deposit.
    pub deposit: Vec<ItemStack>,
    /// Contract duration when no deadline is given.
    pub duration_ticks: i64,
    /// Absolute contract deadline.
    pub deadline_tick: u64,
    /// Blueprint for BUILD contracts.
    pub blueprint_id: String,
    /// Blueprint anchor for BUILD contracts.
    pub anchor: [i32; 3],
    /// Blueprint rotation in quarter turns.
    pub rotation: i32,
    /// Contract id.
    pub contract_id: String,
    /// Land claim id.
    pub land_id: String,
    /// Permission flag updates for SET_PERMISSIONS.
    pub policy: BTreeMap<String, bool>,
    /// Requested claim radius.
    pub radius: i32,
    /// Member to add or remove.
    pub member_id: String,
    /// Organization kind for CREATE_ORG.
    pub org_kind: String,
    /// Organization name for CREATE_ORG.
    pub org_name: String,
    /// Organization id.
    pub org_id: String,
    /// New land owner for DEED_LAND.
    pub new_owner: String,
    /// Law template id.
    pub template_id: String,
    /// Raw law parameters.
    pub params: BTreeMap<String, Value>,
    /// Law id for VOTE.
    pub law_id: String,
    /// Ballot choice.
    pub choice: String,
}

/// A multi-tick action.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskReq {
    /// Client reference echoed on the `ACTION_RESULT`.
    pub id: String,
    /// Task type, e.g. `MOVE_TO` or `MINE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// MOVE_TO destination.
    pub target: [i32; 3],
    /// MOVE_TO completion distance.
    pub tolerance: f64,
    /// FOLLOW, GATHER, or OPEN target id.
    pub target_id: String,
    /// FOLLOW distance.
    pub distance: f64,
    /// MINE or PLACE cell.
    pub block_pos: [i32; 3],
    /// Item to place, smelt, or transfer.
    pub item_id: String,
    /// Transfer or repetition count.
    pub count: i64,
    /// Transfer source (`SELF` or container id).
    pub src: String,
    /// Transfer destination (`SELF` or container id).
    pub dst: String,
    /// Recipe for CRAFT.
    pub recipe_id: String,
    /// Claim or blueprint anchor.
    pub anchor: [i32; 3],
    /// Claim radius.
    pub radius: i32,
    /// Blueprint id.
    pub blueprint_id: String,
    /// Blueprint rotation in quarter turns.
    pub rotation: i32,
}

/// The acknowledgement remembered for a deduplicated act.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActAck {
    /// Act id the acknowledgement belongs to.
    pub act_id: String,
    /// Whether the act was queued.
    pub accepted: bool,
    /// Tick at which the act was received.
    pub tick: u64,
    /// Optional human-readable note.
    pub msg: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Outcome of an instant, a task submission, or a cancel.
    ActionResult,
    /// A task finished successfully.
    TaskDone,
    /// A task failed; carries `code`.
    TaskFail,
    /// Chat line.
    Chat,
    /// Incoming trade offer.
    TradeOffer,
    /// Trade settled.
    TradeDone,
    /// Trade declined by its recipient.
    TradeDeclined,
    /// Bulletin board search results.
    BoardSearch,
    /// Bulletin board contents shown on OPEN.
    Board,
    /// Sign text shown on OPEN.
    Sign,
    /// Switch state after a toggle.
    Switch,
    /// Container contents shown on OPEN.
    Container,
    /// Law lifecycle notice.
    Law,
    /// World event started.
    WorldEvent,
    /// Progress toward an active world event's goal.
    EventGoal,
    /// Fun score award.
    Fun,
    /// Land maintenance charge outcome.
    Maintenance,
    /// Access pass charged on entering a land core.
    AccessPass,
    /// Fine charged for breaking on foreign land.
    Fine,
    /// Contract expired or failed.
    Contract,
    /// Season reset happened.
    SeasonRollover,
    /// Agent arrived from another world.
    WorldSwitch,
    /// Agent respawned after HP reached zero.
    Respawn,
    /// Externally injected notice.
    Notice,
}

/// A per-agent event.
///
/// The payload is an open key/value map; [`Event::with`] builds it
/// fluently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Tick at which the event was produced.
    pub t: u64,
    /// Event type.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Type-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    /// An event with no payload.
    pub fn new(t: u64, kind: EventKind) -> Self {
        Self {
            t,
            kind,
            fields: Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }

    /// Add a position field as `[x, y, z]`.
    #[must_use]
    pub fn with_pos(self, key: &str, pos: Vec3i) -> Self {
        let arr: Vec<Value> = pos.to_array().into_iter().map(Value::from).collect();
        self.with(key, Value::Array(arr))
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a string payload field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Successful `ACTION_RESULT`.
    pub fn action_ok(t: u64, reference: &str, message: &str) -> Self {
        Self::new(t, EventKind::ActionResult)
            .with("ref", reference)
            .with("ok", true)
            .with("message", message)
    }

    /// Failed `ACTION_RESULT`.
    pub fn action_err(t: u64, reference: &str, code: ErrorCode, message: &str) -> Self {
        Self::new(t, EventKind::ActionResult)
            .with("ref", reference)
            .with("ok", false)
            .with("code", code.as_str())
            .with("message", message)
    }

    /// `TASK_DONE` for a task id.
    pub fn task_done(t: u64, task_id: &TaskId, kind: &str) -> Self {
        Self::new(t, EventKind::TaskDone)
            .with("task_id", task_id.as_str())
            .with("kind", kind)
    }

    /// `TASK_FAIL` for a task id.
    pub fn task_fail(t: u64, task_id: &TaskId, code: ErrorCode, message: &str) -> Self {
        Self::new(t, EventKind::TaskFail)
            .with("task_id", task_id.as_str())
            .with("code", code.as_str())
            .with("message", message)
    }

    /// The `code` field, if any.
    pub fn code(&self) -> Option<&str> {
        self.get_str("code")
    }

    /// Whether this is an `ACTION_RESULT` or `TASK_FAIL` carrying `code`.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code() == Some(code.as_str())
    }

    /// Rewrite an unknown `code` field to `E_INTERNAL`.
    pub fn sanitize_code(&mut self) {
        if let Some(Value::String(code)) = self.fields.get_mut("code") {
            let clean = ErrorCode::sanitize(code);
            if clean.as_str() != code.as_str() {
                *code = clean.as_str().to_owned();
            }
        }
    }
}

/// Encode an item map as `[[item, count], ...]` in key order.
pub fn encode_item_pairs(items: &BTreeMap<String, u32>) -> Value {
    Value::Array(
        items
            .iter()
            .filter(|(_, n)| **n > 0)
            .map(|(item, n)| Value::Array(vec![Value::from(item.as_str()), Value::from(*n)]))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Sent to a client right after it joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Assigned agent id.
    pub agent_id: AgentId,
    /// Token for reattaching after a disconnect.
    pub resume_token: String,
    /// World the agent joined.
    pub world_id: String,
    /// Tick at which the join was applied.
    pub tick: u64,
    /// Ticks per second.
    pub tick_rate_hz: u32,
    /// Ticks per in-game day.
    pub day_ticks: u64,
    /// Observation radius in cells.
    pub obs_radius: u32,
    /// Block palette, index = block id.
    pub block_palette: Vec<String>,
}

/// Self state inside an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfView {
    /// Position.
    pub pos: Vec3i,
    /// Facing in degrees.
    pub yaw: i32,
    /// Health 0..=20.
    pub hp: i32,
    /// Hunger 0..=20.
    pub hunger: i32,
    /// Stamina in milli-units 0..=1000.
    pub stamina_milli: i32,
    /// Reputation scores.
    pub reputation: BTreeMap<String, i32>,
    /// Fun scores by dimension.
    pub fun: BTreeMap<String, i64>,
    /// Inventory.
    pub inventory: BTreeMap<String, u32>,
    /// Main hand item id, or `NONE`.
    pub main_hand: String,
    /// Organization, if any.
    pub org_id: Option<String>,
}

/// World state inside an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldView {
    /// World id.
    pub world_id: String,
    /// Time of day in `[0, 1)`.
    pub time_of_day: f64,
    /// Current weather.
    pub weather: String,
    /// Active world event, if any.
    pub active_event: Option<String>,
    /// Tick at which the active event ends.
    pub active_event_ends_tick: u64,
    /// Current season number.
    pub season: u64,
}

/// Voxel slab around the agent, row-major over `(z, x)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelView {
    /// Cell at the slab centre.
    pub center: Vec3i,
    /// Slab half-width.
    pub radius: u32,
    /// `FULL` or `DELTA`.
    pub encoding: String,
    /// Block ids for `FULL` frames.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub data: Vec<u16>,
    /// Changed cells for `DELTA` frames.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ops: Vec<VoxelOp>,
}

/// One changed cell in a delta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelOp {
    /// Changed cell.
    pub pos: Vec3i,
    /// New block id.
    pub block: u16,
}

/// A nearby entity summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    /// Entity id.
    pub id: String,
    /// `AGENT`, `ITEM`, `CHEST`, `SIGN`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Position.
    pub pos: Vec3i,
    /// Item id for dropped stacks.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub item: Option<String>,
    /// Count for dropped stacks.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<u32>,
}

/// An in-flight task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    /// Task id.
    pub task_id: TaskId,
    /// Task kind.
    pub kind: String,
    /// Completion estimate in `[0, 1]`.
    pub progress: f64,
    /// Target position, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<Vec3i>,
}

/// A memory key/value pair loaded by LOAD_MEMORY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryKv {
    /// Key.
    pub key: String,
    /// Value.
    pub value: String,
}

/// Per-agent observation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obs {
    /// Tick the frame describes.
    pub tick: u64,
    /// Observing agent.
    pub agent_id: AgentId,
    /// World summary.
    pub world: WorldView,
    /// Self state.
    #[serde(rename = "self")]
    pub self_state: SelfView,
    /// Field-of-view voxels.
    pub voxels: VoxelView,
    /// Nearby entities.
    pub entities: Vec<EntityView>,
    /// In-flight tasks.
    pub tasks: Vec<TaskView>,
    /// Memory loaded since the last frame.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<Vec<MemoryKv>>,
    /// Events since the last frame.
    pub events: Vec<Event>,
    /// Cursor after the last included event.
    pub events_cursor: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_flattens_fields_next_to_type() {
        let ev = Event::action_err(5, "I1", ErrorCode::Blocked, "too far");
        let json = serde_json::to_value(&ev).unwrap_or_default();
        assert_eq!(json["type"], "ACTION_RESULT");
        assert_eq!(json["t"], 5);
        assert_eq!(json["code"], "E_BLOCKED");
        assert_eq!(json["ok"], false);
    }

    #[test]
    fn sanitize_rewrites_unknown_codes() {
        let mut ev = Event::new(1, EventKind::ActionResult).with("code", "E_MYSTERY");
        ev.sanitize_code();
        assert_eq!(ev.code(), Some("E_INTERNAL"));

        let mut ok = Event::new(1, EventKind::TaskFail).with("code", "E_STALE");
        ok.sanitize_code();
        assert_eq!(ok.code(), Some("E_STALE"));
    }

    #[test]
    fn envelope_parses_sparse_json() {
        let raw = r#"{
            "agent_id": "A1",
            "tick": 3,
            "instants": [{"id": "I1", "type": "OFFER_TRADE", "to": "A2",
                          "offer": [["PLANK", 2]], "request": [["COAL", 1]]}],
            "tasks": [{"id": "K", "type": "MOVE_TO", "target": [4, 0, -2]}]
        }"#;
        let env: ActionEnvelope = serde_json::from_str(raw).unwrap_or_default();
        assert_eq!(env.agent_id.as_str(), "A1");
        assert_eq!(env.instants.len(), 1);
        assert_eq!(env.instants.first().map(|i| i.offer.clone()), Some(vec![("PLANK".to_owned(), 2)]));
        assert_eq!(env.tasks.first().map(|t| t.target), Some([4, 0, -2]));
    }

    #[test]
    fn item_pairs_skip_zero_counts() {
        let mut items = BTreeMap::new();
        items.insert("COAL".to_owned(), 2);
        items.insert("PLANK".to_owned(), 0);
        let v = encode_item_pairs(&items);
        assert_eq!(v, serde_json::json!([["COAL", 2]]));
    }
}
