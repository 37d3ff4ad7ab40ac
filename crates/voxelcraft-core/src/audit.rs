//! Audit and tick-log records offered to the injected sinks.
//!
//! Both sinks are bounded channels written with `try_send`; a full sink
//! drops the record and never stalls the owner loop.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use voxelcraft_types::{ActionEnvelope, AgentId, Vec3i};

/// One audited state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Tick of the change.
    pub tick: u64,
    /// Agent id, org id, or `WORLD`.
    pub actor: String,
    /// `SET_BLOCK`, `TRADE`, `CLAIM_REMOVE`, ...
    pub action: String,
    /// Where it happened.
    pub pos: Vec3i,
    /// Short cause, e.g. `MINE` or `EXPIRED`.
    pub reason: String,
    /// Action-specific fields.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl AuditEntry {
    /// An entry with empty details.
    pub fn new(tick: u64, actor: &str, action: &str, pos: Vec3i, reason: &str) -> Self {
        Self {
            tick,
            actor: actor.to_owned(),
            action: action.to_owned(),
            pos,
            reason: reason.to_owned(),
            details: Map::new(),
        }
    }

    /// Add a detail field.
    #[must_use]
    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_owned(), value.into());
        self
    }
}

/// A join applied during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedJoin {
    /// Assigned agent id.
    pub agent_id: AgentId,
    /// Requested display name.
    pub name: String,
}

/// Per-tick replay record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEntry {
    /// Tick that was stepped.
    pub tick: u64,
    /// State digest after the tick's systems ran.
    pub digest: String,
    /// Joins in application order.
    pub joins: Vec<RecordedJoin>,
    /// Leaves in application order.
    pub leaves: Vec<AgentId>,
    /// Envelopes in arrival order.
    pub actions: Vec<ActionEnvelope>,
}
