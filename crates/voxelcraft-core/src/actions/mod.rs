//! The action pipeline: envelope validation, cancels, and dispatch of
//! instants and task submissions.
//!
//! Every instant and task submission produces exactly one
//! `ACTION_RESULT` event for the acting agent. Handlers return an
//! [`Outcome`]; [`apply_envelope`] turns it into the event so no handler
//! can forget to answer.
//!
//! # Submodules
//!
//! - [`social`] -- Chat, eating, and private memory
//! - [`trade`] -- Trade offers and settlement
//! - [`boards`] -- Bulletin boards, signs, and switches
//! - [`contracts`] -- Contract terminals and owed stacks
//! - [`claims`] -- Land administration
//! - [`orgs`] -- Organizations and treasuries
//! - [`laws`] -- Proposals and votes
//! - [`tasks`] -- Movement and work task submissions

pub mod boards;
pub mod claims;
pub mod contracts;
pub mod laws;
pub mod orgs;
pub mod social;
pub mod tasks;
pub mod trade;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;
use voxelcraft_agents::AgentError;
use voxelcraft_types::{ActionEnvelope, AgentId, ErrorCode, Event, InstantReq, TaskReq, Vec3i};

use crate::world::World;

/// Reach for containers, terminals, boards, signs, and switches.
pub const REACH_CONTAINER: u32 = 3;

/// Reach for mining and picking up stacks.
pub const REACH_MINE: u32 = 2;

/// Reach for crafting stations.
pub const REACH_STATION: u32 = 1;

/// How many ticks behind the world an act may be.
pub const STALE_WINDOW_TICKS: u64 = 2;

/// Instant types the dispatch table must cover exactly.
pub const SUPPORTED_INSTANTS: &[&str] = &[
    "SAY",
    "WHISPER",
    "EAT",
    "SAVE_MEMORY",
    "LOAD_MEMORY",
    "OFFER_TRADE",
    "ACCEPT_TRADE",
    "DECLINE_TRADE",
    "POST_BOARD",
    "SEARCH_BOARD",
    "SET_SIGN",
    "TOGGLE_SWITCH",
    "CLAIM_OWED",
    "POST_CONTRACT",
    "ACCEPT_CONTRACT",
    "SUBMIT_CONTRACT",
    "SET_PERMISSIONS",
    "UPGRADE_CLAIM",
    "ADD_MEMBER",
    "REMOVE_MEMBER",
    "CREATE_ORG",
    "JOIN_ORG",
    "ORG_DEPOSIT",
    "ORG_WITHDRAW",
    "LEAVE_ORG",
    "DEED_LAND",
    "PROPOSE_LAW",
    "VOTE",
];

/// Task types the dispatch table must cover exactly.
pub const SUPPORTED_TASKS: &[&str] = &[
    "STOP",
    "MOVE_TO",
    "FOLLOW",
    "MINE",
    "GATHER",
    "PLACE",
    "OPEN",
    "TRANSFER",
    "CRAFT",
    "SMELT",
    "CLAIM_LAND",
    "BUILD_BLUEPRINT",
];

/// Successful result: a message plus extra `ACTION_RESULT` fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Accepted {
    /// Human-readable message.
    pub message: String,
    /// Extra fields such as `task_id` or `trade_id`.
    pub fields: Map<String, Value>,
}

impl Accepted {
    /// An acceptance with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Add a result field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_owned(), value.into());
        self
    }
}

/// Failed result: a wire code, a message, and extra fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Wire code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Extra fields such as the rate-limit cooldown.
    pub fields: Map<String, Value>,
}

impl Rejection {
    /// A rejection with no extra fields.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// `E_RATE_LIMIT` carrying the cooldown.
    pub fn rate_limited(cooldown_ticks: u64, now: u64) -> Self {
        let mut r = Self::new(ErrorCode::RateLimit, "rate limited");
        r.fields.insert("cooldown_ticks".to_owned(), cooldown_ticks.into());
        r.fields
            .insert("cooldown_until_tick".to_owned(), now.saturating_add(cooldown_ticks).into());
        r
    }
}

impl From<AgentError> for Rejection {
    fn from(e: AgentError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

/// What a handler returns.
pub type Outcome = Result<Accepted, Rejection>;

/// Instant handler.
pub type InstantHandler = fn(&mut World, &AgentId, &InstantReq, u64) -> Outcome;

/// Task submission handler.
pub type TaskHandler = fn(&mut World, &AgentId, &TaskReq, u64) -> Outcome;

/// The instant dispatch table.
pub fn instant_handlers() -> BTreeMap<&'static str, InstantHandler> {
    let mut m: BTreeMap<&'static str, InstantHandler> = BTreeMap::new();
    m.insert("SAY", social::say);
    m.insert("WHISPER", social::whisper);
    m.insert("EAT", social::eat);
    m.insert("SAVE_MEMORY", social::save_memory);
    m.insert("LOAD_MEMORY", social::load_memory);
    m.insert("OFFER_TRADE", trade::offer_trade);
    m.insert("ACCEPT_TRADE", trade::accept_trade);
    m.insert("DECLINE_TRADE", trade::decline_trade);
    m.insert("POST_BOARD", boards::post_board);
    m.insert("SEARCH_BOARD", boards::search_board);
    m.insert("SET_SIGN", boards::set_sign);
    m.insert("TOGGLE_SWITCH", boards::toggle_switch);
    m.insert("CLAIM_OWED", contracts::claim_owed);
    m.insert("POST_CONTRACT", contracts::post_contract);
    m.insert("ACCEPT_CONTRACT", contracts::accept_contract);
    m.insert("SUBMIT_CONTRACT", contracts::submit_contract);
    m.insert("SET_PERMISSIONS", claims::set_permissions);
    m.insert("UPGRADE_CLAIM", claims::upgrade_claim);
    m.insert("ADD_MEMBER", claims::add_member);
    m.insert("REMOVE_MEMBER", claims::remove_member);
    m.insert("DEED_LAND", claims::deed_land);
    m.insert("CREATE_ORG", orgs::create_org);
    m.insert("JOIN_ORG", orgs::join_org);
    m.insert("ORG_DEPOSIT", orgs::org_deposit);
    m.insert("ORG_WITHDRAW", orgs::org_withdraw);
    m.insert("LEAVE_ORG", orgs::leave_org);
    m.insert("PROPOSE_LAW", laws::propose_law);
    m.insert("VOTE", laws::vote);
    m
}

/// The task dispatch table.
pub fn task_handlers() -> BTreeMap<&'static str, TaskHandler> {
    let mut m: BTreeMap<&'static str, TaskHandler> = BTreeMap::new();
    m.insert("STOP", tasks::stop);
    m.insert("MOVE_TO", tasks::move_to);
    m.insert("FOLLOW", tasks::follow);
    m.insert("MINE", tasks::mine);
    m.insert("GATHER", tasks::gather);
    m.insert("PLACE", tasks::place);
    m.insert("OPEN", tasks::open);
    m.insert("TRANSFER", tasks::transfer);
    m.insert("CRAFT", tasks::craft);
    m.insert("SMELT", tasks::smelt);
    m.insert("CLAIM_LAND", tasks::claim_land);
    m.insert("BUILD_BLUEPRINT", tasks::build_blueprint);
    m
}

fn result_event(now: u64, reference: &str, outcome: Outcome) -> Event {
    let (mut ev, fields) = match outcome {
        Ok(ok) => (Event::action_ok(now, reference, &ok.message), ok.fields),
        Err(err) => (Event::action_err(now, reference, err.code, &err.message), err.fields),
    };
    ev.fields.extend(fields);
    ev.sanitize_code();
    ev
}

/// Apply one envelope at tick `now`: staleness check, then cancels,
/// instants, and tasks in that order.
///
/// Envelopes for unknown agents are dropped. Every applied envelope is
/// recorded for the tick log.
pub fn apply_envelope(w: &mut World, env: &ActionEnvelope, now: u64) {
    if !w.agents.contains_key(&env.agent_id) {
        debug!(tick = now, agent_id = %env.agent_id, "Envelope for unknown agent dropped");
        return;
    }
    w.record.actions.push(env.clone());
    let agent_id = &env.agent_id;

    if env.tick.saturating_add(STALE_WINDOW_TICKS) < now || env.tick > now {
        let ev = Event::action_err(now, "ACT", ErrorCode::Stale, "act tick out of range");
        w.emit(agent_id.as_str(), ev);
        return;
    }

    for task_id in &env.cancel {
        let ev = cancel_task(w, agent_id, task_id.as_str(), now);
        w.emit(agent_id.as_str(), ev);
    }

    for req in &env.instants {
        let outcome = match w.instants.get(req.kind.as_str()).copied() {
            Some(handler) => handler(w, agent_id, req, now),
            None => Err(Rejection::new(ErrorCode::BadRequest, "unknown instant type")),
        };
        if let Err(e) = &outcome {
            debug!(tick = now, agent_id = %agent_id, kind = %req.kind, code = e.code.as_str(), "Instant rejected");
        }
        let ev = result_event(now, &req.id, outcome);
        w.emit(agent_id.as_str(), ev);
    }

    for req in &env.tasks {
        let outcome = match w.tasks.get(req.kind.as_str()).copied() {
            Some(handler) => handler(w, agent_id, req, now),
            None => Err(Rejection::new(ErrorCode::BadRequest, "unknown task type")),
        };
        if let Err(e) = &outcome {
            debug!(tick = now, agent_id = %agent_id, kind = %req.kind, code = e.code.as_str(), "Task rejected");
        }
        let ev = result_event(now, &req.id, outcome);
        w.emit(agent_id.as_str(), ev);
    }
}

fn cancel_task(w: &mut World, agent_id: &AgentId, task_id: &str, now: u64) -> Event {
    let Some(a) = w.agents.get_mut(agent_id) else {
        return Event::action_err(now, task_id, ErrorCode::InvalidTarget, "task not found");
    };
    if a.move_task.as_ref().is_some_and(|t| t.task_id == *task_id) {
        a.move_task = None;
        return Event::action_ok(now, task_id, "canceled");
    }
    if a.work_task.as_ref().is_some_and(|t| t.task_id == *task_id) {
        a.work_task = None;
        return Event::action_ok(now, task_id, "canceled");
    }
    Event::action_err(now, task_id, ErrorCode::InvalidTarget, "task not found")
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// Position of the acting agent.
pub(crate) fn actor_pos(w: &World, agent_id: &str) -> Result<Vec3i, Rejection> {
    w.agents
        .get(agent_id)
        .map(|a| a.pos)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))
}

/// Charge one use of the `kind` rate window.
pub(crate) fn rate_limit(w: &mut World, agent_id: &str, kind: &str, now: u64) -> Result<(), Rejection> {
    let spec = w.cfg.rate_limit(kind);
    let a = w
        .agents
        .get_mut(agent_id)
        .ok_or_else(|| Rejection::new(ErrorCode::InvalidTarget, "agent not found"))?;
    a.rate_limit(kind, now, spec)
        .map_err(|cooldown| Rejection::rate_limited(cooldown, now))
}

/// Fail with `E_BLOCKED` when `pos` is beyond `reach` of the agent.
pub(crate) fn within_reach(w: &World, agent_id: &str, pos: Vec3i, reach: u32) -> Result<(), Rejection> {
    if actor_pos(w, agent_id)?.manhattan(pos) > reach {
        return Err(Rejection::new(ErrorCode::Blocked, "too far"));
    }
    Ok(())
}

/// Require a non-empty string field.
pub(crate) fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, Rejection> {
    let v = value.trim();
    if v.is_empty() {
        return Err(Rejection::new(ErrorCode::BadRequest, format!("missing {what}")));
    }
    Ok(v)
}

/// Positive count as `u32`, or `default` when zero.
pub(crate) fn positive_count(count: i64, default: u32) -> Result<u32, Rejection> {
    if count == 0 {
        return Ok(default);
    }
    u32::try_from(count)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| Rejection::new(ErrorCode::BadRequest, "bad count"))
}
