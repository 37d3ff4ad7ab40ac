//! The world state owned by one world task.
//!
//! [`World`] holds every entity map, the block store, and the injected
//! sinks. Only the owner task touches it; everything observable from
//! outside goes through [`crate::runtime::WorldHandle`]. Maps are
//! `BTreeMap`s so iteration order is the sorted key order that the digest
//! and snapshot codec rely on.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::{Agent, LandClaim, Law, Organization, Trade};
use voxelcraft_types::{
    ActionEnvelope, AgentId, ContractId, Event, EventKind, ItemEntityId, LandId, LawId, OrgId,
    StructureId, TradeId, Vec3i, Weather, Welcome, yaw_to_dir,
};
use voxelcraft_world::{Catalogs, ChunkStore, WorldError};

use crate::actions::{self, InstantHandler, TaskHandler};
use crate::audit::{AuditEntry, RecordedJoin, TickEntry};
use crate::config::WorldConfig;
use crate::dedupe::ActDedupe;
use crate::entities::{
    Board, CONTAINER_KINDS, Container, Contract, Conveyor, ITEM_ENTITY_TTL_TICKS, ItemEntity, Sign,
    Structure, entity_id, parse_entity_id,
};
use crate::error::EngineError;
use crate::snapshot::SnapshotV1;
use crate::stats::WorldStats;

/// Search radius around the nominal spawn tile.
pub const SPAWN_SEARCH_RADIUS: i32 = 8;

/// Actor recorded for changes not made by an agent.
pub const WORLD_ACTOR: &str = "WORLD";

/// Monotonic id counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Agents joined.
    pub agent: u64,
    /// Tasks started.
    pub task: u64,
    /// Land claims.
    pub land: u64,
    /// Trades offered.
    pub trade: u64,
    /// Board posts.
    pub post: u64,
    /// Contracts posted.
    pub contract: u64,
    /// Laws proposed.
    pub law: u64,
    /// Orgs founded.
    pub org: u64,
    /// Dropped stacks.
    pub item: u64,
}

impl Counters {
    /// Bump a counter and return the new value.
    pub fn next(slot: &mut u64) -> u64 {
        *slot = slot.saturating_add(1);
        *slot
    }

    /// Raise the org counter past an org id that arrived from elsewhere.
    pub fn note_org(&mut self, org_id: &OrgId) {
        if let Some(n) = org_id.ordinal() {
            self.org = self.org.max(n);
        }
    }
}

/// The running world event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEvent {
    /// Event template id.
    pub id: String,
    /// Tick it started.
    pub start_tick: u64,
    /// First tick it is no longer active.
    pub ends_tick: u64,
    /// Event disk center.
    pub center: Vec3i,
    /// Event disk radius; zero when the event has no location.
    pub radius: i32,
    /// `agent:goal` keys already awarded.
    #[serde(default)]
    pub goals: BTreeSet<String>,
}

impl ActiveEvent {
    /// Whether the event is still running at `now`.
    pub const fn is_live(&self, now: u64) -> bool {
        now < self.ends_tick
    }

    /// Whether `pos` is inside the event disk.
    pub fn contains(&self, pos: Vec3i) -> bool {
        self.radius > 0 && pos.dist2_xz(self.center) <= i64::from(self.radius).saturating_mul(i64::from(self.radius))
    }
}

/// A connected client's output buffer.
#[derive(Debug)]
pub struct ClientOut {
    /// Encoded OBS frames.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// Whether the client wants voxel deltas instead of full slabs.
    pub delta_voxels: bool,
    /// Last slab sent, for delta encoding.
    pub last_voxels: Option<Vec<u16>>,
    /// Center of the last slab sent.
    pub last_center: Option<Vec3i>,
}

impl ClientOut {
    /// A fresh binding.
    pub const fn new(tx: mpsc::Sender<Vec<u8>>, delta_voxels: bool) -> Self {
        Self {
            tx,
            delta_voxels,
            last_voxels: None,
            last_center: None,
        }
    }
}

/// Injected sinks. All writes are `try_send`.
#[derive(Debug, Clone, Default)]
pub struct Sinks {
    /// Snapshot archive.
    pub snapshots: Option<mpsc::Sender<SnapshotV1>>,
    /// Audit log.
    pub audit: Option<mpsc::Sender<AuditEntry>>,
    /// Per-tick replay log.
    pub ticks: Option<mpsc::Sender<TickEntry>>,
}

/// Requests applied during the current tick, for the tick log.
#[derive(Debug, Clone, Default)]
pub(crate) struct TickRecord {
    pub joins: Vec<RecordedJoin>,
    pub leaves: Vec<AgentId>,
    pub actions: Vec<ActionEnvelope>,
}

/// The authoritative state of one world.
#[derive(Debug)]
pub struct World {
    /// Normalized configuration.
    pub cfg: WorldConfig,
    /// Content catalogs.
    pub catalogs: Arc<Catalogs>,
    /// Block store.
    pub chunks: ChunkStore,
    tick: u64,
    tick_mirror: Arc<AtomicU64>,

    /// Current weather.
    pub weather: Weather,
    /// Tick at which the weather rotates.
    pub weather_until_tick: u64,
    /// Running world event.
    pub active_event: Option<ActiveEvent>,
    /// Id counters.
    pub counters: Counters,

    /// Agents by id.
    pub agents: BTreeMap<AgentId, Agent>,
    /// Connected clients by agent id.
    pub clients: BTreeMap<AgentId, ClientOut>,
    /// Containers by block position.
    pub containers: BTreeMap<Vec3i, Container>,
    /// Dropped stacks by id.
    pub items: BTreeMap<ItemEntityId, ItemEntity>,
    /// Dropped stack ids by cell.
    pub items_by_pos: BTreeMap<Vec3i, BTreeSet<ItemEntityId>>,
    /// Sign texts by block position.
    pub signs: BTreeMap<Vec3i, Sign>,
    /// Conveyor directions by block position.
    pub conveyors: BTreeMap<Vec3i, Conveyor>,
    /// Switch states by block position.
    pub switches: BTreeMap<Vec3i, bool>,
    /// Pending trades.
    pub trades: BTreeMap<TradeId, Trade>,
    /// Boards by board id.
    pub boards: BTreeMap<String, Board>,
    /// Contracts.
    pub contracts: BTreeMap<ContractId, Contract>,
    /// Laws.
    pub laws: BTreeMap<LawId, Law>,
    /// Organizations.
    pub orgs: BTreeMap<OrgId, Organization>,
    /// Land claims.
    pub claims: BTreeMap<LandId, LandClaim>,
    /// Finished structures.
    pub structures: BTreeMap<StructureId, Structure>,

    /// Director statistics.
    pub stats: WorldStats,
    /// Act-id dedupe table.
    pub dedupe: ActDedupe,
    /// Injected sinks.
    pub sinks: Sinks,

    pub(crate) instants: BTreeMap<&'static str, InstantHandler>,
    pub(crate) tasks: BTreeMap<&'static str, TaskHandler>,
    pub(crate) record: TickRecord,
}

fn check_table<V>(
    table: &'static str,
    handlers: &BTreeMap<&'static str, V>,
    supported: &[&'static str],
) -> Result<(), EngineError> {
    let want: BTreeSet<&str> = supported.iter().copied().collect();
    let have: BTreeSet<&str> = handlers.keys().copied().collect();
    let missing: Vec<String> = want.difference(&have).map(|s| (*s).to_owned()).collect();
    let extra: Vec<String> = have.difference(&want).map(|s| (*s).to_owned()).collect();
    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(EngineError::DispatchMismatch { table, missing, extra })
    }
}

impl World {
    /// Build a world at tick 0.
    ///
    /// The configuration is normalized first. Fails if the configuration
    /// is invalid, worldgen cannot find its blocks, or the dispatch tables
    /// disagree with the supported action sets.
    pub fn new(cfg: WorldConfig, catalogs: Arc<Catalogs>) -> Result<Self, EngineError> {
        let cfg = cfg.normalized();
        cfg.validate()?;
        let instants = actions::instant_handlers();
        let tasks = actions::task_handlers();
        check_table("instants", &instants, actions::SUPPORTED_INSTANTS)?;
        check_table("tasks", &tasks, actions::SUPPORTED_TASKS)?;

        let chunks = ChunkStore::new(cfg.seed, cfg.boundary_r, cfg.worldgen, &catalogs)?;
        let stats = WorldStats::new(cfg.stats_bucket_ticks, cfg.stats_window_ticks);
        info!(world_id = %cfg.id, seed = cfg.seed, boundary_r = cfg.boundary_r, "World created");
        Ok(Self {
            cfg,
            catalogs,
            chunks,
            tick: 0,
            tick_mirror: Arc::new(AtomicU64::new(0)),
            weather: Weather::Clear,
            weather_until_tick: 0,
            active_event: None,
            counters: Counters::default(),
            agents: BTreeMap::new(),
            clients: BTreeMap::new(),
            containers: BTreeMap::new(),
            items: BTreeMap::new(),
            items_by_pos: BTreeMap::new(),
            signs: BTreeMap::new(),
            conveyors: BTreeMap::new(),
            switches: BTreeMap::new(),
            trades: BTreeMap::new(),
            boards: BTreeMap::new(),
            contracts: BTreeMap::new(),
            laws: BTreeMap::new(),
            orgs: BTreeMap::new(),
            claims: BTreeMap::new(),
            structures: BTreeMap::new(),
            stats,
            dedupe: ActDedupe::default(),
            sinks: Sinks::default(),
            instants,
            tasks,
            record: TickRecord::default(),
        })
    }

    /// Attach sinks.
    #[must_use]
    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    /// Current tick.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Shared read-only mirror of the tick counter.
    pub fn tick_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.tick_mirror)
    }

    pub(crate) fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
        self.tick_mirror.store(tick, Ordering::Release);
    }

    /// World id.
    pub fn id(&self) -> &str {
        &self.cfg.id
    }

    // -----------------------------------------------------------------------
    // Events and audit
    // -----------------------------------------------------------------------

    /// Record an event for one agent. Unknown agents are ignored.
    pub fn emit(&mut self, agent_id: &str, event: Event) {
        if let Some(a) = self.agents.get_mut(agent_id) {
            a.push_event(event);
        }
    }

    /// Record an event for every agent.
    pub fn broadcast(&mut self, event: &Event) {
        for a in self.agents.values_mut() {
            a.push_event(event.clone());
        }
    }

    /// Offer an audit entry to the audit sink.
    pub fn audit(&self, entry: AuditEntry) {
        let Some(tx) = &self.sinks.audit else {
            return;
        };
        match tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                warn!(tick = self.tick, action = %e.action, "Audit sink full, entry dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(tick = self.tick, "Audit sink closed");
            }
        }
    }

    /// Audit entry stamped with the current tick.
    pub fn audit_entry(&self, actor: &str, action: &str, pos: Vec3i, reason: &str) -> AuditEntry {
        AuditEntry::new(self.tick, actor, action, pos, reason)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub(crate) fn new_resume_token(&self) -> String {
        format!("resume_{}_{}", self.cfg.id, uuid::Uuid::new_v4().simple())
    }

    /// Welcome message for `agent_id`.
    pub fn welcome(&self, agent_id: &AgentId, resume_token: &str) -> Welcome {
        Welcome {
            agent_id: agent_id.clone(),
            resume_token: resume_token.to_owned(),
            world_id: self.cfg.id.clone(),
            tick: self.tick,
            tick_rate_hz: self.cfg.tick_rate_hz,
            day_ticks: self.cfg.day_ticks,
            obs_radius: self.cfg.obs_radius,
            block_palette: self.catalogs.palette_names(),
        }
    }

    /// First AIR cell on growing square rings around `(x, z)`, scanning
    /// each ring by rows of increasing `z`. Falls back to `(x, z)`.
    pub fn find_spawn_air(&self, x: i32, z: i32, max_r: i32) -> Vec3i {
        let air = self.chunks.air();
        for r in 0..=max_r.max(0) {
            for dz in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dz.abs() != r {
                        continue;
                    }
                    let p = Vec3i::flat(x.saturating_add(dx), z.saturating_add(dz));
                    if self.chunks.in_bounds(p) && self.chunks.get(p) == air {
                        return p;
                    }
                }
            }
        }
        Vec3i::flat(x, z)
    }

    /// Spawn cell for the `n`-th agent: open ground near `(2n, -2n)`.
    pub(crate) fn spawn_for(&self, n: u64) -> Vec3i {
        let nominal = i32::try_from(n.saturating_mul(2)).unwrap_or(i32::MAX);
        self.find_spawn_air(nominal, nominal.saturating_neg(), SPAWN_SEARCH_RADIUS)
    }

    /// Create an agent with the starter kit and bind its client.
    pub fn join(&mut self, name: &str, delta_voxels: bool, tx: Option<mpsc::Sender<Vec<u8>>>) -> Welcome {
        let now = self.tick;
        let n = Counters::next(&mut self.counters.agent);
        let agent_id = AgentId::from_counter(n);
        let spawn = self.spawn_for(n);

        let mut starter = Inventory::new();
        for (item, count) in self.cfg.starter() {
            if item.is_empty() || count == 0 {
                continue;
            }
            // Starter counts come from config and cannot overflow a fresh map.
            let _ = inventory::add(&mut starter, &item, count);
        }
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut agent = Agent::new(agent_id.clone(), &name, spawn, &self.cfg.id, starter);
        agent.resume_token = self.new_resume_token();
        let token = agent.resume_token.clone();
        self.agents.insert(agent_id.clone(), agent);

        self.fun_on_biome(&agent_id, now);
        if let Some(ev) = self.active_event_notice(now) {
            self.emit(agent_id.as_str(), ev);
        }
        if let Some(tx) = tx {
            self.clients.insert(agent_id.clone(), ClientOut::new(tx, delta_voxels));
        }
        self.record.joins.push(RecordedJoin {
            agent_id: agent_id.clone(),
            name,
        });
        info!(tick = now, agent_id = %agent_id, pos = %spawn, "Agent joined");
        self.welcome(&agent_id, &token)
    }

    /// Rebind an existing agent's output buffer and rotate its token.
    pub fn attach(
        &mut self,
        agent_id: &AgentId,
        delta_voxels: bool,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Welcome, EngineError> {
        let now = self.tick;
        let token = self.new_resume_token();
        let world_id = self.cfg.id.clone();
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.clone()))?;
        agent.current_world_id = world_id;
        token.clone_into(&mut agent.resume_token);
        self.clients.insert(agent_id.clone(), ClientOut::new(tx, delta_voxels));
        if let Some(ev) = self.active_event_notice(now) {
            self.emit(agent_id.as_str(), ev);
        }
        debug!(tick = now, agent_id = %agent_id, "Client attached");
        Ok(self.welcome(agent_id, &token))
    }

    /// Detach the client. The agent stays in the world.
    pub fn leave(&mut self, agent_id: &AgentId) {
        if self.clients.remove(agent_id).is_some() {
            debug!(tick = self.tick, agent_id = %agent_id, "Client detached");
        }
        self.record.leaves.push(agent_id.clone());
    }

    /// Remove an agent, its client, and every trade it is party to.
    pub fn remove_agent(&mut self, agent_id: &AgentId) -> Option<Agent> {
        self.clients.remove(agent_id);
        self.trades.retain(|_, t| !t.involves(agent_id.as_str()));
        self.agents.remove(agent_id)
    }

    /// `WORLD_EVENT` notice for the running event, if any.
    pub fn active_event_notice(&self, now: u64) -> Option<Event> {
        let ev = self.active_event.as_ref().filter(|e| e.is_live(now))?;
        let tpl = self.catalogs.event_templates.get(&ev.id)?;
        let mut out = Event::new(now, EventKind::WorldEvent)
            .with("event_id", ev.id.as_str())
            .with("title", tpl.title.as_str())
            .with("summary", tpl.description.as_str())
            .with("ends_tick", ev.ends_tick);
        if ev.radius > 0 {
            out = out.with_pos("center", ev.center).with("radius", ev.radius);
        }
        Some(out)
    }

    /// The running event id, if live at the current tick.
    pub fn live_event(&self) -> Option<&ActiveEvent> {
        self.active_event.as_ref().filter(|e| e.is_live(self.tick))
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Palette index at `pos`.
    pub fn block_at(&self, pos: Vec3i) -> u16 {
        self.chunks.get(pos)
    }

    /// Block name at `pos`.
    pub fn block_name_at(&self, pos: Vec3i) -> &str {
        self.catalogs.block_name(self.chunks.get(pos))
    }

    /// Whether the block at `pos` is `name`.
    pub fn block_is(&self, pos: Vec3i, name: &str) -> bool {
        self.block_name_at(pos) == name
    }

    /// Whether an agent could stand at `pos`.
    pub fn walkable(&self, pos: Vec3i) -> bool {
        self.chunks.in_bounds(pos) && !self.catalogs.is_solid(self.chunks.get(pos))
    }

    /// Write a block and audit the change. Writing the same block is a
    /// no-op.
    pub fn set_block(&mut self, pos: Vec3i, block: u16, actor: &str, reason: &str) -> Result<(), WorldError> {
        let from = self.chunks.get(pos);
        if from == block && self.chunks.in_bounds(pos) {
            return Ok(());
        }
        self.chunks.set(pos, block)?;
        let entry = self
            .audit_entry(actor, "SET_BLOCK", pos, reason)
            .detail("from", self.catalogs.block_name(from))
            .detail("to", self.catalogs.block_name(block));
        self.audit(entry);
        Ok(())
    }

    /// Set a block by name.
    pub fn set_block_named(&mut self, pos: Vec3i, name: &str, actor: &str, reason: &str) -> Result<(), WorldError> {
        let id = self
            .catalogs
            .block_id(name)
            .ok_or_else(|| WorldError::MissingBlock(name.to_owned()))?;
        self.set_block(pos, id, actor, reason)
    }

    /// Create runtime metadata for a freshly placed block.
    pub fn instantiate_block_meta(&mut self, pos: Vec3i, block: &str, yaw: i32) {
        match block {
            b if CONTAINER_KINDS.contains(&b) => {
                self.containers.entry(pos).or_insert_with(|| Container::new(b, pos));
            }
            "BULLETIN_BOARD" => {
                self.boards.entry(entity_id("BULLETIN_BOARD", pos)).or_default();
            }
            "SIGN" => {
                self.signs.entry(pos).or_default();
            }
            "CONVEYOR" => {
                let (dx, dz) = yaw_to_dir(yaw);
                self.conveyors.insert(pos, Conveyor::facing(dx, dz));
            }
            "SWITCH" => {
                self.switches.entry(pos).or_insert(false);
            }
            _ => {}
        }
    }

    /// Drop non-container metadata at `pos`, auditing each removal.
    pub fn remove_block_meta(&mut self, pos: Vec3i, actor: &str, reason: &str) {
        if self.signs.remove(&pos).is_some() {
            self.audit(self.audit_entry(actor, "SIGN_REMOVE", pos, reason));
        }
        if self.conveyors.remove(&pos).is_some() {
            self.audit(self.audit_entry(actor, "CONVEYOR_REMOVE", pos, reason));
        }
        if self.switches.remove(&pos).is_some() {
            self.audit(self.audit_entry(actor, "SWITCH_REMOVE", pos, reason));
        }
        self.boards.remove(&entity_id("BULLETIN_BOARD", pos));
    }

    // -----------------------------------------------------------------------
    // Containers
    // -----------------------------------------------------------------------

    /// Container whose block still matches its kind.
    pub fn live_container(&self, pos: Vec3i) -> Option<&Container> {
        self.containers.get(&pos).filter(|c| self.block_is(pos, &c.kind))
    }

    /// Resolve a `KIND@x,y,z` container id to its position.
    pub fn container_pos(&self, id: &str) -> Option<Vec3i> {
        let (kind, pos) = parse_entity_id(id)?;
        let c = self.live_container(pos)?;
        (c.kind == kind).then_some(pos)
    }

    /// Live containers of `kind` within Chebyshev `range` of `pos`.
    pub fn containers_near(&self, pos: Vec3i, range: i32, kind: &str) -> Vec<Vec3i> {
        let r = range.unsigned_abs();
        self.containers
            .values()
            .filter(|c| c.kind == kind)
            .filter(|c| c.pos.x.abs_diff(pos.x) <= r && c.pos.z.abs_diff(pos.z) <= r)
            .filter(|c| self.block_is(c.pos, &c.kind))
            .map(|c| c.pos)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Dropped items
    // -----------------------------------------------------------------------

    /// Drop `count` of `item` at `pos`, merging with a live stack of the
    /// same item on that cell.
    pub fn spawn_item(&mut self, pos: Vec3i, item: &str, count: u32, actor: &str, reason: &str) -> Option<ItemEntityId> {
        if item.is_empty() || count == 0 {
            return None;
        }
        let now = self.tick;
        let expires_tick = now.saturating_add(ITEM_ENTITY_TTL_TICKS);
        let existing = self
            .items_by_pos
            .get(&pos)
            .into_iter()
            .flatten()
            .find(|id| self.items.get(*id).is_some_and(|e| e.item == item && e.is_live(now)))
            .cloned();
        let id = if let Some(id) = existing {
            if let Some(e) = self.items.get_mut(&id) {
                e.count = e.count.saturating_add(count);
                e.expires_tick = expires_tick;
            }
            id
        } else {
            let id = ItemEntityId::from_counter(Counters::next(&mut self.counters.item));
            self.items.insert(
                id.clone(),
                ItemEntity {
                    id: id.clone(),
                    pos,
                    item: item.to_owned(),
                    count,
                    created_tick: now,
                    expires_tick,
                },
            );
            self.items_by_pos.entry(pos).or_default().insert(id.clone());
            id
        };
        let entry = self
            .audit_entry(actor, "ITEM_SPAWN", pos, reason)
            .detail("entity_id", id.as_str())
            .detail("item", item)
            .detail("count", count);
        self.audit(entry);
        Some(id)
    }

    /// Remove a dropped stack from both indexes.
    pub fn remove_item(&mut self, id: &ItemEntityId) -> Option<ItemEntity> {
        let e = self.items.remove(id)?;
        if let Some(set) = self.items_by_pos.get_mut(&e.pos) {
            set.remove(id);
            if set.is_empty() {
                self.items_by_pos.remove(&e.pos);
            }
        }
        Some(e)
    }

    /// Drop expired or empty stacks.
    pub fn purge_expired_items(&mut self, now: u64) {
        let dead: Vec<ItemEntityId> = self
            .items
            .values()
            .filter(|e| !e.is_live(now))
            .map(|e| e.id.clone())
            .collect();
        for id in dead {
            self.remove_item(&id);
        }
    }

    /// Live stacks at `pos`, in id order.
    pub fn items_at(&self, pos: Vec3i) -> Vec<ItemEntityId> {
        let now = self.tick;
        self.items_by_pos
            .get(&pos)
            .into_iter()
            .flatten()
            .filter(|id| self.items.get(*id).is_some_and(|e| e.is_live(now)))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Position of an agent, dropped stack, or block entity by id.
    pub fn entity_pos(&self, id: &str) -> Option<Vec3i> {
        if let Some(a) = self.agents.get(id) {
            return Some(a.pos);
        }
        if let Some(e) = self.items.get(id) {
            return e.is_live(self.tick).then_some(e.pos);
        }
        parse_entity_id(id).map(|(_, pos)| pos)
    }

    /// Org owning an agent, if the membership is consistent.
    pub fn org_of(&self, agent_id: &str) -> Option<&Organization> {
        let org_id = self.agents.get(agent_id)?.org_id.as_ref()?;
        self.orgs.get(org_id).filter(|o| o.is_member(agent_id))
    }

    // -----------------------------------------------------------------------
    // Sinks
    // -----------------------------------------------------------------------

    /// Take the requests recorded since the last tick entry.
    pub(crate) fn take_record(&mut self, digest: String) -> TickEntry {
        let rec = std::mem::take(&mut self.record);
        TickEntry {
            tick: self.tick,
            digest,
            joins: rec.joins,
            leaves: rec.leaves,
            actions: rec.actions,
        }
    }

    /// Offer a tick entry to the tick sink.
    pub(crate) fn offer_tick_entry(&self, entry: TickEntry) {
        let Some(tx) = &self.sinks.ticks else {
            return;
        };
        if let Err(TrySendError::Full(e)) = tx.try_send(entry) {
            warn!(tick = e.tick, "Tick sink full, entry dropped");
        }
    }

    /// Offer a snapshot to the snapshot sink.
    pub(crate) fn offer_snapshot(&self, snap: SnapshotV1) -> Result<(), EngineError> {
        let Some(tx) = &self.sinks.snapshots else {
            return Ok(());
        };
        match tx.try_send(snap) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::SnapshotBackpressure),
            Err(TrySendError::Closed(_)) => {
                warn!(tick = self.tick, "Snapshot sink closed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn world() -> World {
        let cats = Arc::new(Catalogs::builtin().unwrap());
        World::new(WorldConfig::default(), cats).unwrap()
    }

    #[test]
    fn join_assigns_sequential_ids_and_starter_kit() {
        let mut w = world();
        let a = w.join("alice", false, None);
        let b = w.join("  bob   smith ", false, None);
        assert_eq!(a.agent_id.as_str(), "A1");
        assert_eq!(b.agent_id.as_str(), "A2");
        let bob = w.agents.get("A2").unwrap();
        assert_eq!(bob.name, "bob smith");
        assert_eq!(inventory::count(&bob.inventory, "PLANK"), 20);
        assert!(w.walkable(bob.pos));
        assert!(a.resume_token.starts_with("resume_OVERWORLD_"));
    }

    #[test]
    fn spawn_search_finds_air_near_origin() {
        let w = world();
        let p = w.find_spawn_air(0, 0, 8);
        assert_eq!(p, Vec3i::ZERO);
    }

    #[test]
    fn attach_rotates_token_and_leave_keeps_agent() {
        let mut w = world();
        let welcome = w.join("alice", false, None);
        let (tx, _rx) = mpsc::channel(4);
        let again = w.attach(&welcome.agent_id, true, tx).unwrap();
        assert_ne!(again.resume_token, welcome.resume_token);
        assert!(w.clients.get("A1").is_some_and(|c| c.delta_voxels));
        w.leave(&welcome.agent_id);
        assert!(w.clients.is_empty());
        assert!(w.agents.contains_key("A1"));
        assert!(w.attach(&AgentId::from("A9"), false, mpsc::channel(1).0).is_err());
    }

    #[test]
    fn dropped_stacks_merge_on_the_same_cell() {
        let mut w = world();
        let p = Vec3i::flat(3, 3);
        let a = w.spawn_item(p, "COAL", 2, WORLD_ACTOR, "TEST").unwrap();
        let b = w.spawn_item(p, "COAL", 3, WORLD_ACTOR, "TEST").unwrap();
        assert_eq!(a, b);
        assert_eq!(w.items.get(&a).map(|e| e.count), Some(5));
        let c = w.spawn_item(p, "PLANK", 1, WORLD_ACTOR, "TEST").unwrap();
        assert_ne!(a, c);
        assert_eq!(w.items_at(p).len(), 2);
        w.remove_item(&a);
        assert_eq!(w.items_at(p), vec![c]);
    }

    #[test]
    fn expired_stacks_are_purged() {
        let mut w = world();
        let id = w.spawn_item(Vec3i::ZERO, "COAL", 1, WORLD_ACTOR, "TEST").unwrap();
        w.purge_expired_items(ITEM_ENTITY_TTL_TICKS - 1);
        assert!(w.items.contains_key(&id));
        w.purge_expired_items(ITEM_ENTITY_TTL_TICKS);
        assert!(w.items.is_empty());
        assert!(w.items_by_pos.is_empty());
    }

    #[test]
    fn placed_meta_follows_block_type() {
        let mut w = world();
        let p = Vec3i::flat(1, 1);
        w.set_block_named(p, "CHEST", "A1", "PLACE").unwrap();
        w.instantiate_block_meta(p, "CHEST", 0);
        assert_eq!(w.container_pos("CHEST@1,0,1"), Some(p));
        assert_eq!(w.container_pos("FURNACE@1,0,1"), None);
        w.set_block_named(p, "AIR", "A1", "MINE").unwrap();
        assert!(w.live_container(p).is_none());

        let q = Vec3i::flat(2, 2);
        w.instantiate_block_meta(q, "CONVEYOR", 270);
        assert_eq!(w.conveyors.get(&q), Some(&Conveyor { dx: 1, dz: 0 }));
        w.remove_block_meta(q, "A1", "MINE");
        assert!(w.conveyors.is_empty());
    }

    #[test]
    fn audit_sink_receives_block_changes() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut w = world().with_sinks(Sinks {
            audit: Some(tx),
            ..Sinks::default()
        });
        w.set_block_named(Vec3i::flat(5, 5), "STONE", "A1", "PLACE").unwrap();
        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.action, "SET_BLOCK");
        assert_eq!(entry.details.get("to").and_then(|v| v.as_str()), Some("STONE"));
    }
}
