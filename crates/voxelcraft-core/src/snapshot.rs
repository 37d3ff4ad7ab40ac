//! Snapshot codec, version 1.
//!
//! A snapshot is a plain serde value: header, the full configuration,
//! world dynamics, counters, stats, and every entity collection as a
//! vector sorted by its key. Export drops what a restored world could not
//! use: stale block metadata, dead stacks, expired memory, and resume
//! tokens. Import is strict on the identity fields and resumes at the
//! tick after the one recorded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use voxelcraft_agents::{Agent, LandClaim, Law, Memory, Organization, Trade};
use voxelcraft_types::{Vec3i, Weather};

use crate::config::WorldConfig;
use crate::entities::{Board, BoardPost, Container, Contract, Conveyor, ItemEntity, Sign, Structure, parse_entity_id};
use crate::error::SnapshotError;
use crate::stats::WorldStats;
use crate::world::{ActiveEvent, Counters, TickRecord, World};

/// Codec version written and accepted.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Codec version.
    pub version: u32,
    /// World id.
    pub world_id: String,
    /// Last tick whose effects are included.
    pub tick: u64,
}

/// One materialized chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    /// Chunk x index.
    pub cx: i32,
    /// Chunk z index.
    pub cz: i32,
    /// Palette indices, row-major `(z, x)`.
    pub blocks: Vec<u16>,
}

/// A sign and its cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignSnapshot {
    /// Block position.
    pub pos: Vec3i,
    /// Sign contents.
    #[serde(flatten)]
    pub sign: Sign,
}

/// A conveyor and its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConveyorSnapshot {
    /// Block position.
    pub pos: Vec3i,
    /// Direction.
    #[serde(flatten)]
    pub dir: Conveyor,
}

/// A switch and its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchSnapshot {
    /// Block position.
    pub pos: Vec3i,
    /// Whether it is on.
    pub on: bool,
}

/// A bulletin board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    /// `BULLETIN_BOARD@x,y,z`.
    pub board_id: String,
    /// Posts, oldest first.
    pub posts: Vec<BoardPost>,
}

/// Version 1 world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotV1 {
    /// Header.
    pub header: SnapshotHeader,
    /// Configuration in force, including the generation seed.
    pub config: WorldConfig,
    /// Weather.
    pub weather: Weather,
    /// Tick the weather rotates.
    pub weather_until_tick: u64,
    /// Running world event.
    #[serde(default)]
    pub active_event: Option<ActiveEvent>,
    /// Id counters.
    pub counters: Counters,
    /// Director stats ring.
    pub stats: WorldStats,
    /// Materialized chunks.
    pub chunks: Vec<ChunkSnapshot>,
    /// Agents by id.
    pub agents: Vec<Agent>,
    /// Containers by position.
    pub containers: Vec<Container>,
    /// Live dropped stacks by id.
    pub items: Vec<ItemEntity>,
    /// Signs by position.
    pub signs: Vec<SignSnapshot>,
    /// Conveyors by position.
    pub conveyors: Vec<ConveyorSnapshot>,
    /// Switches by position.
    pub switches: Vec<SwitchSnapshot>,
    /// Pending trades.
    pub trades: Vec<Trade>,
    /// Boards by id.
    pub boards: Vec<BoardSnapshot>,
    /// Contracts.
    pub contracts: Vec<Contract>,
    /// Laws.
    pub laws: Vec<Law>,
    /// Organizations.
    pub orgs: Vec<Organization>,
    /// Land claims.
    pub claims: Vec<LandClaim>,
    /// Finished structures.
    pub structures: Vec<Structure>,
}

impl SnapshotV1 {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Snapshot tick.
    pub const fn tick(&self) -> u64 {
        self.header.tick
    }
}

fn mismatch(field: &'static str, snapshot: impl ToString, world: impl ToString) -> SnapshotError {
    SnapshotError::Mismatch {
        field,
        snapshot: snapshot.to_string(),
        world: world.to_string(),
    }
}

impl World {
    /// Capture the world as of the end of `tick`.
    pub fn export_snapshot(&self, tick: u64) -> SnapshotV1 {
        let agents = self
            .agents
            .values()
            .map(|a| {
                let mut a = a.clone();
                let live = a.memory.live(tick).map(|(k, e)| (k.clone(), e.clone())).collect();
                a.memory = Memory::load_entries(live);
                a.resume_token.clear();
                a.pending_memory = None;
                a
            })
            .collect();

        SnapshotV1 {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                world_id: self.cfg.id.clone(),
                tick,
            },
            config: self.cfg.clone(),
            weather: self.weather,
            weather_until_tick: self.weather_until_tick,
            active_event: self.active_event.clone(),
            counters: self.counters,
            stats: self.stats.clone(),
            chunks: self
                .chunks
                .chunks()
                .map(|c| ChunkSnapshot {
                    cx: c.cx,
                    cz: c.cz,
                    blocks: c.blocks().to_vec(),
                })
                .collect(),
            agents,
            containers: self
                .containers
                .values()
                .filter(|c| self.block_is(c.pos, &c.kind))
                .cloned()
                .collect(),
            items: self.items.values().filter(|e| e.is_live(tick)).cloned().collect(),
            signs: self
                .signs
                .iter()
                .filter(|(p, _)| self.block_is(**p, "SIGN"))
                .map(|(pos, sign)| SignSnapshot {
                    pos: *pos,
                    sign: sign.clone(),
                })
                .collect(),
            conveyors: self
                .conveyors
                .iter()
                .filter(|(p, _)| self.block_is(**p, "CONVEYOR"))
                .map(|(pos, dir)| ConveyorSnapshot { pos: *pos, dir: *dir })
                .collect(),
            switches: self
                .switches
                .iter()
                .filter(|(p, _)| self.block_is(**p, "SWITCH"))
                .map(|(pos, on)| SwitchSnapshot { pos: *pos, on: *on })
                .collect(),
            trades: self.trades.values().cloned().collect(),
            boards: self
                .boards
                .iter()
                .filter(|(id, _)| parse_entity_id(id).is_some_and(|(kind, p)| self.block_is(p, kind)))
                .map(|(id, b)| BoardSnapshot {
                    board_id: id.clone(),
                    posts: b.posts.clone(),
                })
                .collect(),
            contracts: self.contracts.values().cloned().collect(),
            laws: self.laws.values().cloned().collect(),
            orgs: self.orgs.values().cloned().collect(),
            claims: self.claims.values().cloned().collect(),
            structures: self.structures.values().cloned().collect(),
        }
    }

    /// Replace this world's state with a snapshot.
    ///
    /// The version and the identity fields (seed, height, day length,
    /// observation radius, boundary) must match this world's
    /// configuration. Clients are detached and the world resumes at the
    /// tick after the snapshot's.
    pub fn import_snapshot(&mut self, snap: SnapshotV1) -> Result<(), SnapshotError> {
        if snap.header.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snap.header.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        let (s, c) = (&snap.config, &self.cfg);
        if s.seed != c.seed {
            return Err(mismatch("seed", s.seed, c.seed));
        }
        if s.height != c.height {
            return Err(mismatch("height", s.height, c.height));
        }
        if s.day_ticks != c.day_ticks {
            return Err(mismatch("day_ticks", s.day_ticks, c.day_ticks));
        }
        if s.obs_radius != c.obs_radius {
            return Err(mismatch("obs_radius", s.obs_radius, c.obs_radius));
        }
        if s.boundary_r != c.boundary_r {
            return Err(mismatch("boundary_r", s.boundary_r, c.boundary_r));
        }

        self.chunks.reset(self.cfg.seed, &self.catalogs)?;
        for ch in snap.chunks {
            self.chunks.import_chunk(ch.cx, ch.cz, ch.blocks)?;
        }

        let world_id = self.cfg.id.clone();
        self.agents = snap
            .agents
            .into_iter()
            .map(|mut a| {
                a.restore_defaults(&world_id);
                (a.id.clone(), a)
            })
            .collect();
        self.clients.clear();
        self.containers = snap.containers.into_iter().map(|c| (c.pos, c)).collect();
        self.items = BTreeMap::new();
        self.items_by_pos = BTreeMap::new();
        for e in snap.items {
            self.items_by_pos.entry(e.pos).or_default().insert(e.id.clone());
            self.items.insert(e.id.clone(), e);
        }
        self.signs = snap.signs.into_iter().map(|s| (s.pos, s.sign)).collect();
        self.conveyors = snap.conveyors.into_iter().map(|c| (c.pos, c.dir)).collect();
        self.switches = snap.switches.into_iter().map(|s| (s.pos, s.on)).collect();
        self.trades = snap.trades.into_iter().map(|t| (t.trade_id.clone(), t)).collect();
        self.boards = snap
            .boards
            .into_iter()
            .map(|b| (b.board_id, Board { posts: b.posts }))
            .collect();
        self.contracts = snap.contracts.into_iter().map(|c| (c.contract_id.clone(), c)).collect();
        self.laws = snap.laws.into_iter().map(|l| (l.law_id.clone(), l)).collect();
        self.orgs = snap.orgs.into_iter().map(|o| (o.org_id.clone(), o)).collect();
        self.claims = snap.claims.into_iter().map(|c| (c.land_id.clone(), c)).collect();
        self.structures = snap
            .structures
            .into_iter()
            .map(|s| (s.structure_id.clone(), s))
            .collect();

        self.weather = snap.weather;
        self.weather_until_tick = snap.weather_until_tick;
        self.active_event = snap.active_event;
        self.counters = snap.counters;
        for org_id in self.orgs.keys() {
            self.counters.note_org(org_id);
        }
        self.stats = snap.stats;
        self.dedupe = crate::dedupe::ActDedupe::default();
        self.record = TickRecord::default();
        self.set_tick(snap.header.tick.saturating_add(1));
        info!(
            world_id = %self.cfg.id,
            snapshot_tick = snap.header.tick,
            agents = self.agents.len(),
            chunks = self.chunks.materialized(),
            "Snapshot imported"
        );
        Ok(())
    }
}
