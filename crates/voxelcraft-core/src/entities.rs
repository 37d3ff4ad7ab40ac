//! World-scoped entities: containers, dropped stacks, signs, conveyors,
//! boards, contracts, and finished structures.
//!
//! Block-bound entities are identified by `KIND@x,y,z`. Their runtime
//! metadata lives beside the block grid and is only trusted while the
//! block at the position still has the matching type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::AgentError;
use voxelcraft_types::{AgentId, ContractId, ContractKind, ContractState, ItemEntityId, PostId, StructureId, Vec3i};

/// Ticks a dropped stack stays on the ground.
pub const ITEM_ENTITY_TTL_TICKS: u64 = 6000;

/// Posts kept per bulletin board; the oldest are dropped first.
pub const MAX_BOARD_POSTS: usize = 200;

/// Block types that carry container inventories.
pub const CONTAINER_KINDS: [&str; 3] = ["CHEST", "FURNACE", "CONTRACT_TERMINAL"];

/// `KIND@x,y,z` for a block-bound entity.
pub fn entity_id(kind: &str, pos: Vec3i) -> String {
    format!("{kind}@{},{},{}", pos.x, pos.y, pos.z)
}

/// Split a `KIND@x,y,z` id.
pub fn parse_entity_id(id: &str) -> Option<(&str, Vec3i)> {
    let (kind, coords) = id.split_once('@')?;
    let mut parts = coords.split(',').map(|p| p.trim().parse::<i32>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() || kind.is_empty() {
        return None;
    }
    Some((kind, Vec3i::new(x, y, z)))
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// A chest, furnace, or contract terminal.
///
/// `reserved` is escrow and never exceeds `inventory`; only the difference
/// is available to transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Block type.
    pub kind: String,
    /// Block position.
    pub pos: Vec3i,
    /// Stored items.
    #[serde(default)]
    pub inventory: Inventory,
    /// Escrowed items.
    #[serde(default)]
    pub reserved: Inventory,
    /// Items owed to agents, claimable at the terminal.
    #[serde(default)]
    pub owed: BTreeMap<AgentId, Inventory>,
}

impl Container {
    /// An empty container.
    pub fn new(kind: &str, pos: Vec3i) -> Self {
        Self {
            kind: kind.to_owned(),
            pos,
            inventory: Inventory::new(),
            reserved: Inventory::new(),
            owed: BTreeMap::new(),
        }
    }

    /// `KIND@x,y,z`.
    pub fn id(&self) -> String {
        entity_id(&self.kind, self.pos)
    }

    /// Units of `item` not held in escrow.
    pub fn available(&self, item: &str) -> u32 {
        inventory::count(&self.inventory, item).saturating_sub(inventory::count(&self.reserved, item))
    }

    /// Whether every stack is available.
    pub fn has_available(&self, items: &Inventory) -> bool {
        items.iter().all(|(item, n)| self.available(item) >= *n)
    }

    /// Move available items out.
    pub fn take_available(&mut self, item: &str, n: u32) -> Result<(), AgentError> {
        let available = self.available(item);
        if available < n {
            return Err(AgentError::InsufficientItem {
                item: item.to_owned(),
                requested: n,
                available,
            });
        }
        inventory::remove(&mut self.inventory, item, n)
    }

    /// Deposit items and hold them in escrow.
    pub fn deposit_reserved(&mut self, items: &Inventory) -> Result<(), AgentError> {
        inventory::add_all(&mut self.inventory, items)?;
        inventory::add_all(&mut self.reserved, items)
    }

    /// Release escrow and remove the items from the container.
    pub fn withdraw_reserved(&mut self, items: &Inventory) -> Result<(), AgentError> {
        inventory::remove_all(&mut self.reserved, items)?;
        inventory::remove_all(&mut self.inventory, items)
    }

    /// Convert escrow into items owed to `agent`. The items stay in the
    /// container until claimed.
    pub fn reserve_as_owed(&mut self, agent: &AgentId, items: &Inventory) -> Result<(), AgentError> {
        inventory::remove_all(&mut self.reserved, items)?;
        inventory::add_all(&mut self.reserved, items)?;
        let owed = self.owed.entry(agent.clone()).or_default();
        inventory::add_all(owed, items)
    }

    /// Items owed to `agent`, removed from the owed table.
    pub fn take_owed(&mut self, agent: &str) -> Option<Inventory> {
        self.owed.remove(agent).filter(|m| !m.is_empty())
    }

    /// Whether anything is stored.
    pub fn is_empty(&self) -> bool {
        self.inventory.values().all(|n| *n == 0)
    }
}

// ---------------------------------------------------------------------------
// Dropped stacks
// ---------------------------------------------------------------------------

/// A stack lying on the ground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntity {
    /// Entity id.
    pub id: ItemEntityId,
    /// Cell it lies on.
    pub pos: Vec3i,
    /// Item id.
    pub item: String,
    /// Units.
    pub count: u32,
    /// Tick dropped.
    pub created_tick: u64,
    /// Tick at which it despawns.
    pub expires_tick: u64,
}

impl ItemEntity {
    /// Whether the stack still exists at `now`.
    pub const fn is_live(&self, now: u64) -> bool {
        self.count > 0 && (self.expires_tick == 0 || now < self.expires_tick)
    }
}

// ---------------------------------------------------------------------------
// Signs, conveyors, boards
// ---------------------------------------------------------------------------

/// Text on a sign block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Sign {
    /// Sign text.
    pub text: String,
    /// Last editor.
    #[serde(default)]
    pub updated_by: String,
    /// Tick of the last edit.
    #[serde(default)]
    pub updated_tick: u64,
}

/// Belt direction of a conveyor block; exactly one axis is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conveyor {
    /// X step.
    pub dx: i8,
    /// Z step.
    pub dz: i8,
}

impl Conveyor {
    /// A conveyor facing `(dx, dz)`, forced onto one cardinal axis.
    pub fn facing(dx: i32, dz: i32) -> Self {
        let dx = dx.clamp(-1, 1);
        let dz = if dx == 0 { dz.clamp(-1, 1) } else { 0 };
        let (dx, dz) = if dx == 0 && dz == 0 { (0, 1) } else { (dx, dz) };
        Self {
            dx: i8::try_from(dx).unwrap_or(0),
            dz: i8::try_from(dz).unwrap_or(1),
        }
    }

    /// Cell the belt pushes into.
    pub fn front(self, pos: Vec3i) -> Vec3i {
        pos.offset(i32::from(self.dx), 0, i32::from(self.dz))
    }

    /// Cell the belt pulls from.
    pub fn back(self, pos: Vec3i) -> Vec3i {
        pos.offset(-i32::from(self.dx), 0, -i32::from(self.dz))
    }
}

/// One bulletin post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPost {
    /// Post id.
    pub post_id: PostId,
    /// Author agent.
    pub author: AgentId,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// Tick posted.
    pub tick: u64,
}

impl BoardPost {
    /// Case-insensitive match against title or body.
    pub fn matches(&self, needle_lower: &str) -> bool {
        needle_lower.is_empty()
            || self.title.to_lowercase().contains(needle_lower)
            || self.body.to_lowercase().contains(needle_lower)
    }
}

/// A bulletin board, physical or virtual.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Board {
    /// Posts, oldest first.
    pub posts: Vec<BoardPost>,
}

impl Board {
    /// Append a post, dropping the oldest beyond the cap.
    pub fn push(&mut self, post: BoardPost) {
        self.posts.push(post);
        if self.posts.len() > MAX_BOARD_POSTS {
            let excess = self.posts.len().saturating_sub(MAX_BOARD_POSTS);
            self.posts.drain(..excess);
        }
    }

    /// Up to `limit` posts, newest first.
    pub fn newest(&self, limit: usize) -> impl Iterator<Item = &BoardPost> {
        self.posts.iter().rev().take(limit)
    }
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A posted job at a contract terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract id.
    pub contract_id: ContractId,
    /// Terminal position.
    pub terminal_pos: Vec3i,
    /// Poster.
    pub poster: AgentId,
    /// Acceptor, once accepted.
    #[serde(default)]
    pub acceptor: Option<AgentId>,
    /// GATHER, DELIVER, or BUILD.
    pub kind: ContractKind,
    /// Lifecycle state.
    pub state: ContractState,
    /// Items the acceptor must hand in.
    #[serde(default)]
    pub requirements: Inventory,
    /// Paid to the acceptor on completion.
    #[serde(default)]
    pub reward: Inventory,
    /// Returned to the poster on completion.
    #[serde(default)]
    pub deposit: Inventory,
    /// BUILD blueprint.
    #[serde(default)]
    pub blueprint_id: String,
    /// BUILD anchor.
    #[serde(default)]
    pub anchor: Vec3i,
    /// BUILD rotation.
    #[serde(default)]
    pub rotation: u8,
    /// Tick posted.
    pub created_tick: u64,
    /// Tick after which the contract lapses.
    pub deadline_tick: u64,
}

impl Contract {
    /// Reward plus deposit, the total held in escrow.
    pub fn escrow(&self) -> Result<Inventory, AgentError> {
        let mut total = self.reward.clone();
        inventory::add_all(&mut total, &self.deposit)?;
        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// Structures
// ---------------------------------------------------------------------------

/// A finished blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Structure {
    /// Structure id.
    pub structure_id: StructureId,
    /// Blueprint built.
    pub blueprint_id: String,
    /// Builder.
    pub builder: AgentId,
    /// Anchor.
    pub anchor: Vec3i,
    /// Rotation in quarter turns.
    pub rotation: u8,
    /// Bounding box minimum corner.
    pub min: Vec3i,
    /// Bounding box maximum corner.
    pub max: Vec3i,
    /// Tick finished.
    pub completed_tick: u64,
    /// Tick at which the creation award is checked.
    pub award_due_tick: u64,
    /// Whether the creation award was paid (or forfeited).
    #[serde(default)]
    pub awarded: bool,
    /// Agent id to last tick seen inside the box.
    #[serde(default)]
    pub used_by: BTreeMap<AgentId, u64>,
    /// Last day index an influence award was paid for.
    #[serde(default)]
    pub last_influence_day: u64,
}

impl Structure {
    /// Whether `pos` lies inside the bounding box grown by `margin`.
    pub const fn near(&self, pos: Vec3i, margin: i32) -> bool {
        pos.x >= self.min.x.saturating_sub(margin)
            && pos.x <= self.max.x.saturating_add(margin)
            && pos.z >= self.min.z.saturating_sub(margin)
            && pos.z <= self.max.z.saturating_add(margin)
    }

    /// Whether `pos` lies inside the bounding box.
    pub const fn contains(&self, pos: Vec3i) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }

    /// Distinct non-builder agents seen inside within the last `window`
    /// ticks.
    pub fn unique_users(&self, now: u64, window: u64) -> usize {
        let cutoff = now.saturating_sub(window);
        self.used_by
            .iter()
            .filter(|(id, last)| **id != self.builder && **last >= cutoff)
            .count()
    }
}
