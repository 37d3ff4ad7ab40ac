//! Organizations: membership, roles, and per-world treasuries.
//!
//! An org may span several worlds, so its treasury is bucketed by world
//! id. Orgs written before bucketing carry a single legacy treasury; the
//! first bucket ever opened inherits it once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use voxelcraft_types::{AgentId, OrgId, OrgKind, OrgRole};

use crate::inventory::Inventory;

/// Longest accepted org name, in characters.
pub const MAX_ORG_NAME_LEN: usize = 40;

/// Bucket used when the world id is empty.
pub const GLOBAL_WORLD: &str = "GLOBAL";

/// A guild or city.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    /// Org id.
    pub org_id: OrgId,
    /// Guild or city.
    pub kind: OrgKind,
    /// Display name.
    pub name: String,
    /// Tick the org was founded.
    pub created_tick: u64,
    /// Bumped on every membership change.
    pub meta_version: u64,
    /// Members and their roles.
    pub members: BTreeMap<AgentId, OrgRole>,
    /// Pre-bucketing treasury, migrated on first access.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub legacy_treasury: Inventory,
    /// Treasury per world id.
    #[serde(default)]
    pub treasury_by_world: BTreeMap<String, Inventory>,
}

/// Result of removing a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The agent was not a member.
    NotMember,
    /// The member left; the org survives unchanged otherwise.
    Left,
    /// The leader left and leadership passed to this member.
    LeaderPassed(AgentId),
    /// The last member left; the org should be deleted.
    Emptied,
}

impl Organization {
    /// A new org with `leader` as its only member.
    pub fn found(org_id: OrgId, kind: OrgKind, name: &str, leader: AgentId, now: u64) -> Self {
        Self {
            org_id,
            kind,
            name: name.to_owned(),
            created_tick: now,
            meta_version: 1,
            members: BTreeMap::from([(leader, OrgRole::Leader)]),
            legacy_treasury: Inventory::new(),
            treasury_by_world: BTreeMap::new(),
        }
    }

    /// Whether `agent` belongs to the org.
    pub fn is_member(&self, agent: &str) -> bool {
        self.members.contains_key(agent)
    }

    /// Whether `agent` is a leader or officer.
    pub fn is_admin(&self, agent: &str) -> bool {
        self.members.get(agent).is_some_and(|r| r.is_admin())
    }

    /// Add `agent` as a plain member.
    pub fn join(&mut self, agent: AgentId) {
        self.members.insert(agent, OrgRole::Member);
        self.meta_version = self.meta_version.saturating_add(1);
    }

    /// Remove `agent`, passing leadership to the smallest remaining member
    /// id if the leader left.
    pub fn leave(&mut self, agent: &str) -> LeaveOutcome {
        let Some(role) = self.members.remove(agent) else {
            return LeaveOutcome::NotMember;
        };
        self.meta_version = self.meta_version.saturating_add(1);
        if self.members.is_empty() {
            return LeaveOutcome::Emptied;
        }
        if role != OrgRole::Leader {
            return LeaveOutcome::Left;
        }
        let Some((next, slot)) = self.members.iter_mut().next() else {
            return LeaveOutcome::Emptied;
        };
        *slot = OrgRole::Leader;
        let next = next.clone();
        self.meta_version = self.meta_version.saturating_add(1);
        LeaveOutcome::LeaderPassed(next)
    }

    /// Treasury bucket for `world_id`, creating it on first use.
    pub fn treasury_mut(&mut self, world_id: &str) -> &mut Inventory {
        let key = if world_id.is_empty() { GLOBAL_WORLD } else { world_id };
        if !self.treasury_by_world.contains_key(key) {
            let seed = if self.treasury_by_world.is_empty() {
                std::mem::take(&mut self.legacy_treasury)
            } else {
                Inventory::new()
            };
            self.treasury_by_world.insert(key.to_owned(), seed);
        }
        self.treasury_by_world.entry(key.to_owned()).or_default()
    }

    /// Treasury bucket for `world_id`, read-only. A missing bucket reads
    /// as the legacy treasury if no bucket exists yet.
    pub fn treasury(&self, world_id: &str) -> &Inventory {
        let key = if world_id.is_empty() { GLOBAL_WORLD } else { world_id };
        match self.treasury_by_world.get(key) {
            Some(t) => t,
            None if self.treasury_by_world.is_empty() => &self.legacy_treasury,
            None => &EMPTY,
        }
    }
}

static EMPTY: Inventory = Inventory::new();

/// Normalize an org name: trimmed, inner whitespace collapsed.
pub fn normalize_org_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `name` is acceptable once normalized.
pub fn valid_org_name(name: &str) -> bool {
    let n = normalize_org_name(name);
    !n.is_empty() && n.chars().count() <= MAX_ORG_NAME_LEN
}
