//! Moving agents between worlds and syncing org membership.
//!
//! A transfer-out extracts a self-contained [`AgentTransfer`] and removes
//! the agent. A transfer-in installs it in the target world, reconciles
//! the org it carries, and starts the world-switch cooldown. Org records
//! can also be pushed wholesale by an external coordinator through
//! [`World::org_meta_upsert`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use voxelcraft_agents::{Agent, Inventory, Organization};
use voxelcraft_types::{AgentId, Event, EventKind, OrgId, OrgKind, OrgRole, Welcome};

use crate::error::EngineError;
use crate::world::{ClientOut, SPAWN_SEARCH_RADIUS, World};

/// Org membership as carried between worlds. Treasuries stay behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgTransfer {
    /// Org id.
    pub org_id: OrgId,
    /// Guild or city.
    pub kind: OrgKind,
    /// Display name.
    pub name: String,
    /// Tick the org was founded.
    pub created_tick: u64,
    /// Membership version.
    pub meta_version: u64,
    /// Members and roles.
    pub members: BTreeMap<AgentId, OrgRole>,
}

impl OrgTransfer {
    /// Membership view of `org`.
    pub fn of(org: &Organization) -> Self {
        Self {
            org_id: org.org_id.clone(),
            kind: org.kind,
            name: org.name.clone(),
            created_tick: org.created_tick,
            meta_version: org.meta_version,
            members: org.members.clone(),
        }
    }

    fn into_org(self) -> Organization {
        Organization {
            org_id: self.org_id,
            kind: self.kind,
            name: self.name,
            created_tick: self.created_tick,
            meta_version: self.meta_version,
            members: self.members,
            legacy_treasury: Inventory::new(),
            treasury_by_world: BTreeMap::new(),
        }
    }
}

/// Everything needed to recreate an agent in another world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTransfer {
    /// World the agent left.
    pub from_world_id: String,
    /// Tick it left at.
    pub from_tick: u64,
    /// The agent.
    pub agent: Agent,
    /// Its org, if any.
    #[serde(default)]
    pub org: Option<OrgTransfer>,
}

impl World {
    /// Extract and remove an agent.
    ///
    /// Fails for unknown agents and agents still on world-switch
    /// cooldown. Open trades involving the agent are dropped.
    pub fn transfer_out(&mut self, agent_id: &AgentId) -> Result<AgentTransfer, EngineError> {
        let now = self.tick();
        let a = self
            .agents
            .get(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.clone()))?;
        if now < a.world_switch_cooldown_until {
            return Err(EngineError::SwitchCooldown {
                agent_id: agent_id.clone(),
                until: a.world_switch_cooldown_until,
            });
        }
        let org = self.org_of(agent_id.as_str()).map(OrgTransfer::of);
        let pos = a.pos;
        let mut agent = self
            .remove_agent(agent_id)
            .ok_or_else(|| EngineError::UnknownAgent(agent_id.clone()))?;
        agent.resume_token.clear();
        agent.pending_memory = None;

        let entry = self
            .audit_entry(agent_id.as_str(), "TRANSFER_OUT", pos, "WORLD_SWITCH")
            .detail("org_id", org.as_ref().map_or("", |o| o.org_id.as_str()));
        self.audit(entry);
        info!(tick = now, agent_id = %agent_id, world_id = %self.cfg.id, "Agent transferred out");
        Ok(AgentTransfer {
            from_world_id: self.cfg.id.clone(),
            from_tick: now,
            agent,
            org,
        })
    }

    /// Install a transferred agent and bind its client.
    ///
    /// The agent lands where it stood if that cell is walkable here,
    /// otherwise at the nearest open cell to the origin. Its tasks are
    /// dropped and the world-switch cooldown starts now.
    pub fn transfer_in(
        &mut self,
        transfer: AgentTransfer,
        tx: Option<mpsc::Sender<Vec<u8>>>,
        delta_voxels: bool,
    ) -> Result<Welcome, EngineError> {
        let now = self.tick();
        let AgentTransfer {
            from_world_id,
            agent: mut a,
            org,
            ..
        } = transfer;
        if self.agents.contains_key(&a.id) {
            return Err(EngineError::AgentExists(a.id));
        }
        let agent_id = a.id.clone();

        a.pos = if self.walkable(a.pos) {
            a.pos
        } else {
            self.find_spawn_air(0, 0, SPAWN_SEARCH_RADIUS)
        };
        a.spawn_pos = a.pos;
        a.move_task = None;
        a.work_task = None;
        a.restore_defaults(&self.cfg.id);
        self.cfg.id.clone_into(&mut a.current_world_id);
        a.world_switch_cooldown_until = now.saturating_add(self.cfg.switch_cooldown_ticks);
        a.resume_token = self.new_resume_token();
        let token = a.resume_token.clone();
        let pos = a.pos;
        self.agents.insert(agent_id.clone(), a);

        if let Some(org) = org {
            self.merge_transferred_org(org, &agent_id);
        }
        self.reconcile_org_id(&agent_id);
        if let Some(tx) = tx {
            self.clients.insert(agent_id.clone(), ClientOut::new(tx, delta_voxels));
        }
        let to_world = self.cfg.id.clone();
        self.emit(
            agent_id.as_str(),
            Event::new(now, EventKind::WorldSwitch)
                .with("from_world", from_world_id.as_str())
                .with("to_world", to_world.as_str()),
        );
        if let Some(ev) = self.active_event_notice(now) {
            self.emit(agent_id.as_str(), ev);
        }
        let entry = self
            .audit_entry(agent_id.as_str(), "TRANSFER_IN", pos, "WORLD_SWITCH")
            .detail("from_world", from_world_id.as_str());
        self.audit(entry);
        info!(tick = now, agent_id = %agent_id, from_world = %from_world_id, world_id = %to_world, "Agent transferred in");
        Ok(self.welcome(&agent_id, &token))
    }

    /// Fold an org carried by an arriving agent into the local record:
    /// create it if unknown, otherwise union the members and keep the
    /// higher version. The arriving agent is kept as a member.
    fn merge_transferred_org(&mut self, incoming: OrgTransfer, agent_id: &AgentId) {
        let role = incoming.members.get(agent_id).copied().unwrap_or_default();
        self.counters.note_org(&incoming.org_id);
        let org = self
            .orgs
            .entry(incoming.org_id.clone())
            .or_insert_with(|| incoming.clone().into_org());
        if org.meta_version < incoming.meta_version {
            org.kind = incoming.kind;
            org.name.clone_from(&incoming.name);
            org.meta_version = incoming.meta_version;
        }
        for (member, r) in incoming.members {
            org.members.entry(member).or_insert(r);
        }
        org.members.entry(agent_id.clone()).or_insert(role);
    }

    /// Membership view of every org, in id order.
    pub fn org_meta_snapshot(&self) -> Vec<OrgTransfer> {
        self.orgs.values().map(OrgTransfer::of).collect()
    }

    /// Apply authoritative org records.
    ///
    /// An incoming record wins when its version is at least the local one;
    /// it replaces the member set but leaves treasuries alone. Afterwards
    /// every agent's org pointer is recomputed from membership.
    pub fn org_meta_upsert(&mut self, orgs: Vec<OrgTransfer>) {
        let now = self.tick();
        let mut applied = 0_usize;
        for incoming in orgs {
            match self.orgs.get_mut(&incoming.org_id) {
                Some(local) if incoming.meta_version < local.meta_version => continue,
                Some(local) => {
                    local.kind = incoming.kind;
                    local.name = incoming.name;
                    local.created_tick = incoming.created_tick;
                    local.meta_version = incoming.meta_version;
                    local.members = incoming.members;
                }
                None => {
                    self.counters.note_org(&incoming.org_id);
                    self.orgs.insert(incoming.org_id.clone(), incoming.into_org());
                }
            }
            applied = applied.saturating_add(1);
        }
        let ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        for agent_id in ids {
            self.reconcile_org_id(&agent_id);
        }
        info!(tick = now, applied, "Org meta upserted");
    }

    /// Point an agent at the smallest org id that lists it, or nothing.
    fn reconcile_org_id(&mut self, agent_id: &AgentId) {
        let owner = self
            .orgs
            .values()
            .find(|o| o.is_member(agent_id.as_str()))
            .map(|o| o.org_id.clone());
        if let Some(a) = self.agents.get_mut(agent_id) {
            a.org_id = owner;
        }
    }
}
