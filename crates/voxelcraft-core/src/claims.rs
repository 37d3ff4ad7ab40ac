//! Land lookups and permission checks.

use voxelcraft_agents::governance::time_of_day;
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_agents::{LandClaim, Permissions, agent::bump};
use voxelcraft_types::{ErrorCode, LandId, OrgKind, Vec3i};

use crate::world::World;

/// RepLaw at or below which an agent is barred from city cores.
pub const WANTED_REP_LAW: i32 = 100;

impl World {
    /// The claim covering `pos`, smallest land id first.
    pub fn land_at(&self, pos: Vec3i) -> Option<&LandClaim> {
        self.claims.values().find(|c| c.contains(pos))
    }

    /// Owner, listed member, or member of the owning org.
    pub fn is_land_member(&self, agent_id: &str, land: &LandClaim) -> bool {
        land.owner == agent_id
            || land.members.contains(agent_id)
            || self.orgs.get(land.owner.as_str()).is_some_and(|o| o.is_member(agent_id))
    }

    /// Owner, or leader/officer of the owning org.
    pub fn is_land_admin(&self, agent_id: &str, land: &LandClaim) -> bool {
        land.owner == agent_id || self.orgs.get(land.owner.as_str()).is_some_and(|o| o.is_admin(agent_id))
    }

    /// Effective permissions of `agent_id` at `pos`.
    pub fn permissions_for(&self, agent_id: &str, pos: Vec3i) -> (Option<&LandClaim>, Permissions) {
        match self.land_at(pos) {
            None => (None, Permissions::WILD),
            Some(land) => (Some(land), land.permissions(self.is_land_member(agent_id, land))),
        }
    }

    fn curfew_blocks(&self, land: Option<&LandClaim>, now: u64) -> bool {
        land.is_some_and(|l| l.curfew_active(time_of_day(now, self.cfg.day_ticks)))
    }

    /// Whether `agent_id` may place a block at `pos` at tick `now`.
    pub fn can_build_at(&self, agent_id: &str, pos: Vec3i, now: u64) -> bool {
        let (land, perms) = self.permissions_for(agent_id, pos);
        perms.can_build && !self.curfew_blocks(land, now)
    }

    /// Whether `agent_id` may break the block at `pos` at tick `now`.
    pub fn can_break_at(&self, agent_id: &str, pos: Vec3i, now: u64) -> bool {
        let (land, perms) = self.permissions_for(agent_id, pos);
        perms.can_break && !self.curfew_blocks(land, now)
    }

    /// Whether `agent_id` may trade while standing at `pos`.
    pub fn can_trade_at(&self, agent_id: &str, pos: Vec3i) -> bool {
        self.permissions_for(agent_id, pos).1.can_trade
    }

    /// Whether `agent_id` may take items from a container at `pos`.
    /// Members always may; visitors only once the land has lapsed into
    /// maintenance stage 2.
    pub fn can_withdraw_at(&self, agent_id: &str, pos: Vec3i) -> bool {
        self.land_at(pos)
            .is_none_or(|land| land.maintenance_stage >= 2 || self.is_land_member(agent_id, land))
    }

    /// Whether any claim other than `except` overlaps the square.
    pub fn claim_overlaps(&self, anchor: Vec3i, radius: i32, except: Option<&LandId>) -> bool {
        self.claims
            .values()
            .filter(|c| except != Some(&c.land_id))
            .any(|c| c.overlaps(anchor, radius))
    }

    /// Whether a wanted agent may not step from `from` to `to`: `to` lies
    /// in the core of land owned by a CITY org the agent is not a member
    /// of, and `from` is outside that core. Leaving or moving within the
    /// core stays allowed.
    pub fn wanted_blocked(&self, agent_id: &str, from: Vec3i, to: Vec3i) -> bool {
        let Some(agent) = self.agents.get(agent_id) else {
            return false;
        };
        if agent.rep.law > WANTED_REP_LAW {
            return false;
        }
        let Some(land) = self.land_at(to) else {
            return false;
        };
        let core = self.cfg.access_pass_core_radius;
        let city = self
            .orgs
            .get(land.owner.as_str())
            .is_some_and(|o| o.kind == OrgKind::City);
        city && land.core_contains(to, core) && !land.core_contains(from, core) && !self.is_land_member(agent_id, land)
    }

    /// Record a permission denial: RepLaw −1 and a conflict sample.
    pub fn deny(&mut self, agent_id: &str, now: u64) -> ErrorCode {
        if let Some(a) = self.agents.get_mut(agent_id) {
            bump(&mut a.rep.law, -1);
        }
        self.stats.record_denied(now);
        ErrorCode::NoPermission
    }

    /// Items owed to the owner of `land_id`: the owning agent's inventory
    /// or the owning org's treasury for this world. Returns `false` when
    /// the owner no longer exists.
    pub fn pay_land_owner(&mut self, land_id: &LandId, items: &Inventory) -> bool {
        let Some(owner) = self.claims.get(land_id).map(|c| c.owner.clone()) else {
            return false;
        };
        if items.is_empty() {
            return true;
        }
        if let Some(a) = self.agents.get_mut(owner.as_str()) {
            return inventory::add_all(&mut a.inventory, items).is_ok();
        }
        let world_id = self.cfg.id.clone();
        if let Some(org) = self.orgs.get_mut(owner.as_str()) {
            return inventory::add_all(org.treasury_mut(&world_id), items).is_ok();
        }
        false
    }

    /// Remove the claim anchored at `anchor` together with its laws.
    pub fn remove_claim_at(&mut self, anchor: Vec3i, actor: &str, reason: &str) -> Option<LandId> {
        let land_id = self
            .claims
            .values()
            .find(|c| c.anchor == anchor)
            .map(|c| c.land_id.clone())?;
        self.claims.remove(&land_id);
        self.laws.retain(|_, l| l.land_id != land_id);
        let entry = self
            .audit_entry(actor, "CLAIM_REMOVE", anchor, reason)
            .detail("land_id", land_id.as_str());
        self.audit(entry);
        tracing::info!(tick = self.tick(), land_id = %land_id, reason, "Claim removed");
        Some(land_id)
    }

    /// Whether the totem at the claim anchor is still present.
    pub fn totem_present(&self, land: &LandClaim) -> bool {
        self.block_is(land.anchor, "CLAIM_TOTEM")
    }
}
