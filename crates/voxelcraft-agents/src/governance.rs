//! Land claims, permission rules, and law templates.
//!
//! A claim covers the square `|dx| <= radius && |dz| <= radius` around its
//! totem anchor. Members (the owner, allow-listed agents, and members of an
//! owning org) may always build, break, and trade; visitors get the
//! claim's flags. Once maintenance lapses to stage 2 the claim is
//! unprotected and visitors are treated as if the land were wild.
//!
//! Laws are proposed against a claim with raw JSON parameters. The
//! parameters are canonicalized to strings at proposal time so that
//! digests never depend on float formatting; [`apply_law`] parses them
//! back when the law activates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voxelcraft_types::{AgentId, ClaimType, LandId, LawId, LawStatus, Vec3i, VoteChoice};

use crate::error::AgentError;
use crate::inventory::Inventory;

/// Radius of a fresh claim.
pub const DEFAULT_CLAIM_RADIUS: i32 = 32;

/// Largest claim radius.
pub const MAX_CLAIM_RADIUS: i32 = 128;

/// Core radius used when the configured one is zero.
pub const DEFAULT_CORE_RADIUS: i32 = 16;

/// Highest market tax a law may set.
pub const MAX_MARKET_TAX: f64 = 0.25;

/// Highest per-block fine.
pub const MAX_FINE_PER_BLOCK: u32 = 100;

/// Highest access ticket cost.
pub const MAX_TICKET_COST: u32 = 64;

/// Maintenance stage at which visitors regain wild permissions.
pub const STAGE_UNPROTECTED: u8 = 2;

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Visitor permission flags stored on a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClaimFlags {
    /// Visitors may place blocks.
    pub allow_build: bool,
    /// Visitors may break blocks.
    pub allow_break: bool,
    /// Anyone may deal damage.
    pub allow_damage: bool,
    /// Visitors may trade.
    pub allow_trade: bool,
}

impl ClaimFlags {
    /// Default visitor flags for a claim type.
    pub const fn defaults_for(claim_type: ClaimType) -> Self {
        match claim_type {
            ClaimType::CityCore => Self {
                allow_build: false,
                allow_break: false,
                allow_damage: false,
                allow_trade: true,
            },
            ClaimType::Default | ClaimType::Homestead => Self {
                allow_build: false,
                allow_break: false,
                allow_damage: false,
                allow_trade: false,
            },
        }
    }

    /// Apply a SET_PERMISSIONS policy. Unknown keys are ignored.
    #[must_use]
    pub fn with_policy(mut self, policy: &BTreeMap<String, bool>) -> Self {
        for (key, on) in policy {
            match key.as_str() {
                "allow_build" => self.allow_build = *on,
                "allow_break" => self.allow_break = *on,
                "allow_damage" => self.allow_damage = *on,
                "allow_trade" => self.allow_trade = *on,
                _ => {}
            }
        }
        self
    }
}

/// Claim type given to new claims in a world of `world_type`.
pub fn claim_type_for_world(world_type: &str) -> ClaimType {
    match world_type.trim().to_ascii_uppercase().as_str() {
        "OVERWORLD" => ClaimType::Homestead,
        "CITY_HUB" => ClaimType::CityCore,
        _ => ClaimType::Default,
    }
}

/// What an agent may do at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    /// May place blocks.
    pub can_build: bool,
    /// May break blocks.
    pub can_break: bool,
    /// May deal damage.
    pub can_damage: bool,
    /// May trade.
    pub can_trade: bool,
}

impl Permissions {
    /// Unclaimed land.
    pub const WILD: Self = Self {
        can_build: true,
        can_break: true,
        can_damage: false,
        can_trade: true,
    };
}

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// Fraction of the day elapsed at `tick`, in `[0, 1)`.
#[allow(clippy::cast_precision_loss)]
pub fn time_of_day(tick: u64, day_ticks: u64) -> f64 {
    if day_ticks == 0 {
        return 0.0;
    }
    (tick % day_ticks) as f64 / day_ticks as f64
}

/// Whether `t` lies in the half-open window `[start, end)`, wrapping past
/// midnight when `start > end`.
pub fn in_window(t: f64, start: f64, end: f64) -> bool {
    if start <= end {
        t >= start && t < end
    } else {
        t >= start || t < end
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// A land claim anchored on a claim totem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandClaim {
    /// Claim id.
    pub land_id: LandId,
    /// Owning agent id or org id.
    pub owner: String,
    /// Claim type.
    pub claim_type: ClaimType,
    /// Totem position.
    pub anchor: Vec3i,
    /// Half-width of the claimed square.
    pub radius: i32,
    /// Visitor flags.
    pub flags: ClaimFlags,
    /// Allow-listed agents.
    #[serde(default)]
    pub members: BTreeSet<AgentId>,
    /// Market tax rate in `[0, 0.25]`.
    #[serde(default)]
    pub market_tax: f64,
    /// Whether a build curfew is in force.
    #[serde(default)]
    pub curfew_enabled: bool,
    /// Curfew start as a day fraction.
    #[serde(default)]
    pub curfew_start: f64,
    /// Curfew end as a day fraction.
    #[serde(default)]
    pub curfew_end: f64,
    /// Whether visitors are fined for denied breaks.
    #[serde(default)]
    pub fine_break_enabled: bool,
    /// Fine item.
    #[serde(default)]
    pub fine_break_item: String,
    /// Fine per denied break.
    #[serde(default)]
    pub fine_break_per_block: u32,
    /// Whether entering the core costs a ticket.
    #[serde(default)]
    pub access_pass_enabled: bool,
    /// Ticket item.
    #[serde(default)]
    pub access_ticket_item: String,
    /// Ticket cost.
    #[serde(default)]
    pub access_ticket_cost: u32,
    /// Next maintenance charge.
    #[serde(default)]
    pub maintenance_due_tick: u64,
    /// 0 paid, 1 late, 2 unprotected.
    #[serde(default)]
    pub maintenance_stage: u8,
}

impl LandClaim {
    /// A fresh claim with the default flags for its type.
    pub fn new(land_id: LandId, owner: &str, claim_type: ClaimType, anchor: Vec3i, radius: i32, due_tick: u64) -> Self {
        Self {
            land_id,
            owner: owner.to_owned(),
            claim_type,
            anchor,
            radius,
            flags: ClaimFlags::defaults_for(claim_type),
            members: BTreeSet::new(),
            market_tax: 0.0,
            curfew_enabled: false,
            curfew_start: 0.0,
            curfew_end: 0.0,
            fine_break_enabled: false,
            fine_break_item: String::new(),
            fine_break_per_block: 0,
            access_pass_enabled: false,
            access_ticket_item: String::new(),
            access_ticket_cost: 0,
            maintenance_due_tick: due_tick,
            maintenance_stage: 0,
        }
    }

    /// Whether `pos` is inside the claimed square.
    pub const fn contains(&self, pos: Vec3i) -> bool {
        pos.x.abs_diff(self.anchor.x) <= self.radius.unsigned_abs()
            && pos.z.abs_diff(self.anchor.z) <= self.radius.unsigned_abs()
    }

    /// Core radius: the configured radius capped by the claim radius.
    pub fn core_radius(&self, configured: i32) -> i32 {
        let r = if configured <= 0 { DEFAULT_CORE_RADIUS } else { configured };
        r.min(self.radius).max(0)
    }

    /// Whether `pos` is inside the core square.
    pub fn core_contains(&self, pos: Vec3i, configured: i32) -> bool {
        let r = self.core_radius(configured);
        r > 0
            && pos.x.abs_diff(self.anchor.x) <= r.unsigned_abs()
            && pos.z.abs_diff(self.anchor.z) <= r.unsigned_abs()
    }

    /// Permissions for an agent, given whether it counts as a member.
    pub const fn permissions(&self, is_member: bool) -> Permissions {
        if is_member {
            return Permissions {
                can_build: true,
                can_break: true,
                can_damage: self.flags.allow_damage,
                can_trade: true,
            };
        }
        if self.maintenance_stage >= STAGE_UNPROTECTED {
            return Permissions::WILD;
        }
        Permissions {
            can_build: self.flags.allow_build,
            can_break: self.flags.allow_break,
            can_damage: self.flags.allow_damage,
            can_trade: self.flags.allow_trade,
        }
    }

    /// Whether the curfew forbids building at day fraction `t`.
    pub fn curfew_active(&self, t: f64) -> bool {
        self.curfew_enabled && in_window(t, self.curfew_start, self.curfew_end)
    }

    /// Whether another claim at `anchor` with `radius` would overlap this
    /// one, using the conservative box test.
    pub const fn overlaps(&self, anchor: Vec3i, radius: i32) -> bool {
        claims_overlap(self.anchor, self.radius, anchor, radius)
    }
}

/// Conservative box overlap between two claims.
pub const fn claims_overlap(a: Vec3i, ra: i32, b: Vec3i, rb: i32) -> bool {
    let reach = ra.unsigned_abs().saturating_add(rb.unsigned_abs());
    a.x.abs_diff(b.x) <= reach && a.z.abs_diff(b.z) <= reach
}

/// Clamp a requested claim radius to `1..=128`, defaulting to 32.
pub const fn clamp_claim_radius(r: i32) -> i32 {
    if r <= 0 {
        DEFAULT_CLAIM_RADIUS
    } else if r > MAX_CLAIM_RADIUS {
        MAX_CLAIM_RADIUS
    } else {
        r
    }
}

/// Items needed to grow a claim from `from` to `to`.
///
/// Only 32, 64, and 128 are valid radii. Returns `None` when the target
/// is not a larger valid radius.
pub fn upgrade_cost(from: i32, to: i32) -> Option<Inventory> {
    const STEPS: [(i32, u32, u32); 2] = [(64, 1, 2), (128, 2, 4)];
    if !matches!(to, 64 | 128) || to <= from {
        return None;
    }
    let mut battery = 0_u32;
    let mut shard = 0_u32;
    for (step_to, b, s) in STEPS {
        if step_to > from && step_to <= to {
            battery = battery.saturating_add(b);
            shard = shard.saturating_add(s);
        }
    }
    let mut cost = Inventory::new();
    if battery > 0 {
        cost.insert("BATTERY".to_owned(), battery);
    }
    if shard > 0 {
        cost.insert("CRYSTAL_SHARD".to_owned(), shard);
    }
    (!cost.is_empty()).then_some(cost)
}

// ---------------------------------------------------------------------------
// Laws
// ---------------------------------------------------------------------------

/// A law bound to a land claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Law {
    /// Law id.
    pub law_id: LawId,
    /// Bound claim.
    pub land_id: LandId,
    /// Template id.
    pub template_id: String,
    /// Display title.
    pub title: String,
    /// Canonical parameters.
    pub params: BTreeMap<String, String>,
    /// Proposer.
    pub proposed_by: AgentId,
    /// Tick proposed.
    pub proposed_tick: u64,
    /// Voting opens at this tick.
    pub notice_ends_tick: u64,
    /// Voting closes at this tick.
    pub vote_ends_tick: u64,
    /// Lifecycle state.
    pub status: LawStatus,
    /// Ballots by voter.
    #[serde(default)]
    pub votes: BTreeMap<AgentId, VoteChoice>,
}

impl Law {
    /// `(yes, no)` ballot counts.
    pub fn tally(&self) -> (u32, u32) {
        self.votes.values().fold((0, 0), |(yes, no), v| match v {
            VoteChoice::Yes => (yes.saturating_add(1), no),
            VoteChoice::No => (yes, no.saturating_add(1)),
            VoteChoice::Abstain => (yes, no),
        })
    }

    /// Strict majority of YES over NO.
    pub fn passes(&self) -> bool {
        let (yes, no) = self.tally();
        yes > no
    }
}

/// Render a float in its shortest round-trip decimal form.
pub fn canonical_float(f: f64) -> String {
    if f.abs() < f64::MIN_POSITIVE {
        "0".to_owned()
    } else {
        format!("{f}")
    }
}

fn missing(name: &str) -> AgentError {
    AgentError::InvalidParam {
        name: name.to_owned(),
        reason: "missing".to_owned(),
    }
}

fn param_f64(params: &BTreeMap<String, Value>, name: &str) -> Result<f64, AgentError> {
    let v = params.get(name).ok_or_else(|| missing(name))?;
    v.as_f64().filter(|f| f.is_finite()).ok_or_else(|| AgentError::InvalidParam {
        name: name.to_owned(),
        reason: "must be a number".to_owned(),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn param_count(params: &BTreeMap<String, Value>, name: &str, max: u32) -> Result<u32, AgentError> {
    let f = param_f64(params, name)?.trunc();
    Ok(if f <= 0.0 {
        0
    } else if f >= f64::from(max) {
        max
    } else {
        f as u32
    })
}

fn param_str(params: &BTreeMap<String, Value>, name: &str) -> Result<String, AgentError> {
    let v = params.get(name).ok_or_else(|| missing(name))?;
    v.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| AgentError::InvalidParam {
            name: name.to_owned(),
            reason: "must be a string".to_owned(),
        })
}

fn known_item(item: String, name: &str, item_exists: &dyn Fn(&str) -> bool) -> Result<String, AgentError> {
    if item_exists(&item) {
        Ok(item)
    } else {
        Err(AgentError::InvalidParam {
            name: name.to_owned(),
            reason: format!("unknown item {item}"),
        })
    }
}

/// Validate and canonicalize raw law parameters for `template_id`.
///
/// Numeric parameters are clamped into range; item parameters must name a
/// catalog item.
pub fn normalize_law_params(
    template_id: &str,
    params: &BTreeMap<String, Value>,
    item_exists: &dyn Fn(&str) -> bool,
) -> Result<BTreeMap<String, String>, AgentError> {
    let mut out = BTreeMap::new();
    match template_id {
        "MARKET_TAX" => {
            let f = param_f64(params, "market_tax")?.clamp(0.0, MAX_MARKET_TAX);
            out.insert("market_tax".to_owned(), canonical_float(f));
        }
        "CURFEW_NO_BUILD" => {
            let s = param_f64(params, "start_time")?.clamp(0.0, 1.0);
            let e = param_f64(params, "end_time")?.clamp(0.0, 1.0);
            out.insert("start_time".to_owned(), canonical_float(s));
            out.insert("end_time".to_owned(), canonical_float(e));
        }
        "FINE_BREAK_PER_BLOCK" => {
            let item = known_item(param_str(params, "fine_item")?, "fine_item", item_exists)?;
            let n = param_count(params, "fine_per_block", MAX_FINE_PER_BLOCK)?;
            out.insert("fine_item".to_owned(), item);
            out.insert("fine_per_block".to_owned(), n.to_string());
        }
        "ACCESS_PASS_CORE" => {
            let item = known_item(param_str(params, "ticket_item")?, "ticket_item", item_exists)?;
            let n = param_count(params, "ticket_cost", MAX_TICKET_COST)?;
            out.insert("ticket_item".to_owned(), item);
            out.insert("ticket_cost".to_owned(), n.to_string());
        }
        other => return Err(AgentError::UnknownTemplate(other.to_owned())),
    }
    Ok(out)
}

fn stored_f64(params: &BTreeMap<String, String>, name: &str) -> Result<f64, AgentError> {
    let raw = params.get(name).map(|s| s.trim()).filter(|s| !s.is_empty()).ok_or_else(|| missing(name))?;
    raw.parse::<f64>().map_err(|_parse| AgentError::InvalidParam {
        name: name.to_owned(),
        reason: format!("bad number {raw}"),
    })
}

fn stored_u32(params: &BTreeMap<String, String>, name: &str, max: u32) -> Result<u32, AgentError> {
    let raw = params.get(name).map(|s| s.trim()).filter(|s| !s.is_empty()).ok_or_else(|| missing(name))?;
    let n = raw.parse::<i64>().map_err(|_parse| AgentError::InvalidParam {
        name: name.to_owned(),
        reason: format!("bad count {raw}"),
    })?;
    Ok(u32::try_from(n.clamp(0, i64::from(max))).unwrap_or(max))
}

fn stored_item(params: &BTreeMap<String, String>, name: &str) -> Result<String, AgentError> {
    params
        .get(name)
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing(name))
}

/// Write an activated law's effects onto its claim.
///
/// On error the claim is left untouched.
pub fn apply_law(land: &mut LandClaim, template_id: &str, params: &BTreeMap<String, String>) -> Result<(), AgentError> {
    let mut next = land.clone();
    match template_id {
        "MARKET_TAX" => {
            next.market_tax = stored_f64(params, "market_tax")?.clamp(0.0, MAX_MARKET_TAX);
        }
        "CURFEW_NO_BUILD" => {
            let s = stored_f64(params, "start_time")?.clamp(0.0, 1.0);
            let e = stored_f64(params, "end_time")?.clamp(0.0, 1.0);
            let same = (s - e).abs() < f64::EPSILON;
            next.curfew_enabled = !same;
            next.curfew_start = if same { 0.0 } else { s };
            next.curfew_end = if same { 0.0 } else { e };
        }
        "FINE_BREAK_PER_BLOCK" => {
            let item = stored_item(params, "fine_item")?;
            let n = stored_u32(params, "fine_per_block", MAX_FINE_PER_BLOCK)?;
            next.fine_break_enabled = n > 0;
            next.fine_break_item = if n > 0 { item } else { String::new() };
            next.fine_break_per_block = n;
        }
        "ACCESS_PASS_CORE" => {
            let item = stored_item(params, "ticket_item")?;
            let n = stored_u32(params, "ticket_cost", MAX_TICKET_COST)?;
            next.access_pass_enabled = n > 0;
            next.access_ticket_item = if n > 0 { item } else { String::new() };
            next.access_ticket_cost = n;
        }
        other => return Err(AgentError::UnknownTemplate(other.to_owned())),
    }
    *land = next;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn claim(anchor: Vec3i, r: i32) -> LandClaim {
        LandClaim::new(LandId::from("LAND_A1_001"), "A1", ClaimType::Homestead, anchor, r, 0)
    }

    fn raw(v: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn visitors_get_flags_members_get_everything() {
        let c = claim(Vec3i::ZERO, 32);
        assert!(!c.permissions(false).can_build);
        assert!(c.permissions(true).can_build);
        assert!(!c.permissions(true).can_damage);

        let mut lapsed = c;
        lapsed.maintenance_stage = 2;
        assert_eq!(lapsed.permissions(false), Permissions::WILD);
    }

    #[test]
    fn city_core_visitors_may_trade() {
        let flags = ClaimFlags::defaults_for(claim_type_for_world("CITY_HUB"));
        assert!(flags.allow_trade);
        assert!(!flags.allow_build);
        assert_eq!(claim_type_for_world("OVERWORLD"), ClaimType::Homestead);
        assert_eq!(claim_type_for_world("MINE_LEVEL"), ClaimType::Default);
    }

    #[test]
    fn claim_square_and_core() {
        let c = claim(Vec3i::ZERO, 32);
        assert!(c.contains(Vec3i::flat(32, -32)));
        assert!(!c.contains(Vec3i::flat(33, 0)));
        assert!(c.core_contains(Vec3i::flat(9, 0), 16));
        assert!(!c.core_contains(Vec3i::flat(17, 0), 16));
        assert_eq!(claim(Vec3i::ZERO, 8).core_radius(0), 8);
    }

    #[test]
    fn overlap_uses_summed_radii() {
        let a = claim(Vec3i::ZERO, 32);
        assert!(!a.overlaps(Vec3i::flat(80, 0), 32));
        assert!(claims_overlap(Vec3i::ZERO, 64, Vec3i::flat(80, 0), 32));
    }

    #[test]
    fn upgrade_costs_are_cumulative() {
        let one = upgrade_cost(32, 64).unwrap();
        assert_eq!(one.get("BATTERY"), Some(&1));
        assert_eq!(one.get("CRYSTAL_SHARD"), Some(&2));
        let both = upgrade_cost(32, 128).unwrap();
        assert_eq!(both.get("BATTERY"), Some(&3));
        assert_eq!(both.get("CRYSTAL_SHARD"), Some(&6));
        assert!(upgrade_cost(64, 64).is_none());
        assert!(upgrade_cost(32, 96).is_none());
    }

    #[test]
    fn curfew_window_wraps() {
        assert!(in_window(0.95, 0.9, 0.1));
        assert!(in_window(0.05, 0.9, 0.1));
        assert!(!in_window(0.5, 0.9, 0.1));
        assert!(!in_window(0.1, 0.0, 0.1));
    }

    #[test]
    fn params_canonicalize_and_clamp() {
        let items = |s: &str| s == "IRON_INGOT";
        let p = normalize_law_params("MARKET_TAX", &raw(json!({"market_tax": 0.9})), &items).unwrap();
        assert_eq!(p.get("market_tax").map(String::as_str), Some("0.25"));

        let p = normalize_law_params(
            "FINE_BREAK_PER_BLOCK",
            &raw(json!({"fine_item": " IRON_INGOT ", "fine_per_block": 250})),
            &items,
        )
        .unwrap();
        assert_eq!(p.get("fine_item").map(String::as_str), Some("IRON_INGOT"));
        assert_eq!(p.get("fine_per_block").map(String::as_str), Some("100"));

        assert!(normalize_law_params("ACCESS_PASS_CORE", &raw(json!({"ticket_item": "GOLD", "ticket_cost": 1})), &items).is_err());
        assert!(matches!(
            normalize_law_params("FLAT_TAX", &BTreeMap::new(), &items),
            Err(AgentError::UnknownTemplate(_))
        ));
        assert!(normalize_law_params("MARKET_TAX", &raw(json!({"market_tax": "0.1"})), &items).is_err());
    }

    #[test]
    fn activation_writes_land_fields() {
        let mut c = claim(Vec3i::ZERO, 32);
        let params: BTreeMap<String, String> =
            [("start_time".to_owned(), "0.5".to_owned()), ("end_time".to_owned(), "0.75".to_owned())].into();
        apply_law(&mut c, "CURFEW_NO_BUILD", &params).unwrap();
        assert!(c.curfew_enabled);
        assert!(c.curfew_active(0.6));

        let bad: BTreeMap<String, String> = [("market_tax".to_owned(), "lots".to_owned())].into();
        let before = c.clone();
        assert!(apply_law(&mut c, "MARKET_TAX", &bad).is_err());
        assert_eq!(c, before);
    }

    #[test]
    fn tally_ignores_abstentions() {
        let mut law = Law {
            law_id: LawId::from_counter(1),
            land_id: LandId::from("LAND_A1_001"),
            template_id: "MARKET_TAX".to_owned(),
            title: "Market Tax".to_owned(),
            params: BTreeMap::new(),
            proposed_by: AgentId::from("A1"),
            proposed_tick: 0,
            notice_ends_tick: 1,
            vote_ends_tick: 2,
            status: LawStatus::Voting,
            votes: BTreeMap::new(),
        };
        law.votes.insert(AgentId::from("A1"), VoteChoice::Yes);
        law.votes.insert(AgentId::from("A2"), VoteChoice::Abstain);
        assert!(law.passes());
        law.votes.insert(AgentId::from("A3"), VoteChoice::No);
        assert!(!law.passes());
    }
}
