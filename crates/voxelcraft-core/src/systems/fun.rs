//! Fun awards.
//!
//! Every award goes through [`World::add_fun`], which bumps the agent's
//! score and emits a `FUN` event. Repeatable awards are first scaled by
//! the agent's decay window for the reward key; first-time novelty awards
//! are not decayed.

use voxelcraft_agents::fun::{recipe_novelty_points, social_scaled};
use voxelcraft_types::{AgentId, Event, EventKind, FunDim, StructureId, Weather};

use crate::world::World;

/// Event that doubles vote and law awards.
pub const CIVIC_VOTE: &str = "CIVIC_VOTE";

/// Cap on the daily influence award per structure.
const MAX_INFLUENCE_PER_DAY: f64 = 15.0;

impl World {
    /// Add `delta` to `dim` and emit `FUN`. Zero deltas are dropped.
    pub fn add_fun(&mut self, agent_id: &AgentId, dim: FunDim, reason: &str, delta: i64, now: u64) {
        if delta == 0 {
            return;
        }
        let Some(a) = self.agents.get_mut(agent_id) else {
            return;
        };
        let total = a.fun.add(dim, delta);
        a.push_event(
            Event::new(now, EventKind::Fun)
                .with("dim", dim.as_str())
                .with("delta", delta)
                .with("total", total)
                .with("reason", reason),
        );
    }

    /// `base` after the agent's decay window for `key`.
    pub fn fun_decay(&mut self, agent_id: &AgentId, key: &str, base: i64, now: u64) -> i64 {
        let (window, decay_base) = (self.cfg.fun_decay_window_ticks, self.cfg.fun_decay_base);
        self.agents
            .get_mut(agent_id)
            .map_or(0, |a| a.fun_decay.delta(key, base, now, window, decay_base))
    }

    /// Decayed award under `key`.
    pub fn award_fun(&mut self, agent_id: &AgentId, dim: FunDim, reason: &str, key: &str, base: i64, now: u64) {
        let delta = self.fun_decay(agent_id, key, base, now);
        self.add_fun(agent_id, dim, reason, delta, now);
    }

    fn hazardous_weather(&self) -> bool {
        matches!(self.weather, Weather::Storm | Weather::Cold)
    }

    fn live_event_id(&self, now: u64) -> Option<String> {
        self.active_event
            .as_ref()
            .filter(|e| e.is_live(now))
            .map(|e| e.id.clone())
    }

    /// First visit to the biome under the agent.
    pub fn fun_on_biome(&mut self, agent_id: &AgentId, now: u64) {
        let Some(pos) = self.agents.get(agent_id).map(|a| a.pos) else {
            return;
        };
        let biome = self.chunks.terrain().biome_at(pos.x, pos.z).as_str();
        let first = self
            .agents
            .get_mut(agent_id)
            .is_some_and(|a| a.seen_biomes.insert(biome.to_owned()));
        if first {
            self.add_fun(agent_id, FunDim::Novelty, &format!("biome:{biome}"), 10, now);
        }
    }

    /// First craft or smelt of `recipe_id`.
    pub fn fun_on_recipe(&mut self, agent_id: &AgentId, recipe_id: &str, tier: u32, now: u64) {
        if recipe_id.is_empty() {
            return;
        }
        let first = self
            .agents
            .get_mut(agent_id)
            .is_some_and(|a| a.seen_recipes.insert(recipe_id.to_owned()));
        if first {
            let pts = recipe_novelty_points(tier);
            self.add_fun(agent_id, FunDim::Novelty, &format!("recipe:{recipe_id}"), pts, now);
        }
    }

    /// First participation in world event `event_id`.
    pub fn fun_on_event_participation(&mut self, agent_id: &AgentId, event_id: &str, now: u64) {
        if event_id.is_empty() {
            return;
        }
        let first = self
            .agents
            .get_mut(agent_id)
            .is_some_and(|a| a.seen_events.insert(event_id.to_owned()));
        if first {
            self.add_fun(agent_id, FunDim::Novelty, &format!("event:{event_id}"), 5, now);
        }
    }

    /// `EVENT_GOAL` for `kind`, at most once per agent and goal.
    pub fn event_goal(&mut self, agent_id: &AgentId, event_id: &str, kind: &str, now: u64) {
        let key = format!("{agent_id}:{kind}");
        let fresh = self
            .active_event
            .as_mut()
            .filter(|e| e.id == event_id && e.is_live(now))
            .is_some_and(|e| e.goals.insert(key));
        if fresh {
            self.emit(
                agent_id.as_str(),
                Event::new(now, EventKind::EventGoal)
                    .with("event_id", event_id)
                    .with("kind", kind),
            );
        }
    }

    /// Mutual-benefit trade.
    pub fn fun_on_trade(&mut self, agent_id: &AgentId, now: u64) {
        let Some(rep) = self.agents.get(agent_id).map(|a| a.rep.trade) else {
            return;
        };
        let base = social_scaled(2, rep);
        if base > 0 {
            self.award_fun(agent_id, FunDim::Social, "trade", "social:trade", base, now);
        }
    }

    /// Contract completed by its acceptor.
    pub fn fun_on_contract_complete(&mut self, agent_id: &AgentId, kind: &str, now: u64) {
        let Some(rep) = self.agents.get(agent_id).map(|a| a.rep.trade) else {
            return;
        };
        let base = social_scaled(if kind == "BUILD" { 7 } else { 5 }, rep);
        if base <= 0 {
            return;
        }
        self.award_fun(agent_id, FunDim::Social, "contract", "social:contract", base, now);
        if let Some(event_id) = self.live_event_id(now) {
            self.fun_on_event_participation(agent_id, &event_id, now);
            self.award_fun(agent_id, FunDim::Narrative, "event_success", "narrative:event_success", 5, now);
        }
        if self.hazardous_weather() {
            self.award_fun(agent_id, FunDim::RiskRescue, "hazard_success", "risk:hazard_success", 8, now);
        }
    }

    /// Blueprint finished by its builder.
    pub fn fun_on_blueprint_complete(&mut self, agent_id: &AgentId, now: u64) {
        if let Some(event_id) = self.live_event_id(now) {
            self.fun_on_event_participation(agent_id, &event_id, now);
            self.award_fun(agent_id, FunDim::Narrative, "event_build", "narrative:event_build", 5, now);
        }
        if self.hazardous_weather() {
            self.award_fun(agent_id, FunDim::RiskRescue, "hazard_build", "risk:hazard_build", 8, now);
        }
    }

    /// Law proposed by `proposer` became active.
    pub fn fun_on_law_active(&mut self, proposer: &AgentId, now: u64) {
        if !self.agents.contains_key(proposer) {
            return;
        }
        self.award_fun(proposer, FunDim::Influence, "law_adopted", "influence:law_adopted", 4, now);
        self.award_fun(proposer, FunDim::Narrative, "law_adopted", "narrative:law_adopted", 5, now);
        if self.live_event_id(now).as_deref() == Some(CIVIC_VOTE) {
            self.fun_on_event_participation(proposer, CIVIC_VOTE, now);
            self.award_fun(proposer, FunDim::Narrative, "civic_vote_law", "narrative:civic_vote_law", 6, now);
        }
    }

    /// Ballot cast.
    pub fn fun_on_vote(&mut self, agent_id: &AgentId, now: u64) {
        if self.live_event_id(now).as_deref() == Some(CIVIC_VOTE) {
            self.fun_on_event_participation(agent_id, CIVIC_VOTE, now);
            self.award_fun(agent_id, FunDim::Narrative, "civic_vote_vote", "narrative:civic_vote_vote", 4, now);
        } else {
            self.award_fun(agent_id, FunDim::Narrative, "vote", "narrative:vote", 2, now);
        }
    }

    /// Note that `agent_id` stood at `pos`, for structure usage awards.
    pub fn record_structure_usage(&mut self, agent_id: &AgentId, pos: voxelcraft_types::Vec3i, now: u64) {
        for s in self.structures.values_mut() {
            if s.contains(pos) {
                s.used_by.insert(agent_id.clone(), now);
            }
        }
    }
}

/// Delayed creation awards and daily influence awards.
pub fn system_fun(w: &mut World, now: u64) {
    let ids: Vec<StructureId> = w.structures.keys().cloned().collect();
    for id in &ids {
        let Some(s) = w.structures.get(id) else {
            continue;
        };
        if s.awarded || now < s.award_due_tick {
            continue;
        }
        let (builder, blueprint_id, anchor, rotation) = (s.builder.clone(), s.blueprint_id.clone(), s.anchor, s.rotation);
        if !w.blueprint_placed(&blueprint_id, anchor, rotation) || !w.agents.contains_key(&builder) {
            w.structures.remove(id);
            continue;
        }
        let pts = w.structure_creation_score(id, now);
        if pts > 0 {
            w.award_fun(&builder, FunDim::Creation, "structure", "creation:structure", pts, now);
        }
        if let Some(s) = w.structures.get_mut(id) {
            s.awarded = true;
        }
    }

    let day_ticks = w.cfg.day_ticks;
    if day_ticks == 0 || now == 0 || now % day_ticks != 0 {
        return;
    }
    let day = now / day_ticks;
    for id in &ids {
        let Some(s) = w.structures.get(id) else {
            continue;
        };
        let (builder, blueprint_id, anchor, rotation) = (s.builder.clone(), s.blueprint_id.clone(), s.anchor, s.rotation);
        if !w.blueprint_placed(&blueprint_id, anchor, rotation) {
            w.structures.remove(id);
            continue;
        }
        let Some(s) = w.structures.get_mut(id) else {
            continue;
        };
        if s.last_influence_day == day {
            continue;
        }
        s.last_influence_day = day;
        let users = s.unique_users(now, day_ticks);
        if users == 0 || !w.agents.contains_key(&builder) {
            continue;
        }
        let pts = influence_points(users);
        if pts > 0 {
            w.award_fun(&builder, FunDim::Influence, "infra_usage_day", "influence:infra_usage_day", pts, now);
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn influence_points(users: usize) -> i64 {
    (3.0 * (users as f64).sqrt()).min(MAX_INFLUENCE_PER_DAY).round() as i64
}
