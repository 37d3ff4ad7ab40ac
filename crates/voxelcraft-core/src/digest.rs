//! Canonical state digest.
//!
//! A SHA-256 over the world header, each materialized chunk's hash, and
//! every entity collection walked in key order. Integers are mixed
//! little-endian, booleans as one byte, floats by their bit pattern, and
//! strings length-prefixed. Entries a snapshot export would drop (stale
//! block metadata, dead stacks, expired memory) are skipped here too, so
//! a world restored from a snapshot digests the same as its source.

use sha2::{Digest, Sha256};
use voxelcraft_agents::{Agent, Inventory, LandClaim, MoveTask, WorkTask};
use voxelcraft_types::Vec3i;

use crate::entities::parse_entity_id;
use crate::world::World;

/// Incremental writer for the digest encoding.
pub struct StateHasher {
    h: Sha256,
}

impl Default for StateHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHasher {
    /// An empty hasher.
    pub fn new() -> Self {
        Self { h: Sha256::new() }
    }

    /// Mix a `u64`.
    pub fn u64(&mut self, v: u64) {
        self.h.update(v.to_le_bytes());
    }

    /// Mix an `i64`.
    pub fn i64(&mut self, v: i64) {
        self.h.update(v.to_le_bytes());
    }

    /// Mix an `i32`.
    pub fn i32(&mut self, v: i32) {
        self.h.update(v.to_le_bytes());
    }

    /// Mix a `u32`.
    pub fn u32(&mut self, v: u32) {
        self.h.update(v.to_le_bytes());
    }

    /// Mix a boolean as one byte.
    pub fn bool(&mut self, v: bool) {
        self.h.update([u8::from(v)]);
    }

    /// Mix a float by its bit pattern.
    pub fn f64(&mut self, v: f64) {
        self.u64(v.to_bits());
    }

    /// Mix a collection length.
    pub fn count(&mut self, n: usize) {
        self.u64(n as u64);
    }

    /// Mix a length-prefixed string.
    pub fn str(&mut self, s: &str) {
        self.count(s.len());
        self.h.update(s.as_bytes());
    }

    /// Mix raw bytes.
    pub fn bytes(&mut self, b: &[u8]) {
        self.h.update(b);
    }

    /// Mix a position.
    pub fn pos(&mut self, p: Vec3i) {
        self.i32(p.x);
        self.i32(p.y);
        self.i32(p.z);
    }

    /// Mix the non-zero stacks of an inventory.
    pub fn inventory(&mut self, inv: &Inventory) {
        let live: Vec<(&String, &u32)> = inv.iter().filter(|(_, n)| **n > 0).collect();
        self.count(live.len());
        for (item, n) in live {
            self.str(item);
            self.u32(*n);
        }
    }

    /// Lowercase hex of the digest.
    pub fn finish(self) -> String {
        hex::encode(self.h.finalize())
    }
}

/// Digest of `w` as of the end of `tick`.
///
/// `tick` is explicit because a world restored from the snapshot taken
/// after tick `t` already sits at `t + 1`.
pub fn state_digest(w: &World, tick: u64) -> String {
    let mut h = StateHasher::new();
    header(&mut h, w, tick);

    h.count(w.chunks.materialized());
    for c in w.chunks.chunks() {
        h.i32(c.cx);
        h.i32(c.cz);
        h.bytes(c.hash());
    }

    h.count(w.agents.len());
    for a in w.agents.values() {
        agent(&mut h, a, tick);
    }

    let containers: Vec<_> = w.containers.values().filter(|c| w.block_is(c.pos, &c.kind)).collect();
    h.count(containers.len());
    for c in containers {
        h.str(&c.kind);
        h.pos(c.pos);
        h.inventory(&c.inventory);
        h.inventory(&c.reserved);
        h.count(c.owed.len());
        for (agent_id, inv) in &c.owed {
            h.str(agent_id.as_str());
            h.inventory(inv);
        }
    }

    let items: Vec<_> = w.items.values().filter(|e| e.is_live(tick)).collect();
    h.count(items.len());
    for e in items {
        h.str(e.id.as_str());
        h.pos(e.pos);
        h.str(&e.item);
        h.u32(e.count);
        h.u64(e.created_tick);
        h.u64(e.expires_tick);
    }

    block_meta(&mut h, w);
    exchanges(&mut h, w);
    governance(&mut h, w);

    h.count(w.structures.len());
    for s in w.structures.values() {
        h.str(s.structure_id.as_str());
        h.str(&s.blueprint_id);
        h.str(s.builder.as_str());
        h.pos(s.anchor);
        h.bytes(&[s.rotation]);
        h.pos(s.min);
        h.pos(s.max);
        h.u64(s.completed_tick);
        h.u64(s.award_due_tick);
        h.bool(s.awarded);
        h.count(s.used_by.len());
        for (agent_id, t) in &s.used_by {
            h.str(agent_id.as_str());
            h.u64(*t);
        }
        h.u64(s.last_influence_day);
    }

    let stats = &w.stats;
    h.u64(stats.bucket_ticks);
    h.u64(stats.window_ticks);
    h.count(stats.cur_idx);
    h.u64(stats.cur_base);
    h.count(stats.buckets.len());
    for b in &stats.buckets {
        h.u64(b.trades);
        h.u64(b.denied);
        h.u64(b.chunks_discovered);
        h.u64(b.blueprints_complete);
    }
    h.count(stats.seen_chunks.len());
    for (cx, cz) in &stats.seen_chunks {
        h.i32(*cx);
        h.i32(*cz);
    }
    h.finish()
}

fn header(h: &mut StateHasher, w: &World, tick: u64) {
    h.str("voxelcraft/state/v1");
    h.str(&w.cfg.id);
    h.u64(tick);
    h.i64(w.cfg.seed);
    h.str(w.weather.as_str());
    h.u64(w.weather_until_tick);
    match &w.active_event {
        Some(e) => {
            h.bool(true);
            h.str(&e.id);
            h.u64(e.start_tick);
            h.u64(e.ends_tick);
            h.pos(e.center);
            h.i32(e.radius);
            h.count(e.goals.len());
            for g in &e.goals {
                h.str(g);
            }
        }
        None => h.bool(false),
    }
    let c = &w.counters;
    for n in [c.agent, c.task, c.land, c.trade, c.post, c.contract, c.law, c.org, c.item] {
        h.u64(n);
    }
}

fn agent(h: &mut StateHasher, a: &Agent, tick: u64) {
    h.str(a.id.as_str());
    h.str(&a.name);
    h.str(a.org_id.as_ref().map_or("", |o| o.as_str()));
    h.pos(a.pos);
    h.i32(a.yaw);
    h.i32(a.hp);
    h.i32(a.hunger);
    h.i32(a.stamina_milli);
    for r in [a.rep.trade, a.rep.build, a.rep.social, a.rep.law] {
        h.i32(r);
    }
    for (dim, v) in a.fun.to_map() {
        h.str(&dim);
        h.i64(v);
    }
    h.inventory(&a.inventory);
    h.str(&a.equipment.main_hand);
    for slot in &a.equipment.armor {
        h.str(slot);
    }
    match &a.move_task {
        Some(t) => move_task(h, t),
        None => h.bool(false),
    }
    match &a.work_task {
        Some(t) => work_task(h, t),
        None => h.bool(false),
    }
    let windows: Vec<_> = a.rate_windows.windows().collect();
    h.count(windows.len());
    for (kind, win) in windows {
        h.str(kind);
        h.u64(win.start_tick);
        h.u32(win.count);
    }
    h.count(a.fun_decay.windows().len());
    for (key, win) in a.fun_decay.windows() {
        h.str(key);
        h.u64(win.start_tick);
        h.u32(win.count);
    }
    for set in [&a.seen_biomes, &a.seen_recipes, &a.seen_events] {
        h.count(set.len());
        for s in set {
            h.str(s);
        }
    }
    let memory: Vec<_> = a.memory.live(tick).collect();
    h.count(memory.len());
    for (key, e) in memory {
        h.str(key);
        h.str(&e.value);
        h.u64(e.expiry_tick);
    }
    h.str(&a.current_world_id);
    h.u64(a.world_switch_cooldown_until);
    h.pos(a.spawn_pos);
}

fn move_task(h: &mut StateHasher, t: &MoveTask) {
    h.bool(true);
    h.str(t.task_id.as_str());
    h.str(t.kind.as_str());
    h.pos(t.target);
    h.f64(t.tolerance);
    h.str(&t.target_id);
    h.f64(t.distance);
    h.pos(t.start_pos);
    h.u64(t.started_tick);
}

fn work_task(h: &mut StateHasher, t: &WorkTask) {
    h.bool(true);
    h.str(t.task_id.as_str());
    h.str(t.kind.as_str());
    h.pos(t.block_pos);
    h.str(&t.recipe_id);
    h.str(&t.item_id);
    h.u32(t.count);
    h.str(&t.blueprint_id);
    h.pos(t.anchor);
    h.bytes(&[t.rotation]);
    h.u32(t.build_index);
    h.str(&t.target_id);
    h.str(&t.src);
    h.str(&t.dst);
    h.u64(t.started_tick);
    h.u32(t.work_ticks);
}

fn block_meta(h: &mut StateHasher, w: &World) {
    let signs: Vec<_> = w.signs.iter().filter(|(p, _)| w.block_is(**p, "SIGN")).collect();
    h.count(signs.len());
    for (p, s) in signs {
        h.pos(*p);
        h.str(&s.text);
        h.str(&s.updated_by);
        h.u64(s.updated_tick);
    }
    let belts: Vec<_> = w.conveyors.iter().filter(|(p, _)| w.block_is(**p, "CONVEYOR")).collect();
    h.count(belts.len());
    for (p, c) in belts {
        h.pos(*p);
        h.i32(i32::from(c.dx));
        h.i32(i32::from(c.dz));
    }
    let switches: Vec<_> = w.switches.iter().filter(|(p, _)| w.block_is(**p, "SWITCH")).collect();
    h.count(switches.len());
    for (p, on) in switches {
        h.pos(*p);
        h.bool(*on);
    }
    let boards: Vec<_> = w
        .boards
        .iter()
        .filter(|(id, _)| parse_entity_id(id).is_some_and(|(kind, p)| w.block_is(p, kind)))
        .collect();
    h.count(boards.len());
    for (id, b) in boards {
        h.str(id);
        h.count(b.posts.len());
        for p in &b.posts {
            h.str(p.post_id.as_str());
            h.str(p.author.as_str());
            h.str(&p.title);
            h.str(&p.body);
            h.u64(p.tick);
        }
    }
}

fn exchanges(h: &mut StateHasher, w: &World) {
    h.count(w.trades.len());
    for t in w.trades.values() {
        h.str(t.trade_id.as_str());
        h.str(t.from.as_str());
        h.str(t.to.as_str());
        h.inventory(&t.offer);
        h.inventory(&t.request);
        h.u64(t.created_tick);
    }
    h.count(w.contracts.len());
    for c in w.contracts.values() {
        h.str(c.contract_id.as_str());
        h.pos(c.terminal_pos);
        h.str(c.poster.as_str());
        h.str(c.acceptor.as_ref().map_or("", |a| a.as_str()));
        h.str(c.kind.as_str());
        h.str(c.state.as_str());
        h.inventory(&c.requirements);
        h.inventory(&c.reward);
        h.inventory(&c.deposit);
        h.str(&c.blueprint_id);
        h.pos(c.anchor);
        h.bytes(&[c.rotation]);
        h.u64(c.created_tick);
        h.u64(c.deadline_tick);
    }
}

fn governance(h: &mut StateHasher, w: &World) {
    h.count(w.claims.len());
    for c in w.claims.values() {
        claim(h, c);
    }
    h.count(w.laws.len());
    for l in w.laws.values() {
        h.str(l.law_id.as_str());
        h.str(l.land_id.as_str());
        h.str(&l.template_id);
        h.str(&l.title);
        h.count(l.params.len());
        for (k, v) in &l.params {
            h.str(k);
            h.str(v);
        }
        h.str(l.proposed_by.as_str());
        h.u64(l.proposed_tick);
        h.u64(l.notice_ends_tick);
        h.u64(l.vote_ends_tick);
        h.str(l.status.as_str());
        h.count(l.votes.len());
        for (agent_id, choice) in &l.votes {
            h.str(agent_id.as_str());
            h.str(choice.as_str());
        }
    }
    h.count(w.orgs.len());
    for o in w.orgs.values() {
        h.str(o.org_id.as_str());
        h.str(o.kind.as_str());
        h.str(&o.name);
        h.u64(o.created_tick);
        h.u64(o.meta_version);
        h.count(o.members.len());
        for (agent_id, role) in &o.members {
            h.str(agent_id.as_str());
            h.str(role.as_str());
        }
        h.inventory(&o.legacy_treasury);
        h.count(o.treasury_by_world.len());
        for (world_id, inv) in &o.treasury_by_world {
            h.str(world_id);
            h.inventory(inv);
        }
    }
}

fn claim(h: &mut StateHasher, c: &LandClaim) {
    h.str(c.land_id.as_str());
    h.str(&c.owner);
    h.str(c.claim_type.as_str());
    h.pos(c.anchor);
    h.i32(c.radius);
    h.bool(c.flags.allow_build);
    h.bool(c.flags.allow_break);
    h.bool(c.flags.allow_damage);
    h.bool(c.flags.allow_trade);
    h.count(c.members.len());
    for m in &c.members {
        h.str(m.as_str());
    }
    h.f64(c.market_tax);
    h.bool(c.curfew_enabled);
    h.f64(c.curfew_start);
    h.f64(c.curfew_end);
    h.bool(c.fine_break_enabled);
    h.str(&c.fine_break_item);
    h.u32(c.fine_break_per_block);
    h.bool(c.access_pass_enabled);
    h.str(&c.access_ticket_item);
    h.u32(c.access_ticket_cost);
    h.u64(c.maintenance_due_tick);
    h.bytes(&[c.maintenance_stage]);
}
