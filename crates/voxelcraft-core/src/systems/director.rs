//! The world-event director and weather.
//!
//! During the first week the director runs a fixed daily schedule. After
//! that it evaluates every `director_every_ticks`, weighting the catalog's
//! event templates by the population metrics in [`crate::stats`] and
//! sampling one with a hash of the seed and tick. At most one event runs
//! at a time.

use std::collections::BTreeMap;

use tracing::{debug, info};
use voxelcraft_agents::inventory;
use voxelcraft_types::{PostId, Vec3i, Weather};
use voxelcraft_world::noise::{fnv1a32, hash2, hash3};

use super::blueprint::{BLUEPRINT_FAIR, BUILDER_EXPO};
use super::fun::CIVIC_VOTE;
use super::work::{CRYSTAL_RIFT, RUINS_GATE};
use crate::entities::{BoardPost, Container, Sign, entity_id};
use crate::stats::DirectorMetrics;
use crate::world::{ActiveEvent, Counters, WORLD_ACTOR, World};

/// Event that halves market taxes.
pub const MARKET_WEEK: &str = "MARKET_WEEK";

/// Scripted events for days one through seven.
pub const WEEK_ONE_SCHEDULE: [&str; 7] = [
    MARKET_WEEK,
    CRYSTAL_RIFT,
    BUILDER_EXPO,
    BLUEPRINT_FAIR,
    RUINS_GATE,
    MARKET_WEEK,
    CIVIC_VOTE,
];

const SAMPLE_SALT: i64 = 1337;
const WEATHER_SALT: i64 = 7331;
const CENTER_MARGIN: i32 = 64;
const CENTER_ATTEMPTS: i64 = 32;

/// Run the director for tick `now`.
pub fn system_director(w: &mut World, now: u64) {
    if w.active_event.as_ref().is_some_and(|e| !e.is_live(now)) {
        if let Some(ended) = w.active_event.take() {
            debug!(tick = now, event_id = %ended.id, "World event ended");
        }
    }
    rotate_weather(w, now);
    if w.active_event.is_some() {
        return;
    }

    let day_ticks = w.cfg.day_ticks;
    let week_ticks = day_ticks.saturating_mul(7);
    if day_ticks > 0 && now < week_ticks {
        if now.is_multiple_of(day_ticks) {
            let day = usize::try_from(now / day_ticks).unwrap_or(usize::MAX);
            if let Some(id) = WEEK_ONE_SCHEDULE.get(day) {
                start_event(w, id, now);
            }
        }
        return;
    }

    let every = w.cfg.director_every_ticks;
    if every == 0 || now == 0 || !now.is_multiple_of(every) {
        return;
    }
    let sum = w.stats.summarize(now);
    let metrics = DirectorMetrics::compute(sum, w.cfg.stats_window_ticks, w.agents.values().map(|a| &a.inventory));
    let weights = event_weights(w, &metrics);
    let roll = hash2(w.cfg.seed, i64::try_from(now).unwrap_or(i64::MAX), SAMPLE_SALT);
    if let Some(id) = sample_weighted(&weights, roll) {
        start_event(w, &id, now);
    }
}

/// Catalog base weights nudged by the population metrics.
pub fn event_weights(w: &World, m: &DirectorMetrics) -> BTreeMap<String, f64> {
    let mut weights: BTreeMap<String, f64> = w
        .catalogs
        .event_templates
        .values()
        .filter(|t| t.base_weight > 0.0)
        .map(|t| (t.id.clone(), t.base_weight))
        .collect();
    let mut bump = |id: &str, by: f64| {
        if let Some(v) = weights.get_mut(id) {
            *v += by;
        }
    };
    if m.trade < 0.4 {
        bump(MARKET_WEEK, 0.25);
        bump(BLUEPRINT_FAIR, 0.15);
    }
    if m.exploration < 0.3 {
        bump(CRYSTAL_RIFT, 0.20);
        bump(RUINS_GATE, 0.20);
    }
    if m.conflict > 0.25 {
        bump(CIVIC_VOTE, 0.25);
        bump(MARKET_WEEK, 0.10);
        bump(BUILDER_EXPO, 0.10);
    }
    if m.inequality > 0.5 {
        bump(CIVIC_VOTE, 0.20);
    }
    if m.public_infra < 0.2 {
        bump(BUILDER_EXPO, 0.10);
    }
    weights
}

/// Pick an id with probability proportional to its weight. Ids are
/// walked in sorted order so the pick depends only on `roll`.
#[allow(clippy::cast_precision_loss)]
pub fn sample_weighted(weights: &BTreeMap<String, f64>, roll: u64) -> Option<String> {
    let total: f64 = weights.values().filter(|v| **v > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let target = (roll % 1_000_000_000) as f64 / 1_000_000_000.0 * total;
    let mut acc = 0.0;
    let mut last = None;
    for (id, v) in weights.iter().filter(|(_, v)| **v > 0.0) {
        acc += v;
        if target <= acc {
            return Some(id.clone());
        }
        last = Some(id);
    }
    last.cloned()
}

/// Expire the current weather and, on day boundaries after week one,
/// roll the next one.
fn rotate_weather(w: &mut World, now: u64) {
    if w.weather_until_tick != 0 && now >= w.weather_until_tick {
        w.weather = Weather::Clear;
        w.weather_until_tick = 0;
    }
    let day_ticks = w.cfg.day_ticks;
    if day_ticks == 0 || now < day_ticks.saturating_mul(7) || !now.is_multiple_of(day_ticks) {
        return;
    }
    let roll = hash2(w.cfg.seed, i64::try_from(now).unwrap_or(i64::MAX), WEATHER_SALT) % 100;
    let next = match roll {
        0..15 => Weather::Storm,
        15..30 => Weather::Cold,
        _ => Weather::Clear,
    };
    if next != Weather::Clear {
        w.weather = next;
        w.weather_until_tick = now.saturating_add(day_ticks / 2);
        info!(tick = now, weather = next.as_str(), until = w.weather_until_tick, "Weather changed");
    }
}

/// A deterministic event center inside the boundary, avoiding claims.
pub fn pick_event_center(w: &World, now: u64, event_id: &str) -> Vec3i {
    let boundary = if w.cfg.boundary_r > 0 { w.cfg.boundary_r } else { 4000 };
    let (mut margin, mut span) = (CENTER_MARGIN, boundary.saturating_mul(2).saturating_sub(CENTER_MARGIN * 2));
    if span <= 0 {
        margin = 0;
        span = boundary.saturating_mul(2).max(1);
    }
    let span = u64::from(span.unsigned_abs());
    let eh = i64::from(fnv1a32(event_id.as_bytes()));
    let t = i64::try_from(now).unwrap_or(i64::MAX);
    for attempt in 0..CENTER_ATTEMPTS {
        let hx = hash3(w.cfg.seed, eh, t, attempt * 2);
        let hz = hash3(w.cfg.seed, eh, t, attempt * 2 + 1);
        let off = |h: u64| i32::try_from(h % span).unwrap_or(0);
        let p = Vec3i::flat(
            margin.saturating_sub(boundary).saturating_add(off(hx)),
            margin.saturating_sub(boundary).saturating_add(off(hz)),
        );
        if w.land_at(p).is_none() {
            return p;
        }
    }
    Vec3i::ZERO
}

/// Start `event_id` now: place its props and notify every agent.
pub fn start_event(w: &mut World, event_id: &str, now: u64) {
    let Some(tpl) = w.catalogs.event_templates.get(event_id).cloned() else {
        return;
    };
    let duration = match tpl.duration_ticks {
        0 if w.cfg.day_ticks > 0 => w.cfg.day_ticks,
        0 => 6000,
        d => d,
    };
    let mut center = Vec3i::ZERO;
    if tpl.radius > 0 {
        center = pick_event_center(w, now, event_id);
    }
    w.active_event = Some(ActiveEvent {
        id: event_id.to_owned(),
        start_tick: now,
        ends_tick: now.saturating_add(duration),
        center,
        radius: tpl.radius.max(0),
        goals: Default::default(),
    });
    if tpl.radius > 0 {
        instantiate(w, event_id, center, &tpl.title, &tpl.description, now);
    }
    if let Some(ev) = w.active_event_notice(now) {
        w.broadcast(&ev);
    }
    let entry = w
        .audit_entry(WORLD_ACTOR, "WORLD_EVENT", center, "DIRECTOR")
        .detail("event_id", event_id)
        .detail("ends_tick", now.saturating_add(duration));
    w.audit(entry);
    info!(tick = now, event_id, center = %center, duration, "World event started");
}

fn put_block(w: &mut World, pos: Vec3i, block: &str, event_id: &str) {
    let reason = format!("EVENT:{event_id}");
    w.remove_block_meta(pos, WORLD_ACTOR, &reason);
    if let Err(e) = w.set_block_named(pos, block, WORLD_ACTOR, &reason) {
        debug!(pos = %pos, block, error = %e, "Event block skipped");
        return;
    }
    w.instantiate_block_meta(pos, block, 0);
}

fn instantiate(w: &mut World, event_id: &str, center: Vec3i, title: &str, summary: &str, now: u64) {
    match event_id {
        CRYSTAL_RIFT => {
            for dz in -2..=2 {
                for dx in -2..=2 {
                    put_block(w, center.offset(dx, 0, dz), "CRYSTAL_ORE", event_id);
                }
            }
        }
        RUINS_GATE => {
            for dz in -1..=1 {
                for dx in -1..=1 {
                    let block = if dx == 0 && dz == 0 { "CHEST" } else { "BRICK" };
                    w.containers.remove(&center.offset(dx, 0, dz));
                    put_block(w, center.offset(dx, 0, dz), block, event_id);
                }
            }
            let mut chest = Container::new("CHEST", center);
            for (item, n) in [("CRYSTAL_SHARD", 2), ("IRON_INGOT", 4), ("COPPER_INGOT", 4)] {
                // Fresh container; counts cannot overflow.
                let _ = inventory::add(&mut chest.inventory, item, n);
            }
            if w.block_is(center, "CHEST") {
                w.containers.insert(center, chest);
            }
        }
        _ => notice_board(w, event_id, center, title, summary, now),
    }
}

/// A bulletin board with a headline post and a sign beside it.
fn notice_board(w: &mut World, event_id: &str, center: Vec3i, title: &str, summary: &str, now: u64) {
    put_block(w, center, "BULLETIN_BOARD", event_id);
    let board_id = entity_id("BULLETIN_BOARD", center);
    if w.boards.contains_key(&board_id) {
        let post_id = PostId::from_counter(Counters::next(&mut w.counters.post));
        if let Some(b) = w.boards.get_mut(&board_id) {
            b.push(BoardPost {
                post_id,
                author: WORLD_ACTOR.into(),
                title: title.to_owned(),
                body: summary.to_owned(),
                tick: now,
            });
        }
    }
    let sign_pos = center.offset(1, 0, 0);
    put_block(w, sign_pos, "SIGN", event_id);
    if w.block_is(sign_pos, "SIGN") {
        w.signs.insert(
            sign_pos,
            Sign {
                text: title.to_owned(),
                updated_by: WORLD_ACTOR.to_owned(),
                updated_tick: now,
            },
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_types::EventKind;

    use super::*;
    use crate::actions::tests::world;

    #[test]
    fn week_one_runs_the_schedule() {
        let mut w = world();
        w.join("alice", false, None);
        system_director(&mut w, 0);
        let ev = w.active_event.clone().unwrap();
        assert_eq!(ev.id, MARKET_WEEK);
        assert_eq!(ev.ends_tick, w.cfg.day_ticks);
        let notice = w
            .agents
            .get("A1")
            .unwrap()
            .pending_events()
            .iter()
            .filter(|e| e.kind == EventKind::WorldEvent)
            .count();
        assert_eq!(notice, 1);
        assert!(w.block_is(ev.center, "BULLETIN_BOARD"));
        assert_eq!(w.boards.get(&entity_id("BULLETIN_BOARD", ev.center)).unwrap().posts.len(), 1);

        let day = w.cfg.day_ticks;
        system_director(&mut w, day);
        assert_eq!(w.active_event.as_ref().unwrap().id, CRYSTAL_RIFT);
    }

    #[test]
    fn crystal_rift_lays_a_five_by_five_patch() {
        let mut w = world();
        start_event(&mut w, CRYSTAL_RIFT, 10);
        let ev = w.active_event.clone().unwrap();
        assert_eq!(ev.radius, 32);
        for dz in -2..=2 {
            for dx in -2..=2 {
                assert!(w.block_is(ev.center.offset(dx, 0, dz), "CRYSTAL_ORE"));
            }
        }
    }

    #[test]
    fn ruins_gate_guards_a_loot_chest() {
        let mut w = world();
        start_event(&mut w, RUINS_GATE, 10);
        let ev = w.active_event.clone().unwrap();
        let chest = w.live_container(ev.center).unwrap();
        assert_eq!(inventory::count(&chest.inventory, "CRYSTAL_SHARD"), 2);
        assert!(w.block_is(ev.center.offset(1, 0, 1), "BRICK"));
    }

    #[test]
    fn sampling_is_deterministic_and_proportional() {
        let weights = BTreeMap::from([("A".to_owned(), 1.0), ("B".to_owned(), 3.0), ("C".to_owned(), 0.0)]);
        assert_eq!(sample_weighted(&weights, 0), Some("A".to_owned()));
        assert_eq!(sample_weighted(&weights, 999_999_999), Some("B".to_owned()));
        assert_eq!(sample_weighted(&weights, 300_000_000), Some("B".to_owned()));
        assert_eq!(sample_weighted(&BTreeMap::new(), 5), None);
    }

    #[test]
    fn quiet_worlds_favor_markets_and_rifts() {
        let w = world();
        let m = DirectorMetrics::default();
        let weights = event_weights(&w, &m);
        assert!((weights.get(MARKET_WEEK).unwrap() - 1.25).abs() < 1e-9);
        assert!((weights.get(CRYSTAL_RIFT).unwrap() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn event_expires_and_centers_are_stable() {
        let mut w = world();
        start_event(&mut w, BUILDER_EXPO, 100);
        let end = w.active_event.as_ref().unwrap().ends_tick;
        system_director(&mut w, end);
        assert!(w.active_event.is_none() || w.active_event.as_ref().unwrap().start_tick == end);
        assert_eq!(pick_event_center(&w, 5, CRYSTAL_RIFT), pick_event_center(&w, 5, CRYSTAL_RIFT));
    }
}
