//! Admin snapshots and season rollover.

use tracing::{info, warn};
use voxelcraft_agents::inventory::{self, Inventory};
use voxelcraft_types::{Event, EventKind, Vec3i, Weather};

use crate::error::EngineError;
use crate::stats::WorldStats;
use crate::world::{WORLD_ACTOR, World};

/// Season number at `tick`, starting from 1.
pub fn season_index(tick: u64, season_length_ticks: u64) -> u64 {
    if season_length_ticks == 0 {
        return 1;
    }
    (tick / season_length_ticks).saturating_add(1)
}

/// Ordinal encoded in an `A<n>` agent id, or 0.
fn agent_ordinal(agent_id: &str) -> u64 {
    agent_id
        .strip_prefix('A')
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl World {
    /// Enqueue a snapshot of the last completed tick.
    ///
    /// Returns the archived tick. Fails without a sink or when the sink
    /// is full.
    pub fn request_snapshot(&self) -> Result<u64, EngineError> {
        if self.sinks.snapshots.is_none() {
            return Err(EngineError::NoSnapshotSink);
        }
        let archive_tick = self.tick().saturating_sub(1);
        self.archive(archive_tick)?;
        Ok(archive_tick)
    }

    /// Offer a snapshot at `archive_tick` to the sink.
    pub(crate) fn archive(&self, archive_tick: u64) -> Result<(), EngineError> {
        match self.offer_snapshot(self.export_snapshot(archive_tick)) {
            Ok(()) => {
                info!(tick = self.tick(), archive_tick, world_id = %self.cfg.id, "Snapshot enqueued");
                Ok(())
            }
            Err(e) => {
                warn!(tick = self.tick(), archive_tick, world_id = %self.cfg.id, error = %e, "Snapshot not enqueued");
                Err(e)
            }
        }
    }

    /// Archive the last completed tick, then start a new season.
    ///
    /// Nothing is reset when the archive cannot be enqueued. Returns the
    /// tick the reset happened at.
    pub fn request_reset(&mut self) -> Result<u64, EngineError> {
        let now = self.tick();
        let archive_tick = now.saturating_sub(1);
        self.archive(archive_tick)?;
        let season = season_index(now, self.cfg.season_length_ticks).saturating_add(1);
        self.reset_for_season(season, archive_tick, "ADMIN_RESET")?;
        Ok(now)
    }

    /// Wipe world-scoped state for `season`.
    ///
    /// Terrain is regenerated from the next seed. Agents keep identity,
    /// reputation, memory, and org membership; everything they carried
    /// is replaced by the starter kit. Org treasuries for this world are
    /// emptied, other worlds' buckets are left alone.
    pub fn reset_for_season(&mut self, season: u64, archive_tick: u64, reason: &str) -> Result<(), EngineError> {
        let now = self.tick();
        let seed = self.cfg.seed.saturating_add(1);
        self.chunks.reset(seed, &self.catalogs)?;
        self.cfg.seed = seed;

        self.weather = Weather::Clear;
        self.weather_until_tick = 0;
        self.active_event = None;
        self.claims.clear();
        self.containers.clear();
        self.items.clear();
        self.items_by_pos.clear();
        self.signs.clear();
        self.conveyors.clear();
        self.switches.clear();
        self.trades.clear();
        self.boards.clear();
        self.contracts.clear();
        self.laws.clear();
        self.structures.clear();
        self.stats = WorldStats::new(self.cfg.stats_bucket_ticks, self.cfg.stats_window_ticks);

        let world_id = self.cfg.id.clone();
        for org in self.orgs.values_mut() {
            org.treasury_mut(&world_id).clear();
        }

        let mut starter = Inventory::new();
        for (item, count) in self.cfg.starter() {
            if !item.is_empty() && count > 0 {
                let _ = inventory::add(&mut starter, &item, count);
            }
        }
        let spawns: Vec<_> = self
            .agents
            .keys()
            .map(|id| (id.clone(), self.spawn_for(agent_ordinal(id.as_str()))))
            .collect();
        let rollover = Event::new(now, EventKind::SeasonRollover)
            .with("season", season)
            .with("archive_tick", archive_tick)
            .with("seed", seed);
        for (agent_id, spawn) in spawns {
            if let Some(a) = self.agents.get_mut(&agent_id) {
                a.reset_for_season(&starter, spawn);
                a.pending_memory = None;
            }
            self.emit(agent_id.as_str(), rollover.clone());
            self.fun_on_biome(&agent_id, now);
        }

        let entry = self
            .audit_entry(WORLD_ACTOR, "WORLD_RESET", Vec3i::ZERO, reason)
            .detail("world_id", world_id.as_str())
            .detail("archive_tick", archive_tick)
            .detail("new_seed", seed)
            .detail("season", season);
        self.audit(entry);
        info!(tick = now, world_id = %world_id, season, seed, archive_tick, "Season reset");
        Ok(())
    }

    /// Roll the season over when `tick` closes one.
    ///
    /// The end-of-season archive must be enqueued first; on back-pressure
    /// the rollover is skipped and the error returned.
    pub(crate) fn maybe_season_rollover(&mut self, tick: u64) -> Result<(), EngineError> {
        let len = self.cfg.season_length_ticks;
        if len == 0 || tick == 0 || !tick.is_multiple_of(len) {
            return Ok(());
        }
        let archive_tick = tick.saturating_sub(1);
        self.archive(archive_tick)?;
        self.reset_for_season(season_index(tick, len), archive_tick, "SEASON_ROLLOVER")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;
    use voxelcraft_agents::Organization;
    use voxelcraft_types::{AgentId, OrgId, OrgKind};

    use super::*;
    use crate::actions::tests::world;
    use crate::world::Sinks;

    fn with_snapshot_sink(w: World, cap: usize) -> (World, mpsc::Receiver<crate::snapshot::SnapshotV1>) {
        let (tx, rx) = mpsc::channel(cap);
        let w = w.with_sinks(Sinks {
            snapshots: Some(tx),
            ..Sinks::default()
        });
        (w, rx)
    }

    #[test]
    fn season_index_counts_from_one() {
        assert_eq!(season_index(0, 100), 1);
        assert_eq!(season_index(99, 100), 1);
        assert_eq!(season_index(100, 100), 2);
        assert_eq!(season_index(5, 0), 1);
    }

    #[test]
    fn snapshot_needs_a_sink_and_archives_the_previous_tick() {
        let w = world();
        assert!(matches!(w.request_snapshot(), Err(EngineError::NoSnapshotSink)));

        let (mut w, mut rx) = with_snapshot_sink(world(), 1);
        w.set_tick(10);
        assert_eq!(w.request_snapshot().unwrap(), 9);
        assert_eq!(rx.try_recv().unwrap().tick(), 9);
    }

    #[test]
    fn full_sink_aborts_the_reset() {
        let (mut w, _rx) = with_snapshot_sink(world(), 1);
        w.join("alice", false, None);
        w.request_snapshot().unwrap();
        let seed = w.cfg.seed;
        inventory::add(&mut w.agents.get_mut("A1").unwrap().inventory, "IRON_INGOT", 3).unwrap();

        assert!(matches!(w.request_reset(), Err(EngineError::SnapshotBackpressure)));
        assert_eq!(w.cfg.seed, seed);
        assert_eq!(inventory::count(&w.agents.get("A1").unwrap().inventory, "IRON_INGOT"), 3);
    }

    #[test]
    fn reset_wipes_world_state_and_keeps_culture() {
        let (mut w, mut rx) = with_snapshot_sink(world(), 4);
        w.join("alice", false, None);
        let org_id = OrgId::from_counter(1);
        w.orgs.insert(
            org_id.clone(),
            Organization::found(org_id.clone(), OrgKind::Guild, "Masons", AgentId::from("A1"), 0),
        );
        w.agents.get_mut("A1").unwrap().org_id = Some(org_id.clone());
        w.agents.get_mut("A1").unwrap().rep.build = 777;
        let world_id = w.cfg.id.clone();
        {
            let org = w.orgs.get_mut(&org_id).unwrap();
            inventory::add(org.treasury_mut(&world_id), "COAL", 9).unwrap();
            inventory::add(org.treasury_mut("OTHER"), "COAL", 4).unwrap();
        }
        w.spawn_item(Vec3i::ZERO, "STONE", 2, WORLD_ACTOR, "TEST");
        inventory::add(&mut w.agents.get_mut("A1").unwrap().inventory, "IRON_INGOT", 3).unwrap();
        let seed = w.cfg.seed;
        w.set_tick(50);

        assert_eq!(w.request_reset().unwrap(), 50);
        assert_eq!(rx.try_recv().unwrap().tick(), 49);
        assert_eq!(w.cfg.seed, seed + 1);
        assert!(w.items.is_empty());

        let a = w.agents.get("A1").unwrap();
        assert_eq!(a.rep.build, 777);
        assert_eq!(a.org_id, Some(org_id.clone()));
        assert_eq!(inventory::count(&a.inventory, "IRON_INGOT"), 0);
        assert_eq!(a.inventory, w.cfg.starter());
        let rollover = a
            .pending_events()
            .iter()
            .find(|e| e.kind == EventKind::SeasonRollover)
            .unwrap();
        assert_eq!(rollover.get("season"), Some(&serde_json::json!(2)));

        let org = w.orgs.get(&org_id).unwrap();
        assert!(org.treasury(&world_id).is_empty());
        assert_eq!(inventory::count(org.treasury("OTHER"), "COAL"), 4);
    }

    #[test]
    fn rollover_fires_only_on_season_boundaries() {
        let (mut w, mut rx) = with_snapshot_sink(world(), 4);
        w.cfg.season_length_ticks = 100;
        let seed = w.cfg.seed;
        w.maybe_season_rollover(0).unwrap();
        w.maybe_season_rollover(99).unwrap();
        assert_eq!(w.cfg.seed, seed);
        w.maybe_season_rollover(100).unwrap();
        assert_eq!(w.cfg.seed, seed + 1);
        assert_eq!(rx.try_recv().unwrap().tick(), 99);
    }
}
