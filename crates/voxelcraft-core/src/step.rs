//! Tick cycle: one deterministic step of a world.
//!
//! Each tick runs through these phases:
//!
//! 1. **Requests** -- joins, leaves, attaches, transfer-outs, transfer-ins,
//!    injected events, then action envelopes in arrival order.
//!
//! 2. **Systems** -- movement, work, environment and director, laws,
//!    maintenance, conveyors, contracts, fun (see [`crate::systems`]).
//!
//! 3. **Observation** -- build and push an OBS frame to every client.
//!
//! 4. **Record** -- digest the state and offer the tick entry to the tick
//!    sink, then advance the tick counter.
//!
//! 5. **Admin** -- batched snapshot and reset requests, the season
//!    rollover check, and the periodic snapshot.
//!
//! Given the same starting state and the same [`TickInputs`], two worlds
//! produce the same digest.

use tokio::sync::mpsc;
use tracing::{debug, warn};
use voxelcraft_types::{ActionEnvelope, AgentId, Event, Welcome};

use crate::actions::apply_envelope;
use crate::digest::state_digest;
use crate::error::EngineError;
use crate::obs::system_observations;
use crate::systems::{
    contracts::system_contracts, conveyors::system_conveyors, director::system_director,
    environment::system_environment, fun::system_fun, laws::system_laws, maintenance::system_maintenance,
    movement::system_movement, work::system_work,
};
use crate::transfer::AgentTransfer;
use crate::world::World;

/// A new agent.
#[derive(Debug)]
pub struct JoinInput {
    /// Display name.
    pub name: String,
    /// Whether the client accepts delta voxel frames.
    pub delta_voxels: bool,
    /// Client output buffer.
    pub tx: Option<mpsc::Sender<Vec<u8>>>,
}

/// Rebind a client to an existing agent.
#[derive(Debug)]
pub struct AttachInput {
    /// Agent to rebind.
    pub agent_id: AgentId,
    /// Whether the client accepts delta voxel frames.
    pub delta_voxels: bool,
    /// Client output buffer.
    pub tx: mpsc::Sender<Vec<u8>>,
}

/// An agent arriving from another world.
#[derive(Debug)]
pub struct TransferInInput {
    /// The transferred agent.
    pub transfer: AgentTransfer,
    /// Client output buffer.
    pub tx: Option<mpsc::Sender<Vec<u8>>>,
    /// Whether the client accepts delta voxel frames.
    pub delta_voxels: bool,
}

/// Everything staged for one tick.
#[derive(Debug, Default)]
pub struct TickInputs {
    /// Joins.
    pub joins: Vec<JoinInput>,
    /// Client detaches.
    pub leaves: Vec<AgentId>,
    /// Client rebinds.
    pub attaches: Vec<AttachInput>,
    /// Agents leaving for another world.
    pub transfer_outs: Vec<AgentId>,
    /// Agents arriving from another world.
    pub transfer_ins: Vec<TransferInInput>,
    /// Events pushed from outside the simulation.
    pub injected: Vec<(AgentId, Event)>,
    /// Action envelopes in arrival order.
    pub envelopes: Vec<ActionEnvelope>,
    /// Pending admin snapshot requests.
    pub snapshot_requests: usize,
    /// Pending admin reset requests.
    pub reset_requests: usize,
}

/// Outcome of one tick, with per-request results in input order.
#[derive(Debug, Default)]
pub struct TickSummary {
    /// The tick that was stepped.
    pub tick: u64,
    /// State digest after the systems ran.
    pub digest: String,
    /// One welcome per join.
    pub joins: Vec<Welcome>,
    /// One result per attach.
    pub attaches: Vec<Result<Welcome, EngineError>>,
    /// One result per transfer-out.
    pub transfer_outs: Vec<Result<AgentTransfer, EngineError>>,
    /// One result per transfer-in.
    pub transfer_ins: Vec<Result<Welcome, EngineError>>,
    /// One result per injected event.
    pub injected: Vec<Result<(), EngineError>>,
    /// Shared result for all snapshot requests, if any were pending.
    pub snapshot: Option<Result<u64, EngineError>>,
    /// Shared result for all reset requests, if any were pending.
    pub reset: Option<Result<u64, EngineError>>,
}

impl World {
    /// Run one tick.
    pub fn step(&mut self, inputs: TickInputs) -> TickSummary {
        let now = self.tick();
        let TickInputs {
            joins,
            leaves,
            attaches,
            transfer_outs,
            transfer_ins,
            injected,
            envelopes,
            snapshot_requests,
            reset_requests,
        } = inputs;
        let mut summary = TickSummary {
            tick: now,
            ..TickSummary::default()
        };

        // Phase 1: requests
        summary.joins = joins
            .into_iter()
            .map(|j| self.join(&j.name, j.delta_voxels, j.tx))
            .collect();
        for agent_id in &leaves {
            self.leave(agent_id);
        }
        summary.attaches = attaches
            .into_iter()
            .map(|a| self.attach(&a.agent_id, a.delta_voxels, a.tx))
            .collect();
        summary.transfer_outs = transfer_outs.iter().map(|id| self.transfer_out(id)).collect();
        summary.transfer_ins = transfer_ins
            .into_iter()
            .map(|t| self.transfer_in(t.transfer, t.tx, t.delta_voxels))
            .collect();
        summary.injected = injected
            .into_iter()
            .map(|(agent_id, event)| self.inject_event(&agent_id, event))
            .collect();
        for env in &envelopes {
            apply_envelope(self, env, now);
        }

        // Phase 2: systems
        self.run_systems(now);

        // Phase 3: observation
        system_observations(self, now);

        // Phase 4: record
        let digest = state_digest(self, now);
        summary.digest.clone_from(&digest);
        let entry = self.take_record(digest);
        self.offer_tick_entry(entry);
        self.set_tick(now.saturating_add(1));
        debug!(
            tick = now,
            agents = self.agents.len(),
            clients = self.clients.len(),
            envelopes = envelopes.len(),
            "Tick completed"
        );

        // Phase 5: admin
        if snapshot_requests > 0 {
            summary.snapshot = Some(self.request_snapshot());
        }
        if reset_requests > 0 {
            summary.reset = Some(self.request_reset());
        }
        self.scheduled_archives();
        summary
    }

    /// Run every system once, in order.
    fn run_systems(&mut self, now: u64) {
        system_movement(self, now);
        system_work(self, now);
        system_environment(self, now);
        system_director(self, now);
        system_laws(self, now);
        system_maintenance(self, now);
        system_conveyors(self, now);
        system_contracts(self, now);
        system_fun(self, now);
        self.stats
            .observe_positions(now, self.agents.values().map(|a| (a.pos.x, a.pos.z)));
    }

    /// Season rollover at the new tick, else the periodic snapshot.
    fn scheduled_archives(&mut self) {
        let tick = self.tick();
        let season = self.cfg.season_length_ticks;
        if season > 0 && tick.is_multiple_of(season) {
            if let Err(e) = self.maybe_season_rollover(tick) {
                warn!(tick, world_id = %self.cfg.id, error = %e, "Season rollover aborted");
            }
            return;
        }
        let every = self.cfg.snapshot_every_ticks;
        if every > 0 && tick.is_multiple_of(every) && self.sinks.snapshots.is_some() {
            // The next period retries.
            if let Err(e) = self.archive(tick.saturating_sub(1)) {
                debug!(tick, world_id = %self.cfg.id, error = %e, "Periodic snapshot skipped");
            }
        }
    }

    /// Push an event into an agent's log from outside the simulation.
    pub fn inject_event(&mut self, agent_id: &AgentId, event: Event) -> Result<(), EngineError> {
        if !self.agents.contains_key(agent_id) {
            return Err(EngineError::UnknownAgent(agent_id.clone()));
        }
        self.emit(agent_id.as_str(), event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use voxelcraft_types::EventKind;

    use super::*;
    use crate::actions::tests::{envelope, instant, world};
    use crate::audit::TickEntry;
    use crate::world::Sinks;

    fn join(name: &str) -> JoinInput {
        JoinInput {
            name: name.to_owned(),
            delta_voxels: false,
            tx: None,
        }
    }

    #[test]
    fn step_advances_the_tick_and_answers_joins() {
        let mut w = world();
        let s = w.step(TickInputs {
            joins: vec![join("alice"), join("bob")],
            ..TickInputs::default()
        });
        assert_eq!(s.tick, 0);
        assert_eq!(w.tick(), 1);
        let ids: Vec<_> = s.joins.iter().map(|j| j.agent_id.to_string()).collect();
        assert_eq!(ids, ["A1", "A2"]);
        assert_eq!(s.digest.len(), 64);
    }

    #[test]
    fn tick_entry_records_requests() {
        let (tx, mut rx) = mpsc::channel::<TickEntry>(8);
        let mut w = world().with_sinks(Sinks {
            ticks: Some(tx),
            ..Sinks::default()
        });
        w.step(TickInputs {
            joins: vec![join("alice")],
            ..TickInputs::default()
        });
        let mut env = envelope("A1", 1);
        env.instants.push(instant("SAY"));
        w.step(TickInputs {
            leaves: vec![AgentId::from("A1")],
            envelopes: vec![env],
            ..TickInputs::default()
        });
        let first = rx.try_recv().unwrap();
        assert_eq!(first.tick, 0);
        assert_eq!(first.joins.len(), 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.tick, 1);
        assert_eq!(second.leaves, [AgentId::from("A1")]);
        assert_eq!(second.actions.len(), 1);
    }

    #[test]
    fn full_snapshot_sink_skips_a_period_and_retries() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut w = world().with_sinks(Sinks {
            snapshots: Some(tx),
            ..Sinks::default()
        });
        w.cfg.snapshot_every_ticks = 2;
        for _ in 0..4 {
            w.step(TickInputs::default());
        }
        assert_eq!(w.tick(), 4);
        assert_eq!(rx.try_recv().unwrap().tick(), 1);
        assert!(rx.try_recv().is_err());

        for _ in 0..2 {
            w.step(TickInputs::default());
        }
        assert_eq!(rx.try_recv().unwrap().tick(), 5);
    }

    #[test]
    fn injected_events_reach_known_agents_only() {
        let mut w = world();
        w.step(TickInputs {
            joins: vec![join("alice")],
            ..TickInputs::default()
        });
        let s = w.step(TickInputs {
            injected: vec![
                (AgentId::from("A1"), Event::new(1, EventKind::Notice).with("text", "hi")),
                (AgentId::from("A9"), Event::new(1, EventKind::Notice)),
            ],
            ..TickInputs::default()
        });
        assert!(s.injected[0].is_ok());
        assert!(matches!(s.injected[1], Err(EngineError::UnknownAgent(_))));
        assert!(
            w.agents
                .get("A1")
                .unwrap()
                .pending_events()
                .iter()
                .any(|e| e.get_str("text") == Some("hi"))
        );
    }

    #[test]
    fn identical_inputs_give_identical_digests() {
        let run = || {
            let mut w = world();
            let mut digests = Vec::new();
            for t in 0..20_u64 {
                let mut inputs = TickInputs::default();
                if t == 0 {
                    inputs.joins = vec![join("alice"), join("bob")];
                }
                if t == 3 {
                    let mut env = envelope("A1", t);
                    env.instants.push(instant("SAY"));
                    inputs.envelopes.push(env);
                }
                digests.push(w.step(inputs).digest);
            }
            digests
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn admin_requests_share_one_result() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut w = world().with_sinks(Sinks {
            snapshots: Some(tx),
            ..Sinks::default()
        });
        w.step(TickInputs::default());
        let s = w.step(TickInputs {
            snapshot_requests: 3,
            ..TickInputs::default()
        });
        assert_eq!(s.snapshot.unwrap().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().tick(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn season_boundary_archives_and_resets() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut w = world().with_sinks(Sinks {
            snapshots: Some(tx),
            ..Sinks::default()
        });
        w.cfg.season_length_ticks = 5;
        let seed = w.cfg.seed;
        for _ in 0..5 {
            w.step(TickInputs::default());
        }
        assert_eq!(w.tick(), 5);
        assert_eq!(w.cfg.seed, seed + 1);
        assert_eq!(rx.try_recv().unwrap().tick(), 4);
    }
}
