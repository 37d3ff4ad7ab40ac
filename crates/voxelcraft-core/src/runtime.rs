//! World owner task and its request handle.
//!
//! One tokio task owns a [`World`] and is the only code that touches it.
//! Everyone else holds a cloneable [`WorldHandle`] and sends requests over
//! a bounded channel, each carrying a oneshot for the reply.
//!
//! Between ticks the owner answers read-only queries (positions, event
//! pages, org meta, act dedupe) on the spot and stages everything else.
//! On each interval tick it drains whatever is still queued, runs
//! [`World::step`], and hands the results back in request order.
//!
//! Every request method takes a cancellation future. If it resolves before
//! the request is sent or answered the call returns
//! [`RequestError::Canceled`]; the owner never blocks on a reply.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};
use voxelcraft_agents::CursorEvent;
use voxelcraft_types::{ActAck, ActionEnvelope, AgentId, Event, Vec3i, Welcome};

use crate::error::{EngineError, RequestError};
use crate::step::{AttachInput, JoinInput, TickInputs, TickSummary, TransferInInput};
use crate::transfer::{AgentTransfer, OrgTransfer};
use crate::world::World;

/// Capacity of the request channel.
pub const REQUEST_BUFFER: usize = 1024;

/// One page of an agent's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsPage {
    /// Events after the requested cursor, oldest first.
    pub items: Vec<CursorEvent>,
    /// Cursor to pass for the next page.
    pub next_cursor: u64,
}

type Reply<T> = oneshot::Sender<T>;

/// A request to the owner task.
#[derive(Debug)]
enum Request {
    Join {
        name: String,
        delta_voxels: bool,
        tx: Option<mpsc::Sender<Vec<u8>>>,
        resp: Reply<Welcome>,
    },
    Attach {
        agent_id: AgentId,
        delta_voxels: bool,
        tx: mpsc::Sender<Vec<u8>>,
        resp: Reply<Result<Welcome, EngineError>>,
    },
    Leave(AgentId),
    Inbox(ActionEnvelope),
    EventsAfter {
        agent_id: AgentId,
        cursor: u64,
        limit: usize,
        resp: Reply<Result<EventsPage, EngineError>>,
    },
    InjectEvent {
        agent_id: AgentId,
        event: Event,
        resp: Reply<Result<(), EngineError>>,
    },
    TransferOut {
        agent_id: AgentId,
        resp: Reply<Result<AgentTransfer, EngineError>>,
    },
    TransferIn {
        transfer: Box<AgentTransfer>,
        tx: Option<mpsc::Sender<Vec<u8>>>,
        delta_voxels: bool,
        resp: Reply<Result<Welcome, EngineError>>,
    },
    Snapshot(Reply<Result<u64, RequestError>>),
    Reset(Reply<Result<u64, RequestError>>),
    AgentPos {
        agent_id: AgentId,
        resp: Reply<Option<Vec3i>>,
    },
    OrgMetaSnapshot(Reply<Vec<OrgTransfer>>),
    OrgMetaUpsert {
        orgs: Vec<OrgTransfer>,
        resp: Reply<()>,
    },
    CheckOrRememberActAck {
        agent_id: AgentId,
        world_id: String,
        act_id: String,
        proposed: ActAck,
        resp: Reply<(ActAck, bool)>,
    },
}

/// Requests staged for the next tick, with their reply slots.
#[derive(Default)]
struct Staged {
    inputs: TickInputs,
    joins: Vec<Reply<Welcome>>,
    attaches: Vec<Reply<Result<Welcome, EngineError>>>,
    transfer_outs: Vec<Reply<Result<AgentTransfer, EngineError>>>,
    transfer_ins: Vec<Reply<Result<Welcome, EngineError>>>,
    injected: Vec<Reply<Result<(), EngineError>>>,
    snapshots: Vec<Reply<Result<u64, RequestError>>>,
    resets: Vec<Reply<Result<u64, RequestError>>>,
}

impl Staged {
    /// Stage a request, or answer it now if it only reads.
    fn accept(&mut self, world: &mut World, req: Request) {
        match req {
            Request::Join {
                name,
                delta_voxels,
                tx,
                resp,
            } => {
                self.inputs.joins.push(JoinInput { name, delta_voxels, tx });
                self.joins.push(resp);
            }
            Request::Attach {
                agent_id,
                delta_voxels,
                tx,
                resp,
            } => {
                self.inputs.attaches.push(AttachInput {
                    agent_id,
                    delta_voxels,
                    tx,
                });
                self.attaches.push(resp);
            }
            Request::Leave(agent_id) => self.inputs.leaves.push(agent_id),
            Request::Inbox(env) => self.inputs.envelopes.push(env),
            Request::InjectEvent { agent_id, event, resp } => {
                self.inputs.injected.push((agent_id, event));
                self.injected.push(resp);
            }
            Request::TransferOut { agent_id, resp } => {
                self.inputs.transfer_outs.push(agent_id);
                self.transfer_outs.push(resp);
            }
            Request::TransferIn {
                transfer,
                tx,
                delta_voxels,
                resp,
            } => {
                self.inputs.transfer_ins.push(TransferInInput {
                    transfer: *transfer,
                    tx,
                    delta_voxels,
                });
                self.transfer_ins.push(resp);
            }
            Request::Snapshot(resp) => {
                self.inputs.snapshot_requests = self.inputs.snapshot_requests.saturating_add(1);
                self.snapshots.push(resp);
            }
            Request::Reset(resp) => {
                self.inputs.reset_requests = self.inputs.reset_requests.saturating_add(1);
                self.resets.push(resp);
            }
            Request::EventsAfter {
                agent_id,
                cursor,
                limit,
                resp,
            } => {
                let page = world
                    .agents
                    .get(&agent_id)
                    .map(|a| {
                        let (items, next_cursor) = a.events_after(cursor, limit);
                        EventsPage { items, next_cursor }
                    })
                    .ok_or(EngineError::UnknownAgent(agent_id));
                let _ = resp.send(page);
            }
            Request::AgentPos { agent_id, resp } => {
                let _ = resp.send(world.agents.get(&agent_id).map(|a| a.pos));
            }
            Request::OrgMetaSnapshot(resp) => {
                let _ = resp.send(world.org_meta_snapshot());
            }
            Request::OrgMetaUpsert { orgs, resp } => {
                world.org_meta_upsert(orgs);
                let _ = resp.send(());
            }
            Request::CheckOrRememberActAck {
                agent_id,
                world_id,
                act_id,
                proposed,
                resp,
            } => {
                let now = world.tick();
                let out = world
                    .dedupe
                    .check_or_remember(agent_id.as_str(), &world_id, &act_id, proposed, now);
                let _ = resp.send(out);
            }
        }
    }

    /// Step the world and send every staged reply.
    fn run(self, world: &mut World) {
        let Self {
            inputs,
            joins,
            attaches,
            transfer_outs,
            transfer_ins,
            injected,
            snapshots,
            resets,
        } = self;
        let summary: TickSummary = world.step(inputs);
        reply_all(joins, summary.joins);
        reply_all(attaches, summary.attaches);
        reply_all(transfer_outs, summary.transfer_outs);
        reply_all(transfer_ins, summary.transfer_ins);
        reply_all(injected, summary.injected);
        if let Some(result) = summary.snapshot {
            for resp in snapshots {
                let _ = resp.send(shared(&result));
            }
        }
        if let Some(result) = summary.reset {
            for resp in resets {
                let _ = resp.send(shared(&result));
            }
        }
    }
}

/// Pair replies with results; a reply whose caller gave up is dropped.
fn reply_all<T>(resps: Vec<Reply<T>>, results: Vec<T>) {
    for (resp, result) in resps.into_iter().zip(results) {
        let _ = resp.send(result);
    }
}

/// Per-caller copy of a result shared by a batch of admin requests.
fn shared(result: &Result<u64, EngineError>) -> Result<u64, RequestError> {
    match result {
        Ok(tick) => Ok(*tick),
        Err(EngineError::SnapshotBackpressure) => Err(RequestError::Backpressure),
        Err(e) => Err(RequestError::Rejected(e.to_string())),
    }
}

/// Owner task loop. Returns the world once every handle is gone.
async fn run_owner(mut world: World, mut rx: mpsc::Receiver<Request>) -> World {
    let hz = world.cfg.tick_rate_hz.max(1);
    let mut ticker = interval(Duration::from_secs(1) / hz);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick completes immediately.
    ticker.tick().await;
    info!(world_id = %world.cfg.id, tick_rate_hz = hz, "World loop started");

    let mut staged = Staged::default();
    loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(req) => staged.accept(&mut world, req),
                None => break,
            },
            _ = ticker.tick() => {
                while let Ok(req) = rx.try_recv() {
                    staged.accept(&mut world, req);
                }
                std::mem::take(&mut staged).run(&mut world);
            }
        }
    }
    info!(world_id = %world.cfg.id, tick = world.tick(), "World loop stopped");
    world
}

/// Cloneable handle to a running world.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    tx: mpsc::Sender<Request>,
    tick: Arc<AtomicU64>,
    world_id: Arc<str>,
}

/// Start the owner task for `world`.
///
/// The task stops once every [`WorldHandle`] clone is dropped and yields
/// the world back through the join handle.
pub fn spawn_world(world: World) -> (WorldHandle, JoinHandle<World>) {
    let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
    let handle = WorldHandle {
        tx,
        tick: world.tick_handle(),
        world_id: Arc::from(world.id()),
    };
    (handle, tokio::spawn(run_owner(world, rx)))
}

impl WorldHandle {
    /// World id.
    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    /// Next tick the world will step.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    async fn send(&self, req: Request, cancel: impl Future<Output = ()>) -> Result<(), RequestError> {
        tokio::select! {
            sent = self.tx.send(req) => sent.map_err(|_| RequestError::Closed),
            () = cancel => Err(RequestError::Canceled),
        }
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Request,
        cancel: impl Future<Output = ()>,
    ) -> Result<T, RequestError> {
        let (resp, rx) = oneshot::channel();
        tokio::pin!(cancel);
        tokio::select! {
            sent = self.tx.send(make(resp)) => sent.map_err(|_| RequestError::Closed)?,
            () = &mut cancel => return Err(RequestError::Canceled),
        }
        tokio::select! {
            out = rx => out.map_err(|_| RequestError::Closed),
            () = &mut cancel => {
                debug!(world_id = %self.world_id, "Request abandoned");
                Err(RequestError::Canceled)
            }
        }
    }

    /// Create an agent at the next tick.
    pub async fn join(
        &self,
        name: &str,
        delta_voxels: bool,
        tx: Option<mpsc::Sender<Vec<u8>>>,
        cancel: impl Future<Output = ()>,
    ) -> Result<Welcome, RequestError> {
        let name = name.to_owned();
        self.call(
            |resp| Request::Join {
                name,
                delta_voxels,
                tx,
                resp,
            },
            cancel,
        )
        .await
    }

    /// Rebind a reconnecting client at the next tick.
    pub async fn attach(
        &self,
        agent_id: AgentId,
        delta_voxels: bool,
        tx: mpsc::Sender<Vec<u8>>,
        cancel: impl Future<Output = ()>,
    ) -> Result<Welcome, RequestError> {
        let out = self
            .call(
                |resp| Request::Attach {
                    agent_id,
                    delta_voxels,
                    tx,
                    resp,
                },
                cancel,
            )
            .await?;
        Ok(out?)
    }

    /// Detach a client at the next tick. The agent stays.
    pub async fn leave(&self, agent_id: AgentId, cancel: impl Future<Output = ()>) -> Result<(), RequestError> {
        self.send(Request::Leave(agent_id), cancel).await
    }

    /// Queue an envelope for the next tick.
    pub async fn submit(&self, env: ActionEnvelope, cancel: impl Future<Output = ()>) -> Result<(), RequestError> {
        self.send(Request::Inbox(env), cancel).await
    }

    /// Page through an agent's event log.
    pub async fn events_after(
        &self,
        agent_id: AgentId,
        cursor: u64,
        limit: usize,
        cancel: impl Future<Output = ()>,
    ) -> Result<EventsPage, RequestError> {
        let out = self
            .call(
                |resp| Request::EventsAfter {
                    agent_id,
                    cursor,
                    limit,
                    resp,
                },
                cancel,
            )
            .await?;
        Ok(out?)
    }

    /// Push an event into an agent's log at the next tick.
    pub async fn inject_event(
        &self,
        agent_id: AgentId,
        event: Event,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), RequestError> {
        let out = self
            .call(|resp| Request::InjectEvent { agent_id, event, resp }, cancel)
            .await?;
        Ok(out?)
    }

    /// Extract and remove an agent at the next tick.
    pub async fn transfer_out(
        &self,
        agent_id: AgentId,
        cancel: impl Future<Output = ()>,
    ) -> Result<AgentTransfer, RequestError> {
        let out = self.call(|resp| Request::TransferOut { agent_id, resp }, cancel).await?;
        Ok(out?)
    }

    /// Install a transferred agent at the next tick.
    pub async fn transfer_in(
        &self,
        transfer: AgentTransfer,
        tx: Option<mpsc::Sender<Vec<u8>>>,
        delta_voxels: bool,
        cancel: impl Future<Output = ()>,
    ) -> Result<Welcome, RequestError> {
        let out = self
            .call(
                |resp| Request::TransferIn {
                    transfer: Box::new(transfer),
                    tx,
                    delta_voxels,
                    resp,
                },
                cancel,
            )
            .await?;
        Ok(out?)
    }

    /// Enqueue a snapshot of the last completed tick. Returns that tick.
    pub async fn request_snapshot(&self, cancel: impl Future<Output = ()>) -> Result<u64, RequestError> {
        self.call(Request::Snapshot, cancel).await?
    }

    /// Archive and start a new season. Returns the reset tick.
    pub async fn request_reset(&self, cancel: impl Future<Output = ()>) -> Result<u64, RequestError> {
        self.call(Request::Reset, cancel).await?
    }

    /// Current position of an agent.
    pub async fn agent_pos(
        &self,
        agent_id: AgentId,
        cancel: impl Future<Output = ()>,
    ) -> Result<Option<Vec3i>, RequestError> {
        self.call(|resp| Request::AgentPos { agent_id, resp }, cancel).await
    }

    /// Membership view of every org.
    pub async fn org_meta_snapshot(&self, cancel: impl Future<Output = ()>) -> Result<Vec<OrgTransfer>, RequestError> {
        self.call(Request::OrgMetaSnapshot, cancel).await
    }

    /// Apply authoritative org records.
    pub async fn org_meta_upsert(
        &self,
        orgs: Vec<OrgTransfer>,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), RequestError> {
        self.call(|resp| Request::OrgMetaUpsert { orgs, resp }, cancel).await
    }

    /// Return the remembered ack for an act and `true`, or remember
    /// `proposed` and return it with `false`.
    pub async fn check_or_remember_act_ack(
        &self,
        agent_id: AgentId,
        world_id: &str,
        act_id: &str,
        proposed: ActAck,
        cancel: impl Future<Output = ()>,
    ) -> Result<(ActAck, bool), RequestError> {
        let world_id = world_id.to_owned();
        let act_id = act_id.to_owned();
        self.call(
            |resp| Request::CheckOrRememberActAck {
                agent_id,
                world_id,
                act_id,
                proposed,
                resp,
            },
            cancel,
        )
        .await
    }
}
