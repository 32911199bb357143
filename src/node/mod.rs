use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::app::Application;
use crate::core::Core;
use crate::crypto::Keypair;
use crate::hashgraph::store::Store;
use crate::network::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, RpcEnvelope,
    RpcReceiver, RpcRequest, RpcResponse, SyncRequest, SyncResponse, Transport,
};
use crate::peers::{Peer, PeerId, PeerSet, ToPeerId};

pub(crate) mod control_timer;
pub(crate) mod peer_selector;
pub(crate) mod state;


use control_timer::{ControlTimer, TimerControls};
use peer_selector::RandomPeerSelector;
pub use state::NodeState;
use state::StateHandle;

///Heartbeat used when there is nothing to gossip about.
const QUIET_INTERVAL: Duration = Duration::from_secs(1);

/// Cloneable handle for everyone outside the node: submit transactions,
/// trigger shutdown.
#[derive(Clone)]
pub struct NodeHandle {
    submit_tx: mpsc::Sender<Vec<u8>>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    pub(crate) core: Arc<Mutex<Core>>,
    pub(crate) state: StateHandle,
}

impl NodeHandle {
    /// Blocks when the submit buffer is full.
    pub async fn submit_transaction(&self, transaction: Vec<u8>) -> anyhow::Result<()> {
        self.submit_tx
            .send(transaction)
            .await
            .map_err(|_| anyhow::anyhow!("node is gone"))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }
}

/// Everything a spawned gossip or RPC task needs, cloneable.
#[derive(Clone)]
struct GossipContext {
    id: PeerId,
    core: Arc<Mutex<Core>>,
    transport: Arc<dyn Transport>,
    application: Arc<dyn Application>,
    state: StateHandle,
    selector: Arc<StdMutex<RandomPeerSelector>>,
    timer: HeartbeatTimer,
    sync_limit: usize,
    sync_requests: Arc<AtomicUsize>,
    sync_errors: Arc<AtomicUsize>,
}

/// Adaptive heartbeat: stretches to the quiet interval when the pools are
/// empty and nothing loaded is pending.
#[derive(Clone)]
struct HeartbeatTimer {
    controls: TimerControls,
    heartbeat: Duration,
    core: Arc<Mutex<Core>>,
}

impl HeartbeatTimer {
    async fn reset(&self) {
        let interval = {
            let core = self.core.lock().await;
            if core.pending_loaded_events() == 0
                && core.transaction_pool_len() == 0
                && core.signature_pool_len() == 0
            {
                QUIET_INTERVAL
            } else {
                self.heartbeat
            }
        };
        self.controls.schedule(interval).await;
    }
}

/// The per-node state machine: Babbling answers RPCs and initiates gossip
/// on the heartbeat, CatchingUp fast-forwards from a peer's anchor,
/// Shutdown is terminal.
pub struct Node {
    id: PeerId,
    heartbeat: Duration,
    ctx: GossipContext,
    state: StateHandle,
    control_timer: ControlTimer,
    inbound: RpcReceiver,
    submit_rx: Option<mpsc::Receiver<Vec<u8>>>,
    external_shutdown: mpsc::UnboundedReceiver<()>,
    shutdown_tx: broadcast::Sender<()>,
    ///Gossip and RPC handler tasks; all bounded by the rpc timeout
    tasks: JoinSet<()>,
    ///Long-running helpers that only exit on shutdown
    background: Vec<JoinHandle<()>>,
    need_bootstrap: bool,
    start: Instant,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        heartbeat: Duration,
        sync_limit: usize,
        keypair: Arc<Keypair>,
        peers: PeerSet,
        store: Box<dyn Store>,
        transport: Arc<dyn Transport>,
        inbound: RpcReceiver,
        application: Arc<dyn Application>,
    ) -> anyhow::Result<(Self, NodeHandle)> {
        let id = keypair.peer_id();
        let need_bootstrap = store.need_bootstrap();

        let core = Arc::new(Mutex::new(Core::new(
            keypair,
            peers.clone(),
            store,
            application.clone(),
        )?));

        let (submit_tx, submit_rx) = mpsc::channel(100);
        let (external_tx, external_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = StateHandle::new();
        let control_timer = ControlTimer::start(shutdown_tx.subscribe());

        let timer = HeartbeatTimer {
            controls: control_timer.controls(),
            heartbeat,
            core: core.clone(),
        };

        let ctx = GossipContext {
            id,
            core: core.clone(),
            transport,
            application,
            state: state.clone(),
            selector: Arc::new(StdMutex::new(RandomPeerSelector::new(peers, id))),
            timer,
            sync_limit,
            sync_requests: Arc::new(AtomicUsize::new(0)),
            sync_errors: Arc::new(AtomicUsize::new(0)),
        };

        let handle = NodeHandle {
            submit_tx,
            shutdown_tx: external_tx,
            core,
            state: state.clone(),
        };

        Ok((
            Self {
                id,
                heartbeat,
                ctx,
                state,
                control_timer,
                inbound,
                submit_rx: Some(submit_rx),
                external_shutdown: external_rx,
                shutdown_tx,
                tasks: JoinSet::new(),
                background: vec![],
                need_bootstrap,
                start: Instant::now(),
            },
            handle,
        ))
    }

    pub async fn init(&mut self) -> anyhow::Result<()> {
        if self.need_bootstrap {
            log::debug!("Bootstrap");
            self.ctx.core.lock().await.bootstrap()?;
        }
        self.ctx.core.lock().await.set_head_and_seq()?;
        self.state.set(NodeState::Babbling);
        Ok(())
    }

    /// Main loop. `gossip_enabled = false` keeps the node purely reactive,
    /// which the tests use to stage exact exchanges.
    pub async fn run(mut self, gossip_enabled: bool) {
        self.spawn_submit_drain();
        self.ctx.timer.reset().await;

        loop {
            let state = self.state.get();
            log::debug!("Run loop state {state}");
            match state {
                NodeState::Babbling => self.babble(gossip_enabled).await,
                NodeState::CatchingUp => {
                    if self.external_shutdown.try_recv().is_ok() {
                        self.shutdown().await;
                        return;
                    }
                    if let Err(err) = self.fast_forward().await {
                        log::error!("Fast forward failed: {err}");
                        //Pace the retries; the next attempt picks another peer
                        tokio::time::sleep(self.heartbeat).await;
                    }
                }
                NodeState::Shutdown => return,
            }
        }
    }

    fn spawn_submit_drain(&mut self) {
        let mut submit_rx = self.submit_rx.take().expect("submit drain spawned twice");
        let core = self.ctx.core.clone();
        let timer = self.ctx.timer.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        self.background.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = submit_rx.recv() => match maybe {
                        Some(transaction) => {
                            log::debug!("Adding transaction");
                            core.lock().await.add_transactions(vec![transaction]);
                            timer.reset().await;
                        }
                        None => return,
                    },
                    _ = shutdown.recv() => return,
                }
            }
        }));
    }

    /// Reacts to inbound RPCs, heartbeat ticks and the shutdown signal.
    /// Returns when a gossip task flipped the state to CatchingUp or the
    /// node shuts down.
    async fn babble(&mut self, gossip_enabled: bool) {
        log::debug!("BABBLING");
        let (return_tx, mut return_rx) = mpsc::channel::<()>(8);

        loop {
            tokio::select! {
                maybe = self.inbound.recv() => match maybe {
                    Some(envelope) => {
                        let ctx = self.ctx.clone();
                        self.tasks.spawn(async move {
                            log::debug!("Processing RPC");
                            handle_rpc(&ctx, envelope).await;
                            ctx.timer.reset().await;
                        });
                    }
                    None => {
                        log::error!("Inbound rpc channel closed, shutting down");
                        self.shutdown().await;
                        return;
                    }
                },
                Some(_) = self.control_timer.tick_rx.recv() => {
                    //Reap finished gossip and rpc tasks
                    while futures::FutureExt::now_or_never(self.tasks.join_next())
                        .flatten()
                        .is_some()
                    {}
                    if gossip_enabled {
                        let peer = self.ctx.selector.lock().unwrap().next();
                        match peer {
                            Some(peer) => {
                                log::debug!("Time to gossip with {}", peer.name);
                                let ctx = self.ctx.clone();
                                let return_tx = return_tx.clone();
                                self.tasks.spawn(async move {
                                    gossip_with(&ctx, &peer, return_tx).await;
                                });
                            }
                            None => monologue(&self.ctx).await,
                        }
                    }
                    self.ctx.timer.reset().await;
                },
                Some(_) = return_rx.recv() => return,
                _ = self.external_shutdown.recv() => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Catch-up: wait out in-flight exchanges, fetch a peer's anchor block,
    /// frame and snapshot, adopt them, restore the application.
    async fn fast_forward(&mut self) -> anyhow::Result<()> {
        log::debug!("CATCHING-UP");

        while self.tasks.join_next().await.is_some() {}

        let peer = self.ctx.selector.lock().unwrap().next();
        let Some(peer) = peer else {
            //Nobody to catch up from
            self.state.set(NodeState::Babbling);
            return Ok(());
        };

        let response = self
            .ctx
            .transport
            .fast_forward(&peer.address, FastForwardRequest { from_id: self.id })
            .await;
        if let Ok(id) = peer.id() {
            self.ctx.selector.lock().unwrap().update_last(id);
        }
        let response = response?;

        log::debug!(
            "FastForwardResponse from {}: block {} round {}",
            response.from_id,
            response.block.index(),
            response.block.round_received()
        );

        {
            let mut core = self.ctx.core.lock().await;
            core.fast_forward(response.block, response.frame)?;
        }
        self.ctx.application.restore(&response.snapshot)?;

        log::debug!("Fast-forward OK");
        self.state.set(NodeState::Babbling);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if self.state.get() == NodeState::Shutdown {
            return;
        }
        log::debug!("Shutdown");
        self.state.set(NodeState::Shutdown);
        let _ = self.shutdown_tx.send(());

        //Wait for in-flight exchanges before touching transport and store
        while self.tasks.join_next().await.is_some() {}
        for handle in self.background.drain(..) {
            let _ = handle.await;
        }

        self.ctx.transport.close().await;
        if let Err(err) = self.ctx.core.lock().await.close_store() {
            log::error!("Error closing store: {err}");
        }
    }

    pub async fn stats(&self) -> BTreeMap<String, String> {
        let elapsed = self.start.elapsed().as_secs_f64().max(f64::EPSILON);
        let requests = self.ctx.sync_requests.load(Ordering::SeqCst);
        let errors = self.ctx.sync_errors.load(Ordering::SeqCst);
        let sync_rate = if requests == 0 {
            1.0
        } else {
            1.0 - errors as f64 / requests as f64
        };

        let mut core = self.ctx.core.lock().await;
        let consensus_events = core.consensus_events_count();

        BTreeMap::from([
            (
                "last_consensus_round".to_string(),
                format!("{:?}", core.last_consensus_round()),
            ),
            (
                "last_block_index".to_string(),
                core.last_block_index().to_string(),
            ),
            ("consensus_events".to_string(), consensus_events.to_string()),
            (
                "consensus_transactions".to_string(),
                core.consensus_transactions_count().to_string(),
            ),
            (
                "undetermined_events".to_string(),
                core.undetermined_events_count().to_string(),
            ),
            (
                "transaction_pool".to_string(),
                core.transaction_pool_len().to_string(),
            ),
            (
                "round_events".to_string(),
                core.last_committed_round_events_count().to_string(),
            ),
            ("num_peers".to_string(), core.peers().len().to_string()),
            ("sync_rate".to_string(), format!("{sync_rate:.2}")),
            (
                "events_per_second".to_string(),
                format!("{:.2}", consensus_events as f64 / elapsed),
            ),
            ("id".to_string(), self.id.to_string()),
            ("state".to_string(), self.state.get().to_string()),
        ])
    }
}

/// Responder side, served under the core lock, never across network I/O.
async fn handle_rpc(ctx: &GossipContext, envelope: RpcEnvelope) {
    let response = match envelope.request {
        RpcRequest::Sync(request) => {
            let mut core = ctx.core.lock().await;
            if core.over_sync_limit(&request.known, ctx.sync_limit) {
                log::debug!("SyncRequest from {} over the sync limit", request.from_id);
                RpcResponse::Sync(SyncResponse {
                    from_id: ctx.id,
                    sync_limit: true,
                    events: vec![],
                    known: core.known_events(),
                })
            } else {
                match core.event_diff(&request.known) {
                    Ok(diff) => match core.to_wire(&diff) {
                        Ok(events) => RpcResponse::Sync(SyncResponse {
                            from_id: ctx.id,
                            sync_limit: false,
                            events,
                            known: core.known_events(),
                        }),
                        Err(err) => RpcResponse::Error(err.to_string()),
                    },
                    Err(err) => RpcResponse::Error(err.to_string()),
                }
            }
        }
        RpcRequest::EagerSync(request) => {
            let mut core = ctx.core.lock().await;
            let result = core.sync(request.from_id, request.events);
            if let Err(err) = &result {
                log::error!("EagerSync from {} failed: {err}", request.from_id);
            }
            RpcResponse::EagerSync(EagerSyncResponse {
                from_id: ctx.id,
                success: result.is_ok(),
            })
        }
        RpcRequest::FastForward(request) => {
            log::debug!("FastForwardRequest from {}", request.from_id);
            let anchor = {
                let mut core = ctx.core.lock().await;
                core.anchor_block_with_frame()
            };
            match anchor {
                Ok((block, frame)) => match ctx.application.get_snapshot(block.index()) {
                    Ok(snapshot) => RpcResponse::FastForward(FastForwardResponse {
                        from_id: ctx.id,
                        block,
                        frame,
                        snapshot,
                    }),
                    Err(err) => RpcResponse::Error(err.to_string()),
                },
                Err(err) => RpcResponse::Error(err.to_string()),
            }
        }
    };
    let _ = envelope.respond.send(response);
}

/// Initiator side: pull, then push, then bookkeeping. Flips the state to
/// CatchingUp and signals the babble loop when the peer reports us too
/// far behind.
async fn gossip_with(ctx: &GossipContext, peer: &Peer, return_tx: mpsc::Sender<()>) {
    ctx.sync_requests.fetch_add(1, Ordering::SeqCst);

    match gossip_once(ctx, peer).await {
        Ok(true) => {
            log::debug!("SyncLimit from {}", peer.name);
            ctx.state.set(NodeState::CatchingUp);
            let _ = return_tx.send(()).await;
        }
        Ok(false) => log_stats(ctx).await,
        Err(err) => {
            ctx.sync_errors.fetch_add(1, Ordering::SeqCst);
            log::error!("Gossip with {}: {err}", peer.name);
        }
    }

    if let Ok(id) = peer.id() {
        ctx.selector.lock().unwrap().update_last(id);
    }
    ctx.timer.reset().await;
}

/// Returns true when the peer answered with the sync-limit flag.
async fn gossip_once(ctx: &GossipContext, peer: &Peer) -> anyhow::Result<bool> {
    let peer_id = peer.id()?;

    //Pull
    let known = { ctx.core.lock().await.known_events() };
    let response = ctx
        .transport
        .sync(
            &peer.address,
            SyncRequest {
                from_id: ctx.id,
                known,
            },
        )
        .await?;
    log::debug!(
        "SyncResponse from {}: {} events, sync_limit {}",
        response.from_id,
        response.events.len(),
        response.sync_limit
    );

    if response.sync_limit {
        return Ok(true);
    }

    {
        let mut core = ctx.core.lock().await;
        core.sync(peer_id, response.events)?;
        core.process_sig_pool()?;
    }

    //Push
    let over = {
        let mut core = ctx.core.lock().await;
        core.over_sync_limit(&response.known, ctx.sync_limit)
    };
    if over {
        log::debug!("Peer {} is over the sync limit, skipping push", peer.name);
        return Ok(false);
    }

    let events = {
        let mut core = ctx.core.lock().await;
        let diff = core.event_diff(&response.known)?;
        core.to_wire(&diff)?
    };
    if !events.is_empty() {
        let response = ctx
            .transport
            .eager_sync(
                &peer.address,
                EagerSyncRequest {
                    from_id: ctx.id,
                    events,
                },
            )
            .await?;
        if !response.success {
            anyhow::bail!("eager sync rejected by {}", response.from_id);
        }
    }

    Ok(false)
}

/// A tick with no eligible partner: record pending work into a self-event
/// so signatures keep advancing. Nothing pending means nothing to say.
async fn monologue(ctx: &GossipContext) {
    let mut core = ctx.core.lock().await;
    if core.transaction_pool_len() == 0
        && core.signature_pool_len() == 0
        && core.pending_loaded_events() == 0
    {
        return;
    }
    if let Err(err) = core.add_self_event(None) {
        log::error!("Monologue self-event failed: {err}");
        return;
    }
    if let Err(err) = core.process_sig_pool() {
        log::error!("Monologue signature pool failed: {err}");
    }
}

async fn log_stats(ctx: &GossipContext) {
    let mut core = ctx.core.lock().await;
    log::debug!(
        "Stats: last_consensus_round {:?}, last_block_index {}, consensus_events {}, consensus_transactions {}, undetermined {}, transaction_pool {}",
        core.last_consensus_round(),
        core.last_block_index(),
        core.consensus_events_count(),
        core.consensus_transactions_count(),
        core.undetermined_events_count(),
        core.transaction_pool_len(),
    );
}
