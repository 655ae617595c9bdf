//! Sync engine orchestrator.
//!
//! One [`SyncEngine`] runs per tab. It owns the reactive [`SyncState`], the
//! viewport cache, the pending queue (inside the state), the broadcaster and
//! the leader election, and is the only code that mutates any of them.
//!
//! Every change goes through [`reduce`]: handlers build an [`Action`], the
//! reducer returns the next state and a list of [`Effect`]s, and the engine
//! drains those effects, which may dispatch further actions. Handlers take
//! `&mut self`, so no two transitions ever interleave.
//!
//! # Example
//!
//! ```ignore
//! use chatsync::engine::{Collaborators, SyncEngine};
//!
//! let mut engine = SyncEngine::new(SyncConfig::from_env(), collaborators);
//! engine.start().await;
//! let thread_id = engine.create_conversation("Ideas").await?;
//! engine.select_conversation(&thread_id).await?;
//! engine.send_message(&thread_id, "Hello").await?;
//! engine.run_until_idle().await;
//! ```

mod action;
mod effect;
mod events;
mod handlers;
mod operations;
mod reducer;
mod state;
mod streaming;

pub use action::Action;
pub use effect::Effect;
pub use reducer::{reduce, Transition};
pub use state::{OnlineStatus, SyncState, MAX_ERRORS};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::{AbortHandle, FutureExt};
use futures::stream::{BoxStream, SelectAll, StreamExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::adapters::{lock, CircuitBreakerStore};
use crate::broadcast::{BroadcastStats, Broadcaster, HeartbeatLeader, LeaderElection};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::SyncConfig;
use crate::models::{Message, PendingOperation, Thread};
use crate::network::{ConnectionQuality, NetworkMonitor};
use crate::stream_buffer::StreamBuffer;
use crate::traits::{
    HeartbeatBoard, LatencyProbe, LocalCache, RemoteStore, TabTransport, TokenEvent,
    TokenProvider, UpdateStream,
};
use crate::viewport::ViewportCache;

/// External collaborators injected into an engine.
pub struct Collaborators {
    pub remote: Arc<dyn RemoteStore>,
    pub local: Arc<dyn LocalCache>,
    pub transport: Arc<dyn TabTransport>,
    pub board: Arc<dyn HeartbeatBoard>,
    pub provider: Arc<dyn TokenProvider>,
    /// Optional; without one the network monitor relies on `set_online` only.
    pub probe: Option<Arc<dyn LatencyProbe>>,
}

/// A provider stream being consumed into an assistant message.
struct ActiveStream {
    thread_id: String,
    buffer: StreamBuffer,
    abort: AbortHandle,
}

/// One item from the merged token streams; `None` marks end of stream.
struct StreamItem {
    message_id: String,
    event: Option<TokenEvent>,
}

struct Subscription {
    thread_id: String,
    stream: UpdateStream,
}

/// What woke [`SyncEngine::step`].
enum Wake {
    Tab(Result<String, RecvError>),
    Remote(String, Option<serde_json::Value>),
    Token(Option<StreamItem>),
    Timer,
}

pub struct SyncEngine {
    config: SyncConfig,
    state: SyncState,
    state_tx: watch::Sender<SyncState>,
    remote: Arc<dyn RemoteStore>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    local: Arc<dyn LocalCache>,
    provider: Arc<dyn TokenProvider>,
    viewports: ViewportCache,
    broadcaster: Broadcaster,
    tab_rx: broadcast::Receiver<String>,
    tab_closed: bool,
    leader: Box<dyn LeaderElection>,
    leadership_rx: mpsc::UnboundedReceiver<bool>,
    network: NetworkMonitor,
    probe: Option<Arc<dyn LatencyProbe>>,
    streams: HashMap<String, ActiveStream>,
    token_streams: SelectAll<BoxStream<'static, StreamItem>>,
    subscription: Option<Subscription>,
    pending_effects: VecDeque<Effect>,
    /// Local ordering counter for optimistic messages.
    sequence: u64,
    last_heartbeat: Option<Instant>,
    last_reconcile: Option<Instant>,
    last_probe: Option<Instant>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            remote,
            local,
            transport,
            board,
            provider,
            probe,
        } = collaborators;

        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(config.breaker.clone())));
        let guarded: Arc<dyn RemoteStore> =
            Arc::new(CircuitBreakerStore::shared(remote, breaker.clone()));
        let viewports = ViewportCache::new(config.viewport.clone(), local.clone(), guarded.clone());

        let tab_id = transport.tab_id().to_string();
        let tab_rx = transport.subscribe();
        let broadcaster = Broadcaster::new(transport);

        let (leadership_tx, leadership_rx) = mpsc::unbounded_channel();
        let mut leader = HeartbeatLeader::new(board, tab_id.clone(), config.leader.clone());
        leader.on_leadership_change(Box::new(move |leading| {
            let _ = leadership_tx.send(leading);
        }));

        let state = SyncState::new(tab_id);
        let (state_tx, _) = watch::channel(state.clone());

        Self {
            network: NetworkMonitor::new(config.network.clone()),
            config,
            state,
            state_tx,
            remote: guarded,
            breaker,
            local,
            provider,
            viewports,
            broadcaster,
            tab_rx,
            tab_closed: false,
            leader: Box::new(leader),
            leadership_rx,
            probe,
            streams: HashMap::new(),
            token_streams: SelectAll::new(),
            subscription: None,
            pending_effects: VecDeque::new(),
            sequence: 0,
            last_heartbeat: None,
            last_reconcile: None,
            last_probe: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn tab_id(&self) -> &str {
        &self.state.tab_id
    }

    // ---- read views ----

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Receiver that observes every published state.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn threads(&self) -> &[Thread] {
        self.state.threads()
    }

    /// Messages of a conversation; empty unless it is the selected one.
    pub fn messages(&self, thread_id: &str) -> &[Message] {
        self.state.messages(thread_id)
    }

    pub fn online_status(&self) -> OnlineStatus {
        self.state.online_status()
    }

    pub fn pending_operation_count(&self) -> usize {
        self.state.pending_operation_count()
    }

    pub fn failed_operations(&self) -> Vec<&PendingOperation> {
        self.state.failed_operations()
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader
    }

    pub fn broadcast_stats(&self) -> &BroadcastStats {
        self.broadcaster.stats()
    }

    pub fn viewports(&self) -> &ViewportCache {
        &self.viewports
    }

    pub fn network_quality(&self) -> ConnectionQuality {
        self.network.quality()
    }

    // ---- lifecycle ----

    /// Restore the persisted queue, announce this tab and load the thread list.
    pub async fn start(&mut self) {
        let queue = match self.local.load_queue().await {
            Ok(queue) => queue,
            Err(err) => {
                warn!("Could not restore pending operations: {}", err);
                None
            }
        };
        self.dispatch(Action::Started { queue });
        self.heartbeat().await;
        if let Err(err) = self.refresh_threads().await {
            warn!("Initial thread list refresh failed: {}", err);
        }
        self.drain().await;
    }

    /// Leave cleanly: stop streams, give up leadership, announce departure.
    pub async fn shutdown(&mut self) {
        let streaming: Vec<String> = self.streams.keys().cloned().collect();
        for message_id in streaming {
            self.finish_stream(&message_id, Err(crate::error::StreamError::Cancelled))
                .await;
        }
        self.drain().await;
        self.subscription = None;
        self.leader.resign().await;
        self.drain_leadership();
        self.publish(crate::models::TabEvent::Presence {
            tab_id: self.state.tab_id.clone(),
            is_leader: false,
            leaving: true,
        })
        .await;
        self.persist_queue().await;
    }

    /// Wait for the next input (sibling envelope, remote push, provider
    /// token or timer) and handle it.
    pub async fn step(&mut self) {
        let deadline = self.next_deadline();
        let tab_open = !self.tab_closed;
        let has_subscription = self.subscription.is_some();
        let has_streams = !self.token_streams.is_empty();

        let wake = tokio::select! {
            raw = self.tab_rx.recv(), if tab_open => Wake::Tab(raw),
            (thread_id, update) = next_update(&mut self.subscription), if has_subscription => {
                Wake::Remote(thread_id, update)
            }
            item = self.token_streams.next(), if has_streams => Wake::Token(item),
            _ = sleep_until(deadline) => Wake::Timer,
        };

        match wake {
            Wake::Tab(Ok(raw)) => self.handle_tab_payload(&raw).await,
            Wake::Tab(Err(RecvError::Lagged(missed))) => self.handle_lag(missed).await,
            Wake::Tab(Err(RecvError::Closed)) => {
                warn!("Tab transport closed; cross-tab sync disabled");
                self.tab_closed = true;
            }
            Wake::Remote(thread_id, update) => self.handle_remote_update(&thread_id, update).await,
            Wake::Token(Some(item)) => self.handle_token(item).await,
            Wake::Token(None) => {}
            Wake::Timer => self.tick().await,
        }
        self.drain().await;
    }

    /// Keep stepping for roughly `duration`; may overrun by one heartbeat
    /// interval since a step is never interrupted.
    pub async fn run_for(&mut self, duration: Duration) {
        let until = Instant::now() + duration;
        while Instant::now() < until {
            self.step().await;
        }
    }

    /// Handle everything that is ready right now without waiting.
    ///
    /// Timers that have not fired yet (retry backoff, idle flush) are left
    /// alone.
    pub async fn run_until_idle(&mut self) {
        loop {
            let mut progressed = false;

            while !self.tab_closed {
                match self.tab_rx.try_recv() {
                    Ok(raw) => self.handle_tab_payload(&raw).await,
                    Err(TryRecvError::Lagged(missed)) => self.handle_lag(missed).await,
                    Err(TryRecvError::Closed) => self.tab_closed = true,
                    Err(TryRecvError::Empty) => break,
                }
                progressed = true;
            }

            loop {
                let polled = match &mut self.subscription {
                    Some(sub) => sub
                        .stream
                        .next()
                        .now_or_never()
                        .map(|update| (sub.thread_id.clone(), update)),
                    None => None,
                };
                let Some((thread_id, update)) = polled else {
                    break;
                };
                self.handle_remote_update(&thread_id, update).await;
                progressed = true;
            }

            while !self.token_streams.is_empty() {
                match self.token_streams.next().now_or_never() {
                    Some(Some(item)) => {
                        self.handle_token(item).await;
                        progressed = true;
                    }
                    _ => break,
                }
            }

            self.flush_due_streams().await;
            if !self.state.queue.ready(Utc::now()).is_empty() && self.state.online {
                self.enqueue(Effect::ProcessQueue);
            }
            if !self.pending_effects.is_empty() {
                progressed = true;
            }
            self.drain().await;

            if !progressed {
                break;
            }
        }
    }

    // ---- dispatch ----

    /// Apply one action and queue its effects.
    pub(crate) fn dispatch(&mut self, action: Action) {
        trace!("Dispatch {}", action.name());
        let Transition { state, effects } = reduce(std::mem::take(&mut self.state), action);
        self.state = state;
        for effect in effects {
            self.enqueue(effect);
        }
        self.state_tx.send_replace(self.state.clone());
    }

    pub(crate) fn enqueue(&mut self, effect: Effect) {
        if effect.coalesces() && self.pending_effects.contains(&effect) {
            return;
        }
        self.pending_effects.push_back(effect);
    }

    /// Run queued effects until none remain.
    pub(crate) async fn drain(&mut self) {
        while let Some(effect) = self.pending_effects.pop_front() {
            self.run_effect(effect).await;
        }
    }

    /// Mirror breaker transitions into state.
    pub(crate) fn sync_circuit(&mut self) {
        let circuit = lock(&self.breaker).state();
        if circuit != self.state.circuit {
            debug!("Circuit now {:?}", circuit);
            self.dispatch(Action::CircuitChanged(circuit));
        }
    }

    fn drain_leadership(&mut self) {
        let mut latest = None;
        while let Ok(leading) = self.leadership_rx.try_recv() {
            latest = Some(leading);
        }
        if let Some(is_leader) = latest {
            if is_leader != self.state.is_leader {
                self.dispatch(Action::LeadershipChanged { is_leader });
            }
        }
    }

    // ---- timers ----

    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        let heartbeat = match self.last_heartbeat {
            Some(at) => at + self.config.leader.heartbeat_interval,
            None => now,
        };
        let mut deadline = heartbeat;
        for stream in self.streams.values() {
            if let Some(at) = stream.buffer.next_deadline() {
                deadline = deadline.min(at);
            }
        }
        if self.state.online {
            if let Some(due) = self.state.queue.next_due() {
                let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                deadline = deadline.min(now + wait);
            }
        }
        if self.probe.is_some() {
            let probe = match self.last_probe {
                Some(at) => at + self.config.network.probe_interval,
                None => now,
            };
            deadline = deadline.min(probe);
        }
        deadline
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        self.flush_due_streams().await;

        let heartbeat_due = self
            .last_heartbeat
            .map_or(true, |at| now >= at + self.config.leader.heartbeat_interval);
        if heartbeat_due {
            self.heartbeat().await;
        }

        let probe_due = self
            .last_probe
            .map_or(true, |at| now >= at + self.config.network.probe_interval);
        if self.probe.is_some() && probe_due {
            self.measure_network().await;
        }

        if self.state.online && !self.state.queue.ready(Utc::now()).is_empty() {
            self.enqueue(Effect::ProcessQueue);
        }
    }

    /// Publish liveness, track leadership and peers; the leader also runs
    /// periodic reconciliation.
    pub async fn heartbeat(&mut self) {
        let now = Instant::now();
        self.last_heartbeat = Some(now);
        self.leader.heartbeat().await;
        self.drain_leadership();

        let tabs = self.leader.live_tabs().await;
        self.dispatch(Action::PeersObserved { tabs });

        if !self.state.is_leader || !self.state.online {
            return;
        }
        let reconcile_due = self
            .last_reconcile
            .map_or(true, |at| now >= at + self.config.leader.reconcile_interval);
        if reconcile_due {
            self.last_reconcile = Some(now);
            debug!("Leader {} reconciling with remote store", self.state.tab_id);
            if let Err(err) = self.refresh_threads().await {
                debug!("Reconciliation thread refresh failed: {}", err);
            }
            if let Some(active) = self.state.active_thread.clone() {
                self.enqueue(Effect::RefreshViewport { thread_id: active });
            }
        }
        self.drain().await;
    }

    /// Explicit connectivity signal from the host.
    pub async fn set_online(&mut self, online: bool) {
        self.network.set_online(online);
        self.dispatch(Action::ConnectivityChanged {
            online,
            quality: self.network.quality(),
        });
        self.drain().await;
    }

    /// Probe latency once and publish the resulting quality.
    pub async fn measure_network(&mut self) -> ConnectionQuality {
        self.last_probe = Some(Instant::now());
        let Some(probe) = self.probe.clone() else {
            return self.network.quality();
        };
        let quality = self.network.measure(probe.as_ref()).await;
        if quality != self.state.quality {
            self.dispatch(Action::ConnectivityChanged {
                online: self.state.online,
                quality,
            });
        }
        quality
    }

    pub fn clear_errors(&mut self) {
        self.dispatch(Action::ErrorsCleared);
    }
}

async fn next_update(subscription: &mut Option<Subscription>) -> (String, Option<serde_json::Value>) {
    match subscription {
        Some(sub) => (sub.thread_id.clone(), sub.stream.next().await),
        None => futures::future::pending().await,
    }
}
