//! Connection manager: control surface over the scheduler worker

use super::scheduler::Scheduler;
use crate::channel::{CommandChannel, Priority, QueueMode};
use crate::config::{ManagerConfig, WatchdogConfig};
use crate::error::LinkError;
use crate::events::{EventDispatcher, ExecutionContext, ProgressLevel};
use crate::strategy::LinkStrategy;
use linkwatch_shared::{ConnectionState, Frame, MessageKind, StateCell};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// State shared between the control surface, the worker and strategies
pub(crate) struct LinkShared {
    pub(crate) state: StateCell,
    pub(crate) connected: AtomicBool,
    pub(crate) config: RwLock<ManagerConfig>,
    pub(crate) channel: Arc<dyn CommandChannel>,
    pub(crate) events: EventDispatcher,
    /// Wakes the worker when Stop is requested
    pub(crate) stop_signal: Notify,
    /// Set by `start_watchdog`, consumed by the worker
    pub(crate) watchdog_restart: AtomicBool,
    sequence_id: AtomicU64,
    nonce: AtomicU64,
    /// Liveness polls waiting for a Pong, by nonce
    pending_polls: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl LinkShared {
    pub(crate) fn next_sequence_id(&self) -> u64 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn watchdog_config(&self) -> WatchdogConfig {
        self.config.read().watchdog
    }

    /// Request a transition, logging rejected ones
    pub(crate) fn request(&self, to: ConnectionState) -> bool {
        match self.state.request(to) {
            Ok(from) => {
                if from != to {
                    debug!("[SCHED] {} -> {}", from, to);
                }
                true
            }
            Err(current) => {
                debug!("[SCHED] Transition {} -> {} rejected", current, to);
                false
            }
        }
    }

    pub(crate) fn start_watchdog(&self) -> bool {
        self.watchdog_restart.store(true, Ordering::SeqCst);
        self.request(ConnectionState::Watchdog)
    }

    pub(crate) fn connection_found(&self) {
        if !self.request(ConnectionState::Wait) {
            debug!("[SCHED] Connection found after stop, ignored");
            return;
        }

        self.connected.store(true, Ordering::SeqCst);
        info!("[SCHED] Connection found");
        self.events.raise_connection_found();

        if self.watchdog_config().enabled {
            self.start_watchdog();
        }
    }

    fn complete_poll(&self, nonce: u64) {
        if let Some(waiter) = self.pending_polls.lock().remove(&nonce) {
            let _ = waiter.send(());
        }
    }
}

/// Handle given to strategies on each scan/connect call
///
/// Strategies that finish discovery in the background may keep a clone; a
/// success reported after the manager stopped is ignored.
#[derive(Clone)]
pub struct LinkContext {
    shared: Arc<LinkShared>,
}

impl LinkContext {
    pub(crate) fn new(shared: Arc<LinkShared>) -> Self {
        Self { shared }
    }

    /// Report that the transport link is established
    ///
    /// Marks the link connected, raises ConnectionFound, and moves the
    /// scheduler to Watchdog when the watchdog is enabled, else to Wait.
    pub fn connection_found(&self) {
        self.shared.connection_found();
    }

    /// Raise a progress notification
    pub fn progress(&self, level: ProgressLevel, message: impl Into<String>) {
        self.shared.events.progress(level, message);
    }

    /// Whether recovery should reuse the known port rather than rescan
    pub fn use_fixed_port(&self) -> bool {
        self.shared.config.read().use_fixed_port
    }

    /// Scheduler state at the time of the call
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }
}

/// Builder for [`ConnectionManager`]
#[derive(Default)]
pub struct ConnectionManagerBuilder {
    config: ManagerConfig,
    channel: Option<Arc<dyn CommandChannel>>,
    strategy: Option<Arc<dyn LinkStrategy>>,
    context: Option<Arc<dyn ExecutionContext>>,
}

impl ConnectionManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Command channel the manager is bound to (required)
    pub fn channel(mut self, channel: Arc<dyn CommandChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Scan/Connect strategy (required)
    pub fn strategy(mut self, strategy: Arc<dyn LinkStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Deliver notifications on `context` instead of inline
    pub fn execution_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<ConnectionManager, LinkError> {
        let channel = self.channel.ok_or(LinkError::MissingChannel)?;
        let strategy = self.strategy.ok_or(LinkError::MissingStrategy)?;
        self.config.validate()?;

        let shared = Arc::new(LinkShared {
            state: StateCell::new(ConnectionState::Wait),
            connected: AtomicBool::new(false),
            config: RwLock::new(self.config),
            channel,
            events: EventDispatcher::new(self.context),
            stop_signal: Notify::new(),
            watchdog_restart: AtomicBool::new(false),
            sequence_id: AtomicU64::new(0),
            nonce: AtomicU64::new(0),
            pending_polls: Mutex::new(HashMap::new()),
        });

        install_heartbeat_handlers(&shared);

        Ok(ConnectionManager {
            shared,
            strategy,
            worker: Mutex::new(None),
        })
    }
}

/// Subscribe to Pong (completes liveness polls) and Ping (answered in kind)
fn install_heartbeat_handlers(shared: &Arc<LinkShared>) {
    let weak: Weak<LinkShared> = Arc::downgrade(shared);
    shared.channel.subscribe(
        MessageKind::Pong,
        Arc::new(move |frame: &Frame| {
            if let (Some(shared), Some(nonce)) = (weak.upgrade(), frame.nonce()) {
                shared.complete_poll(nonce);
            }
        }),
    );

    let weak: Weak<LinkShared> = Arc::downgrade(shared);
    shared.channel.subscribe(
        MessageKind::Ping,
        Arc::new(move |frame: &Frame| {
            let (Some(shared), Some(nonce)) = (weak.upgrade(), frame.nonce()) else {
                return;
            };
            let Ok(runtime) = Handle::try_current() else {
                debug!("[WATCHDOG] No runtime to answer peer challenge {}", nonce);
                return;
            };
            runtime.spawn(async move {
                let reply = Frame::pong(shared.next_sequence_id(), nonce);
                if let Err(e) = shared
                    .channel
                    .send(reply, Priority::Front, QueueMode::Queued)
                    .await
                {
                    debug!("[WATCHDOG] Failed to answer peer challenge {}: {}", nonce, e);
                }
            });
        }),
    );
}

/// Manages the lifecycle of one logical link to a peer
pub struct ConnectionManager {
    shared: Arc<LinkShared>,
    strategy: Arc<dyn LinkStrategy>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::default()
    }

    /// Spawn the scheduler worker on the current tokio runtime
    pub fn start(&self) -> Result<(), LinkError> {
        if self.shared.state.get() == ConnectionState::Stop {
            return Err(LinkError::Stopped);
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(LinkError::AlreadyRunning);
        }

        let runtime = Handle::try_current().map_err(|_| LinkError::NoRuntime)?;
        let scheduler = Scheduler::new(self.shared.clone(), self.strategy.clone());
        *worker = Some(runtime.spawn(scheduler.run()));
        Ok(())
    }

    /// Stop the scheduler for good and wait for the worker to exit
    pub async fn shutdown(&self) {
        self.shared.request(ConnectionState::Stop);
        self.shared.stop_signal.notify_one();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    warn!("[SCHED] Worker ended abnormally: {}", e);
                }
            }
        }
    }

    /// Begin device discovery on the next tick
    pub fn start_scan(&self) {
        self.shared.request(ConnectionState::Scan);
    }

    /// Begin connecting to the known peer on the next tick
    pub fn start_connect(&self) {
        self.shared.request(ConnectionState::Connect);
    }

    /// Return to Wait
    pub fn stop_scan(&self) {
        self.shared.request(ConnectionState::Wait);
    }

    /// Enter Watchdog with a fresh runtime
    pub fn start_watchdog(&self) {
        self.shared.start_watchdog();
    }

    /// Leave Watchdog for Wait
    pub fn stop_watchdog(&self) {
        if self
            .shared
            .state
            .transition(ConnectionState::Watchdog, ConnectionState::Wait)
        {
            debug!("[SCHED] Watchdog -> Wait");
        }
    }

    /// Drop the link to the peer
    ///
    /// Returns `true` when the transport was torn down or nothing was
    /// connected, `false` if the channel failed to close.
    pub async fn disconnect(&self) -> bool {
        if !self.shared.connected.swap(false, Ordering::SeqCst) {
            return true;
        }

        // No more challenges on a link we are closing
        self.stop_watchdog();

        match self.shared.channel.close().await {
            Ok(()) => {
                self.shared.events.progress(ProgressLevel::Info, "Disconnected");
                true
            }
            Err(e) => {
                self.shared
                    .events
                    .progress(ProgressLevel::Warning, format!("Disconnect failed: {e}"));
                false
            }
        }
    }

    /// Probe the peer once, outside the watchdog cadence
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        self.poll_liveness(timeout, 1).await
    }

    /// Send a challenge that bypasses the outbound queue and wait for its reply
    ///
    /// Each of the `tries` attempts gets `timeout` in total, covering both the
    /// write and the wait for a Pong with the same nonce. A write that cannot
    /// complete in time counts as an unanswered attempt. Blocks only the caller.
    pub async fn poll_liveness(&self, timeout: Duration, tries: u32) -> bool {
        for attempt in 1..=tries.max(1) {
            let deadline = Instant::now() + timeout;
            let nonce = self.shared.next_nonce();
            let (tx, rx) = oneshot::channel();
            self.shared.pending_polls.lock().insert(nonce, tx);

            let challenge = Frame::ping(self.shared.next_sequence_id(), nonce);
            let shared = &self.shared;
            let exchange = async move {
                if let Err(e) = shared
                    .channel
                    .send(challenge, Priority::Front, QueueMode::Bypass)
                    .await
                {
                    debug!("[WATCHDOG] Liveness challenge not sent: {}", e);
                    return false;
                }
                rx.await.is_ok()
            };
            let answered = timeout_at(deadline, exchange).await.unwrap_or(false);

            self.shared.pending_polls.lock().remove(&nonce);
            if answered {
                return true;
            }
            debug!("[WATCHDOG] Liveness poll attempt {} unanswered", attempt);
        }
        false
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Register notification handlers here
    pub fn events(&self) -> &EventDispatcher {
        &self.shared.events
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ManagerConfig {
        *self.shared.config.read()
    }

    pub fn set_watchdog_timeout(&self, timeout: Duration) {
        self.shared.config.write().watchdog.timeout = timeout;
    }

    pub fn set_watchdog_retry_timeout(&self, retry_timeout: Duration) {
        self.shared.config.write().watchdog.retry_timeout = retry_timeout;
    }

    /// Values below 1 are raised to 1
    pub fn set_max_watchdog_tries(&self, max_tries: u32) {
        self.shared.config.write().watchdog.max_tries = max_tries.max(1);
    }

    pub fn set_watchdog_enabled(&self, enabled: bool) {
        self.shared.config.write().watchdog.enabled = enabled;
    }

    pub fn set_use_fixed_port(&self, use_fixed_port: bool) {
        self.shared.config.write().use_fixed_port = use_fixed_port;
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Handlers may capture caller state; release them with the manager
        self.shared.events.clear_handlers();
        self.shared.state.request(ConnectionState::Stop).ok();
        self.shared.stop_signal.notify_one();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}
