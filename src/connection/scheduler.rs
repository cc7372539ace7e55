//! Scheduler worker
//!
//! A single task ticks at a fixed interval and runs the handler of the active
//! state. It owns the watchdog runtime; nothing else touches it.

use super::manager::{LinkContext, LinkShared};
use crate::channel::{Priority, QueueMode};
use crate::events::ProgressLevel;
use crate::strategy::LinkStrategy;
use crate::watchdog::{WatchdogRuntime, WatchdogVerdict};
use linkwatch_shared::{ConnectionState, Frame};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub(crate) struct Scheduler {
    shared: Arc<LinkShared>,
    strategy: Arc<dyn LinkStrategy>,
    watchdog: WatchdogRuntime,
    /// State handled on the previous tick
    previous: ConnectionState,
}

impl Scheduler {
    pub(crate) fn new(shared: Arc<LinkShared>, strategy: Arc<dyn LinkStrategy>) -> Self {
        let watchdog = WatchdogRuntime::new(Instant::now(), &shared.watchdog_config());
        Self {
            shared,
            strategy,
            watchdog,
            previous: ConnectionState::Wait,
        }
    }

    pub(crate) async fn run(mut self) {
        let tick = self.shared.config.read().tick_interval;
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[SCHED] Scheduler started (tick {:?})", tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shared.stop_signal.notified() => {}
            }

            let state = self.shared.state.get();
            match state {
                ConnectionState::Stop => break,
                ConnectionState::Wait => {}
                ConnectionState::Scan | ConnectionState::Connect => {
                    self.run_strategy(state).await;
                }
                ConnectionState::Watchdog => self.evaluate_watchdog().await,
            }
            self.previous = state;

            if self.shared.state.get() == ConnectionState::Stop {
                break;
            }
        }

        info!("[SCHED] Scheduler stopped");
        self.shared
            .events
            .progress(ProgressLevel::Info, "Connection manager stopped");
    }

    /// One strategy call, abandoned if Stop arrives mid-flight
    async fn run_strategy(&self, state: ConnectionState) {
        let link = LinkContext::new(self.shared.clone());
        let attempt = async {
            if state == ConnectionState::Scan {
                self.strategy.scan(&link).await
            } else {
                self.strategy.connect(&link).await
            }
        };

        tokio::select! {
            _ = attempt => {}
            _ = self.shared.stop_signal.notified() => {
                debug!("[SCHED] {} interrupted by stop", state);
            }
        }
    }

    async fn evaluate_watchdog(&mut self) {
        let config = self.shared.watchdog_config();
        let now = Instant::now();

        let restart = self.shared.watchdog_restart.swap(false, Ordering::SeqCst);
        if restart || self.previous != ConnectionState::Watchdog {
            self.watchdog.restart(now, &config);
            debug!("[WATCHDOG] Started, first deadline in {:?}", config.timeout);
        }

        let verdict = self
            .watchdog
            .evaluate(now, self.shared.channel.last_received(), &config);

        match verdict {
            WatchdogVerdict::Idle => {}
            WatchdogVerdict::Healthy => {
                debug!("[WATCHDOG] Peer traffic seen, window extended");
            }
            WatchdogVerdict::Challenge { attempt } => {
                self.shared.events.progress(
                    ProgressLevel::Warning,
                    format!(
                        "No traffic from peer, watchdog challenge {}/{}",
                        attempt, config.max_tries
                    ),
                );
                let challenge =
                    Frame::ping(self.shared.next_sequence_id(), self.shared.next_nonce());
                if let Err(e) = self
                    .shared
                    .channel
                    .send(challenge, Priority::Front, QueueMode::Queued)
                    .await
                {
                    warn!("[WATCHDOG] Failed to send challenge: {}", e);
                }
            }
            WatchdogVerdict::TimedOut => self.declare_timeout(config.max_tries),
        }
    }

    fn declare_timeout(&self, max_tries: u32) {
        if !self
            .shared
            .state
            .transition(ConnectionState::Watchdog, ConnectionState::Wait)
        {
            // Stopped or moved on while we were evaluating
            return;
        }
        self.shared.connected.store(false, Ordering::SeqCst);

        self.shared.events.progress(
            ProgressLevel::Error,
            format!("Watchdog timeout after {} unanswered challenges", max_tries),
        );
        self.shared.events.raise_connection_timeout();

        let config = *self.shared.config.read();
        if !config.reconnect_on_timeout {
            return;
        }

        let recovery = if config.use_fixed_port {
            ConnectionState::Connect
        } else {
            ConnectionState::Scan
        };
        if self.shared.request(recovery) {
            self.shared
                .events
                .progress(ProgressLevel::Info, format!("Recovering via {}", recovery));
        }
    }
}
