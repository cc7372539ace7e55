//! Watchdog evaluation step
//!
//! The runtime is owned by the scheduler worker. Each tick in the Watchdog
//! state calls [`WatchdogRuntime::evaluate`], which decides what the worker
//! should do; sending challenges and raising events is left to the caller.

use crate::config::WatchdogConfig;
use tokio::time::Instant;

/// Outcome of one watchdog evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Deadline not reached yet
    Idle,
    /// Traffic arrived since the last check, window moved forward
    Healthy,
    /// Peer silent, send challenge number `attempt`
    Challenge { attempt: u32 },
    /// Retry budget exhausted
    TimedOut,
}

/// Per-connection heartbeat bookkeeping
#[derive(Debug, Clone)]
pub struct WatchdogRuntime {
    last_check: Instant,
    next_timeout_check: Instant,
    tries_used: u32,
}

impl WatchdogRuntime {
    /// Fresh runtime whose first deadline is one `timeout` after `now`
    pub fn new(now: Instant, config: &WatchdogConfig) -> Self {
        Self {
            last_check: now,
            next_timeout_check: now + config.timeout,
            tries_used: 0,
        }
    }

    /// Reset all counters, used whenever the watchdog (re)starts
    pub fn restart(&mut self, now: Instant, config: &WatchdogConfig) {
        *self = Self::new(now, config);
    }

    pub fn tries_used(&self) -> u32 {
        self.tries_used
    }

    pub fn last_check(&self) -> Instant {
        self.last_check
    }

    pub fn next_timeout_check(&self) -> Instant {
        self.next_timeout_check
    }

    /// Evaluate link freshness at `now`
    ///
    /// `last_received` is the channel's timestamp of the most recent inbound
    /// frame. A healthy window is anchored to that frame, so silence is always
    /// measured from the last thing the peer actually sent.
    pub fn evaluate(
        &mut self,
        now: Instant,
        last_received: Option<Instant>,
        config: &WatchdogConfig,
    ) -> WatchdogVerdict {
        let max_tries = config.max_tries.max(1);
        // The budget may have shrunk since the last challenge
        self.tries_used = self.tries_used.min(max_tries);

        if now < self.next_timeout_check {
            return WatchdogVerdict::Idle;
        }

        if let Some(received_at) = last_received.filter(|at| *at > self.last_check) {
            self.tries_used = 0;
            self.last_check = now;
            self.next_timeout_check = received_at + config.timeout;
            return WatchdogVerdict::Healthy;
        }

        if self.tries_used >= max_tries {
            self.tries_used = 0;
            self.last_check = now;
            self.next_timeout_check = now + config.timeout;
            return WatchdogVerdict::TimedOut;
        }

        self.tries_used += 1;
        self.last_check = now;
        self.next_timeout_check = now + config.retry_timeout;
        WatchdogVerdict::Challenge {
            attempt: self.tries_used,
        }
    }
}
