//! Dial strategy: try candidate endpoints and bind the first that answers

use super::LinkStrategy;
use crate::channel::FramedChannel;
use crate::connection::LinkContext;
use crate::events::ProgressLevel;
use crate::transport::TransportConnector;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff applied after a failed scan or connect
#[derive(Debug, Clone)]
pub struct DialConfig {
    /// Delay after the first failure
    pub reconnect_delay: Duration,
    /// Upper bound for the doubling delay
    pub max_reconnect_delay: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct DialState {
    /// Candidate that answered last time
    remembered: Option<usize>,
    /// No attempt before this instant
    next_attempt: Option<Instant>,
    delay: Duration,
}

/// Scans a list of endpoints in order; connects to the remembered one
///
/// On success the stream is attached to the shared [`FramedChannel`] and the
/// manager is told a connection was found.
pub struct DialStrategy<C: TransportConnector> {
    channel: FramedChannel,
    candidates: Vec<C>,
    config: DialConfig,
    state: Mutex<DialState>,
}

impl<C: TransportConnector> DialStrategy<C> {
    pub fn new(channel: FramedChannel, candidates: Vec<C>, config: DialConfig) -> Self {
        let delay = config.reconnect_delay;
        Self {
            channel,
            candidates,
            config,
            state: Mutex::new(DialState {
                remembered: None,
                next_attempt: None,
                delay,
            }),
        }
    }

    /// Index of the candidate the last successful attempt used
    pub fn remembered(&self) -> Option<usize> {
        self.state.lock().remembered
    }

    fn backing_off(&self) -> bool {
        matches!(self.state.lock().next_attempt, Some(at) if Instant::now() < at)
    }

    fn schedule_retry(&self) {
        let mut state = self.state.lock();
        state.next_attempt = Some(Instant::now() + state.delay);
        state.delay = std::cmp::min(state.delay * 2, self.config.max_reconnect_delay);
    }

    async fn established(&self, index: usize, stream: C::Stream, link: &LinkContext) {
        {
            let mut state = self.state.lock();
            state.remembered = Some(index);
            state.next_attempt = None;
            state.delay = self.config.reconnect_delay;
        }

        self.channel.attach(stream).await;
        link.progress(
            ProgressLevel::Info,
            format!("Connected to {}", self.candidates[index].name()),
        );
        link.connection_found();
    }
}

#[async_trait]
impl<C: TransportConnector> LinkStrategy for DialStrategy<C> {
    async fn scan(&self, link: &LinkContext) {
        if self.backing_off() {
            return;
        }

        for (index, connector) in self.candidates.iter().enumerate() {
            link.progress(ProgressLevel::Debug, format!("Probing {}", connector.name()));
            match connector.connect().await {
                Ok(stream) => {
                    self.established(index, stream, link).await;
                    return;
                }
                Err(e) => link.progress(
                    ProgressLevel::Debug,
                    format!("{} unreachable: {}", connector.name(), e),
                ),
            }
        }

        link.progress(
            ProgressLevel::Warning,
            format!("No peer found among {} candidates", self.candidates.len()),
        );
        self.schedule_retry();
    }

    async fn connect(&self, link: &LinkContext) {
        if self.backing_off() {
            return;
        }

        let index = self.remembered().unwrap_or(0);
        let Some(connector) = self.candidates.get(index) else {
            link.progress(ProgressLevel::Error, "No endpoint configured to connect to");
            self.schedule_retry();
            return;
        };

        match connector.connect().await {
            Ok(stream) => self.established(index, stream, link).await,
            Err(e) => {
                link.progress(
                    ProgressLevel::Warning,
                    format!("Connect to {} failed: {}", connector.name(), e),
                );
                self.schedule_retry();
            }
        }
    }
}
