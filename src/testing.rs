//! Test doubles shared by the unit tests

use crate::channel::{CommandChannel, FrameHandler, Priority, QueueMode};
use crate::connection::LinkContext;
use crate::events::ProgressLevel;
use crate::strategy::LinkStrategy;
use crate::transport::{TransportConnector, TransportStream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use linkwatch_shared::{Frame, MessageKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::time::Instant;

impl TransportStream for DuplexStream {
    fn peer_label(&self) -> String {
        "duplex".to_string()
    }
}

/// One recorded `send` call
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub frame: Frame,
    pub priority: Priority,
    pub mode: QueueMode,
    pub at: Instant,
}

/// In-memory command channel that records outbound frames
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<SentFrame>>,
    last_received: Mutex<Option<Instant>>,
    subscribers: Mutex<HashMap<MessageKind, FrameHandler>>,
    close_calls: AtomicUsize,
    /// Make `close` return an error
    pub fail_close: AtomicBool,
    /// Answer bypass pings with a matching pong
    pub auto_pong: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Outbound pings, in send order
    pub fn pings(&self) -> Vec<SentFrame> {
        self.sent()
            .into_iter()
            .filter(|s| s.frame.kind() == Some(MessageKind::Ping))
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Simulate an inbound frame from the peer
    pub fn receive(&self, frame: Frame) {
        *self.last_received.lock() = Some(Instant::now());
        let handler = frame
            .kind()
            .and_then(|kind| self.subscribers.lock().get(&kind).cloned());
        if let Some(handler) = handler {
            handler(&frame);
        }
    }
}

#[async_trait]
impl CommandChannel for MockChannel {
    async fn send(&self, frame: Frame, priority: Priority, mode: QueueMode) -> Result<()> {
        self.sent.lock().push(SentFrame {
            frame: frame.clone(),
            priority,
            mode,
            at: Instant::now(),
        });

        if mode == QueueMode::Bypass
            && self.auto_pong.load(Ordering::SeqCst)
            && frame.kind() == Some(MessageKind::Ping)
        {
            if let Some(nonce) = frame.nonce() {
                self.receive(Frame::pong(frame.sequence_id, nonce));
            }
        }
        Ok(())
    }

    fn last_received(&self) -> Option<Instant> {
        *self.last_received.lock()
    }

    fn subscribe(&self, kind: MessageKind, handler: FrameHandler) {
        self.subscribers.lock().insert(kind, handler);
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            bail!("transport refused to close");
        }
        Ok(())
    }
}

/// Strategy that counts calls and optionally reports success
#[derive(Default)]
pub struct MockStrategy {
    pub scans: AtomicUsize,
    pub connects: AtomicUsize,
    /// Call `connection_found` from scan/connect
    pub succeed: AtomicBool,
    /// Context handed to the most recent call
    last_link: Mutex<Option<LinkContext>>,
}

impl MockStrategy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn succeeding() -> Arc<Self> {
        let strategy = Self::default();
        strategy.succeed.store(true, Ordering::SeqCst);
        Arc::new(strategy)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn take_link(&self) -> Option<LinkContext> {
        self.last_link.lock().take()
    }
}

#[async_trait]
impl LinkStrategy for MockStrategy {
    async fn scan(&self, link: &LinkContext) {
        self.scans.fetch_add(1, Ordering::SeqCst);
        *self.last_link.lock() = Some(link.clone());
        if self.succeed.load(Ordering::SeqCst) {
            link.connection_found();
        }
    }

    async fn connect(&self, link: &LinkContext) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_link.lock() = Some(link.clone());
        if self.succeed.load(Ordering::SeqCst) {
            link.connection_found();
        }
    }
}

/// Connector handing out in-memory duplex streams
pub struct MockConnector {
    name: String,
    pub reachable: AtomicBool,
    attempts: AtomicUsize,
    /// Remote halves, kept open so the local side stays attached
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockConnector {
    pub fn new(name: &str, reachable: bool) -> Self {
        Self {
            name: name.to_string(),
            reachable: AtomicBool::new(reachable),
            attempts: AtomicUsize::new(0),
            peers: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for Arc<MockConnector> {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            bail!("{} refused the connection", self.name);
        }
        let (local, remote) = tokio::io::duplex(4096);
        self.peers.lock().push(remote);
        Ok(local)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Progress notifications collected by a handler
pub type ProgressLog = Arc<Mutex<Vec<(ProgressLevel, String)>>>;
