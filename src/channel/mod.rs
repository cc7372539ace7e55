//! Command channel contract
//!
//! The channel frames, queues and delivers typed messages to and from the
//! peer. The manager only needs four things from it: sending with a priority
//! and queue mode, the time of the last inbound frame, per-kind inbound
//! subscriptions, and tearing the transport down.

mod framed;

pub use framed::FramedChannel;

use anyhow::Result;
use async_trait::async_trait;
use linkwatch_shared::{Frame, MessageKind};
use std::sync::Arc;
use tokio::time::Instant;

/// Position of an outbound frame relative to already queued traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Appended behind queued frames
    Normal,
    /// Jumps ahead of queued frames
    Front,
}

/// How an outbound frame reaches the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Goes through the outbound queue and its writer
    Queued,
    /// Written to the transport directly by the caller
    Bypass,
}

/// Handler invoked for inbound frames of one kind
pub type FrameHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Framed message channel to the peer
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send a frame. `priority` only matters for [`QueueMode::Queued`].
    async fn send(&self, frame: Frame, priority: Priority, mode: QueueMode) -> Result<()>;

    /// When the most recent inbound frame of any kind was received
    fn last_received(&self) -> Option<Instant>;

    /// Route inbound frames of `kind` to `handler`, replacing any previous one
    fn subscribe(&self, kind: MessageKind, handler: FrameHandler);

    /// Tear down the underlying transport connection
    async fn close(&self) -> Result<()>;
}
