//! linkwatch shared protocol types
//!
//! This crate provides the wire frames, the length-prefixed codec and the
//! connection state table shared by the link manager and the peer simulator.

pub mod codec;
pub mod proto;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use proto::*;
pub use state_machine::{ConnectionState, StateCell};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default timing parameters for the link manager
pub mod defaults {
    /// Scheduler tick interval in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 1000;

    /// Silence allowed before the watchdog sends its first challenge
    pub const WATCHDOG_TIMEOUT_MS: u64 = 2000;

    /// Wait between consecutive unanswered challenges
    pub const WATCHDOG_RETRY_TIMEOUT_MS: u64 = 1000;

    /// Unanswered challenges before a timeout is declared
    pub const MAX_WATCHDOG_TRIES: u32 = 3;

    /// Watchdog is opt-in
    pub const WATCHDOG_ENABLED: bool = false;

    /// When false, recovery goes through device discovery (Scan)
    pub const USE_FIXED_PORT: bool = false;
}

/// Builder helpers for creating frames
impl Frame {
    /// Create a heartbeat challenge
    pub fn ping(sequence_id: u64, nonce: u64) -> Self {
        Self::with_payload(sequence_id, frame::Payload::Ping(Ping { nonce }))
    }

    /// Create the reply to a challenge carrying `nonce`
    pub fn pong(sequence_id: u64, nonce: u64) -> Self {
        Self::with_payload(sequence_id, frame::Payload::Pong(Pong { nonce }))
    }

    /// Create an application data frame
    pub fn data(sequence_id: u64, body: impl Into<Vec<u8>>) -> Self {
        Self::with_payload(sequence_id, frame::Payload::Data(Data { body: body.into() }))
    }

    fn with_payload(sequence_id: u64, payload: frame::Payload) -> Self {
        Self {
            sequence_id,
            timestamp_ms: now_ms(),
            payload: Some(payload),
        }
    }

    /// Message identifier of this frame, if it carries a payload
    pub fn kind(&self) -> Option<MessageKind> {
        self.payload.as_ref().map(|p| match p {
            frame::Payload::Ping(_) => MessageKind::Ping,
            frame::Payload::Pong(_) => MessageKind::Pong,
            frame::Payload::Data(_) => MessageKind::Data,
        })
    }

    /// Nonce of a Ping or Pong frame
    pub fn nonce(&self) -> Option<u64> {
        match &self.payload {
            Some(frame::Payload::Ping(p)) => Some(p.nonce),
            Some(frame::Payload::Pong(p)) => Some(p.nonce),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_creation() {
        let frame = Frame::ping(7, 42);
        assert_eq!(frame.sequence_id, 7);
        assert_eq!(frame.kind(), Some(MessageKind::Ping));
        assert_eq!(frame.nonce(), Some(42));
        assert!(frame.timestamp_ms > 0);
    }

    #[test]
    fn test_pong_matches_ping_nonce() {
        let ping = Frame::ping(1, 99);
        let pong = Frame::pong(2, ping.nonce().unwrap_or_default());
        assert_eq!(pong.kind(), Some(MessageKind::Pong));
        assert_eq!(pong.nonce(), ping.nonce());
    }

    #[test]
    fn test_data_has_no_nonce() {
        let frame = Frame::data(3, b"hello".to_vec());
        assert_eq!(frame.kind(), Some(MessageKind::Data));
        assert_eq!(frame.nonce(), None);
    }

    #[test]
    fn test_empty_frame_has_no_kind() {
        assert_eq!(Frame::default().kind(), None);
    }
}
