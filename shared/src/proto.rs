//! Wire messages exchanged between link peers

use prost::Message;

/// Envelope for every frame on the link
#[derive(Clone, PartialEq, Message)]
pub struct Frame {
    #[prost(uint64, tag = "1")]
    pub sequence_id: u64,

    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,

    #[prost(oneof = "frame::Payload", tags = "3, 4, 5")]
    pub payload: Option<frame::Payload>,
}

pub mod frame {
    use prost::Oneof;

    #[derive(Clone, PartialEq, Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        Ping(super::Ping),

        #[prost(message, tag = "4")]
        Pong(super::Pong),

        #[prost(message, tag = "5")]
        Data(super::Data),
    }
}

/// Heartbeat challenge
#[derive(Clone, PartialEq, Message)]
pub struct Ping {
    #[prost(uint64, tag = "1")]
    pub nonce: u64,
}

/// Heartbeat response, echoes the challenge nonce
#[derive(Clone, PartialEq, Message)]
pub struct Pong {
    #[prost(uint64, tag = "1")]
    pub nonce: u64,
}

/// Opaque application traffic
#[derive(Clone, PartialEq, Message)]
pub struct Data {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
}

/// Identifier of an inbound message, used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ping,
    Pong,
    Data,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Ping => write!(f, "PING"),
            MessageKind::Pong => write!(f, "PONG"),
            MessageKind::Data => write!(f, "DATA"),
        }
    }
}
