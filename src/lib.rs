//! Connection lifecycle manager for a single peer link
//!
//! A scheduler drives the link through Wait, Scan, Connect, Watchdog and Stop.
//! While in Watchdog it challenges a silent peer over the command channel and
//! declares a timeout once the retry budget is spent. Lifecycle and progress
//! notifications go through an [`events::EventDispatcher`].

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod strategy;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{CommandChannel, FramedChannel, Priority, QueueMode};
pub use config::{ManagerConfig, WatchdogConfig};
pub use connection::{ConnectionManager, ConnectionManagerBuilder, LinkContext};
pub use error::LinkError;
pub use events::{EventDispatcher, ExecutionContext, ProgressLevel, SerialContext};
pub use linkwatch_shared::ConnectionState;
pub use strategy::{DialConfig, DialStrategy, LinkStrategy};
