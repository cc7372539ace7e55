//! Scan/Connect strategies
//!
//! The scheduler calls [`LinkStrategy::scan`] once per tick while in Scan and
//! [`LinkStrategy::connect`] once per tick while in Connect. A strategy
//! reports success through [`LinkContext::connection_found`] and owns its own
//! retry and backoff policy; the scheduler never inspects its failures.

mod dial;

pub use dial::{DialConfig, DialStrategy};

use crate::connection::LinkContext;
use async_trait::async_trait;

/// Transport-specific discovery and connection establishment
#[async_trait]
pub trait LinkStrategy: Send + Sync {
    /// Look for a reachable peer
    async fn scan(&self, link: &LinkContext);

    /// Connect to the known peer
    async fn connect(&self, link: &LinkContext);
}
