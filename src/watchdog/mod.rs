//! Watchdog Module
//!
//! Application-level heartbeat that detects a silent peer even while the
//! transport still reports an established link.

mod monitor;

pub use monitor::{WatchdogRuntime, WatchdogVerdict};
