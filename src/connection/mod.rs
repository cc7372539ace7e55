//! Connection lifecycle management
//!
//! This module handles:
//! - The Wait/Scan/Connect/Watchdog/Stop scheduler loop
//! - Driving the watchdog heartbeat and recovering after a timeout
//! - The public control surface (start/stop, disconnect, liveness poll)

mod manager;
mod scheduler;


pub use manager::{ConnectionManager, ConnectionManagerBuilder, LinkContext};
