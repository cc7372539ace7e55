//! Event dispatch for lifecycle and progress notifications
//!
//! This module handles:
//! - One handler slot per notification kind
//! - Inline delivery, or submission to an external execution context
//! - Discarding every delivery fault so the scheduler never stalls

mod context;
mod dispatcher;

pub use context::{ContextError, ExecutionContext, Job, SerialContext, DEFAULT_QUEUE_CAPACITY};
pub use dispatcher::{EventDispatcher, ProgressLevel};
