//! Errors surfaced while building or starting the connection manager

use thiserror::Error;

/// Errors returned by the manager's construction and lifecycle calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("A command channel is required")]
    MissingChannel,

    #[error("A link strategy is required")]
    MissingStrategy,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Connection manager has been stopped")]
    Stopped,

    #[error("No tokio runtime available to run the scheduler")]
    NoRuntime,
}
