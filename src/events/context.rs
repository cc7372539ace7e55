//! Execution contexts that run notification handlers off the scheduler

use crossbeam::channel::{self, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

/// Jobs a [`SerialContext`] holds before rejecting submissions
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A unit of deferred work submitted to an execution context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors an execution context may report on submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Execution context is closed")]
    Closed,

    #[error("Execution context rejected job: {0}")]
    Rejected(String),
}

/// Somewhere to run notification handlers without blocking the caller
///
/// `submit` must return promptly; the job runs later on the context's own
/// thread or task.
pub trait ExecutionContext: Send + Sync {
    fn submit(&self, job: Job) -> Result<(), ContextError>;
}

/// FIFO execution context backed by a dedicated thread
///
/// Jobs run one at a time in submission order. A panicking job is logged and
/// the queue keeps draining. Submissions beyond the queue capacity are
/// rejected rather than blocking the caller.
pub struct SerialContext {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SerialContext {
    /// Spawn the worker thread with [`DEFAULT_QUEUE_CAPACITY`]
    pub fn new(name: &str) -> std::io::Result<Self> {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Spawn the worker thread with room for `capacity` pending jobs
    pub fn with_capacity(name: &str, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<Job>(capacity.max(1));
        let thread_name = name.to_string();

        let worker = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            debug!("[EVENTS] Context {} started", thread_name);
            while let Ok(job) = rx.recv() {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("[EVENTS] Job panicked on {}", thread_name);
                }
            }
            debug!("[EVENTS] Context {} stopped", thread_name);
        })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Stop accepting jobs, run what is queued, then join the worker
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl ExecutionContext for SerialContext {
    fn submit(&self, job: Job) -> Result<(), ContextError> {
        let tx = self.tx.as_ref().ok_or(ContextError::Closed)?;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => {
                ContextError::Rejected(format!("queue full ({} pending)", tx.len()))
            }
            TrySendError::Disconnected(_) => ContextError::Closed,
        })
    }
}

impl Drop for SerialContext {
    fn drop(&mut self) {
        // Dropping the sender ends the worker loop once the queue is drained
        self.tx.take();
    }
}
