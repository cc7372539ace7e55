//! Notification dispatcher
//!
//! Delivers `ConnectionFound`, `ConnectionTimeout` and `Progress` to at most
//! one handler per kind. With an execution context configured the raising
//! call only submits the delivery; without one the handler runs inline.

use super::context::{ExecutionContext, Job};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Severity attached to a progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgressLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressLevel::Debug => write!(f, "debug"),
            ProgressLevel::Info => write!(f, "info"),
            ProgressLevel::Warning => write!(f, "warning"),
            ProgressLevel::Error => write!(f, "error"),
        }
    }
}

type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;
type ProgressHandler = Arc<dyn Fn(ProgressLevel, &str) + Send + Sync>;

/// Routes notifications to registered handlers
pub struct EventDispatcher {
    context: Option<Arc<dyn ExecutionContext>>,
    connection_found: RwLock<Option<LifecycleHandler>>,
    connection_timeout: RwLock<Option<LifecycleHandler>>,
    progress: RwLock<Option<ProgressHandler>>,
}

impl EventDispatcher {
    /// Create a dispatcher; `None` means inline synchronous delivery
    pub fn new(context: Option<Arc<dyn ExecutionContext>>) -> Self {
        Self {
            context,
            connection_found: RwLock::new(None),
            connection_timeout: RwLock::new(None),
            progress: RwLock::new(None),
        }
    }

    /// Register the ConnectionFound handler, replacing any previous one
    pub fn on_connection_found(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.connection_found.write() = Some(Arc::new(handler));
    }

    /// Register the ConnectionTimeout handler, replacing any previous one
    pub fn on_connection_timeout(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.connection_timeout.write() = Some(Arc::new(handler));
    }

    /// Register the Progress handler, replacing any previous one
    pub fn on_progress(&self, handler: impl Fn(ProgressLevel, &str) + Send + Sync + 'static) {
        *self.progress.write() = Some(Arc::new(handler));
    }

    /// Remove every registered handler
    pub fn clear_handlers(&self) {
        self.connection_found.write().take();
        self.connection_timeout.write().take();
        self.progress.write().take();
    }

    pub fn raise_connection_found(&self) {
        let handler = self.connection_found.read().clone();
        if let Some(handler) = handler {
            self.deliver("ConnectionFound", Box::new(move || handler()));
        }
    }

    pub fn raise_connection_timeout(&self) {
        let handler = self.connection_timeout.read().clone();
        if let Some(handler) = handler {
            self.deliver("ConnectionTimeout", Box::new(move || handler()));
        }
    }

    /// Log `message` and forward it to the Progress handler
    pub fn progress(&self, level: ProgressLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            ProgressLevel::Debug => debug!("[LINK] {}", message),
            ProgressLevel::Info => info!("[LINK] {}", message),
            ProgressLevel::Warning => warn!("[LINK] {}", message),
            ProgressLevel::Error => error!("[LINK] {}", message),
        }

        let handler = self.progress.read().clone();
        if let Some(handler) = handler {
            self.deliver("Progress", Box::new(move || handler(level, &message)));
        }
    }

    fn deliver(&self, kind: &'static str, job: Job) {
        let guarded: Job = Box::new(move || {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                debug!("[EVENTS] {} handler panicked, dropped", kind);
            }
        });

        match &self.context {
            Some(context) => {
                if let Err(e) = context.submit(guarded) {
                    debug!("[EVENTS] {} delivery dropped: {}", kind, e);
                }
            }
            None => guarded(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ContextError, SerialContext};
    use crossbeam::channel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ClosedContext;

    impl ExecutionContext for ClosedContext {
        fn submit(&self, _job: Job) -> Result<(), ContextError> {
            Err(ContextError::Closed)
        }
    }

    #[test]
    fn test_inline_delivery_is_synchronous() {
        let dispatcher = EventDispatcher::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        dispatcher.on_connection_found(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.raise_connection_found();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_kind_is_noop() {
        let dispatcher = EventDispatcher::default();
        dispatcher.raise_connection_found();
        dispatcher.raise_connection_timeout();
        dispatcher.progress(ProgressLevel::Info, "nobody listening");
    }

    #[test]
    fn test_second_registration_replaces_first() {
        let dispatcher = EventDispatcher::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = first.clone();
        dispatcher.on_connection_timeout(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = second.clone();
        dispatcher.on_connection_timeout(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.raise_connection_timeout();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_handlers_silences_every_kind() {
        let dispatcher = EventDispatcher::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let c = hits.clone();
        dispatcher.on_connection_found(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = hits.clone();
        dispatcher.on_connection_timeout(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = hits.clone();
        dispatcher.on_progress(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.clear_handlers();
        dispatcher.raise_connection_found();
        dispatcher.raise_connection_timeout();
        dispatcher.progress(ProgressLevel::Info, "after clear");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_handler_is_discarded() {
        let dispatcher = EventDispatcher::default();
        dispatcher.on_connection_found(|| panic!("handler failure"));
        dispatcher.on_progress(|_, _| panic!("handler failure"));

        dispatcher.raise_connection_found();
        dispatcher.progress(ProgressLevel::Warning, "still running");
    }

    #[test]
    fn test_closed_context_is_discarded() {
        let dispatcher = EventDispatcher::new(Some(Arc::new(ClosedContext)));
        let hits = Arc::new(AtomicUsize::new(0));
        let c = hits.clone();
        dispatcher.on_connection_found(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.raise_connection_found();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_progress_order_preserved_through_context() {
        let context = Arc::new(SerialContext::new("test-progress").expect("spawn context"));
        let dispatcher = EventDispatcher::new(Some(context));
        let (tx, rx) = channel::unbounded();

        dispatcher.on_progress(move |level, message| {
            let _ = tx.send((level, message.to_string()));
        });

        for i in 0..10 {
            dispatcher.progress(ProgressLevel::Info, format!("step {i}"));
        }

        let received: Vec<String> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).expect("delivered").1)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("step {i}")).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_async_delivery_does_not_wait_for_handler() {
        let context = Arc::new(SerialContext::new("test-nonblocking").expect("spawn context"));
        let dispatcher = EventDispatcher::new(Some(context));
        let (release_tx, release_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::unbounded();

        dispatcher.on_connection_timeout(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            let _ = done_tx.send(());
        });

        // Returns while the handler is still blocked
        dispatcher.raise_connection_timeout();
        assert!(done_rx.try_recv().is_err());

        release_tx.send(()).expect("release handler");
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
