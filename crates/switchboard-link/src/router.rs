//! Inbound event router.
//!
//! Unsolicited messages (anything the correlator did not consume) go to at
//! most one registered handler. Registering again replaces the previous
//! handler. With no handler the message is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// Push-event callback. Invoked on the link's task; must not block.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// What happened to a routed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The handler was invoked.
    Delivered,
    /// No handler was registered.
    Dropped,
}

/// Single-handler dispatcher with delivery counters.
#[derive(Default)]
pub struct EventRouter {
    handler: RwLock<Option<EventHandler>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

impl EventRouter {
    /// Router with no handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler, replacing any previous one.
    pub fn set_handler(&self, handler: impl Fn(Value) + Send + Sync + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Remove the handler.
    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    /// Whether a handler is registered.
    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Deliver `event` to the handler, or drop it.
    pub fn route(&self, event: Value) -> RouteOutcome {
        // Clone out so the handler runs without the lock held and may re-register.
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(event);
            let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::Delivered
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            let kind = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
            debug!(kind, "no event handler, dropping message");
            RouteOutcome::Dropped
        }
    }

    /// Count a frame that could not be decoded.
    pub fn record_malformed(&self) {
        let _ = self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages delivered to a handler.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Decoded messages dropped for lack of a handler.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames dropped because they were not valid JSON.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("has_handler", &self.has_handler())
            .field("delivered", &self.delivered_count())
            .field("dropped", &self.dropped_count())
            .field("malformed", &self.malformed_count())
            .finish()
    }
}
