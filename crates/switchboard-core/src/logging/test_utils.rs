//! In-memory capture of tracing events for assertions in tests.
//!
//! [`capture_logs`] installs a thread-local subscriber, so it sees events
//! from tasks on a current-thread tokio runtime (the `#[tokio::test]`
//! default) as well as from the test body.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Module the event came from.
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Every other field, formatted.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Formatted value of field `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            let _ = self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl Visit for CapturedEvent {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

/// Events recorded since [`capture_logs`] (or the last [`clear`](Self::clear)).
#[derive(Clone, Debug, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events_guard().clone()
    }

    /// Events tagged with `link = name`.
    pub fn for_link(&self, name: &str) -> Vec<CapturedEvent> {
        self.events_guard()
            .iter()
            .filter(|e| e.field("link") == Some(name))
            .cloned()
            .collect()
    }

    /// Whether some event's message contains `needle`.
    pub fn has_message(&self, needle: &str) -> bool {
        self.events_guard().iter().any(|e| e.message.contains(needle))
    }

    /// Whether some event at `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.events_guard()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Number of events at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.events_guard().iter().filter(|e| e.level == level).count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events_guard().clear();
    }

    fn events_guard(&self) -> MutexGuard<'_, Vec<CapturedEvent>> {
        // Keep working after a test thread panicked while holding the lock.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut captured = CapturedEvent {
            level: *meta.level(),
            target: meta.target().to_owned(),
            message: String::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut captured);
        self.events_guard().push(captured);
    }
}

/// Record every event on this thread until the guard is dropped.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(logs.clone())
        .set_default();
    (logs, guard)
}
