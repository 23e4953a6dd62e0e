//! Request/response correlation table.
//!
//! Each in-flight request owns one entry keyed by its [`RequestId`]. The entry
//! is removed by whichever comes first: a matching inbound message
//! ([`Correlator::settle`]) or its deadline ([`Correlator::expire`]). Removal
//! is what guarantees the reply fires exactly once.
//!
//! Ids that timed out are remembered for a while: a response that arrives
//! late is swallowed instead of reaching the event router.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use switchboard_core::envelope;
use switchboard_core::{LinkError, RequestId};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How many timed-out ids are remembered per link.
const EXPIRED_MEMORY: usize = 64;

/// Completion channel of one request.
pub type Reply = oneshot::Sender<Result<Value, LinkError>>;

struct PendingRequest {
    action: String,
    timeout: Duration,
    deadline: Instant,
    reply: Reply,
}

/// Pending requests of one link.
#[derive(Default)]
pub struct Correlator {
    pending: HashMap<RequestId, PendingRequest>,
    expired: VecDeque<RequestId>,
}

impl Correlator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sent request. Its deadline is `now + timeout`.
    pub fn register(
        &mut self,
        id: RequestId,
        action: impl Into<String>,
        timeout: Duration,
        reply: Reply,
    ) {
        let entry = PendingRequest {
            action: action.into(),
            timeout,
            deadline: Instant::now() + timeout,
            reply,
        };
        let _ = self.pending.insert(id, entry);
    }

    /// Settle the request `message` answers, if any.
    ///
    /// Returns `true` when the message is consumed: it carried the id of a
    /// pending request, or of one that recently timed out (the late answer
    /// is discarded). `false` otherwise.
    pub fn settle(&mut self, message: &Value) -> bool {
        let Some(id) = envelope::correlation_id(message) else {
            return false;
        };
        let Some(entry) = self.pending.remove(id) else {
            return self.forget_expired(id);
        };
        let outcome = if envelope::is_response(message) {
            Ok(envelope::payload_of(message))
        } else {
            warn!(request_id = id, action = %entry.action, "request failed");
            Err(LinkError::RequestFailed {
                response: message.clone(),
            })
        };
        // The caller may have stopped waiting.
        let _ = entry.reply.send(outcome);
        true
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Reject every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = self.pending.remove(id) {
                let timeout_ms = u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(request_id = %id, action = %entry.action, timeout_ms, "request timed out");
                let _ = entry.reply.send(Err(LinkError::RequestTimeout {
                    action: entry.action,
                    timeout_ms,
                }));
            }
        }
        let count = expired.len();
        for id in expired {
            if self.expired.len() == EXPIRED_MEMORY {
                let _ = self.expired.pop_front();
            }
            self.expired.push_back(id);
        }
        count
    }

    fn forget_expired(&mut self, id: &str) -> bool {
        let Some(pos) = self.expired.iter().position(|e| e.as_str() == id) else {
            return false;
        };
        let _ = self.expired.remove(pos);
        debug!(request_id = id, "discarding late response");
        true
    }

    /// Reject everything still pending with `make_error`.
    pub fn reject_all(&mut self, make_error: impl Fn() -> LinkError) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "rejecting pending requests");
        }
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(make_error()));
        }
    }

    /// Whether `id` is still pending.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
