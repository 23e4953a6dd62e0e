//! Error types.
//!
//! Transport failures never reach callers: the link supervisor absorbs them
//! and reconnects. What callers do see is [`LinkError`] (request level) and
//! [`CascadeError`] (cascade level, logged by the orchestrator).

use serde_json::Value;
use thiserror::Error;

/// Failures of the underlying transport. Consumed by the link supervisor.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The dial did not produce an open connection.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// Why the dial failed.
        reason: String,
    },

    /// Reading or writing an established connection failed.
    #[error("transport I/O failed: {0}")]
    Io(String),

    /// The connection is already closed.
    #[error("transport closed")]
    Closed,
}

/// Request-level errors surfaced to callers of a link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A request was attempted while the link was not open.
    #[error("not connected to {link}")]
    NotConnected {
        /// Name of the link.
        link: String,
    },

    /// No matching response arrived in time.
    #[error("request '{action}' timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Action of the request.
        action: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The matching message was not a `response`.
    #[error("request failed: {response}")]
    RequestFailed {
        /// The full decoded message.
        response: Value,
    },

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame was not valid JSON.
    #[error("malformed inbound message: {0}")]
    Decode(#[source] serde_json::Error),

    /// The supervisor behind this handle has stopped.
    #[error("link supervisor for {link} has stopped")]
    LinkGone {
        /// Name of the link.
        link: String,
    },
}

/// Cascade-level errors. They halt downstream progression and are logged.
#[derive(Debug, Error)]
pub enum CascadeError {
    /// The `get_config` request itself failed.
    #[error("config fetch failed: {0}")]
    ConfigFetchFailed(#[from] LinkError),

    /// The primary answered but did not report success.
    #[error("config fetch rejected: {message}")]
    ConfigRejected {
        /// The `message` field of the response payload.
        message: String,
    },

    /// The fetched config lacks a section needed to continue.
    #[error("config is missing {missing}")]
    ConfigIncomplete {
        /// Dotted path of the missing section.
        missing: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
