//! Correlation identifiers.
//!
//! Every outbound request carries a fresh [`RequestId`]. Ids are built from a
//! UUID v7 (millisecond timestamp plus random bits), so two sends never
//! collide and ids sort by creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire prefix of every request id.
const PREFIX: &str = "req_";

/// Correlation key of a single request/response exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new unique id (`req_<32 hex digits>`).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("{PREFIX}{}", Uuid::now_v7().simple()))
    }

    /// Wrap an id received from the wire.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for RequestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
