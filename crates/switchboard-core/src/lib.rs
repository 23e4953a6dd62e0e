//! # switchboard-core
//!
//! Foundation types shared by every switchboard crate:
//!
//! - [`errors`]: [`LinkError`], [`TransportError`], [`CascadeError`]
//! - [`ids`]: the [`RequestId`] correlation key
//! - [`envelope`]: request envelope and inbound message helpers
//! - [`constants`]: protocol defaults
//! - [`logging`]: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;

pub use envelope::RequestEnvelope;
pub use errors::{CascadeError, LinkError, TransportError};
pub use ids::RequestId;
