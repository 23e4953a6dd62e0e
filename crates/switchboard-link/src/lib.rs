//! # switchboard-link
//!
//! One supervised, self-healing link per backend endpoint.
//!
//! - [`machine`]: the pure per-link state machine (state + input → effects)
//! - [`supervisor`]: the actor that executes those effects over a transport
//! - [`correlator`]: `request_id` → pending reply table with deadlines
//! - [`router`]: single-handler dispatch of unsolicited messages
//! - [`transport`]: the [`Connector`] seam and its `tokio-tungstenite` impl
//! - [`testing`]: a scripted in-memory connector

#![deny(unsafe_code)]

pub mod correlator;
pub mod machine;
pub mod router;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use machine::{LinkEvent, LinkSnapshot, LinkState};
pub use router::EventRouter;
pub use supervisor::{LinkConfig, LinkHandle, LinkHook, LinkSupervisor};
pub use transport::{Connection, Connector, WsConnector};
