//! # switchboard-cascade
//!
//! Sequences three supervised links:
//!
//! 1. **Primary** connects first; on open it is asked for `get_config`.
//! 2. **Secondary** is pointed at the endpoint named in that config.
//! 3. **Tertiary** is the secondary endpoint with the chat path, and carries
//!    push events to the registered handler.
//!
//! When a stage goes down, every stage depending on it is forced down too.
//!
//! - [`stage`]: stages and dependency edges
//! - [`endpoint`]: secondary/tertiary endpoint derivation
//! - [`plan`]: pure sequencing (events in, actions out)
//! - [`orchestrator`]: the task executing the plan, and [`CascadeHandle`]

#![deny(unsafe_code)]

pub mod endpoint;
pub mod orchestrator;
pub mod plan;
pub mod stage;

pub use endpoint::EndpointRules;
pub use orchestrator::{CascadeConfig, CascadeHandle, Orchestrator};
pub use stage::Stage;
