//! Pure cascade sequencing.
//!
//! [`CascadePlan`] turns link events and config fetch results into
//! [`CascadeAction`]s. The orchestrator task executes them against the link
//! handles. Every primary open starts a new config generation; a fetch result
//! from an older generation is discarded.

use serde_json::Value;
use switchboard_core::{CascadeError, LinkError};
use switchboard_link::LinkEvent;
use tracing::{debug, error, info, warn};

use crate::endpoint::{self, EndpointRules};
use crate::stage::Stage;

/// Something the orchestrator must do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CascadeAction {
    /// Connect the stage to its current endpoint.
    Connect(Stage),
    /// Point the stage at a new endpoint and connect it.
    ConnectTo(Stage, String),
    /// Force the stage down.
    Disconnect(Stage),
    /// Send `get_config` on the primary for `generation`.
    FetchConfig {
        /// Generation the result must match to be used.
        generation: u64,
    },
}

/// Cascade sequencing state.
#[derive(Debug)]
pub struct CascadePlan {
    rules: EndpointRules,
    tertiary_enabled: bool,
    started: bool,
    generation: u64,
    config: Option<Value>,
    secondary_url: Option<String>,
}

impl CascadePlan {
    /// Plan with the given endpoint rules.
    pub fn new(rules: EndpointRules, tertiary_enabled: bool) -> Self {
        Self {
            rules,
            tertiary_enabled,
            started: false,
            generation: 0,
            config: None,
            secondary_url: None,
        }
    }

    /// Latest successfully fetched config.
    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Secondary endpoint derived from the latest config.
    pub fn secondary_url(&self) -> Option<&str> {
        self.secondary_url.as_deref()
    }

    /// Whether the tertiary stage runs.
    pub fn tertiary_enabled(&self) -> bool {
        self.tertiary_enabled
    }

    /// Connect the primary. Only the first call does anything.
    pub fn start(&mut self) -> Vec<CascadeAction> {
        if self.started {
            debug!("cascade already started");
            return Vec::new();
        }
        self.started = true;
        info!("cascade starting");
        vec![CascadeAction::Connect(Stage::Primary)]
    }

    /// React to a lifecycle event of `stage`.
    pub fn on_link_event(&mut self, stage: Stage, event: &LinkEvent) -> Vec<CascadeAction> {
        match event {
            LinkEvent::Opened => self.on_opened(stage),
            LinkEvent::Closed { .. } | LinkEvent::Failed { .. } | LinkEvent::Disconnected => {
                if stage == Stage::Primary {
                    // Any fetch still in flight belongs to a dead connection.
                    self.generation += 1;
                }
                let dependents = stage.dependents();
                if !dependents.is_empty() {
                    debug!(stage = %stage, ?dependents, "cascading disconnect");
                }
                dependents.into_iter().map(CascadeAction::Disconnect).collect()
            }
        }
    }

    fn on_opened(&mut self, stage: Stage) -> Vec<CascadeAction> {
        match stage {
            Stage::Primary => {
                self.generation += 1;
                debug!(generation = self.generation, "fetching config");
                vec![CascadeAction::FetchConfig {
                    generation: self.generation,
                }]
            }
            Stage::Secondary => {
                if !self.tertiary_enabled {
                    debug!("tertiary disabled");
                    return Vec::new();
                }
                let Some(secondary_url) = self.secondary_url.as_deref() else {
                    warn!("secondary endpoint unknown, skipping tertiary");
                    return Vec::new();
                };
                match endpoint::tertiary_endpoint(secondary_url, &self.rules) {
                    Some(url) => vec![CascadeAction::ConnectTo(Stage::Tertiary, url)],
                    None => {
                        warn!(
                            secondary_url,
                            admin_path = %self.rules.admin_path,
                            "secondary endpoint has no admin path, skipping tertiary"
                        );
                        Vec::new()
                    }
                }
            }
            Stage::Tertiary => Vec::new(),
        }
    }

    /// React to the outcome of the config fetch of `generation`.
    pub fn on_config(
        &mut self,
        generation: u64,
        result: Result<Value, LinkError>,
    ) -> Vec<CascadeAction> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale config result");
            return Vec::new();
        }
        let target = result
            .map_err(CascadeError::from)
            .and_then(|payload| endpoint::secondary_endpoint(&payload, &self.rules));
        match target {
            Ok(target) => {
                info!(url = %target.url, "config received, connecting secondary");
                self.config = Some(target.config);
                self.secondary_url = Some(target.url.clone());
                vec![CascadeAction::ConnectTo(Stage::Secondary, target.url)]
            }
            Err(e) => {
                error!(error = %e, "cascade halted until next primary open");
                Vec::new()
            }
        }
    }
}
