//! Cascade orchestrator task.
//!
//! Owns one link supervisor per [`Stage`] and a [`CascadePlan`]. Link hooks
//! and config fetch results are queued to a single task, so the plan sees
//! them in arrival order. The config fetch runs in its own task so a slow
//! primary never stalls reactions to other links.
//!
//! Only [`CascadeHandle`]s hold the queue's sender; hooks and fetch tasks
//! hold weak ones. Dropping the last handle stops the cascade as if
//! [`CascadeHandle::shutdown`] had been called.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use switchboard_core::LinkError;
use switchboard_core::constants::GET_CONFIG_ACTION;
use switchboard_link::{Connector, LinkConfig, LinkEvent, LinkHandle, LinkHook, LinkSnapshot, LinkSupervisor};
use switchboard_settings::SwitchboardSettings;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::endpoint::EndpointRules;
use crate::plan::{CascadeAction, CascadePlan};
use crate::stage::Stage;

/// Everything needed to build a cascade.
#[derive(Clone, Debug)]
pub struct CascadeConfig {
    /// Primary link (its endpoint must be set).
    pub primary: LinkConfig,
    /// Secondary link (endpoint comes from the fetched config).
    pub secondary: LinkConfig,
    /// Tertiary link (endpoint derived from the secondary).
    pub tertiary: LinkConfig,
    /// Endpoint derivation rules.
    pub rules: EndpointRules,
    /// Whether the tertiary stage runs.
    pub tertiary_enabled: bool,
}

impl CascadeConfig {
    /// Default timings and rules with the given primary endpoint.
    pub fn new(primary_url: impl Into<String>) -> Self {
        Self {
            primary: LinkConfig::new(Stage::Primary.as_str()).with_endpoint(primary_url),
            secondary: LinkConfig::new(Stage::Secondary.as_str()),
            tertiary: LinkConfig::new(Stage::Tertiary.as_str()),
            rules: EndpointRules::default(),
            tertiary_enabled: true,
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        let link = |stage: Stage| {
            let mut config = LinkConfig::new(stage.as_str());
            config.reconnect_delay = Duration::from_millis(settings.links.reconnect_delay_ms);
            config.connect_timeout = Duration::from_millis(settings.links.connect_timeout_ms);
            config.request_timeout = Duration::from_millis(settings.links.request_timeout_ms);
            config.command_buffer = settings.links.command_buffer;
            config
        };
        Self {
            primary: link(Stage::Primary).with_endpoint(settings.primary_url.clone()),
            secondary: link(Stage::Secondary),
            tertiary: link(Stage::Tertiary),
            rules: EndpointRules::from_settings(settings),
            tertiary_enabled: settings.tertiary.enabled,
        }
    }
}

enum CascadeInput {
    Start,
    Link(Stage, LinkEvent),
    ConfigFetched {
        generation: u64,
        result: Result<Value, LinkError>,
    },
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
struct Links {
    primary: LinkHandle,
    secondary: LinkHandle,
    tertiary: LinkHandle,
}

impl Links {
    fn get(&self, stage: Stage) -> &LinkHandle {
        match stage {
            Stage::Primary => &self.primary,
            Stage::Secondary => &self.secondary,
            Stage::Tertiary => &self.tertiary,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running cascade.
#[derive(Clone, Debug)]
pub struct CascadeHandle {
    input_tx: mpsc::UnboundedSender<CascadeInput>,
    links: Links,
    config_rx: watch::Receiver<Option<Value>>,
}

impl CascadeHandle {
    /// Connect the primary and let the cascade follow. Later calls are no-ops.
    pub fn start(&self) {
        if self.input_tx.send(CascadeInput::Start).is_err() {
            warn!("start called on a stopped cascade");
        }
    }

    /// Disconnect every link (dependents first) and stop the orchestrator.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.input_tx.send(CascadeInput::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Handle of one stage's link.
    pub fn link(&self, stage: Stage) -> &LinkHandle {
        self.links.get(stage)
    }

    /// Primary link.
    pub fn primary(&self) -> &LinkHandle {
        &self.links.primary
    }

    /// Secondary link.
    pub fn secondary(&self) -> &LinkHandle {
        &self.links.secondary
    }

    /// Tertiary (push-event) link.
    pub fn tertiary(&self) -> &LinkHandle {
        &self.links.tertiary
    }

    /// Snapshots of every stage, upstream first.
    pub fn snapshots(&self) -> Vec<(Stage, LinkSnapshot)> {
        Stage::ALL
            .into_iter()
            .map(|stage| (stage, self.link(stage).snapshot()))
            .collect()
    }

    /// Register the push-event handler of the tertiary link, replacing any
    /// previous one.
    pub fn set_event_handler(&self, handler: impl Fn(Value) + Send + Sync + 'static) {
        self.links.tertiary.router().set_handler(handler);
    }

    /// Remove the push-event handler.
    pub fn clear_event_handler(&self) {
        self.links.tertiary.router().clear_handler();
    }

    /// Latest successfully fetched config.
    pub fn config(&self) -> Option<Value> {
        self.config_rx.borrow().clone()
    }

    /// Receiver notified whenever a new config is stored.
    pub fn subscribe_config(&self) -> watch::Receiver<Option<Value>> {
        self.config_rx.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator task
// ─────────────────────────────────────────────────────────────────────────────

/// Cascade orchestrator.
pub struct Orchestrator {
    plan: CascadePlan,
    links: Links,
    input_tx: mpsc::WeakUnboundedSender<CascadeInput>,
    config_tx: watch::Sender<Option<Value>>,
}

impl Orchestrator {
    /// Spawn the three link supervisors and the orchestrator task.
    ///
    /// Nothing connects until [`CascadeHandle::start`].
    pub fn spawn(config: CascadeConfig, connector: Arc<dyn Connector>) -> CascadeHandle {
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let hook_for = |stage: Stage| -> LinkHook {
            let tx = input_tx.downgrade();
            Arc::new(move |event| {
                // The orchestrator may already be gone during shutdown.
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(CascadeInput::Link(stage, event));
                }
            })
        };
        let links = Links {
            primary: LinkSupervisor::spawn(
                config.primary,
                Arc::clone(&connector),
                Some(hook_for(Stage::Primary)),
            ),
            secondary: LinkSupervisor::spawn(
                config.secondary,
                Arc::clone(&connector),
                Some(hook_for(Stage::Secondary)),
            ),
            tertiary: LinkSupervisor::spawn(
                config.tertiary,
                connector,
                Some(hook_for(Stage::Tertiary)),
            ),
        };

        let (config_tx, config_rx) = watch::channel(None);
        let orchestrator = Self {
            plan: CascadePlan::new(config.rules, config.tertiary_enabled),
            links: links.clone(),
            input_tx: input_tx.downgrade(),
            config_tx,
        };
        let _ = tokio::spawn(orchestrator.run(input_rx));

        CascadeHandle {
            input_tx,
            links,
            config_rx,
        }
    }

    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<CascadeInput>) {
        loop {
            let Some(input) = input_rx.recv().await else {
                debug!("all cascade handles dropped");
                self.shutdown_links().await;
                break;
            };
            let actions = match input {
                CascadeInput::Start => self.plan.start(),
                CascadeInput::Link(stage, event) => {
                    debug!(stage = %stage, ?event, "link event");
                    self.plan.on_link_event(stage, &event)
                }
                CascadeInput::ConfigFetched { generation, result } => {
                    let actions = self.plan.on_config(generation, result);
                    self.publish_config();
                    actions
                }
                CascadeInput::Shutdown(done) => {
                    self.shutdown_links().await;
                    let _ = done.send(());
                    break;
                }
            };
            for action in actions {
                self.execute(action).await;
            }
        }
        info!("cascade stopped");
    }

    async fn execute(&self, action: CascadeAction) {
        let result = match action {
            CascadeAction::Connect(stage) => self.links.get(stage).connect().await,
            CascadeAction::ConnectTo(stage, url) => self.links.get(stage).connect_to(url).await,
            CascadeAction::Disconnect(stage) => self.links.get(stage).disconnect().await,
            CascadeAction::FetchConfig { generation } => {
                self.fetch_config(generation);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "cascade action failed");
        }
    }

    fn fetch_config(&self, generation: u64) {
        let primary = self.links.primary.clone();
        let tx = self.input_tx.clone();
        let _ = tokio::spawn(async move {
            let result = primary.send_request(GET_CONFIG_ACTION, json!({})).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(CascadeInput::ConfigFetched { generation, result });
            }
        });
    }

    async fn shutdown_links(&self) {
        info!("cascade shutting down");
        for stage in Stage::ALL.into_iter().rev() {
            if let Err(e) = self.links.get(stage).shutdown().await {
                debug!(stage = %stage, error = %e, "link already stopped");
            }
        }
    }

    fn publish_config(&self) {
        let latest = self.plan.config();
        let _ = self.config_tx.send_if_modified(|current| {
            if current.as_ref() == latest {
                false
            } else {
                *current = latest.cloned();
                true
            }
        });
    }
}
