//! Link supervisor actor.
//!
//! One tokio task per link owns the [`LinkMachine`], its timers, the
//! [`Correlator`] and the current transport attempt. Everything reaches it as
//! a message (commands from [`LinkHandle`]s, events from attempt tasks, timer
//! expiries), so transitions run strictly one after another.
//!
//! Each dial runs in its own attempt task that reports back tagged with its
//! attempt number. Hanging up cancels that task, which drops the transport.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use switchboard_core::constants;
use switchboard_core::envelope::{self, RequestEnvelope};
use switchboard_core::{LinkError, RequestId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::correlator::{Correlator, Reply};
use crate::machine::{Attempt, Effect, LinkEvent, LinkInput, LinkMachine, LinkSnapshot, LinkState};
use crate::router::{EventRouter, RouteOutcome};
use crate::transport::{Connection, Connector};

/// Lifecycle hook. Invoked on the supervisor task; must not block.
pub type LinkHook = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Per-link configuration.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Initial endpoint. May be set later via [`LinkHandle::set_endpoint`].
    pub endpoint: Option<String>,
    /// Constant delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Bound on a single attempt staying in `Connecting`.
    pub connect_timeout: Duration,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
    /// Capacity of the command queue.
    pub command_buffer: usize,
}

impl LinkConfig {
    /// Configuration with default timings and no endpoint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            reconnect_delay: Duration::from_millis(constants::DEFAULT_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_millis(constants::DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(constants::DEFAULT_REQUEST_TIMEOUT_MS),
            command_buffer: 64,
        }
    }

    /// Set the initial endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }
}

enum Command {
    Connect,
    ConnectTo(String),
    SetEndpoint(String),
    Disconnect,
    Request {
        action: String,
        payload: Value,
        reply: Reply,
    },
    Shutdown,
}

enum AttemptEvent {
    Opened,
    Frame(String),
    Closed(String),
    Failed(String),
}

type AttemptReport = (Attempt, AttemptEvent);

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running link supervisor.
#[derive(Clone)]
pub struct LinkHandle {
    name: Arc<str>,
    cmd_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<LinkSnapshot>,
    router: Arc<EventRouter>,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("name", &self.name)
            .field("snapshot", &*self.snapshot_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl LinkHandle {
    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a fresh attempt to the current endpoint.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.command(Command::Connect).await
    }

    /// Replace the endpoint and start a fresh attempt to it.
    pub async fn connect_to(&self, url: impl Into<String>) -> Result<(), LinkError> {
        self.command(Command::ConnectTo(url.into())).await
    }

    /// Replace the endpoint without dialing.
    pub async fn set_endpoint(&self, url: impl Into<String>) -> Result<(), LinkError> {
        self.command(Command::SetEndpoint(url.into())).await
    }

    /// Tear the link down and keep it down until the next connect.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.command(Command::Disconnect).await
    }

    /// Disconnect and stop the supervisor. Later calls fail with `LinkGone`.
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.command(Command::Shutdown).await
    }

    /// Send `{action, request_id, payload}` and wait for the matching response.
    ///
    /// Fails immediately with [`LinkError::NotConnected`] unless the link is
    /// open. Resolves with the response `payload`.
    pub async fn send_request(&self, action: &str, payload: Value) -> Result<Value, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Request {
            action: action.to_owned(),
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.gone())?
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> LinkSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Wait until the snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&LinkSnapshot) -> bool,
    ) -> Result<LinkSnapshot, LinkError> {
        let mut rx = self.snapshot_rx.clone();
        let snapshot = rx.wait_for(|s| predicate(s)).await.map_err(|_| self.gone())?;
        Ok(snapshot.clone())
    }

    /// Whether the link is open.
    pub fn is_connected(&self) -> bool {
        self.snapshot_rx.borrow().state == LinkState::Open
    }

    /// Router receiving this link's unsolicited messages.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    async fn command(&self, cmd: Command) -> Result<(), LinkError> {
        self.cmd_tx.send(cmd).await.map_err(|_| self.gone())
    }

    fn gone(&self) -> LinkError {
        LinkError::LinkGone {
            link: self.name.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor task
// ─────────────────────────────────────────────────────────────────────────────

/// Actor state of one link.
pub struct LinkSupervisor {
    name: Arc<str>,
    machine: LinkMachine,
    request_timeout: Duration,
    connector: Arc<dyn Connector>,
    hook: Option<LinkHook>,
    router: Arc<EventRouter>,
    correlator: Correlator,
    snapshot_tx: watch::Sender<LinkSnapshot>,
    reports_tx: mpsc::UnboundedSender<AttemptReport>,
    attempt: Option<LiveAttempt>,
    connect_deadline: Option<(Attempt, Instant)>,
    reconnect_deadline: Option<Instant>,
}

struct LiveAttempt {
    attempt: Attempt,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

impl LinkSupervisor {
    /// Spawn the supervisor task. The link stays idle until `connect()`.
    pub fn spawn(
        config: LinkConfig,
        connector: Arc<dyn Connector>,
        hook: Option<LinkHook>,
    ) -> LinkHandle {
        let name: Arc<str> = Arc::from(config.name.as_str());
        let machine = LinkMachine::new(
            config.name,
            config.endpoint,
            config.reconnect_delay,
            config.connect_timeout,
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let router = Arc::new(EventRouter::new());

        let supervisor = Self {
            name: Arc::clone(&name),
            machine,
            request_timeout: config.request_timeout,
            connector,
            hook,
            router: Arc::clone(&router),
            correlator: Correlator::new(),
            snapshot_tx,
            reports_tx,
            attempt: None,
            connect_deadline: None,
            reconnect_deadline: None,
        };
        let _ = tokio::spawn(supervisor.run(cmd_rx, reports_rx));

        LinkHandle {
            name,
            cmd_tx,
            snapshot_rx,
            router,
        }
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut reports_rx: mpsc::UnboundedReceiver<AttemptReport>,
    ) {
        debug!(link = %self.name, "supervisor started");
        loop {
            let connect_deadline = self.connect_deadline.map(|(_, at)| at);
            let reconnect_deadline = self.reconnect_deadline;
            let request_deadline = self.correlator.next_deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!(link = %self.name, "all handles dropped");
                        break;
                    };
                    match cmd {
                        Command::Connect => self.apply(LinkInput::Connect),
                        Command::ConnectTo(url) => {
                            self.machine.set_endpoint(url);
                            self.apply(LinkInput::Connect);
                        }
                        Command::SetEndpoint(url) => {
                            self.machine.set_endpoint(url);
                            self.publish();
                        }
                        Command::Disconnect => self.apply(LinkInput::Disconnect),
                        Command::Request { action, payload, reply } => {
                            self.send_request(action, payload, reply);
                        }
                        Command::Shutdown => break,
                    }
                }
                Some((attempt, event)) = reports_rx.recv() => match event {
                    AttemptEvent::Opened => self.apply(LinkInput::Opened { attempt }),
                    AttemptEvent::Frame(text) => self.on_frame(attempt, &text),
                    AttemptEvent::Closed(reason) => self.apply(LinkInput::Closed { attempt, reason }),
                    AttemptEvent::Failed(reason) => self.apply(LinkInput::Failed { attempt, reason }),
                },
                () = sleep_until(connect_deadline) => {
                    if let Some((attempt, _)) = self.connect_deadline.take() {
                        self.apply(LinkInput::ConnectTimeout { attempt });
                    }
                }
                () = sleep_until(reconnect_deadline) => {
                    self.reconnect_deadline = None;
                    self.apply(LinkInput::ReconnectDue);
                }
                () = sleep_until(request_deadline) => {
                    let _ = self.correlator.expire(Instant::now());
                }
            }
        }

        self.apply(LinkInput::Disconnect);
        let name = Arc::clone(&self.name);
        self.correlator.reject_all(|| LinkError::LinkGone {
            link: name.to_string(),
        });
        info!(link = %self.name, "supervisor stopped");
    }

    fn apply(&mut self, input: LinkInput) {
        for effect in self.machine.handle(input) {
            self.execute(effect);
        }
        self.publish();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Dial { attempt, url } => self.dial(attempt, url),
            Effect::Hangup { attempt } => {
                if let Some(live) = self.attempt.take_if(|a| a.attempt == attempt) {
                    trace!(link = %self.name, attempt, "hanging up");
                    live.cancel.cancel();
                }
            }
            Effect::ArmConnectGuard { attempt, after } => {
                self.connect_deadline = Some((attempt, Instant::now() + after));
            }
            Effect::CancelConnectGuard => self.connect_deadline = None,
            Effect::ArmReconnect { after } => {
                self.reconnect_deadline = Some(Instant::now() + after);
            }
            Effect::CancelReconnect => self.reconnect_deadline = None,
            Effect::Notify(event) => {
                if let Some(hook) = &self.hook {
                    hook(event);
                }
            }
        }
    }

    fn dial(&mut self, attempt: Attempt, url: String) {
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.attempt = Some(LiveAttempt {
            attempt,
            cancel: cancel.clone(),
            outbound,
        });
        let _ = tokio::spawn(run_attempt(
            Arc::clone(&self.connector),
            url,
            attempt,
            cancel,
            outbound_rx,
            self.reports_tx.clone(),
        ));
    }

    fn send_request(&mut self, action: String, payload: Value, reply: Reply) {
        if !self.machine.is_open() {
            debug!(link = %self.name, action = %action, "request while not connected");
            let _ = reply.send(Err(self.not_connected()));
            return;
        }
        let Some(live) = &self.attempt else {
            let _ = reply.send(Err(self.not_connected()));
            return;
        };

        let request_id = RequestId::new();
        let envelope = RequestEnvelope::new(action, request_id.clone(), payload);
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                let _ = reply.send(Err(LinkError::Encode(e)));
                return;
            }
        };
        if live.outbound.send(frame).is_err() {
            // The attempt task is gone; its final report is already queued.
            let _ = reply.send(Err(self.not_connected()));
            return;
        }
        debug!(
            link = %self.name,
            request_id = %request_id,
            action = %envelope.action,
            "request sent"
        );
        self.correlator
            .register(request_id, envelope.action, self.request_timeout, reply);
    }

    fn on_frame(&mut self, attempt: Attempt, text: &str) {
        if !self.machine.is_live(attempt) {
            trace!(link = %self.name, attempt, "dropping frame of stale attempt");
            return;
        }
        let message = match envelope::decode_inbound(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(link = %self.name, error = %e, "dropping malformed message");
                self.router.record_malformed();
                return;
            }
        };
        if self.correlator.settle(&message) {
            return;
        }
        if self.router.route(message) == RouteOutcome::Dropped {
            trace!(link = %self.name, "unsolicited message dropped");
        }
    }

    fn publish(&self) {
        let snapshot = self.machine.snapshot();
        let _ = self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn not_connected(&self) -> LinkError {
        LinkError::NotConnected {
            link: self.name.to_string(),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// One dial and, if it opens, the connection's frame pump.
///
/// Always ends by reporting exactly one of `Failed` or `Closed`, unless the
/// supervisor is gone.
async fn run_attempt(
    connector: Arc<dyn Connector>,
    url: String,
    attempt: Attempt,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<String>,
    reports: mpsc::UnboundedSender<AttemptReport>,
) {
    let report = |event: AttemptEvent| {
        let _ = reports.send((attempt, event));
    };

    let dialed = tokio::select! {
        () = cancel.cancelled() => {
            report(AttemptEvent::Closed("closed locally".into()));
            return;
        }
        result = connector.connect(&url) => result,
    };
    let Connection {
        mut sink,
        mut stream,
    } = match dialed {
        Ok(connection) => connection,
        Err(e) => {
            report(AttemptEvent::Failed(e.to_string()));
            return;
        }
    };
    report(AttemptEvent::Opened);

    let last = loop {
        tokio::select! {
            () = cancel.cancelled() => break AttemptEvent::Closed("closed locally".into()),
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break AttemptEvent::Closed("closed locally".into());
                };
                if let Err(e) = sink.send(frame).await {
                    break AttemptEvent::Failed(e.to_string());
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => report(AttemptEvent::Frame(text)),
                Some(Err(e)) => break AttemptEvent::Failed(e.to_string()),
                None => break AttemptEvent::Closed("closed by peer".into()),
            },
        }
    };
    // Dropping the connection here is the force close.
    drop(sink);
    drop(stream);
    report(last);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
