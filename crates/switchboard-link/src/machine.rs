//! Pure link state machine.
//!
//! [`LinkMachine::handle`] maps `(state, input)` to a new state plus a list of
//! [`Effect`]s. It never touches a socket or a timer; the supervisor executes
//! the effects. Every dial is tagged with an [`Attempt`] number and inputs
//! carrying a superseded attempt are ignored, so a `connect()` or
//! `disconnect()` retires everything the previous attempt could still do.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Generation number of one transport dial.
pub type Attempt = u64;

/// Observable lifecycle state of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Never connected.
    Idle,
    /// A dial is in flight.
    Connecting,
    /// The transport is open.
    Open,
    /// The connect guard expired and the attempt is being torn down.
    Closing,
    /// Torn down (a reconnect may be pending).
    Closed,
}

impl LinkState {
    /// Lowercase name, as used in logs and snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications delivered to the link's hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport opened.
    Opened,
    /// The transport closed.
    Closed {
        /// Close reason reported by the transport.
        reason: String,
    },
    /// The transport failed (dial error or I/O error).
    Failed {
        /// Error text.
        reason: String,
    },
    /// `disconnect()` tore something down.
    Disconnected,
}

/// Inputs to the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkInput {
    /// Start a fresh attempt, superseding any current one.
    Connect,
    /// Tear everything down and stay down.
    Disconnect,
    /// The dial of `attempt` produced an open transport.
    Opened {
        /// Attempt that opened.
        attempt: Attempt,
    },
    /// The transport of `attempt` closed.
    Closed {
        /// Attempt that closed.
        attempt: Attempt,
        /// Close reason.
        reason: String,
    },
    /// The dial or the transport of `attempt` failed.
    Failed {
        /// Attempt that failed.
        attempt: Attempt,
        /// Error text.
        reason: String,
    },
    /// The connect guard of `attempt` expired.
    ConnectTimeout {
        /// Attempt the guard was armed for.
        attempt: Attempt,
    },
    /// The reconnect timer fired.
    ReconnectDue,
}

/// Side effects requested by a transition, executed in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Open a transport to `url`, tagging its events with `attempt`.
    Dial {
        /// Attempt number of the dial.
        attempt: Attempt,
        /// Endpoint to dial.
        url: String,
    },
    /// Force-close the transport of `attempt` (no graceful drain).
    Hangup {
        /// Attempt to abandon.
        attempt: Attempt,
    },
    /// Arm the connect guard for `attempt`.
    ArmConnectGuard {
        /// Attempt being guarded.
        attempt: Attempt,
        /// Guard duration.
        after: Duration,
    },
    /// Cancel the connect guard.
    CancelConnectGuard,
    /// Arm the reconnect timer.
    ArmReconnect {
        /// Delay before [`LinkInput::ReconnectDue`].
        after: Duration,
    },
    /// Cancel the reconnect timer.
    CancelReconnect,
    /// Invoke the link hook.
    Notify(LinkEvent),
}

/// Point-in-time view of a link, published on every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    /// Lifecycle state.
    pub state: LinkState,
    /// Current endpoint, if known.
    pub endpoint: Option<String>,
    /// Reconnect timer fires since the last successful open.
    pub reconnect_attempts: u32,
    /// Whether a reconnect timer is armed.
    pub reconnect_pending: bool,
}

/// State of one link.
#[derive(Debug)]
pub struct LinkMachine {
    name: String,
    state: LinkState,
    endpoint: Option<String>,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    last_attempt: Attempt,
    live: Option<Attempt>,
    guard: Option<Attempt>,
    reconnect_pending: bool,
    reconnect_attempts: u32,
}

impl LinkMachine {
    /// New idle machine.
    pub fn new(
        name: impl Into<String>,
        endpoint: Option<String>,
        reconnect_delay: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            state: LinkState::Idle,
            endpoint,
            reconnect_delay,
            connect_timeout,
            last_attempt: 0,
            live: None,
            guard: None,
            reconnect_pending: false,
            reconnect_attempts: 0,
        }
    }

    /// Link name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Whether requests may be sent.
    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Whether `attempt` is the attempt whose transport is current.
    pub fn is_live(&self, attempt: Attempt) -> bool {
        self.live == Some(attempt)
    }

    /// Replace the endpoint without dialing. Takes effect on the next connect.
    pub fn set_endpoint(&mut self, url: impl Into<String>) {
        let url = url.into();
        debug!(link = %self.name, url = %url, "endpoint set");
        self.endpoint = Some(url);
    }

    /// Snapshot of the observable fields.
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            endpoint: self.endpoint.clone(),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_pending: self.reconnect_pending,
        }
    }

    /// Apply one input.
    pub fn handle(&mut self, input: LinkInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            LinkInput::Connect => self.connect(&mut effects),
            LinkInput::Disconnect => self.disconnect(&mut effects),
            LinkInput::Opened { attempt } => self.opened(attempt, &mut effects),
            LinkInput::Closed { attempt, reason } => {
                if self.take_live(attempt, &mut effects) {
                    info!(link = %self.name, attempt, reason = %reason, "link closed");
                    effects.push(Effect::Notify(LinkEvent::Closed { reason }));
                    self.schedule_reconnect(&mut effects);
                }
            }
            LinkInput::Failed { attempt, reason } => {
                if self.take_live(attempt, &mut effects) {
                    warn!(link = %self.name, attempt, reason = %reason, "link failed");
                    effects.push(Effect::Notify(LinkEvent::Failed { reason }));
                    self.schedule_reconnect(&mut effects);
                }
            }
            LinkInput::ConnectTimeout { attempt } => self.connect_timeout(attempt, &mut effects),
            LinkInput::ReconnectDue => {
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                    info!(
                        link = %self.name,
                        reconnect_attempts = self.reconnect_attempts,
                        "reconnecting"
                    );
                    self.connect(&mut effects);
                }
            }
        }
        effects
    }

    fn connect(&mut self, effects: &mut Vec<Effect>) {
        let Some(url) = self.endpoint.clone() else {
            warn!(link = %self.name, "connect requested but endpoint is unknown");
            return;
        };
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.guard.take().is_some() {
            effects.push(Effect::CancelConnectGuard);
        }
        if let Some(previous) = self.live.take() {
            debug!(link = %self.name, attempt = previous, "superseding previous attempt");
            effects.push(Effect::Hangup { attempt: previous });
        }

        self.last_attempt += 1;
        let attempt = self.last_attempt;
        self.live = Some(attempt);
        self.guard = Some(attempt);
        self.state = LinkState::Connecting;
        info!(link = %self.name, attempt, url = %url, "connecting");
        effects.push(Effect::Dial { attempt, url });
        effects.push(Effect::ArmConnectGuard {
            attempt,
            after: self.connect_timeout,
        });
    }

    fn opened(&mut self, attempt: Attempt, effects: &mut Vec<Effect>) {
        if !self.is_live(attempt) || self.state != LinkState::Connecting {
            debug!(link = %self.name, attempt, "ignoring open of stale attempt");
            return;
        }
        if self.guard.take().is_some() {
            effects.push(Effect::CancelConnectGuard);
        }
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        self.state = LinkState::Open;
        self.reconnect_attempts = 0;
        info!(link = %self.name, attempt, "link open");
        effects.push(Effect::Notify(LinkEvent::Opened));
    }

    fn connect_timeout(&mut self, attempt: Attempt, effects: &mut Vec<Effect>) {
        if self.guard != Some(attempt)
            || !self.is_live(attempt)
            || self.state != LinkState::Connecting
        {
            return;
        }
        self.guard = None;
        self.state = LinkState::Closing;
        warn!(
            link = %self.name,
            attempt,
            timeout_ms = u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            "connect timed out"
        );
        // `live` stays set: the attempt's final Closed event completes the teardown.
        effects.push(Effect::Hangup { attempt });
        self.schedule_reconnect(effects);
    }

    fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if self.guard.take().is_some() {
            effects.push(Effect::CancelConnectGuard);
        }
        if let Some(attempt) = self.live.take() {
            effects.push(Effect::Hangup { attempt });
        }
        let was_active = matches!(
            self.state,
            LinkState::Connecting | LinkState::Open | LinkState::Closing
        );
        // A never-started link also ends up Closed.
        self.state = LinkState::Closed;
        if effects.is_empty() && !was_active {
            debug!(link = %self.name, "disconnect: nothing to tear down");
            return;
        }
        info!(link = %self.name, "link disconnected");
        effects.push(Effect::Notify(LinkEvent::Disconnected));
    }

    /// Retire the live attempt if it is `attempt`. Returns whether it was.
    fn take_live(&mut self, attempt: Attempt, effects: &mut Vec<Effect>) -> bool {
        if !self.is_live(attempt) {
            debug!(link = %self.name, attempt, "ignoring event of stale attempt");
            return false;
        }
        self.live = None;
        if self.guard.take().is_some() {
            effects.push(Effect::CancelConnectGuard);
        }
        self.state = LinkState::Closed;
        true
    }

    fn schedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            effects.push(Effect::CancelReconnect);
        }
        self.reconnect_pending = true;
        debug!(
            link = %self.name,
            delay_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        effects.push(Effect::ArmReconnect {
            after: self.reconnect_delay,
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
