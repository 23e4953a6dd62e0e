//! In-memory transport for tests.
//!
//! [`ScriptedConnector`] hands every dial to the test through a [`DialQueue`].
//! The test decides the outcome of each dial: [`PendingDial::accept`] yields a
//! [`RemoteEnd`] that plays the server, [`PendingDial::refuse`] fails the
//! dial, and simply holding the [`PendingDial`] leaves the dial hanging.
//!
//! Helpers here panic on misuse, like assertions do.

use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use switchboard_core::TransportError;
use tokio::sync::{mpsc, oneshot};

use crate::transport::{Connection, Connector};

/// How long [`DialQueue::next`] waits before failing the test.
const DIAL_WAIT: Duration = Duration::from_secs(60);

/// Connector whose dials are answered by the test.
#[derive(Clone, Debug)]
pub struct ScriptedConnector {
    dials: mpsc::UnboundedSender<PendingDial>,
}

impl ScriptedConnector {
    /// A connector and the queue its dials arrive on.
    pub fn new() -> (Self, DialQueue) {
        let (dials, rx) = mpsc::unbounded_channel();
        (Self { dials }, DialQueue { rx })
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let refused = |reason: &str| TransportError::Connect {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };
        let (respond, outcome) = oneshot::channel();
        self.dials
            .send(PendingDial {
                url: url.to_owned(),
                respond,
            })
            .map_err(|_| refused("dial queue closed"))?;
        outcome.await.map_err(|_| refused("dial dropped"))?
    }
}

/// Dials made through a [`ScriptedConnector`], in order.
#[derive(Debug)]
pub struct DialQueue {
    rx: mpsc::UnboundedReceiver<PendingDial>,
}

impl DialQueue {
    /// Wait for the next dial.
    ///
    /// # Panics
    ///
    /// If no dial arrives within a minute (of tokio time).
    pub async fn next(&mut self) -> PendingDial {
        match tokio::time::timeout(DIAL_WAIT, self.rx.recv()).await {
            Ok(Some(dial)) => dial,
            Ok(None) => panic!("connector dropped"),
            Err(_) => panic!("no dial within {DIAL_WAIT:?}"),
        }
    }

    /// The next dial if one is already queued.
    pub fn try_next(&mut self) -> Option<PendingDial> {
        self.rx.try_recv().ok()
    }
}

/// A dial waiting for the test to decide its outcome.
#[derive(Debug)]
pub struct PendingDial {
    url: String,
    respond: oneshot::Sender<Result<Connection, TransportError>>,
}

impl PendingDial {
    /// Endpoint being dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the connection and return the server side of it.
    pub fn accept(self) -> RemoteEnd {
        let (to_remote, inbox) = fmpsc::unbounded::<String>();
        let (outbox, from_remote) = fmpsc::unbounded::<Result<String, TransportError>>();
        let connection = Connection {
            sink: Box::pin(to_remote.sink_map_err(|_| TransportError::Closed)),
            stream: Box::pin(from_remote),
        };
        // The dialer may already have given up; the remote then sees a closed inbox.
        let _ = self.respond.send(Ok(connection));
        RemoteEnd {
            inbox,
            outbox: Some(outbox),
        }
    }

    /// Fail the dial.
    pub fn refuse(self, reason: &str) {
        let _ = self.respond.send(Err(TransportError::Connect {
            url: self.url,
            reason: reason.to_owned(),
        }));
    }
}

/// Server side of an accepted scripted connection.
#[derive(Debug)]
pub struct RemoteEnd {
    inbox: fmpsc::UnboundedReceiver<String>,
    outbox: Option<fmpsc::UnboundedSender<Result<String, TransportError>>>,
}

impl RemoteEnd {
    /// Next frame sent by the link. `None` once the link dropped the connection.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbox.next().await
    }

    /// Next frame sent by the link, decoded.
    ///
    /// # Panics
    ///
    /// If the frame is not JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => panic!("link sent non-JSON frame {text:?}: {e}"),
        }
    }

    /// Send a text frame to the link. Returns `false` if the link is gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.outbox
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(Ok(text.into())).is_ok())
    }

    /// Send a JSON frame to the link.
    pub fn push_json(&self, value: &Value) -> bool {
        self.push(value.to_string())
    }

    /// Fail the connection with an I/O error.
    pub fn fail(&mut self, reason: &str) {
        if let Some(tx) = self.outbox.take() {
            let _ = tx.unbounded_send(Err(TransportError::Io(reason.to_owned())));
        }
    }

    /// Close the connection from the server side.
    pub fn close(&mut self) {
        self.outbox = None;
    }
}
