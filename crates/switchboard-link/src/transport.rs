//! Transport seam.
//!
//! A [`Connector`] dials an endpoint and yields a [`Connection`]: a sink and a
//! stream of JSON text frames. [`WsConnector`] is the `tokio-tungstenite`
//! implementation; [`crate::testing::ScriptedConnector`] is the in-memory one.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use switchboard_core::TransportError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a connection. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open transport. Dropping it force-closes the connection.
pub struct Connection {
    /// Text frames to the peer.
    pub sink: FrameSink,
    /// Text frames from the peer.
    pub stream: FrameStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Dials endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Connection, TransportError>;
}

/// WebSocket connector over `tokio-tungstenite`.
///
/// Only text frames are surfaced; binary, ping and pong frames are skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .sink_map_err(|e| TransportError::Io(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(other) => {
                    trace!(kind = frame_kind(&other), "skipping non-text frame");
                    None
                }
                Err(e) => Some(Err(TransportError::Io(e.to_string()))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn frame_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
