//! Per-device WebSocket connection.
//!
//! Connects to a WLED device's `/ws` endpoint and surfaces everything that
//! happens on the socket as a typed [`WsEvent`] through an mpsc channel.
//! The owning device task consumes those events; reconnection is the
//! caller's decision, since it is driven by the device watchdog rather than
//! by the socket itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledbridge_api::websocket::{WsConnection, WsEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = url::Url::parse("ws://192.168.1.40/ws")?;
//! let (handle, mut events) = WsConnection::connect(&url, CancellationToken::new()).await?;
//!
//! handle.ping()?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::StateUpdate;

// ── Channel capacity ─────────────────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Text frame sent as a liveness probe; the device answers `"pong"`.
pub const PING_TEXT: &str = "ping";

// ── Events ───────────────────────────────────────────────────────────

/// A decoded text frame from the device.
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Reply to a [`PING_TEXT`] probe.
    Pong,
    /// `{state, info}` push, sent after every change on the device.
    State(StateUpdate),
    /// Valid JSON that is not a state push (e.g. `{"success":true}`).
    Other(serde_json::Value),
}

/// Everything that can happen on a device socket.
#[derive(Debug, Clone)]
pub enum WsEvent {
    Opened,
    Message(WsMessage),
    Closed { code: u16, reason: String },
    Error(String),
}

// ── Handle ───────────────────────────────────────────────────────────

/// Write side of an open connection. Cheap to clone; all clones feed the
/// same socket.
#[derive(Debug, Clone)]
pub struct WsHandle {
    outgoing: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

impl WsHandle {
    /// Queue a text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.outgoing
            .send(Message::Text(text.into().into()))
            .map_err(|_| Error::WebSocketSend("connection task has exited".into()))
    }

    /// Serialize `value` and queue it as a text frame.
    pub fn send_json(&self, value: &serde_json::Value) -> Result<(), Error> {
        self.send_text(value.to_string())
    }

    /// Send the liveness probe.
    pub fn ping(&self) -> Result<(), Error> {
        self.send_text(PING_TEXT)
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outgoing.is_closed()
    }
}

// ── Connection ───────────────────────────────────────────────────────

pub struct WsConnection;

impl WsConnection {
    /// Perform the upgrade handshake and spawn the read/write task.
    ///
    /// Handshake failures are returned directly so the caller can tell an
    /// unreachable device from one that has no WebSocket support at all
    /// ([`Error::WebSocketUnsupported`]). Once open, failures arrive as
    /// [`WsEvent::Error`] / [`WsEvent::Closed`] on the returned receiver.
    pub async fn connect(
        url: &Url,
        cancel: CancellationToken,
    ) -> Result<(WsHandle, mpsc::Receiver<WsEvent>), Error> {
        tracing::debug!(url = %url, "Connecting to WebSocket");

        let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
            |e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()),
        )?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
            .await
            .map_err(classify_handshake_error)?;

        tracing::info!(url = %url, "WebSocket connected");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let _ = event_tx.try_send(WsEvent::Opened);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_socket(ws_stream, out_rx, event_tx, task_cancel).await;
        });

        Ok((
            WsHandle {
                outgoing: out_tx,
                cancel,
            },
            event_rx,
        ))
    }
}

fn classify_handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 404 | 501) {
                Error::WebSocketUnsupported { status }
            } else {
                Error::WebSocketConnect(format!("HTTP {status} during upgrade"))
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

// ── Socket task ──────────────────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_socket(
    ws_stream: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::Sender<WsEvent>,
    cancel: CancellationToken,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                let _ = events.try_send(WsEvent::Closed {
                    code: 1000,
                    reason: "closed by client".into(),
                });
                break;
            }
            Some(msg) = outgoing.recv() => {
                if let Err(e) = write.send(msg).await {
                    let _ = events.send(WsEvent::Error(e.to_string())).await;
                    break;
                }
            }
            frame = read.next() => {
                let event = match frame {
                    Some(Ok(Message::Text(text))) => WsEvent::Message(parse_text(text.as_str())),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((1005, String::new()), |cf| {
                            (u16::from(cf.code), cf.reason.as_str().to_owned())
                        });
                        tracing::debug!(code, reason = %reason, "WebSocket close frame received");
                        let _ = events.send(WsEvent::Closed { code, reason }).await;
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(WsEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events.send(WsEvent::Closed {
                            code: 1006,
                            reason: "stream ended".into(),
                        }).await;
                        break;
                    }
                    // Binary, Ping, Pong, Frame: tungstenite answers pings itself
                    Some(Ok(_)) => continue,
                };
                if events.send(event).await.is_err() {
                    // Receiver dropped: nobody owns this socket any more
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    cancel.cancel();
    tracing::debug!("WebSocket task exiting");
}

// ── Message parsing ──────────────────────────────────────────────────

/// Decode one text frame. Non-JSON text other than `pong` is kept as a
/// JSON string so nothing is silently dropped.
pub fn parse_text(text: &str) -> WsMessage {
    if text.trim() == "pong" {
        return WsMessage::Pong;
    }

    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Non-JSON WebSocket frame");
            return WsMessage::Other(serde_json::Value::String(text.to_owned()));
        }
    };

    if value.get("state").is_some_and(serde_json::Value::is_object)
        || value.get("info").is_some_and(serde_json::Value::is_object)
    {
        match serde_json::from_value::<StateUpdate>(value.clone()) {
            Ok(update) => WsMessage::State(update),
            Err(_) => WsMessage::Other(value),
        }
    } else {
        WsMessage::Other(value)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn pong_is_recognised() {
        assert!(matches!(parse_text("pong"), WsMessage::Pong));
    }

    #[test]
    fn state_push_is_typed() {
        let msg = parse_text(r#"{"state":{"on":true,"bri":80},"info":{"mac":"aabbccddeeff"}}"#);
        let WsMessage::State(update) = msg else {
            panic!("expected state push");
        };
        assert_eq!(update.state.unwrap()["bri"], 80);
        assert_eq!(update.info.unwrap()["mac"], "aabbccddeeff");
    }

    #[test]
    fn ack_body_is_other() {
        let msg = parse_text(r#"{"success":true}"#);
        assert!(matches!(msg, WsMessage::Other(ref v) if v["success"] == true));
    }

    #[test]
    fn garbage_does_not_panic() {
        let msg = parse_text("not json at all");
        assert!(matches!(msg, WsMessage::Other(serde_json::Value::String(_))));
    }
}
