use thiserror::Error;

/// Top-level error type for the `ledbridge-api` crate.
///
/// Covers every failure mode of the two device surfaces: the HTTP JSON API
/// and the WebSocket push channel. `ledbridge-core` maps these into domain
/// errors and feeds the transient ones into the watchdog.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Device answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Payload parsed but lacks a field the device always sends.
    #[error("Malformed device response: missing {field}")]
    MissingField { field: &'static str },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The firmware has no `/ws` endpoint (built without WebSocket support).
    #[error("WebSocket endpoint not supported by device (HTTP {status})")]
    WebSocketUnsupported { status: u16 },

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Outgoing frame could not be queued because the writer is gone.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::WebSocketSend(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Status { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the device cannot speak WebSocket at all.
    pub fn is_ws_unsupported(&self) -> bool {
        matches!(self, Self::WebSocketUnsupported { .. })
    }
}
