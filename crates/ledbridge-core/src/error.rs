// ── Core error types ──
//
// Domain errors from ledbridge-core. Consumers never see reqwest or
// tungstenite errors directly: the `From<ledbridge_api::Error>` impl
// translates transport failures into domain variants.

use thiserror::Error;

use crate::validation::ValidationError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach device at {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Device did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device has no WebSocket endpoint")]
    WebSocketUnsupported,

    #[error("WebSocket link lost: {reason}")]
    WebSocketLost { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Malformed device response: {message}")]
    MalformedResponse { message: String },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Not a device state path: {path}")]
    InvalidPath { path: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Command rejected by device: {message}")]
    CommandRejected { message: String },

    #[error("Discovery failed: {message}")]
    Discovery { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Failures that count against the device watchdog rather than the caller.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::WebSocketLost { .. }
                | Self::MalformedResponse { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ledbridge_api::Error> for CoreError {
    fn from(err: ledbridge_api::Error) -> Self {
        use ledbridge_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        host: e
                            .url()
                            .and_then(|u| u.host_str().map(str::to_owned))
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid device address: {e}"),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Status { status, url } => CoreError::ConnectionFailed {
                host: url,
                reason: format!("HTTP {status}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::MalformedResponse { message },
            Api::MissingField { field } => CoreError::MalformedResponse {
                message: format!("missing {field}"),
            },
            Api::WebSocketUnsupported { .. } => CoreError::WebSocketUnsupported,
            Api::WebSocketConnect(reason) | Api::WebSocketSend(reason) => {
                CoreError::WebSocketLost { reason }
            }
            Api::WebSocketClosed { code, reason } => CoreError::WebSocketLost {
                reason: format!("closed with code {code}: {reason}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_timeout_maps_to_timeout() {
        let err = CoreError::from(ledbridge_api::Error::Timeout { timeout_ms: 3000 });
        assert!(matches!(err, CoreError::Timeout { timeout_ms: 3000 }));
        assert!(err.is_unreachable());
    }

    #[test]
    fn missing_mac_is_malformed() {
        let err = CoreError::from(ledbridge_api::Error::MissingField { field: "info.mac" });
        assert!(matches!(err, CoreError::MalformedResponse { .. }));
        assert!(err.is_unreachable());
    }

    #[test]
    fn ws_unsupported_is_not_a_failure() {
        let err = CoreError::from(ledbridge_api::Error::WebSocketUnsupported { status: 404 });
        assert!(matches!(err, CoreError::WebSocketUnsupported));
        assert!(!err.is_unreachable());
    }
}
