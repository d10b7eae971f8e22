//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use ledbridge_config::ConfigError;
use ledbridge_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach device at {host}")]
    #[diagnostic(
        code(ledbridge::connection_failed),
        help(
            "Check that the device is powered and on the network.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { host: String, reason: String },

    #[error("Device did not answer within {timeout_ms}ms")]
    #[diagnostic(
        code(ledbridge::timeout),
        help("Raise network.http_timeout_ms in the config file.")
    )]
    Timeout { timeout_ms: u64 },

    // ── Devices ──────────────────────────────────────────────────────

    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(ledbridge::not_found),
        help("Run: ledbridge probe <ip> to register the device first")
    )]
    NotFound { identifier: String },

    #[error("Device error: {message}")]
    #[diagnostic(code(ledbridge::device))]
    Device { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ledbridge::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Configuration file already exists")]
    #[diagnostic(
        code(ledbridge::config_exists),
        help("Use --force to overwrite {path}")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(ledbridge::config),
        help("Check the config file. Run: ledbridge config path")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(ledbridge::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(ledbridge::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ConfigExists { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { host, reason } => CliError::ConnectionFailed { host, reason },

            CoreError::Timeout { timeout_ms } => CliError::Timeout { timeout_ms },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound { identifier },

            CoreError::InvalidPath { path } => CliError::Validation {
                field: "path".into(),
                reason: format!("{path} is not a writable state"),
            },

            CoreError::Validation(e) => CliError::Validation {
                field: "value".into(),
                reason: e.to_string(),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            other @ (CoreError::WebSocketUnsupported
            | CoreError::WebSocketLost { .. }
            | CoreError::MalformedResponse { .. }
            | CoreError::CommandRejected { .. }
            | CoreError::Discovery { .. }
            | CoreError::Internal(_)) => CliError::Device {
                message: other.to_string(),
            },
        }
    }
}
