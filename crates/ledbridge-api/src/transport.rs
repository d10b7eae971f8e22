// Shared transport configuration for building reqwest::Client instances.
//
// Every per-device HTTP client is built from one of these so the short
// request timeout and user agent stay identical across devices.

use std::time::Duration;

/// Default timeout for device HTTP calls. WLED answers in milliseconds
/// when it is alive, so anything longer only delays failure detection.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(3);

const USER_AGENT: &str = concat!("ledbridge/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Config with the same value for request and connect timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            connect_timeout: timeout,
        }
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(crate::error::Error::Transport)
    }

    /// Request timeout in whole milliseconds, for error reporting.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
