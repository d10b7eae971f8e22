// ── Runtime bridge configuration ──
//
// Describes *how* the bridge polls and talks to devices. Never touches
// disk: the CLI loads the config file and hands a `BridgeConfig` in.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use ledbridge_api::TransportConfig;

use crate::watchdog::RetryPolicy;

/// mDNS service type WLED devices announce.
pub const WLED_SERVICE_TYPE: &str = "_wled._tcp.local.";

/// Configuration for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Base health-check interval.
    pub poll_interval: Duration,
    /// Consecutive failures before a device drops to the long cadence.
    pub max_retries: u32,
    /// Double the delay after each failure instead of retrying at `poll_interval`.
    pub backoff_enabled: bool,
    /// Upper bound on the backed-off delay.
    pub backoff_cap: Duration,
    /// Delay used once `max_retries` is reached.
    pub long_backoff: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// How long to wait for `pong` after a WebSocket ping.
    pub ping_timeout: Duration,
    /// Prefer the WebSocket link when the firmware supports it.
    pub websocket_enabled: bool,
    /// Browse mDNS for devices.
    pub discovery_enabled: bool,
    /// Devices to contact at startup regardless of discovery.
    pub known_devices: Vec<IpAddr>,
    /// HTTP/WebSocket port devices listen on.
    pub device_port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_retries: 5,
            backoff_enabled: true,
            backoff_cap: Duration::from_secs(600),
            long_backoff: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(3),
            websocket_enabled: true,
            discovery_enabled: true,
            known_devices: Vec::new(),
            device_port: 80,
        }
    }
}

impl BridgeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: self.poll_interval,
            max_retries: self.max_retries,
            backoff_enabled: self.backoff_enabled,
            cap: self.backoff_cap,
            long_backoff: self.long_backoff,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig::with_timeout(self.http_timeout)
    }

    /// `ip:port` host string for a device client.
    pub fn device_host(&self, ip: IpAddr) -> String {
        SocketAddr::new(ip, self.device_port).to_string()
    }

    /// Lifetime of the `_online` indicator: two polling intervals.
    pub fn online_expiry(&self) -> Duration {
        self.poll_interval * 2
    }
}
