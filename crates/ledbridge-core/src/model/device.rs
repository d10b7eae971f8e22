// ── Device registry record ──

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MacAddress;

/// What the bridge knows about one device, keyed by IP in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub ip: IpAddr,
    /// Unknown until the first successful `/json` (or from the mDNS TXT record).
    pub mac: Option<MacAddress>,
    pub name: String,
    /// Contact succeeded within the last retry interval.
    pub connected: bool,
    /// The full tree has been created at least once this session.
    pub initialized: bool,
    pub ws_connected: bool,
    /// Cleared for the rest of the session once `/ws` is found missing.
    pub ws_ping_supported: bool,
    pub firmware: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            mac: None,
            name: String::new(),
            connected: false,
            initialized: false,
            ws_connected: false,
            ws_ping_supported: true,
            firmware: None,
            last_seen: None,
        }
    }

    pub fn with_mac(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac);
        self
    }

    /// Name for log lines: friendly name, then MAC, then IP.
    pub fn label(&self) -> String {
        if !self.name.is_empty() {
            self.name.clone()
        } else if let Some(mac) = &self.mac {
            mac.to_string()
        } else {
            self.ip.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_assumes_ws_support() {
        let record = DeviceRecord::new(IpAddr::from([10, 0, 0, 5]));
        assert!(record.ws_ping_supported);
        assert!(!record.connected);
        assert_eq!(record.label(), "10.0.0.5");
    }

    #[test]
    fn label_prefers_name() {
        let mut record = DeviceRecord::new(IpAddr::from([10, 0, 0, 5]))
            .with_mac(MacAddress::new("aabbccddeeff"));
        assert_eq!(record.label(), "aabbccddeeff");
        record.name = "Desk".into();
        assert_eq!(record.label(), "Desk");
    }
}
