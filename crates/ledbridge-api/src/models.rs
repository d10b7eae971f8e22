// ── Wire models for the WLED JSON API ──
//
// `state` and `info` stay as raw JSON: the tree synchronizer walks them
// generically, and firmware versions add fields all the time. Only the
// handful of fields the lifecycle needs are typed.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Full `GET /json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Mutable light state (`on`, `bri`, `seg`, `nl`, ...).
    pub state: serde_json::Value,

    /// Read-only device information (`mac`, `name`, `ver`, `leds`, `wifi`, ...).
    pub info: serde_json::Value,

    /// Effect names, indexed by effect ID.
    #[serde(default)]
    pub effects: Vec<String>,

    /// Palette names, indexed by palette ID.
    #[serde(default)]
    pub palettes: Vec<String>,
}

impl DeviceSnapshot {
    /// Extract the typed identity fields, rejecting payloads that lack a MAC.
    pub fn identity(&self) -> Result<DeviceIdentity, Error> {
        if !self.state.is_object() {
            return Err(Error::MissingField { field: "state" });
        }
        DeviceIdentity::from_info(&self.info)
    }
}

/// The identity subset of `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware MAC, lowercase hex without separators.
    pub mac: String,

    /// Friendly name configured on the device.
    #[serde(default)]
    pub name: String,

    /// Firmware version string.
    #[serde(default)]
    pub ver: Option<String>,

    /// Connected WebSocket clients; `-1` means the build has no WebSocket.
    #[serde(default)]
    pub ws: Option<i64>,
}

impl DeviceIdentity {
    pub fn from_info(info: &serde_json::Value) -> Result<Self, Error> {
        if !info.is_object() {
            return Err(Error::MissingField { field: "info" });
        }
        let identity: Self =
            serde_json::from_value(info.clone()).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: info.to_string(),
            })?;
        if identity.mac.is_empty() {
            return Err(Error::MissingField { field: "info.mac" });
        }
        Ok(identity)
    }

    /// `false` when the firmware reports it was built without WebSocket support.
    pub fn supports_websocket(&self) -> bool {
        self.ws != Some(-1)
    }
}

/// A state push received over the WebSocket (or a partial `/json` body).
///
/// WLED sends `{ "state": {...}, "info": {...} }` after every change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub state: Option<serde_json::Value>,
    #[serde(default)]
    pub info: Option<serde_json::Value>,
}

/// Body returned by `POST /json`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub success: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_from_full_payload() {
        let snapshot: DeviceSnapshot = serde_json::from_value(json!({
            "state": { "on": true, "bri": 128 },
            "info": { "mac": "a4cf12fdae01", "name": "Desk", "ver": "0.14.0", "ws": 1 },
            "effects": ["Solid", "Blink"],
            "palettes": ["Default"]
        }))
        .unwrap();

        let id = snapshot.identity().unwrap();
        assert_eq!(id.mac, "a4cf12fdae01");
        assert_eq!(id.name, "Desk");
        assert!(id.supports_websocket());
        assert_eq!(snapshot.effects.len(), 2);
    }

    #[test]
    fn missing_mac_is_malformed() {
        let err = DeviceIdentity::from_info(&json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));

        let err = DeviceIdentity::from_info(&json!({ "mac": "" })).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "info.mac" }));
    }

    #[test]
    fn ws_minus_one_means_unsupported() {
        let id = DeviceIdentity::from_info(&json!({ "mac": "aabbccddeeff", "ws": -1 })).unwrap();
        assert!(!id.supports_websocket());
    }

    #[test]
    fn state_update_tolerates_partial_body() {
        let update: StateUpdate = serde_json::from_str(r#"{"state":{"on":false}}"#).unwrap();
        assert!(update.state.is_some());
        assert!(update.info.is_none());
    }
}
