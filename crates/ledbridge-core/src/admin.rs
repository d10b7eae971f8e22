// ── Administrative commands ──
//
// Message-style commands from a management frontend. Each one is parsed
// and validated up front, executed against the manager, and answered
// with `{ "success": bool, "error"?: string }`.

use std::net::{IpAddr, Ipv4Addr};

use serde::Serialize;
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::manager::DeviceManager;
use crate::model::{DeviceRecord, MacAddress};
use crate::validation::{ValidationError, validate_byte_value_in};

/// Command names as sent by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum AdminCommandKind {
    AddDevice,
    DeleteDevice,
    RenameDevice,
    AddSegment,
    DeleteSegment,
    Refresh,
    ListDevices,
}

/// A validated administrative command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AddDevice {
        ip: Ipv4Addr,
    },
    DeleteDevice {
        device: MacAddress,
    },
    RenameDevice {
        device: MacAddress,
        name: String,
    },
    AddSegment {
        device: MacAddress,
        segment: u64,
        start: Option<u64>,
        stop: Option<u64>,
        bri: Option<u8>,
        on: Option<bool>,
    },
    DeleteSegment {
        device: MacAddress,
        segment: u64,
    },
    Refresh,
    ListDevices,
}

/// Answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceRecord>>,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            devices: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            devices: None,
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────────────

impl AdminCommand {
    /// Validate `message` for `command`. Nothing is executed here.
    pub fn parse(command: &str, message: &Value) -> Result<Self, ValidationError> {
        let kind: AdminCommandKind = command.parse().map_err(|_| ValidationError::InvalidField {
            field: "command",
            message: format!("unknown command {command:?}"),
        })?;
        let empty = Map::new();
        let params = message.as_object().unwrap_or(&empty);

        Ok(match kind {
            AdminCommandKind::AddDevice => Self::AddDevice {
                ip: parse_ipv4(params)?,
            },
            AdminCommandKind::DeleteDevice => Self::DeleteDevice {
                device: device_id(params)?,
            },
            AdminCommandKind::RenameDevice => Self::RenameDevice {
                device: device_id(params)?,
                name: params
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(ValidationError::MissingField { field: "name" })?
                    .to_owned(),
            },
            AdminCommandKind::AddSegment => {
                let device = device_id(params)?;
                let segment = segment_id(params)?;
                let start = optional_index(params, "start")?;
                let stop = optional_index(params, "stop")?;
                if let (Some(start), Some(stop)) = (start, stop) {
                    if stop <= start {
                        return Err(ValidationError::InvalidField {
                            field: "stop",
                            message: format!("{stop} must be greater than start {start}"),
                        });
                    }
                }
                let bri = params
                    .get("bri")
                    .filter(|v| !v.is_null())
                    .map(|v| validate_byte_value_in(v, "bri", Some("addSegment")))
                    .transpose()?;
                let on = match params.get("on") {
                    None | Some(Value::Null) => None,
                    Some(Value::Bool(on)) => Some(*on),
                    Some(other) => {
                        return Err(ValidationError::InvalidField {
                            field: "on",
                            message: format!("expected true or false, got {other}"),
                        });
                    }
                };
                Self::AddSegment {
                    device,
                    segment,
                    start,
                    stop,
                    bri,
                    on,
                }
            }
            AdminCommandKind::DeleteSegment => Self::DeleteSegment {
                device: device_id(params)?,
                segment: segment_id(params)?,
            },
            AdminCommandKind::Refresh => Self::Refresh,
            AdminCommandKind::ListDevices => Self::ListDevices,
        })
    }
}

fn parse_ipv4(params: &Map<String, Value>) -> Result<Ipv4Addr, ValidationError> {
    let raw = params
        .get("ip")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingField { field: "ip" })?;
    raw.parse().map_err(|_| ValidationError::InvalidField {
        field: "ip",
        message: format!("{raw:?} is not an IPv4 address"),
    })
}

fn device_id(params: &Map<String, Value>) -> Result<MacAddress, ValidationError> {
    params
        .get("deviceId")
        .and_then(Value::as_str)
        .map(MacAddress::new)
        .filter(|mac| !mac.is_empty())
        .ok_or(ValidationError::MissingField { field: "deviceId" })
}

fn segment_id(params: &Map<String, Value>) -> Result<u64, ValidationError> {
    let value = params
        .get("segmentId")
        .filter(|v| !v.is_null())
        .ok_or(ValidationError::MissingField { field: "segmentId" })?;
    as_index(value).ok_or_else(|| ValidationError::InvalidField {
        field: "segmentId",
        message: format!("expected a non-negative integer, got {value}"),
    })
}

fn optional_index(params: &Map<String, Value>, field: &'static str) -> Result<Option<u64>, ValidationError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => as_index(value).map(Some).ok_or_else(|| ValidationError::InvalidField {
            field,
            message: format!("expected a non-negative integer, got {value}"),
        }),
    }
}

/// Integers, or strings holding one (form inputs arrive as strings).
fn as_index(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Execution ────────────────────────────────────────────────────────

impl DeviceManager {
    /// Parse, validate and run one administrative command.
    pub async fn handle_message(&self, command: &str, message: &Value) -> AdminResponse {
        let parsed = match AdminCommand::parse(command, message) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(command, error = %e, "rejected admin command");
                return AdminResponse::failed(e);
            }
        };
        match self.execute(parsed).await {
            Ok(response) => response,
            Err(e) => {
                warn!(command, error = %e, "admin command failed");
                AdminResponse::failed(e)
            }
        }
    }

    pub async fn execute(&self, command: AdminCommand) -> Result<AdminResponse, CoreError> {
        debug!(?command, "admin command");
        match command {
            AdminCommand::AddDevice { ip } => {
                if !self.add_device(IpAddr::V4(ip)) {
                    return Err(ValidationError::InvalidField {
                        field: "ip",
                        message: format!("{ip} is already registered"),
                    }
                    .into());
                }
                info!(ip = %ip, "device added");
                Ok(AdminResponse::ok())
            }

            AdminCommand::DeleteDevice { device } => {
                self.remove_device(&device)?;
                Ok(AdminResponse::ok())
            }

            AdminCommand::RenameDevice { device, name } => {
                if !self.sync().rename_device(&device, &name) {
                    return Err(CoreError::DeviceNotFound {
                        identifier: device.to_string(),
                    });
                }
                info!(mac = %device, name = %name, "device renamed");
                Ok(AdminResponse::ok())
            }

            AdminCommand::AddSegment {
                device,
                segment,
                start,
                stop,
                bri,
                on,
            } => {
                self.require_device(&device)?;
                let mut seg = Map::new();
                seg.insert("id".into(), json!(segment));
                if let Some(start) = start {
                    seg.insert("start".into(), json!(start));
                }
                if let Some(stop) = stop {
                    seg.insert("stop".into(), json!(stop));
                }
                if let Some(bri) = bri {
                    seg.insert("bri".into(), json!(bri));
                }
                if let Some(on) = on {
                    seg.insert("on".into(), json!(on));
                }
                self.send_state(&device, &json!({ "seg": [Value::Object(seg)] }))
                    .await?;
                info!(mac = %device, segment, "segment added");
                self.refresh();
                Ok(AdminResponse::ok())
            }

            AdminCommand::DeleteSegment { device, segment } => {
                self.require_device(&device)?;
                // A zero-length segment is deleted by the firmware
                self.send_state(&device, &json!({ "seg": [{ "id": segment, "stop": 0 }] }))
                    .await?;
                self.sync().remove_path(&format!("{device}.seg.{segment}"));
                info!(mac = %device, segment, "segment deleted");
                Ok(AdminResponse::ok())
            }

            AdminCommand::Refresh => {
                self.refresh();
                Ok(AdminResponse::ok())
            }

            AdminCommand::ListDevices => Ok(AdminResponse {
                devices: Some(self.devices().as_ref().clone()),
                ..AdminResponse::ok()
            }),
        }
    }

    fn require_device(&self, mac: &MacAddress) -> Result<(), CoreError> {
        if self.registry().ip_for(mac).is_some() {
            Ok(())
        } else {
            Err(CoreError::DeviceNotFound {
                identifier: mac.to_string(),
            })
        }
    }
}
