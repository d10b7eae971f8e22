// ── State-path translator ──
//
// Turns a user write on a tree path into the JSON command WLED expects.
//
//   <mac>.bri = 80                 → {"bri":80}
//   <mac>.nl.dur = 10              → {"nl":{"dur":10}}
//   <mac>.seg.1.fx = 3             → {"seg":[{"id":1,"fx":3}]}
//   <mac>.seg.0.col.1_HEX = "#..." → {"seg":[{"id":0,"col":[[..],[..],[..]]}]}
//   <mac>.rawCommand = "A=128"     → GET /win?A=128

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::CoreError;
use crate::model::{Color, ColorSlot, MacAddress};
use crate::tree::StateTree;
use crate::validation::{
    ValidationError, is_byte_field, validate_byte_value, validate_segment_colors,
};

// ── Paths ────────────────────────────────────────────────────────────

/// Shape of a writable path below the device MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPath {
    /// `<field>`
    Flat { field: String },
    /// `<group>.<field>` (`nl.dur`, `udpn.send`, ...)
    Nested { group: String, field: String },
    /// `seg.<i>.<field>`
    Segment { index: u64, field: String },
    /// `seg.<i>.col.<n>` or `seg.<i>.col.<n>_HEX`
    SegmentColor { index: u64, slot: ColorSlot, hex: bool },
    /// `seg.<i>.col` written as a whole array
    SegmentColorArray { index: u64 },
    /// `rawCommand`
    RawCommand,
}

/// A tree id split into device and command path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub mac: MacAddress,
    pub path: CommandPath,
}

/// Parse a state id. `_info` paths and anything deeper than the grammar
/// allows are rejected.
pub fn parse_path(id: &str) -> Result<ParsedPath, CoreError> {
    let invalid = || CoreError::InvalidPath { path: id.to_owned() };
    let parts: Vec<&str> = id.split('.').collect();

    let (mac, rest) = parts.split_first().ok_or_else(invalid)?;
    // `info.*` holds bridge-wide states, not devices
    if mac.is_empty() || *mac == "info" || rest.iter().any(|p| p.is_empty()) {
        return Err(invalid());
    }

    let path = match rest {
        ["rawCommand"] => CommandPath::RawCommand,
        [field] if !field.starts_with('_') => CommandPath::Flat {
            field: (*field).to_owned(),
        },
        ["seg", index, "col"] => CommandPath::SegmentColorArray {
            index: index.parse().map_err(|_| invalid())?,
        },
        ["seg", index, "col", slot] => {
            let (digits, hex) = match slot.strip_suffix("_HEX") {
                Some(digits) => (digits, true),
                None => (*slot, false),
            };
            let slot = digits
                .parse::<usize>()
                .ok()
                .and_then(ColorSlot::from_index)
                .ok_or_else(invalid)?;
            CommandPath::SegmentColor {
                index: index.parse().map_err(|_| invalid())?,
                slot,
                hex,
            }
        }
        ["seg", index, field] => CommandPath::Segment {
            index: index.parse().map_err(|_| invalid())?,
            field: (*field).to_owned(),
        },
        [group, field] if !group.starts_with('_') && *group != "seg" => CommandPath::Nested {
            group: (*group).to_owned(),
            field: (*field).to_owned(),
        },
        _ => return Err(invalid()),
    };

    Ok(ParsedPath {
        mac: MacAddress::new(mac),
        path,
    })
}

// ── Commands ─────────────────────────────────────────────────────────

/// What goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON state command: WebSocket text frame or `POST /json`.
    Json(Value),
    /// Legacy `/win` query string.
    Raw(String),
}

/// A validated command ready to relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub mac: MacAddress,
    /// Tree id the write came from; acknowledged on success.
    pub origin: String,
    /// Value written by the user, echoed back on acknowledgement.
    pub value: Value,
    pub payload: Outbound,
}

/// Translate a user write on `id` into a device command.
///
/// Colour slot writes read their sibling slots from `tree`; every error
/// means nothing may be sent.
pub fn translate(tree: &StateTree, id: &str, value: &Value) -> Result<DeviceCommand, CoreError> {
    let parsed = parse_path(id)?;

    let payload = match &parsed.path {
        CommandPath::RawCommand => Outbound::Raw(raw_query(value)?),
        CommandPath::Flat { field } => Outbound::Json(single(field, checked(field, value)?)),
        CommandPath::Nested { group, field } => {
            Outbound::Json(single(group, single(field, checked(field, value)?)))
        }
        CommandPath::Segment { index, field } => {
            Outbound::Json(segment(*index, field, checked(field, value)?))
        }
        CommandPath::SegmentColorArray { index } => {
            let colors = parse_color_array(value)?;
            Outbound::Json(segment(*index, "col", colors))
        }
        CommandPath::SegmentColor { index, slot, hex } => {
            let base = id
                .rsplit_once('.')
                .map(|(base, _)| base)
                .ok_or_else(|| CoreError::InvalidPath { path: id.to_owned() })?;
            let colors = gather_slots(tree, base, *slot, *hex, value)?;
            Outbound::Json(segment(*index, "col", colors))
        }
    };

    Ok(DeviceCommand {
        mac: parsed.mac,
        origin: id.to_owned(),
        value: value.clone(),
        payload,
    })
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_owned(), value);
    Value::Object(map)
}

fn segment(index: u64, field: &str, value: Value) -> Value {
    let mut seg = Map::new();
    seg.insert("id".into(), json!(index));
    seg.insert(field.to_owned(), value);
    json!({ "seg": [Value::Object(seg)] })
}

/// Byte-range fields are validated and rounded; others pass through.
fn checked(field: &str, value: &Value) -> Result<Value, CoreError> {
    if is_byte_field(field) {
        Ok(json!(validate_byte_value(value, field)?))
    } else {
        Ok(value.clone())
    }
}

fn raw_query(value: &Value) -> Result<String, CoreError> {
    let query = value.as_str().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        let err = ValidationError::InvalidField {
            field: "rawCommand",
            message: "expected a non-empty query string".into(),
        };
        warn!("Ignoring {err}");
        return Err(err.into());
    }
    Ok(query.trim_start_matches('?').to_owned())
}

/// Accept a JSON array or a string holding one.
fn parse_color_array(value: &Value) -> Result<Value, CoreError> {
    let parsed;
    let array = match value {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).unwrap_or_else(|_| value.clone());
            &parsed
        }
        other => other,
    };
    Ok(validate_segment_colors(array)?.to_json())
}

/// Read all three slots in the same notation, substituting the written one.
fn gather_slots(
    tree: &StateTree,
    base: &str,
    written: ColorSlot,
    hex: bool,
    value: &Value,
) -> Result<Value, CoreError> {
    let mut colors = Vec::with_capacity(3);
    for slot in [ColorSlot::Primary, ColorSlot::Secondary, ColorSlot::Tertiary] {
        let key = if hex { slot.hex_key() } else { slot.rgb_key() };
        let path = format!("{base}.{key}");

        let raw = if slot == written {
            value.as_str().map(str::to_owned)
        } else {
            tree.get_state(&path)
                .and_then(|s| s.val.as_str().map(str::to_owned))
        };

        let color = raw.as_deref().and_then(|text| {
            if hex {
                Color::from_hex(text).ok()
            } else {
                Color::from_rgb_string(text).ok()
            }
        });

        match color {
            Some(color) => colors.push(color.to_json()),
            None => {
                let err = ValidationError::ColorSlot { path };
                warn!("Ignoring colour change: {err}");
                return Err(err.into());
            }
        }
    }
    Ok(Value::Array(colors))
}
