// ── Input validation for outbound commands ──
//
// Everything a user writes into the tree is checked here before it can
// reach a device. Rejections are logged as warnings and surface as
// `ValidationError`; nothing is sent for a rejected value.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::model::{Color, ColorError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {name} value: {value} (expected number 0-255)")]
    InvalidByte { name: String, value: String },

    #[error("out-of-range {name} value: {value} (expected 0-255)")]
    OutOfRange { name: String, value: String },

    #[error("invalid col value: expected array, got {found}")]
    NotAnArray { found: &'static str },

    #[error("col has no valid color entries")]
    NoValidColors,

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error("missing required parameter: {field}")]
    MissingField { field: &'static str },

    #[error("invalid {field}: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("colour slot {path} is missing or invalid")]
    ColorSlot { path: String },
}

/// Parameters carried as a single byte on the wire.
pub const BYTE_FIELDS: &[&str] = &["bri", "tbri", "fx", "pal", "sx", "ix", "c1", "c2", "c3"];

pub fn is_byte_field(name: &str) -> bool {
    BYTE_FIELDS.contains(&name)
}

/// Halves round towards positive infinity.
fn round_half_up(v: f64) -> f64 {
    let floor = v.floor();
    if v - floor >= 0.5 { floor + 1.0 } else { floor }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Byte values ──────────────────────────────────────────────────────

/// Accept `value` iff it is a finite number whose rounded value is 0-255.
pub fn validate_byte_value(value: &Value, name: &str) -> Result<u8, ValidationError> {
    validate_byte_value_in(value, name, None)
}

/// Same as [`validate_byte_value`], naming the operation in the warning.
pub fn validate_byte_value_in(
    value: &Value,
    name: &str,
    context: Option<&str>,
) -> Result<u8, ValidationError> {
    let result = check_byte(value, name);
    if let Err(ref e) = result {
        match context {
            Some(ctx) => warn!("Ignoring {e} for {ctx}"),
            None => warn!("Ignoring {e}"),
        }
    }
    result
}

fn check_byte(value: &Value, name: &str) -> Result<u8, ValidationError> {
    let number = value
        .as_f64()
        .filter(|n| value.is_number() && n.is_finite())
        .ok_or_else(|| ValidationError::InvalidByte {
            name: name.to_owned(),
            value: value.to_string(),
        })?;
    byte_from_f64(number).ok_or_else(|| ValidationError::OutOfRange {
        name: name.to_owned(),
        value: value.to_string(),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn byte_from_f64(number: f64) -> Option<u8> {
    let rounded = round_half_up(number);
    (0.0..=255.0).contains(&rounded).then(|| rounded as u8)
}

// ── Colour arrays ────────────────────────────────────────────────────

/// Result of sanitizing a colour array: the entries that survived and a
/// warning for each one that was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedColors {
    pub colors: Vec<Color>,
    pub warnings: Vec<String>,
}

impl SanitizedColors {
    pub fn to_json(&self) -> Value {
        Value::Array(self.colors.iter().map(Color::to_json).collect())
    }
}

/// Validate a `[[r,g,b], ...]` array entry by entry.
///
/// Invalid entries are dropped with a warning naming their index (or the
/// offending `col[i][j]` channel). Channels are rounded like byte values;
/// anything past the third channel is ignored.
/// Fails when the input is not an array or when no entry survives.
pub fn validate_segment_colors(value: &Value) -> Result<SanitizedColors, ValidationError> {
    let Some(entries) = value.as_array() else {
        let err = ValidationError::NotAnArray {
            found: json_type(value),
        };
        warn!("Ignoring {err}");
        return Err(err);
    };

    let mut colors = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        match sanitize_entry(i, entry) {
            Ok(color) => colors.push(color),
            Err(message) => {
                warn!("{message}");
                warnings.push(message);
            }
        }
    }

    if colors.is_empty() {
        let err = ValidationError::NoValidColors;
        warn!("Ignoring {err}");
        return Err(err);
    }

    Ok(SanitizedColors { colors, warnings })
}

fn sanitize_entry(i: usize, entry: &Value) -> Result<Color, String> {
    let channels = entry
        .as_array()
        .filter(|c| c.len() >= 3)
        .ok_or_else(|| format!("Ignoring invalid color entry at index {i}: expected [r,g,b] array"))?;

    let mut bytes = [0u8; 3];
    for (j, channel) in channels.iter().take(3).enumerate() {
        let number = channel
            .as_f64()
            .filter(|n| channel.is_number() && n.is_finite())
            .ok_or_else(|| {
                format!(
                    "Ignoring invalid color channel at col[{i}][{j}]: {channel} (expected number 0-255)"
                )
            })?;
        bytes[j] = byte_from_f64(number).ok_or_else(|| {
            format!("Ignoring out-of-range color channel at col[{i}][{j}]: {channel} (expected 0-255)")
        })?;
    }

    Ok(Color::rgb(bytes[0], bytes[1], bytes[2]))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn byte_value_rounds_half_up() {
        assert_eq!(validate_byte_value(&json!(127.5), "bri").unwrap(), 128);
        assert_eq!(validate_byte_value(&json!(0.4), "bri").unwrap(), 0);
        assert_eq!(validate_byte_value(&json!(-0.4), "bri").unwrap(), 0);
        assert_eq!(validate_byte_value(&json!(255.49), "sx").unwrap(), 255);
        assert_eq!(validate_byte_value(&json!(200), "fx").unwrap(), 200);
        assert_eq!(validate_byte_value(&json!(0.49999999999999994), "c1").unwrap(), 0);
        assert_eq!(validate_byte_value(&json!(-0.5), "c2").unwrap(), 0);
    }

    #[test]
    fn byte_value_rejects_out_of_range() {
        let err = validate_byte_value(&json!(-1), "bri").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bri"));
        assert!(message.contains("out-of-range"));

        assert!(matches!(
            validate_byte_value(&json!(255.5), "pal").unwrap_err(),
            ValidationError::OutOfRange { .. }
        ));
    }

    #[test]
    fn byte_value_rejects_non_numbers() {
        for bad in [json!("128"), json!(true), json!(null), json!([1])] {
            let err = validate_byte_value(&bad, "ix").unwrap_err();
            assert!(err.to_string().contains("invalid ix"), "{err}");
        }
    }

    #[test]
    fn colors_drop_invalid_entries() {
        let result = validate_segment_colors(&json!([[255, 0, 0], "bad", [0, 255, 0]])).unwrap();
        assert_eq!(result.colors, vec![Color::rgb(255, 0, 0), Color::rgb(0, 255, 0)]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("index 1"));
        assert_eq!(result.to_json(), json!([[255, 0, 0], [0, 255, 0]]));
    }

    #[test]
    fn colors_name_the_bad_channel() {
        let result = validate_segment_colors(&json!([[1, 2, 3], [4, 999, 6], [7, "x", 9]])).unwrap();
        assert_eq!(result.colors, vec![Color::rgb(1, 2, 3)]);
        assert!(result.warnings[0].contains("col[1][1]"));
        assert!(result.warnings[0].contains("out-of-range"));
        assert!(result.warnings[1].contains("col[2][1]"));
        assert!(result.warnings[1].contains("invalid"));
    }

    #[test]
    fn colors_round_and_keep_first_three_channels() {
        let result = validate_segment_colors(&json!([[10.6, 0, 0, 200], [1, 2, 3, 999, 5]])).unwrap();
        assert_eq!(result.colors, vec![Color::rgb(11, 0, 0), Color::rgb(1, 2, 3)]);
        assert!(result.warnings.is_empty());
        assert_eq!(
            validate_segment_colors(&json!([[255, 128, 64, 32]])).unwrap().to_json(),
            json!([[255, 128, 64]])
        );
    }

    #[test]
    fn colors_fail_when_nothing_survives() {
        assert_eq!(
            validate_segment_colors(&json!([[1, 2], "x"])).unwrap_err(),
            ValidationError::NoValidColors
        );
        assert!(validate_segment_colors(&json!([]))
            .unwrap_err()
            .to_string()
            .contains("no valid color entries"));
    }

    #[test]
    fn colors_require_an_array() {
        let err = validate_segment_colors(&json!("255,0,0")).unwrap_err();
        assert_eq!(err, ValidationError::NotAnArray { found: "string" });
        assert!(err.to_string().contains("expected array"));
    }
}
