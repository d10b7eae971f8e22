// ── Colour values ──
//
// WLED segments carry up to three colour slots as `[[r,g,b(,w)], ...]`.
// The tree exposes each slot twice: an `"r,g,b"` string and a `#rrggbb`
// hex string. Both forms carry the optional white channel.

use std::fmt::Write as _;

use serde_json::Value;
use strum::{Display, EnumIter, IntoEnumIterator};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("invalid hex colour {0:?} (expected #rrggbb or #rrggbbww)")]
    InvalidHex(String),

    #[error("invalid RGB colour {0:?} (expected r,g,b or r,g,b,w with values 0-255)")]
    InvalidRgb(String),
}

/// One RGB colour with an optional white (or alpha) channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: Option<u8>,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: None }
    }

    pub const fn rgbw(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w: Some(w) }
    }

    /// `#rrggbb`, or `#rrggbbww` when a white channel is present.
    pub fn to_hex(&self) -> String {
        let mut out = format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b);
        if let Some(w) = self.w {
            let _ = write!(out, "{w:02x}");
        }
        out
    }

    /// Parse `#rrggbb` / `#rrggbbww` (the `#` is optional, case-insensitive).
    pub fn from_hex(raw: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError::InvalidHex(raw.to_owned());
        let digits = raw.trim().trim_start_matches('#');
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(invalid());
        }

        let byte = |i: usize| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(invalid)
        };

        let w = if digits.len() == 8 { Some(byte(6)?) } else { None };
        Ok(Self {
            r: byte(0)?,
            g: byte(2)?,
            b: byte(4)?,
            w,
        })
    }

    /// `"r,g,b"`, or `"r,g,b,w"` when a white channel is present.
    pub fn to_rgb_string(&self) -> String {
        match self.w {
            Some(w) => format!("{},{},{},{w}", self.r, self.g, self.b),
            None => format!("{},{},{}", self.r, self.g, self.b),
        }
    }

    /// Parse `"r,g,b"` or `"r,g,b,w"`; whitespace around values is ignored.
    pub fn from_rgb_string(raw: &str) -> Result<Self, ColorError> {
        let invalid = || ColorError::InvalidRgb(raw.to_owned());
        let parts = raw
            .split(',')
            .map(|p| p.trim().parse::<u8>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match parts.as_slice() {
            [r, g, b] => Ok(Self::rgb(*r, *g, *b)),
            [r, g, b, w] => Ok(Self::rgbw(*r, *g, *b, *w)),
            _ => Err(invalid()),
        }
    }

    /// Read a device-side channel array (`[r,g,b]` or `[r,g,b,w]`).
    pub fn from_json(value: &Value) -> Option<Self> {
        let channels = value.as_array()?;
        let byte = |v: &Value| v.as_u64().and_then(|n| u8::try_from(n).ok());
        match channels.as_slice() {
            [r, g, b] => Some(Self::rgb(byte(r)?, byte(g)?, byte(b)?)),
            [r, g, b, w, ..] => Some(Self::rgbw(byte(r)?, byte(g)?, byte(b)?, byte(w)?)),
            _ => None,
        }
    }

    /// Channel array as sent to the device.
    pub fn to_json(&self) -> Value {
        let mut channels = vec![Value::from(self.r), Value::from(self.g), Value::from(self.b)];
        if let Some(w) = self.w {
            channels.push(Value::from(w));
        }
        Value::Array(channels)
    }
}

// ── Slots ────────────────────────────────────────────────────────────

/// The three colour slots of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ColorSlot {
    #[strum(to_string = "Primary Color")]
    Primary,
    #[strum(to_string = "Secondary Color (background)")]
    Secondary,
    #[strum(to_string = "Tertiary Color")]
    Tertiary,
}

impl ColorSlot {
    pub fn index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
            Self::Tertiary => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    /// Tree leaf id for the RGB string entry: `0`, `1`, `2`.
    pub fn rgb_key(self) -> String {
        self.index().to_string()
    }

    /// Tree leaf id for the hex entry: `0_HEX`, `1_HEX`, `2_HEX`.
    pub fn hex_key(self) -> String {
        format!("{}_HEX", self.index())
    }
}
