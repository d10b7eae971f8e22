// ── Device identity ──

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware MAC, normalized to lowercase hex without separators
/// (`a4cf12fdae01`), the form WLED reports in `info.mac`.
///
/// Used as the root segment of every tree path for the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized: String = raw
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl AsRef<str> for MacAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
