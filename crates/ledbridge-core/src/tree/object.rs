// ── Tree entry types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::attributes::{AttributeSpec, ValueType};

/// What an object in the tree represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Root of one physical device, id = MAC.
    Device,
    /// Grouping node (`_info`, `seg`, `seg.0`, ...).
    Channel,
    /// Leaf carrying a value.
    State,
}

/// Descriptive metadata of a tree object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommonMeta {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default)]
    pub write: bool,
    /// Value labels, e.g. effect ID to effect name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<String, String>>,
}

impl CommonMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Leaf metadata from an attribute spec; `field` names unnamed fallbacks.
    pub fn from_spec(spec: &AttributeSpec, field: &str) -> Self {
        let name = if spec.name.is_empty() {
            field.to_owned()
        } else {
            spec.name.to_owned()
        };
        Self {
            name,
            value_type: Some(spec.value_type.to_string()),
            role: Some(spec.role.to_owned()),
            unit: (!spec.unit.is_empty()).then(|| spec.unit.to_owned()),
            min: spec.range.map(|(min, _)| min),
            max: spec.range.map(|(_, max)| max),
            write: spec.write,
            states: None,
        }
    }

    pub fn declared_type(&self) -> Option<ValueType> {
        self.value_type.as_deref().and_then(|t| t.parse().ok())
    }
}

/// A node of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeObject {
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    pub common: CommonMeta,
    /// Integration-private data (the device object stores its `ip` here).
    #[serde(default)]
    pub native: serde_json::Map<String, Value>,
}

impl TreeObject {
    pub fn device(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Device,
            common: CommonMeta::named(name),
            native: serde_json::Map::new(),
        }
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Channel,
            common: CommonMeta::named(name),
            native: serde_json::Map::new(),
        }
    }

    pub fn state(common: CommonMeta) -> Self {
        Self {
            kind: ObjectKind::State,
            common,
            native: serde_json::Map::new(),
        }
    }

    pub fn with_native(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.native.insert(key.to_owned(), value.into());
        self
    }
}

/// Current value of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub val: Value,
    /// `true` when the value reflects the device, `false` for a pending user command.
    pub ack: bool,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Something that changed in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    State { id: String, state: StateValue },
    Deleted { prefix: String },
}
