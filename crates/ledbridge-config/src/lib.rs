//! Configuration for the ledbridge bridge.
//!
//! A TOML file layered over built-in defaults, with `LEDBRIDGE_*`
//! environment overrides, translated into `ledbridge_core::BridgeConfig`.
//! Nested keys use a double underscore: `LEDBRIDGE_POLLING__INTERVAL_MS`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ledbridge_core::BridgeConfig;

pub const ENV_PREFIX: &str = "LEDBRIDGE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub polling: Polling,

    #[serde(default)]
    pub network: Network,

    /// Device IPs contacted at startup even when discovery is off.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Health-check cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Polling {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Double the delay after each failed check.
    #[serde(default = "default_true")]
    pub backoff: bool,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_long_backoff_ms")]
    pub long_backoff_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_retries: default_max_retries(),
            backoff: true,
            backoff_cap_ms: default_backoff_cap_ms(),
            long_backoff_ms: default_long_backoff_ms(),
        }
    }
}

/// How devices are found and reached.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Network {
    #[serde(default = "default_timeout_ms")]
    pub http_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub websocket: bool,

    /// Browse mDNS for `_wled._tcp` devices.
    #[serde(default = "default_true")]
    pub discovery: bool,

    #[serde(default = "default_device_port")]
    pub device_port: u16,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_timeout_ms(),
            ping_timeout_ms: default_timeout_ms(),
            websocket: true,
            discovery: true,
            device_port: default_device_port(),
        }
    }
}

fn default_interval_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_cap_ms() -> u64 {
    600_000
}
fn default_long_backoff_ms() -> u64 {
    3_600_000
}
fn default_timeout_ms() -> u64 {
    3_000
}
fn default_device_port() -> u16 {
    80
}
fn default_true() -> bool {
    true
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Validate and convert into the runtime bridge configuration.
    pub fn to_bridge_config(&self) -> Result<BridgeConfig, ConfigError> {
        let polling = &self.polling;
        if polling.interval_ms == 0 {
            return Err(invalid("polling.interval_ms", "must be greater than zero"));
        }
        if polling.max_retries == 0 {
            return Err(invalid("polling.max_retries", "must be at least 1"));
        }
        if polling.backoff_cap_ms < polling.interval_ms {
            return Err(invalid(
                "polling.backoff_cap_ms",
                format!("{} is below the polling interval", polling.backoff_cap_ms),
            ));
        }
        if self.network.http_timeout_ms == 0 || self.network.ping_timeout_ms == 0 {
            return Err(invalid("network", "timeouts must be greater than zero"));
        }

        let known_devices = self
            .devices
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| invalid("devices", format!("{raw:?} is not an IP address")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BridgeConfig {
            poll_interval: Duration::from_millis(polling.interval_ms),
            max_retries: polling.max_retries,
            backoff_enabled: polling.backoff,
            backoff_cap: Duration::from_millis(polling.backoff_cap_ms),
            long_backoff: Duration::from_millis(polling.long_backoff_ms),
            http_timeout: Duration::from_millis(self.network.http_timeout_ms),
            ping_timeout: Duration::from_millis(self.network.ping_timeout_ms),
            websocket_enabled: self.network.websocket,
            discovery_enabled: self.network.discovery,
            known_devices,
            device_port: self.network.device_port,
        })
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "ledbridge", "ledbridge").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ledbridge");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize to TOML and write to `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_translate_to_bridge_defaults() {
        let bridge = Config::default().to_bridge_config().unwrap();
        assert_eq!(bridge, BridgeConfig::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.polling, Polling::default());
        assert!(config.devices.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
devices = ["192.168.1.40", "192.168.1.41"]

[polling]
interval_ms = 10000
backoff = false

[network]
websocket = false
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.polling.interval_ms, 10_000);
        assert_eq!(config.polling.max_retries, 5);
        assert!(!config.network.websocket);
        assert!(config.network.discovery);

        let bridge = config.to_bridge_config().unwrap();
        assert_eq!(bridge.poll_interval, Duration::from_secs(10));
        assert!(!bridge.backoff_enabled);
        assert_eq!(bridge.known_devices.len(), 2);
    }

    #[test]
    fn save_then_load_preserves_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            devices: vec!["10.0.0.7".into()],
            ..Config::default()
        };

        save_config(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad_ip = Config {
            devices: vec!["wled.local".into()],
            ..Config::default()
        };
        assert!(matches!(
            bad_ip.to_bridge_config(),
            Err(ConfigError::Validation { ref field, .. }) if field == "devices"
        ));

        let zero_retries = Config {
            polling: Polling {
                max_retries: 0,
                ..Polling::default()
            },
            ..Config::default()
        };
        assert!(zero_retries.to_bridge_config().is_err());

        let low_cap = Config {
            polling: Polling {
                backoff_cap_ms: 100,
                ..Polling::default()
            },
            ..Config::default()
        };
        assert!(low_cap.to_bridge_config().is_err());
    }
}
