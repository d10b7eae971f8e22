//! CLI-side configuration wrappers: `--config` path resolution and
//! flag overrides on top of `ledbridge_config`.

use std::path::PathBuf;

use ledbridge_config::Config;
use ledbridge_core::BridgeConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// `--config` if given, else the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(ledbridge_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(ledbridge_config::load_config_from(&config_path(global))?)
}

/// Effective bridge configuration with CLI flag overrides applied.
pub fn bridge_config(global: &GlobalOpts) -> Result<BridgeConfig, CliError> {
    let mut bridge = load(global)?.to_bridge_config()?;
    if let Some(port) = global.port {
        bridge.device_port = port;
    }
    Ok(bridge)
}
