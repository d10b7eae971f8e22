//! `ledbridge run`: the long-running bridge.

use tabled::Tabled;
use tracing::info;

use ledbridge_core::{BridgeConfig, DeviceManager, DeviceRecord, DiscoverySource, MdnsDiscovery};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub(crate) struct DeviceRow {
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
    #[tabled(rename = "Link")]
    link: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl DeviceRow {
    pub(crate) fn new(d: &DeviceRecord, color: bool) -> Self {
        Self {
            ip: d.ip.to_string(),
            mac: d.mac.as_ref().map(ToString::to_string).unwrap_or_default(),
            name: d.name.clone(),
            firmware: d.firmware.clone().unwrap_or_default(),
            link: if d.ws_connected { "websocket" } else { "http" }.into(),
            status: output::status_label(d.connected, color),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(mut bridge: BridgeConfig, args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    for ip in args.devices {
        if !bridge.known_devices.contains(&ip) {
            bridge.known_devices.push(ip);
        }
    }
    if args.no_websocket {
        bridge.websocket_enabled = false;
    }
    let discovery: Option<Box<dyn DiscoverySource>> = if bridge.discovery_enabled && !args.no_discovery {
        Some(Box::new(MdnsDiscovery::new()))
    } else {
        None
    };

    let manager = DeviceManager::new(bridge);
    manager.start(discovery).await?;

    let color = output::should_color(&global.color);
    let devices = manager.devices();
    let out = output::render_list(
        &global.output,
        devices.as_slice(),
        |d| DeviceRow::new(d, color),
        DeviceRecord::label,
    )?;
    output::print_output(&out, global.quiet);

    let mut changes = manager.registry().subscribe();
    let mut connected = devices.iter().filter(|d| d.connected).count();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = changes.changed() => {
                let Some(snapshot) = snapshot else { break };
                let now = snapshot.iter().filter(|d| d.connected).count();
                if now != connected {
                    info!(connected = now, total = snapshot.len(), "device connectivity changed");
                    connected = now;
                }
            }
        }
    }

    info!("shutting down");
    manager.shutdown().await;
    Ok(())
}
