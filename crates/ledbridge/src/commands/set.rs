//! `ledbridge set`: write one state and relay it to the device.

use serde::Serialize;
use serde_json::Value;

use ledbridge_core::{BridgeConfig, Delivery, DeviceManager, MacAddress};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

/// Result of a relayed write.
#[derive(Debug, Serialize)]
pub(crate) struct WriteResult {
    pub id: String,
    pub value: Value,
    pub transport: &'static str,
    pub acknowledged: bool,
}

impl WriteResult {
    pub(crate) fn new(id: String, value: Value, delivery: Delivery) -> Self {
        let (transport, acknowledged) = match delivery {
            Delivery::WebSocket => ("websocket", false),
            Delivery::Http { acknowledged } => ("http", acknowledged),
            Delivery::Raw => ("http /win", true),
        };
        Self {
            id,
            value,
            transport,
            acknowledged,
        }
    }
}

pub(crate) fn detail(r: &WriteResult) -> String {
    let ack = if r.acknowledged { "acknowledged" } else { "pending" };
    format!("{} = {} ({}, {ack})", r.id, r.value, r.transport)
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Accept paths relative to the device as well as full ones.
fn full_path(mac: &MacAddress, path: &str) -> String {
    let path = path.trim_matches('.');
    if path.starts_with(&format!("{mac}.")) {
        path.to_owned()
    } else {
        format!("{mac}.{path}")
    }
}

pub async fn handle(bridge: BridgeConfig, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = DeviceManager::new(bridge);
    let mac = manager.connect_once(args.ip).await?;

    let id = full_path(&mac, &args.path);
    let value = parse_value(&args.value);
    manager.tree().write_user(&id, value.clone())?;
    let delivery = manager.deliver(&id, &value).await?;

    let result = WriteResult::new(id, value, delivery);
    let out = output::render_single(&global.output, &result, detail)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
