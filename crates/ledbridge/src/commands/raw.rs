//! `ledbridge raw`: send a legacy `/win` query.

use serde_json::Value;

use ledbridge_core::{BridgeConfig, DeviceManager};

use crate::cli::{GlobalOpts, RawArgs};
use crate::commands::set::{WriteResult, detail};
use crate::error::CliError;
use crate::output;

pub async fn handle(bridge: BridgeConfig, args: RawArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = DeviceManager::new(bridge);
    let mac = manager.connect_once(args.ip).await?;

    let id = format!("{mac}.rawCommand");
    let value = Value::String(args.query);
    let delivery = manager.deliver(&id, &value).await?;

    let result = WriteResult::new(id, value, delivery);
    let out = output::render_single(&global.output, &result, detail)?;
    output::print_output(&out, global.quiet);
    Ok(())
}
