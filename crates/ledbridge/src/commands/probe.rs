//! `ledbridge probe`: one HTTP check, then dump the device's tree.

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use ledbridge_core::{BridgeConfig, DeviceManager, ObjectKind, StateTree};

use crate::cli::{GlobalOpts, ProbeArgs};
use crate::error::CliError;
use crate::output;

/// One state leaf of the device tree.
#[derive(Debug, Serialize)]
struct StateEntry {
    path: String,
    name: String,
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    writable: bool,
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "RW")]
    rw: &'static str,
}

impl From<&StateEntry> for StateRow {
    fn from(e: &StateEntry) -> Self {
        let value = match &e.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            path: e.path.clone(),
            name: e.name.clone(),
            value: e.unit.as_ref().map_or_else(|| value.clone(), |u| format!("{value} {u}")),
            rw: if e.writable { "rw" } else { "ro" },
        }
    }
}

/// Every state below `root`, with paths relative to it.
fn collect_states(tree: &StateTree, root: &str, filter: Option<&str>) -> Vec<StateEntry> {
    tree.object_ids(root)
        .into_iter()
        .filter_map(|id| {
            let object = tree.get_object(&id)?;
            if object.kind != ObjectKind::State {
                return None;
            }
            let path = id.strip_prefix(root)?.trim_start_matches('.').to_owned();
            if filter.is_some_and(|f| !path.contains(f)) {
                return None;
            }
            let value = tree.get_state(&id).map_or(Value::Null, |s| s.val);
            Some(StateEntry {
                path,
                name: object.common.name,
                value,
                unit: object.common.unit,
                writable: object.common.write,
            })
        })
        .collect()
}

pub async fn handle(bridge: BridgeConfig, args: ProbeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = DeviceManager::new(bridge);
    let mac = manager.connect_once(args.ip).await?;

    let states = collect_states(manager.tree(), mac.as_str(), args.filter.as_deref());
    let out = output::render_list(&global.output, &states, |e| StateRow::from(e), |e| {
        format!("{}={}", e.path, e.value)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
