//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod probe;
pub mod raw;
pub mod run;
pub mod set;

use ledbridge_core::BridgeConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, bridge: BridgeConfig, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run(args) => run::handle(bridge, args, global).await,
        Command::Probe(args) => probe::handle(bridge, args, global).await,
        Command::Set(args) => set::handle(bridge, args, global).await,
        Command::Raw(args) => raw::handle(bridge, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
