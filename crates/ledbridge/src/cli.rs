//! Clap derive structures for the `ledbridge` CLI.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// ledbridge -- bridge WLED controllers into a state tree
#[derive(Debug, Parser)]
#[command(
    name = "ledbridge",
    version,
    about = "Discover, monitor and control WLED devices",
    long_about = "Keeps WLED LED controllers mirrored in a structured state tree.\n\n\
        Devices are found over mDNS, watched over WebSocket with an HTTP\n\
        fallback, and state writes are relayed back as device commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "LEDBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// HTTP/WebSocket port devices listen on (overrides config)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run(RunArgs),

    /// Read a device once and print its state tree
    #[command(alias = "p")]
    Probe(ProbeArgs),

    /// Write one state and relay it to the device
    Set(SetArgs),

    /// Send a legacy HTTP API query (e.g. "A=128&FX=2")
    Raw(RawArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Additional device IPs to contact at startup
    #[arg(long = "device", short = 'd', value_name = "IP")]
    pub devices: Vec<IpAddr>,

    /// Skip mDNS discovery
    #[arg(long)]
    pub no_discovery: bool,

    /// Skip the WebSocket link and poll over HTTP only
    #[arg(long)]
    pub no_websocket: bool,
}

// ── Probe ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Device IP address
    pub ip: IpAddr,

    /// Only show states whose path contains this text
    #[arg(long, short = 'f')]
    pub filter: Option<String>,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Device IP address
    pub ip: IpAddr,

    /// State path below the device, e.g. "bri" or "seg.0.col.0_HEX"
    pub path: String,

    /// New value; parsed as JSON, otherwise taken as a string
    pub value: String,
}

// ── Raw ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RawArgs {
    /// Device IP address
    pub ip: IpAddr,

    /// Query string for /win
    pub query: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Print the effective configuration (file + environment)
    Show,

    /// Write a config file with the default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
