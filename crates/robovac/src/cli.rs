//! Clap derive structures for the `robovac` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

use robovac_core::FanSpeed;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// robovac -- local control for Eufy RoboVac vacuums
#[derive(Debug, Parser)]
#[command(
    name = "robovac",
    version,
    about = "Control Eufy RoboVac vacuums on the local network",
    long_about = "Talks to Eufy RoboVac vacuums directly over the Tuya v3.3 local protocol.\n\n\
        No cloud round-trips: you need the device id, its IP address, and the\n\
        16-character local key.",
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
    /// Configured device to use
    #[arg(long, short = 'd', env = "ROBOVAC_DEVICE", global = true)]
    pub device: Option<String>,

    /// Device IP address or hostname (overrides the profile)
    #[arg(long, env = "ROBOVAC_HOST", global = true)]
    pub host: Option<String>,

    /// Tuya device id (overrides the profile)
    #[arg(long, env = "ROBOVAC_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// 16-character local key
    #[arg(long, env = "ROBOVAC_LOCAL_KEY", global = true, hide_env_values = true)]
    pub local_key: Option<String>,

    /// TCP port
    #[arg(long, env = "ROBOVAC_PORT", global = true)]
    pub port: Option<u16>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ROBOVAC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Connect and request timeout in seconds
    #[arg(long, env = "ROBOVAC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
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
    /// YAML
    Yaml,
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
    /// Show the vacuum's current status
    #[command(alias = "st")]
    Status,

    /// Stream status and Data Point changes until interrupted
    Watch(WatchArgs),

    /// Start cleaning, or resume a paused run
    Start,

    /// Pause cleaning
    Pause,

    /// Stop cleaning (same as pause on this firmware)
    Stop,

    /// Send the vacuum back to its dock
    #[command(alias = "home", alias = "dock")]
    Return,

    /// Set the suction level
    FanSpeed(FanSpeedArgs),

    /// Clean one configured room
    CleanRoom(CleanRoomArgs),

    /// List the rooms configured for the device
    Rooms,

    /// Write one raw Data Point
    Set(SetArgs),

    /// Print every raw Data Point the device reports
    Query,

    /// Decode captured data offline
    Decode(DecodeArgs),

    /// Manage CLI configuration and devices
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Also query the device every N seconds
    #[arg(long)]
    pub poll: Option<u64>,

    /// Include raw Data Point updates
    #[arg(long)]
    pub raw: bool,
}

#[derive(Debug, Args)]
pub struct FanSpeedArgs {
    /// gentle, normal, strong, or max (app names quiet/standard/turbo also work)
    pub speed: FanSpeed,
}

#[derive(Debug, Args)]
pub struct CleanRoomArgs {
    /// Room name as configured under `[devices.<name>.rooms]`
    pub room: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Data Point index (1-255)
    #[arg(value_parser = clap::value_parser!(u8).range(1..))]
    pub index: u8,

    /// Value: JSON (`true`, `42`, `"text"`) or a bare string
    pub value: String,
}

#[derive(Debug, Args)]
pub struct DecodeArgs {
    #[command(subcommand)]
    pub command: DecodeCommand,
}

#[derive(Debug, Subcommand)]
pub enum DecodeCommand {
    /// Decode a DPS JSON object into status and typed fields
    Status {
        /// JSON object, e.g. '{"153":"BgoAEAUyAA==","8":87}'
        dps: String,
    },

    /// Decrypt a captured UDP discovery datagram (hex)
    Datagram {
        /// Datagram bytes as hex
        hex: String,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved configuration (keys masked)
    Show,

    /// Print the config file path
    Path,

    /// List configured devices
    Devices,

    /// Set the default device
    Use {
        /// Device name to set as default
        name: String,
    },

    /// Store a device's local key in the system keyring
    SetKey {
        /// Device name (defaults to --device or the default device)
        name: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fan_speed_accepts_both_vocabularies() {
        let cli = Cli::try_parse_from(["robovac", "fan-speed", "Turbo"]).unwrap_or_else(|e| panic!("{e}"));
        match cli.command {
            Command::FanSpeed(args) => assert_eq!(args.speed, FanSpeed::Strong),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn set_rejects_index_zero() {
        assert!(Cli::try_parse_from(["robovac", "set", "0", "x"]).is_err());
    }
}
