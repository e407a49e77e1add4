//! Clap derive structures for the `tasmota-sync` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tasmota-sync -- keep a Tasmota device in sync with a state registry
#[derive(Debug, Parser)]
#[command(
    name = "tasmota-sync",
    version,
    about = "Bridge a Tasmota device to a state registry over MQTT",
    long_about = "Bridges one Tasmota device to named states and events.\n\n\
        Publishes `connected`, `power_out`, `state_raw` and `sensor_raw`,\n\
        follows `power_in`, and optionally fires `on_button`.",
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
    /// Config file (default: platform config directory)
    #[arg(long, env = "TASMOTA_SYNC_CONFIG_FILE", global = true, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run(RunArgs),

    /// Inspect or create the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// MQTT broker host [config: mqtt.host, default: localhost]
    #[arg(long)]
    pub host: Option<String>,

    /// MQTT broker port [config: mqtt.port, default: 1883]
    #[arg(long)]
    pub port: Option<u16>,

    /// Desired power while power_in is unknown; unset keeps the previous value
    #[arg(long, value_name = "BOOL")]
    pub default: Option<bool>,

    /// Enable the on_button event
    #[arg(long)]
    pub button_event: bool,

    /// Re-send the desired power this often (seconds, or e.g. "30s");
    /// useful with PulseTime
    #[arg(long, value_name = "DURATION", value_parser = parse_repeat)]
    pub repeat: Option<Duration>,

    /// Device setting pushed on connection (repeatable)
    #[arg(
        long = "config",
        short = 'c',
        num_args = 2,
        value_names = ["KEY", "VALUE"],
        action = ArgAction::Append
    )]
    pub settings: Vec<String>,

    /// How long to wait for the broker before giving up
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,

    /// Base topic for the published states and events [config: bridge.registry_base]
    pub registry_base: Option<String>,

    /// Device topic pattern with {prefix} and {command} placeholders,
    /// typically {prefix}/tasmota_XXXXXX/{command} [config: bridge.topic_pattern]
    pub pattern: Option<String>,
}

impl RunArgs {
    /// `-c KEY VALUE` pairs, in command-line order.
    pub fn setting_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration (file + environment)
    Show,

    /// Print the config file path
    Path,

    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

/// Seconds as a number (`2.5`) or a humantime duration (`30s`, `1m`).
fn parse_repeat(s: &str) -> Result<Duration, String> {
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| e.to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
