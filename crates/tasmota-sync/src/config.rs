//! Resolution of config file + CLI flags into runtime configuration.
//!
//! Precedence: command-line flags, then environment, then the config file,
//! then built-in defaults. Everything is validated here, before any network
//! connection is attempted.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use tasmota_sync_config::{Config, resolve_password};
use tasmota_sync_core::{BridgeConfig, TopicPattern};
use tasmota_sync_mqtt::{BrokerConfig, Credentials};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

/// Everything `run` needs, fully validated.
#[derive(Debug)]
pub struct RunConfig {
    pub broker: BrokerConfig,
    pub registry_base: String,
    pub bridge: BridgeConfig,
}

/// The config file in effect: `--config-file`, or the platform default.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config_file
        .clone()
        .unwrap_or_else(tasmota_sync_config::config_path)
}

pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(tasmota_sync_config::load_config_from(&config_path(global))?)
}

/// Merge `run` flags over the loaded config.
pub fn resolve_run(args: &RunArgs, cfg: &Config) -> Result<RunConfig, CliError> {
    let registry_base = args
        .registry_base
        .clone()
        .or_else(|| cfg.bridge.registry_base.clone())
        .ok_or_else(|| CliError::Missing {
            what: "registry base topic".into(),
            hint: "Pass REGISTRY_BASE or set bridge.registry_base in the config file.".into(),
        })?;

    let pattern = args
        .pattern
        .clone()
        .or_else(|| cfg.bridge.topic_pattern.clone())
        .ok_or_else(|| CliError::Missing {
            what: "device topic pattern".into(),
            hint: "Pass PATTERN (typically {prefix}/tasmota_XXXXXX/{command}) \
                   or set bridge.topic_pattern in the config file."
                .into(),
        })?;

    let mut bridge = BridgeConfig::new(TopicPattern::new(pattern)?);
    bridge.device = cfg.device_config()?;
    bridge.device.apply_overrides(args.setting_pairs())?;
    bridge.default_power = args.default.or(cfg.bridge.default_power);
    bridge.repeat = match args.repeat {
        Some(repeat) => Some(repeat),
        None => cfg.repeat()?,
    };
    bridge.button_event = args.button_event || cfg.bridge.button_event;

    Ok(RunConfig {
        broker: resolve_broker(args, cfg),
        registry_base,
        bridge,
    })
}

fn resolve_broker(args: &RunArgs, cfg: &Config) -> BrokerConfig {
    let host = args.host.clone().unwrap_or_else(|| cfg.mqtt.host.clone());
    let port = args.port.unwrap_or(cfg.mqtt.port);
    // Two bridges with one client id would keep disconnecting each other.
    let client_id = cfg
        .mqtt
        .client_id
        .clone()
        .unwrap_or_else(|| format!("tasmota-sync-{}", std::process::id()));

    let mut broker = BrokerConfig::new(host, port, client_id);
    broker.keep_alive = Duration::from_secs(cfg.mqtt.keep_alive_secs);
    broker.credentials = cfg.mqtt.username.clone().map(|username| Credentials {
        username,
        password: resolve_password(&cfg.mqtt).unwrap_or_else(|| SecretString::from(String::new())),
    });
    broker
}
