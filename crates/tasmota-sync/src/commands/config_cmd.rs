//! Config subcommand handlers.

use tasmota_sync_config::{Config, SettingValue, save_config};
use tasmota_sync_core::DEFAULT_SETTINGS;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let mut cfg = config::load_config(global)?;
            if cfg.mqtt.password.is_some() {
                cfg.mqtt.password = Some(REDACTED.into());
            }
            let toml_str = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            })?;
            print!("{toml_str}");
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config::config_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&starter_config(), &path)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        }
    }
}

/// A config with every device default spelled out, ready for editing.
fn starter_config() -> Config {
    let mut cfg = Config::default();
    cfg.bridge.registry_base = Some("home/living_room/plug".into());
    cfg.bridge.topic_pattern = Some("{prefix}/tasmota_XXXXXX/{command}".into());
    cfg.device = DEFAULT_SETTINGS
        .iter()
        .map(|(key, value)| ((*key).to_string(), starter_value(value)))
        .collect();
    cfg
}

fn starter_value(value: &str) -> SettingValue {
    value
        .parse()
        .map_or_else(|_| SettingValue::Text(value.to_string()), SettingValue::Integer)
}
