#![allow(clippy::unwrap_used)]
// Loading and saving config files, with environment overrides.

use std::path::Path;

use figment::Jail;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

use tasmota_sync_config::{
    Config, ConfigError, SettingValue, load_config_from, resolve_password, save_config,
};

fn load(path: &str) -> Result<Config, figment::Error> {
    load_config_from(Path::new(path)).map_err(|e| figment::Error::from(e.to_string()))
}

#[test]
fn test_missing_file_yields_defaults() {
    Jail::expect_with(|_jail| {
        let config = load("absent.toml")?;

        assert_eq!(config, Config::default());
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        Ok(())
    });
}

#[test]
fn test_file_values_are_loaded() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
            [mqtt]
            host = "broker.lan"
            username = "bridge"

            [bridge]
            registry_base = "home/living_room/plug"
            topic_pattern = "{prefix}/tasmota_1A2B3C/{command}"
            default_power = false
            repeat_secs = 30
            button_event = true

            [device]
            TelePeriod = 60
            PulseTime = "0"
            "#,
        )?;

        let config = load("config.toml")?;

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.username.as_deref(), Some("bridge"));
        assert_eq!(
            config.bridge.registry_base.as_deref(),
            Some("home/living_room/plug")
        );
        assert_eq!(config.bridge.default_power, Some(false));
        assert_eq!(config.bridge.repeat_secs, Some(30.0));
        assert!(config.bridge.button_event);
        assert_eq!(config.device["TelePeriod"], SettingValue::Integer(60));
        assert_eq!(config.device_config().unwrap().get("TelePeriod"), Some("60"));
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[mqtt]\nhost = \"broker.lan\"\nport = 1883\n")?;
        jail.set_env("TASMOTA_SYNC_MQTT__PORT", "8883");
        jail.set_env("TASMOTA_SYNC_DEVICE__TELEPERIOD", "120");

        let config = load("config.toml")?;

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.device_config().unwrap().get("TelePeriod"), Some("120"));
        Ok(())
    });
}

#[test]
fn test_invalid_file_is_reported() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[mqtt]\nport = \"not a port\"\n")?;

        let result = load_config_from(Path::new("config.toml"));

        assert!(matches!(result, Err(ConfigError::Figment(_))));
        Ok(())
    });
}

#[test]
fn test_password_from_named_env_var() {
    Jail::expect_with(|jail| {
        jail.set_env("BROKER_PASSWORD", "from-env");
        let mut config = Config::default();
        config.mqtt.password_env = Some("BROKER_PASSWORD".into());
        config.mqtt.password = Some("plaintext".into());

        let password = resolve_password(&config.mqtt).unwrap();

        assert_eq!(password.expose_secret(), "from-env");
        Ok(())
    });
}

#[test]
fn test_saved_config_loads_back() {
    Jail::expect_with(|_jail| {
        let path = Path::new("nested").join("config.toml");
        let mut config = Config::default();
        config.bridge.topic_pattern = Some("{prefix}/plug/{command}".into());
        config.device.insert("TelePeriod".into(), SettingValue::Integer(10));

        save_config(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded, config);
        Ok(())
    });
}
