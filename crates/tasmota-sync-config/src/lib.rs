//! Configuration for tasmota-sync.
//!
//! A TOML file in the platform config directory, overridable from the
//! environment (`TASMOTA_SYNC_MQTT__HOST=broker.lan`), plus resolution of
//! the broker password (env var → keyring → plaintext). The binary layers
//! its command-line flags on top of the loaded [`Config`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tasmota_sync_core::{CoreError, DEFAULT_SETTINGS, DeviceConfig};

/// Service name for keyring entries.
pub const KEYRING_SERVICE: &str = "tasmota-sync";

/// Prefix of environment overrides; nesting is separated by `__`.
pub const ENV_PREFIX: &str = "TASMOTA_SYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub bridge: BridgeSection,

    /// Device setting overrides, merged onto the defaults.
    #[serde(default)]
    pub device: IndexMap<String, SettingValue>,
}

/// Broker connection.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MqttSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Client id; a per-process id is generated when unset.
    pub client_id: Option<String>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    pub username: Option<String>,

    /// Password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            username: None,
            password: None,
            password_env: None,
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    30
}

/// What to bridge, and how.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeSection {
    /// Base topic the states and events are published under.
    pub registry_base: Option<String>,

    /// Device topic pattern, e.g. `{prefix}/tasmota_1A2B3C/{command}`.
    pub topic_pattern: Option<String>,

    /// Desired power when `power_in` is unknown.
    pub default_power: Option<bool>,

    /// Re-send the desired power every this many seconds.
    pub repeat_secs: Option<f64>,

    #[serde(default)]
    pub button_event: bool,
}

/// A device setting value as written in TOML or the environment.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("1"),
            Self::Bool(false) => f.write_str("0"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Config {
    /// Default settings with the `[device]` overrides applied.
    ///
    /// Keys match case-insensitively, since environment overrides arrive
    /// lowercased.
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let mut device = DeviceConfig::with_defaults();
        for (key, value) in &self.device {
            let canonical = DEFAULT_SETTINGS
                .iter()
                .map(|(known, _)| *known)
                .find(|known| known.eq_ignore_ascii_case(key))
                .unwrap_or(key.as_str());
            device.set(canonical, value)?;
        }
        Ok(device)
    }

    /// The `repeat_secs` setting as a duration.
    pub fn repeat(&self) -> Result<Option<Duration>, ConfigError> {
        self.bridge
            .repeat_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Validation {
                    field: "bridge.repeat_secs".into(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "tasmota-sync", "tasmota-sync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tasmota-sync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` and the environment.
///
/// A missing file is not an error: defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the broker password.
///
/// 1. `password_env` → env var lookup
/// 2. System keyring entry `{username}/mqtt`
/// 3. Plaintext `password`
///
/// `None` when nothing is configured; the broker then gets no password.
pub fn resolve_password(mqtt: &MqttSection) -> Option<SecretString> {
    if let Some(ref env_name) = mqtt.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    if let Some(ref username) = mqtt.username {
        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{username}/mqtt")) {
            if let Ok(secret) = entry.get_password() {
                return Some(SecretString::from(secret));
            }
        }
    }

    mqtt.password.clone().map(SecretString::from)
}
