// ── Runtime bridge configuration ──
//
// These types describe *what* the bridge synchronizes. They never touch
// disk: the binary builds a `BridgeConfig` from its config file and flags
// and hands it in.

use std::time::Duration;

use indexmap::IndexMap;

use crate::error::CoreError;
use crate::topic::{TopicPattern, command};

/// Device settings pushed on every connection, with their defaults.
///
/// - `SetOption73=0`: button presses are handled locally
/// - `ButtonTopic=0`: no command on button press (interferes with SetOption73)
/// - `TelePeriod=10`: telemetry every 10 seconds
/// - `PowerOnState=0`: off after a power cut
/// - `PulseTime=0`: no automatic switch-off
pub const DEFAULT_SETTINGS: [(&str, &str); 5] = [
    ("SetOption73", "0"),
    ("ButtonTopic", "0"),
    ("TelePeriod", "10"),
    ("PowerOnState", "0"),
    ("PulseTime", "0"),
];

/// Registry state name for connectivity.
pub const CONNECTED_STATE: &str = "connected";
/// Registry state name for the device-reported power.
pub const POWER_OUT_STATE: &str = "power_out";
/// Registry input observed for the desired power.
pub const POWER_IN_STATE: &str = "power_in";
/// Registry event fired on button actions.
pub const BUTTON_EVENT: &str = "on_button";

// ── DeviceConfig ─────────────────────────────────────────────────

/// Ordered settings map pushed to the device.
///
/// Keys are restricted to [`DEFAULT_SETTINGS`]; an unknown key is a
/// configuration error. Iteration order is insertion order, so the
/// defaults keep their documented order when overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    settings: IndexMap<String, String>,
}

impl DeviceConfig {
    /// No settings at all; nothing is pushed on connection.
    pub fn empty() -> Self {
        Self {
            settings: IndexMap::new(),
        }
    }

    /// The full default settings map.
    pub fn with_defaults() -> Self {
        Self {
            settings: DEFAULT_SETTINGS
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Set one setting. Existing keys keep their position.
    pub fn set(&mut self, key: &str, value: impl ToString) -> Result<(), CoreError> {
        if !is_known_setting(key) {
            return Err(CoreError::UnknownSetting {
                key: key.to_string(),
                known: known_settings(),
            });
        }
        self.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Apply a batch of overrides, failing on the first unknown key.
    pub fn apply_overrides<I, K, V>(&mut self, overrides: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        for (key, value) in overrides {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn is_known_setting(key: &str) -> bool {
    DEFAULT_SETTINGS.iter().any(|(known, _)| *known == key)
}

fn known_settings() -> String {
    DEFAULT_SETTINGS
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Telemetry bindings ───────────────────────────────────────────

/// Relay of one `tele/{command}` topic into a registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryBinding {
    /// Tasmota command name under the `tele` prefix.
    pub command: String,
    /// Registry state the decoded payload is published under.
    pub state: String,
}

impl TelemetryBinding {
    pub fn new(command: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            state: state.into(),
        }
    }

    /// `STATE` and `SENSOR` telemetry.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(command::STATE, "state_raw"),
            Self::new(command::SENSOR, "sensor_raw"),
        ]
    }
}

// ── BridgeConfig ─────────────────────────────────────────────────

/// Configuration for bridging a single device.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Device topic layout.
    pub topics: TopicPattern,
    /// Settings pushed on every connection.
    pub device: DeviceConfig,
    /// Desired power when the registry input is unknown. `None` keeps
    /// the previous desired value instead.
    pub default_power: Option<bool>,
    /// Re-send the desired power this often. `None` sends on change only.
    pub repeat: Option<Duration>,
    /// Translate button actions into the `on_button` event.
    pub button_event: bool,
    /// Telemetry topics relayed verbatim.
    pub telemetry: Vec<TelemetryBinding>,
}

impl BridgeConfig {
    /// Defaults for everything but the topic layout.
    pub fn new(topics: TopicPattern) -> Self {
        Self {
            topics,
            device: DeviceConfig::with_defaults(),
            default_power: None,
            repeat: None,
            button_event: false,
            telemetry: TelemetryBinding::defaults(),
        }
    }
}
