//! CLI error types with miette diagnostics.
//!
//! Maps core, MQTT and config errors into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use tasmota_sync_config::ConfigError;
use tasmota_sync_core::CoreError;
use tasmota_sync_mqtt::MqttError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the MQTT broker at {broker}")]
    #[diagnostic(
        code(tasmota_sync::connection_failed),
        help(
            "Check that the broker is running and reachable.\n\
             Set the broker with --host/--port or mqtt.host/mqtt.port in the config file."
        )
    )]
    ConnectionFailed {
        broker: String,
        #[source]
        source: MqttError,
    },

    #[error("Bridge setup failed")]
    #[diagnostic(
        code(tasmota_sync::setup_failed),
        help("The broker connection dropped while registering states; try again.")
    )]
    Setup(#[source] CoreError),

    // ── Usage ────────────────────────────────────────────────────────
    #[error("Missing {what}")]
    #[diagnostic(code(tasmota_sync::missing_argument), help("{hint}"))]
    Missing { what: String, hint: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Unknown device setting '{key}'")]
    #[diagnostic(
        code(tasmota_sync::unknown_setting),
        help("Known settings: {known}")
    )]
    UnknownSetting { key: String, known: String },

    #[error("Invalid topic pattern '{pattern}': {reason}")]
    #[diagnostic(
        code(tasmota_sync::invalid_pattern),
        help("A pattern needs exactly one {{prefix}} and one {{command}}, e.g. {{prefix}}/tasmota_1A2B3C/{{command}}")
    )]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tasmota_sync::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(tasmota_sync::config))]
    Config(ConfigError),

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(tasmota_sync::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Setup(_) => exit_code::CONNECTION,
            Self::Missing { .. } => exit_code::USAGE,
            Self::UnknownSetting { .. }
            | Self::InvalidPattern { .. }
            | Self::Validation { .. }
            | Self::Config(_) => exit_code::CONFIG,
            Self::ConfigExists { .. } | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownSetting { key, known } => Self::UnknownSetting { key, known },
            CoreError::InvalidTopicPattern { pattern, reason } => {
                Self::InvalidPattern { pattern, reason }
            }
            CoreError::Config { message } => Self::Validation {
                field: "configuration".into(),
                reason: message,
            },
            err @ CoreError::Setup { .. } => Self::Setup(err),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Core(core) => core.into(),
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(io) => Self::Io(io),
            other => Self::Config(other),
        }
    }
}

impl From<MqttError> for CliError {
    fn from(err: MqttError) -> Self {
        match err {
            MqttError::InvalidConfig(reason) => Self::Validation {
                field: "mqtt".into(),
                reason,
            },
            other => Self::ConnectionFailed {
                broker: "(unknown)".into(),
                source: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let unknown: CliError = CoreError::UnknownSetting {
            key: "Sleep".into(),
            known: "TelePeriod".into(),
        }
        .into();
        assert_eq!(unknown.exit_code(), exit_code::CONFIG);

        let missing = CliError::Missing {
            what: "topic pattern".into(),
            hint: String::new(),
        };
        assert_eq!(missing.exit_code(), exit_code::USAGE);

        let refused: CliError = MqttError::NotConnected {
            broker: "localhost:1883".into(),
            timeout: std::time::Duration::from_secs(1),
        }
        .into();
        assert_eq!(refused.exit_code(), exit_code::CONNECTION);
    }
}
