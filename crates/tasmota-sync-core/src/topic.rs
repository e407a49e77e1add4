// ── Device topics ──
//
// Tasmota addresses every message as `{prefix}/{command}` inside a
// per-device pattern, e.g. `{prefix}/tasmota_1A2B3C/{command}`.

use std::fmt;

use strum::{AsRefStr, Display, EnumString};

use crate::error::CoreError;

const PREFIX_PLACEHOLDER: &str = "{prefix}";
const COMMAND_PLACEHOLDER: &str = "{command}";

/// Tasmota topic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Prefix {
    /// Commands sent to the device.
    Cmnd,
    /// Command results and status.
    Stat,
    /// Periodic telemetry and the last-will liveness topic.
    Tele,
}

// ── Well-known commands ─────────────────────────────────────────────

pub mod command {
    /// Last-will topic carrying `Online` / `Offline` (under `tele`).
    pub const LWT: &str = "LWT";
    /// Power status (under `stat`).
    pub const POWER_STATUS: &str = "POWER";
    /// Power command (under `cmnd`); empty payload queries the state.
    pub const POWER: &str = "Power";
    /// Command results, including button actions (under `stat`).
    pub const RESULT: &str = "RESULT";
    /// Periodic state telemetry (under `tele`).
    pub const STATE: &str = "STATE";
    /// Periodic sensor telemetry (under `tele`).
    pub const SENSOR: &str = "SENSOR";
}

/// A validated topic template with `{prefix}` and `{command}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    pattern: String,
}

impl TopicPattern {
    /// Validate a pattern. Both placeholders must appear exactly once.
    pub fn new(pattern: impl Into<String>) -> Result<Self, CoreError> {
        let pattern = pattern.into();
        for placeholder in [PREFIX_PLACEHOLDER, COMMAND_PLACEHOLDER] {
            match pattern.matches(placeholder).count() {
                1 => {}
                0 => {
                    return Err(CoreError::InvalidTopicPattern {
                        reason: format!("missing {placeholder} placeholder"),
                        pattern,
                    });
                }
                _ => {
                    return Err(CoreError::InvalidTopicPattern {
                        reason: format!("{placeholder} appears more than once"),
                        pattern,
                    });
                }
            }
        }
        Ok(Self { pattern })
    }

    /// Build the concrete topic for a prefix/command pair.
    pub fn topic(&self, prefix: Prefix, command: &str) -> String {
        self.pattern
            .replace(PREFIX_PLACEHOLDER, prefix.as_ref())
            .replace(COMMAND_PLACEHOLDER, command)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}
