use std::time::Duration;

use thiserror::Error;

use tasmota_sync_core::TransportError;

/// Errors from the MQTT collaborators.
#[derive(Debug, Error)]
pub enum MqttError {
    // ── Configuration ───────────────────────────────────────────────
    /// Broker or registry settings rejected before connecting.
    #[error("Invalid MQTT configuration: {0}")]
    InvalidConfig(String),

    // ── Session ─────────────────────────────────────────────────────
    /// The request queue to the event loop rejected a request.
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// No CONNACK from the broker in time.
    #[error("Broker at {broker} not reachable within {timeout:?}")]
    NotConnected { broker: String, timeout: Duration },

    /// The session was shut down.
    #[error("MQTT session closed")]
    Closed,

    // ── Registry ────────────────────────────────────────────────────
    /// Emitting an event that was never registered.
    #[error("Event '{0}' is not registered")]
    UnregisteredEvent(String),
}

impl MqttError {
    /// Convert into the collaborator error reported to the engine.
    pub(crate) fn for_topic(self, topic: &str) -> TransportError {
        match self {
            Self::Closed => TransportError::Closed,
            other => TransportError::Bus {
                topic: topic.to_string(),
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn for_state(self, name: &str) -> TransportError {
        match self {
            Self::Closed => TransportError::Closed,
            other => TransportError::Registry {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
