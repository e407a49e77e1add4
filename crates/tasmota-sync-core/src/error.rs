// ── Core error types ──
//
// Three families, matching how each is handled:
// - `CoreError`: configuration and setup failures. Fatal, the engine refuses to run.
// - `ProtocolViolation`: a device payload outside the topic's vocabulary.
//   Logged at the component boundary; the message is dropped.
// - `TransportError`: reported by the bus/registry collaborators. Logged;
//   reconnection-triggered resynchronization covers the gap.

use serde_json::Value as Json;
use thiserror::Error;

/// Unified error type for engine construction and setup.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Unknown device setting '{key}' (known settings: {known})")]
    UnknownSetting { key: String, known: String },

    #[error("Invalid topic pattern '{pattern}': {reason}")]
    InvalidTopicPattern { pattern: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Setup errors ─────────────────────────────────────────────────
    #[error("Setup failed while {step}: {source}")]
    Setup {
        step: String,
        #[source]
        source: TransportError,
    },
}

/// A device message that does not match the vocabulary of its topic.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("unrecognized payload {payload:?}")]
    UnrecognizedPayload { payload: String },

    #[error("malformed JSON payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unexpected value {value} for state '{state}'")]
    UnexpectedState { state: String, value: Json },
}

impl ProtocolViolation {
    pub(crate) fn unrecognized(payload: &[u8]) -> Self {
        Self::UnrecognizedPayload {
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Failure reported by a bus or registry collaborator.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("bus request for '{topic}' failed: {reason}")]
    Bus { topic: String, reason: String },

    #[error("registry request for '{name}' failed: {reason}")]
    Registry { name: String, reason: String },

    #[error("transport closed")]
    Closed,
}
