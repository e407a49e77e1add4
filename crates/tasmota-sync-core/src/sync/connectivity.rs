// ── Connectivity tracking ──
//
// The device's retained last-will message says whether it is reachable.
// Every other component uses the resulting cell as its invalidation gate.

use crate::cell::Cell;
use crate::config::CONNECTED_STATE;
use crate::error::ProtocolViolation;

/// Map a last-will payload to online/offline.
pub fn parse_liveness(payload: &[u8]) -> Result<bool, ProtocolViolation> {
    match payload {
        b"Online" => Ok(true),
        b"Offline" => Ok(false),
        other => Err(ProtocolViolation::unrecognized(other)),
    }
}

/// Derives the deduplicating "online" cell from liveness messages.
///
/// Offline until the first liveness message arrives.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Cell<bool>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self {
            online: Cell::no_repeat(CONNECTED_STATE, false),
        }
    }

    /// Apply a liveness message. Unrecognized payloads leave the state alone.
    pub fn handle_liveness(&self, payload: &[u8]) -> Result<(), ProtocolViolation> {
        let online = parse_liveness(payload)?;
        self.online.set(online);
        Ok(())
    }

    pub fn online(&self) -> &Cell<bool> {
        &self.online
    }

    pub fn is_online(&self) -> bool {
        self.online.get()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn starts_offline() {
        assert!(!Connectivity::new().is_online());
    }

    #[test]
    fn follows_most_recent_recognized_payload() {
        let connectivity = Connectivity::new();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        {
            let transitions = Arc::clone(&transitions);
            connectivity
                .online()
                .on_change(move |v| transitions.lock().unwrap().push(*v));
        }

        for payload in [&b"Online"[..], b"Online", b"Offline", b"Offline", b"Online"] {
            connectivity.handle_liveness(payload).unwrap();
        }

        assert!(connectivity.is_online());
        assert_eq!(*transitions.lock().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn unrecognized_payload_is_a_violation_and_keeps_state() {
        let connectivity = Connectivity::new();
        connectivity.handle_liveness(b"Online").unwrap();

        let err = connectivity.handle_liveness(b"online").unwrap_err();

        assert!(matches!(err, ProtocolViolation::UnrecognizedPayload { ref payload } if payload == "online"));
        assert!(connectivity.is_online());
    }
}
