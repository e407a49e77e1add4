// ── Telemetry relay ──

use serde_json::Value as Json;
use tracing::trace;

use crate::cell::Cell;
use crate::error::ProtocolViolation;
use crate::value::StateValue;

/// One-way relay of a JSON telemetry topic into a registry state.
///
/// The decoded document is stored verbatim. While the device is offline the
/// state is `Unknown` and arriving documents are dropped.
#[derive(Debug, Clone)]
pub struct TelemetryRelay {
    online: Cell<bool>,
    value: Cell<StateValue<Json>>,
}

impl TelemetryRelay {
    pub fn new(state: &str, online: &Cell<bool>) -> Self {
        let value = Cell::new(state, StateValue::Unknown);
        value.add_dependency(online);
        {
            let value = value.clone();
            online.on_change(move |online| {
                if !*online {
                    value.set(StateValue::Unknown);
                }
            });
        }
        Self {
            online: online.clone(),
            value,
        }
    }

    /// Decode and store a telemetry payload. Malformed JSON is a violation.
    pub fn handle(&self, payload: &[u8]) -> Result<(), ProtocolViolation> {
        let document: Json = serde_json::from_slice(payload)?;
        if !self.online.get() {
            trace!(state = self.value.name(), "dropping telemetry while offline");
            return Ok(());
        }
        self.value.set(StateValue::Known(document));
        Ok(())
    }

    pub fn value(&self) -> &Cell<StateValue<Json>> {
        &self.value
    }
}
