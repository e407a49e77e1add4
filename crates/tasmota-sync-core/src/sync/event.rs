// ── Event translation ──

use serde_json::Value as Json;
use tracing::trace;

use crate::config::BUTTON_EVENT;
use crate::error::ProtocolViolation;
use crate::outbox::Outbox;

/// Turns one nested attribute of a JSON device message into a registry event.
///
/// Messages without the attribute are not for us and are ignored. Events
/// carry no state: every qualifying message fires once.
#[derive(Debug, Clone)]
pub struct EventTranslator {
    event: String,
    pointer: String,
    outbox: Outbox,
}

impl EventTranslator {
    /// Fire `event` with the value of `{object}.{attribute}`.
    pub fn new(event: &str, object: &str, attribute: &str, outbox: Outbox) -> Self {
        Self {
            event: event.to_string(),
            pointer: format!("/{object}/{attribute}"),
            outbox,
        }
    }

    /// `Button1.Action` from `stat/RESULT` as `on_button`.
    pub fn button(outbox: Outbox) -> Self {
        Self::new(BUTTON_EVENT, "Button1", "Action", outbox)
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn handle(&self, payload: &[u8]) -> Result<(), ProtocolViolation> {
        let document: Json = serde_json::from_slice(payload)?;
        let Some(value) = document.pointer(&self.pointer) else {
            trace!(event = %self.event, "message without {}, ignoring", self.pointer);
            return Ok(());
        };
        self.outbox.emit_event(&self.event, value.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::outbox::Action;

    #[test]
    fn emits_button_action() {
        let (outbox, mut rx) = Outbox::channel();
        let translator = EventTranslator::button(outbox);

        translator.handle(br#"{"Button1":{"Action":"TOGGLE"}}"#).unwrap();
        translator.handle(br#"{"Button1":{"Action":"TOGGLE"}}"#).unwrap();

        for _ in 0..2 {
            assert_eq!(
                rx.try_recv().unwrap(),
                Action::EmitEvent {
                    name: "on_button".into(),
                    value: json!("TOGGLE"),
                }
            );
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ignores_unrelated_results() {
        let (outbox, mut rx) = Outbox::channel();
        let translator = EventTranslator::button(outbox);

        translator.handle(br#"{"POWER":"ON"}"#).unwrap();
        translator.handle(br#"{"Button1":{"Hold":"ON"}}"#).unwrap();
        translator.handle(br#""done""#).unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_json_is_a_violation() {
        let (outbox, _rx) = Outbox::channel();
        let translator = EventTranslator::button(outbox);

        assert!(matches!(
            translator.handle(b"Button1"),
            Err(ProtocolViolation::Decode(_))
        ));
    }
}
