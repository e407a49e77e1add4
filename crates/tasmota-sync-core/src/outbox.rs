// ── Outbox ──
//
// The dataflow graph never performs I/O. Components enqueue `Action`s in
// listener order; the engine drains the queue after each event and issues
// every action as its own task.

use bytes::Bytes;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::value::StateValue;

/// A side effect requested by the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Publish a message on the device bus.
    Publish { topic: String, payload: Bytes },
    /// Update a registered registry state.
    SetState {
        name: String,
        value: StateValue<Json>,
    },
    /// Fire a registered registry event.
    EmitEvent { name: String, value: Json },
}

/// Sending half of the action queue. Cheap to clone into listeners.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Action>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, topic: String, payload: impl Into<Bytes>) {
        self.push(Action::Publish {
            topic,
            payload: payload.into(),
        });
    }

    pub fn set_state(&self, name: &str, value: StateValue<Json>) {
        self.push(Action::SetState {
            name: name.to_string(),
            value,
        });
    }

    pub fn emit_event(&self, name: &str, value: Json) {
        self.push(Action::EmitEvent {
            name: name.to_string(),
            value,
        });
    }

    fn push(&self, action: Action) {
        // Only fails once the engine has torn down; nothing left to issue.
        if self.tx.send(action).is_err() {
            tracing::trace!("outbox closed, dropping action");
        }
    }
}
