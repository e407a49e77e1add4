// ── Collaborator interfaces ──
//
// The engine talks to the device through a publish/subscribe bus and to
// consumers through a state registry. Both are supplied by the caller;
// `tasmota-sync-mqtt` provides MQTT implementations.

use std::future::Future;

use bytes::Bytes;
use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::value::StateValue;

/// A message received from the device bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl DeviceMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Receiver of the values of an observed registry state.
///
/// The first item is the value at the time of observation.
pub type StateObserver = mpsc::Receiver<StateValue<Json>>;

/// Publish/subscribe access to the device.
///
/// Incoming messages for subscribed topics are delivered, in arrival
/// order, on the channel handed to [`Engine::run`](crate::Engine::run).
pub trait DeviceBus: Clone + Send + Sync + 'static {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Named, observable states and events exposed to other consumers.
pub trait Registry: Clone + Send + Sync + 'static {
    /// Register a state produced by this bridge.
    fn register_state(
        &self,
        name: &str,
        initial: StateValue<Json>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Update a registered state.
    fn set_state(
        &self,
        name: &str,
        value: StateValue<Json>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Observe a state produced by someone else.
    fn observe_state(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<StateObserver, TransportError>> + Send;

    /// Register an event source produced by this bridge.
    fn register_event(&self, name: &str)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Fire a registered event.
    fn emit_event(
        &self,
        name: &str,
        value: Json,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
