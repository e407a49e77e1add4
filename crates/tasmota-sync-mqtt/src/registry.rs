// ── MQTT-backed state registry ──
//
// Layout under a base topic:
// - produced state `name`: retained JSON on `{base}/{name}`; `Unknown` is an
//   empty retained payload, which also clears the broker's retained copy
// - observed state `name`: subscription to `{base}/{name}`, decoded the
//   same way; the first item is the retained value if the broker delivers
//   one within the retained wait, `Unknown` otherwise
// - event `name`: non-retained JSON on `{base}/{name}`

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashSet;
use rumqttc::QoS;
use serde_json::Value as Json;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use tasmota_sync_core::{Registry, StateObserver, StateValue, TransportError};

use crate::error::MqttError;
use crate::session::{MqttSession, Route};

const OBSERVER_CHANNEL_CAPACITY: usize = 16;

/// How long `observe_state` waits for a retained value before reporting
/// the state as `Unknown`.
///
/// Brokers send retained messages after the SUBACK, so there is no
/// acknowledgement to wait for instead.
pub const DEFAULT_RETAINED_WAIT: Duration = Duration::from_millis(500);

/// Encode a state value as a retained payload.
pub fn encode_state(value: &StateValue<Json>) -> Bytes {
    match value {
        StateValue::Unknown => Bytes::new(),
        StateValue::Known(value) => Bytes::from(value.to_string()),
    }
}

/// Decode a retained payload. Empty means `Unknown`.
pub fn decode_state(payload: &[u8]) -> Result<StateValue<Json>, serde_json::Error> {
    if payload.is_empty() {
        return Ok(StateValue::Unknown);
    }
    serde_json::from_slice(payload).map(StateValue::Known)
}

/// [`Registry`] over the shared broker session.
#[derive(Debug, Clone)]
pub struct MqttRegistry {
    session: MqttSession,
    base: Arc<str>,
    events: Arc<DashSet<String>>,
    retained_wait: Duration,
}

impl MqttRegistry {
    /// Registry rooted at `base`, e.g. `home/living_room/plug`.
    pub fn new(session: MqttSession, base: &str) -> Result<Self, MqttError> {
        let base = base.trim_end_matches('/');
        if base.is_empty() {
            return Err(MqttError::InvalidConfig("registry base topic is empty".into()));
        }
        if base.contains(['+', '#']) {
            return Err(MqttError::InvalidConfig(format!(
                "registry base topic '{base}' contains wildcards"
            )));
        }
        Ok(Self {
            session,
            base: Arc::from(base),
            events: Arc::new(DashSet::new()),
            retained_wait: DEFAULT_RETAINED_WAIT,
        })
    }

    /// Override [`DEFAULT_RETAINED_WAIT`].
    pub fn with_retained_wait(mut self, wait: Duration) -> Self {
        self.retained_wait = wait;
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Topic of a state or event.
    pub fn topic(&self, name: &str) -> String {
        format!("{}/{name}", self.base)
    }

    async fn publish_state(&self, name: &str, value: &StateValue<Json>) -> Result<(), MqttError> {
        self.session
            .publish(&self.topic(name), QoS::AtLeastOnce, true, encode_state(value))
            .await
    }
}

impl Registry for MqttRegistry {
    async fn register_state(
        &self,
        name: &str,
        initial: StateValue<Json>,
    ) -> Result<(), TransportError> {
        debug!(state = name, topic = %self.topic(name), "registering state");
        self.publish_state(name, &initial)
            .await
            .map_err(|e| e.for_state(name))
    }

    async fn set_state(&self, name: &str, value: StateValue<Json>) -> Result<(), TransportError> {
        self.publish_state(name, &value)
            .await
            .map_err(|e| e.for_state(name))
    }

    async fn observe_state(&self, name: &str) -> Result<StateObserver, TransportError> {
        let (tx, inbound) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        self.session
            .subscribe(&self.topic(name), Route::Observer(tx), QoS::AtLeastOnce)
            .await
            .map_err(|e| e.for_state(name))?;
        Ok(current_first(inbound, self.retained_wait).await)
    }

    async fn register_event(&self, name: &str) -> Result<(), TransportError> {
        debug!(event = name, topic = %self.topic(name), "registering event");
        self.events.insert(name.to_string());
        Ok(())
    }

    async fn emit_event(&self, name: &str, value: Json) -> Result<(), TransportError> {
        if !self.events.contains(name) {
            return Err(MqttError::UnregisteredEvent(name.to_string()).for_state(name));
        }
        self.session
            .publish(
                &self.topic(name),
                QoS::AtLeastOnce,
                false,
                Bytes::from(value.to_string()),
            )
            .await
            .map_err(|e| e.for_state(name))
    }
}

/// Observer yielding the current value first, then every later value.
///
/// The current value is the first delivery within `wait` (the retained
/// publish), or `Unknown` when nothing arrives in time.
pub(crate) async fn current_first(
    mut inbound: mpsc::Receiver<StateValue<Json>>,
    wait: Duration,
) -> StateObserver {
    let current = match tokio::time::timeout(wait, inbound.recv()).await {
        Ok(Some(value)) => value,
        Ok(None) | Err(_) => {
            trace!("no retained value, starting from Unknown");
            StateValue::Unknown
        }
    };
    let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
    tokio::spawn(forward(current, inbound, tx));
    rx
}

async fn forward(
    current: StateValue<Json>,
    mut inbound: mpsc::Receiver<StateValue<Json>>,
    outbound: mpsc::Sender<StateValue<Json>>,
) {
    let mut next = Some(current);
    while let Some(value) = next {
        if outbound.send(value).await.is_err() {
            return;
        }
        next = tokio::select! {
            () = outbound.closed() => None,
            value = inbound.recv() => value,
        };
    }
}
