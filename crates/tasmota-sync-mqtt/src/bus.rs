use bytes::Bytes;
use rumqttc::QoS;

use tasmota_sync_core::{DeviceBus, TransportError};

use crate::session::{MqttSession, Route};

/// [`DeviceBus`] over the shared broker session.
///
/// Tasmota commands are fire-and-forget: QoS 0, never retained. Messages
/// for subscribed topics arrive on the channel returned by
/// [`MqttSession::connect`].
#[derive(Debug, Clone)]
pub struct MqttBus {
    session: MqttSession,
}

impl MqttBus {
    pub fn new(session: MqttSession) -> Self {
        Self { session }
    }
}

impl DeviceBus for MqttBus {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.session
            .subscribe(topic, Route::Device, QoS::AtMostOnce)
            .await
            .map_err(|e| e.for_topic(topic))
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.session
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| e.for_topic(topic))
    }
}
