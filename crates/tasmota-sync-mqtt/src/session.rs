//! Broker session with auto-reconnect.
//!
//! One [`rumqttc`] client shared by the device bus and the registry. A
//! background task drives the event loop, routes incoming publishes by
//! exact topic and re-subscribes every known topic after each CONNACK, so
//! a broker restart is invisible to the engine apart from the device's own
//! last-will messages.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as Json;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tasmota_sync_core::{DeviceMessage, StateValue};

use crate::error::MqttError;
use crate::registry::decode_state;

// ── Channel capacities ───────────────────────────────────────────────

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const DEVICE_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for the DISCONNECT packet to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for broker reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── BrokerConfig ─────────────────────────────────────────────────────

/// Username and password for the broker.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Where and how to connect to the broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Zero disables keep-alive; otherwise at least one second.
    pub keep_alive: Duration,
    pub credentials: Option<Credentials>,
    pub reconnect: ReconnectConfig,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            credentials: None,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// `host:port`, for messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), MqttError> {
        if self.host.trim().is_empty() {
            return Err(MqttError::InvalidConfig("broker host is empty".into()));
        }
        if self.client_id.is_empty() || self.client_id.starts_with(' ') {
            return Err(MqttError::InvalidConfig(format!(
                "invalid client id {:?}",
                self.client_id
            )));
        }
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(MqttError::InvalidConfig(
                "keep-alive must be zero or at least one second".into(),
            ));
        }
        Ok(())
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let Some(credentials) = &self.credentials {
            options.set_credentials(
                &credentials.username,
                credentials.password.expose_secret(),
            );
        }
        options
    }
}

// ── Routing ──────────────────────────────────────────────────────────

/// Destination of publishes received on a subscribed topic.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    /// Forwarded verbatim to the device message channel.
    Device,
    /// Decoded as a registry state and sent to one observer.
    Observer(mpsc::Sender<StateValue<Json>>),
}

type Routes = Arc<DashMap<String, Route>>;

// ── MqttSession ──────────────────────────────────────────────────────

/// Handle to a running broker session.
///
/// Cheaply cloneable. Call [`shutdown`](Self::shutdown) to stop the
/// background task and disconnect.
#[derive(Clone)]
pub struct MqttSession {
    client: AsyncClient,
    routes: Routes,
    connected: watch::Receiver<bool>,
    broker: String,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl MqttSession {
    /// Spawn the event loop task and return the session together with
    /// the channel of messages for topics subscribed through the bus.
    ///
    /// Returns immediately; the connection is established in the
    /// background. Use [`wait_connected`](Self::wait_connected) to wait
    /// for the first CONNACK.
    pub fn connect(
        config: &BrokerConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<DeviceMessage>), MqttError> {
        config.validate()?;

        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CHANNEL_CAPACITY);
        let (device_tx, device_rx) = mpsc::channel(DEVICE_CHANNEL_CAPACITY);
        let (connected_tx, connected) = watch::channel(false);
        let routes: Routes = Arc::new(DashMap::new());
        let done = CancellationToken::new();

        info!(broker = %config.address(), client_id = %config.client_id, "starting MQTT session");
        tokio::spawn(event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&routes),
            device_tx,
            connected_tx,
            config.reconnect.clone(),
            cancel.clone(),
            done.clone(),
        ));

        Ok((
            Self {
                client,
                routes,
                connected,
                broker: config.address(),
                cancel,
                done,
            },
            device_rx,
        ))
    }

    /// Wait until the broker has acknowledged a connection.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let mut connected = self.connected.clone();
        match tokio::time::timeout(timeout, connected.wait_for(|c| *c)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(MqttError::Closed),
            Err(_) => Err(MqttError::NotConnected {
                broker: self.broker.clone(),
                timeout,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub(crate) async fn subscribe(
        &self,
        topic: &str,
        route: Route,
        qos: QoS,
    ) -> Result<(), MqttError> {
        self.ensure_open()?;
        self.routes.insert(topic.to_string(), route);
        debug!(topic, "subscribing");
        self.client.subscribe(topic, qos).await?;
        Ok(())
    }

    pub(crate) async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), MqttError> {
        self.ensure_open()?;
        trace!(topic, retain, bytes = payload.len(), "publishing");
        self.client.publish_bytes(topic, qos, retain, payload).await?;
        Ok(())
    }

    /// Signal the background task to disconnect and stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the background task has exited, after the final
    /// DISCONNECT (if any) went out.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    fn ensure_open(&self) -> Result<(), MqttError> {
        if self.cancel.is_cancelled() {
            Err(MqttError::Closed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("broker", &self.broker)
            .field("connected", &self.is_connected())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

// ── Background event loop ────────────────────────────────────────────

/// Main loop: poll → route; on error, backoff → poll again (reconnects).
async fn event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Routes,
    device_tx: mpsc::Sender<DeviceMessage>,
    connected: watch::Sender<bool>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    let mut attempt: u32 = 0;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "connected to broker");
                attempt = 0;
                connected.send_replace(true);
                resubscribe(&client, &routes);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                route_publish(&routes, &device_tx, publish).await;
            }
            Ok(_) => {}
            Err(e) => {
                connected.send_replace(false);
                warn!(error = %e, attempt, "broker connection error");

                let delay = calculate_backoff(attempt, &reconnect);
                info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }

    if connected.send_replace(false) {
        disconnect(&client, &mut eventloop).await;
    }
    debug!("MQTT event loop exiting");
}

/// Send a DISCONNECT so the broker does not wait for the keep-alive.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "disconnect not queued");
        return;
    }
    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        debug!("disconnect not flushed in time");
    }
}

/// Queue a SUBSCRIBE for every routed topic after a (re)connection.
///
/// Uses `try_subscribe`: this runs inside the task that drains the request
/// queue, so awaiting a full queue would never complete.
fn resubscribe(client: &AsyncClient, routes: &DashMap<String, Route>) {
    for entry in routes {
        let qos = match entry.value() {
            Route::Device => QoS::AtMostOnce,
            Route::Observer(_) => QoS::AtLeastOnce,
        };
        if let Err(e) = client.try_subscribe(entry.key().as_str(), qos) {
            warn!(topic = %entry.key(), error = %e, "re-subscribe failed");
        }
    }
}

/// Deliver one incoming publish according to its topic's route.
pub(crate) async fn route_publish(
    routes: &DashMap<String, Route>,
    device_tx: &mpsc::Sender<DeviceMessage>,
    publish: Publish,
) {
    // Clone the route out so no map guard is held across an await.
    let Some(route) = routes.get(&publish.topic).map(|r| r.value().clone()) else {
        trace!(topic = %publish.topic, "publish on unrouted topic, ignoring");
        return;
    };

    match route {
        Route::Device => {
            let message = DeviceMessage::new(publish.topic, publish.payload);
            if device_tx.send(message).await.is_err() {
                debug!("device message receiver dropped");
            }
        }
        Route::Observer(observer) => match decode_state(&publish.payload) {
            Ok(value) => {
                if observer.send(value).await.is_err() {
                    debug!(topic = %publish.topic, "state observer dropped");
                }
            }
            Err(e) => {
                warn!(topic = %publish.topic, error = %e, "malformed state payload, dropped");
            }
        },
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from many bridges
/// sharing one broker.
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
