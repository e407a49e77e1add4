//! MQTT collaborators for `tasmota-sync-core`.
//!
//! A single [`MqttSession`] owns the broker connection. [`MqttBus`] talks
//! to the Tasmota device over it and [`MqttRegistry`] exposes the bridge's
//! states and events under a base topic on the same broker.

pub mod bus;
pub mod error;
pub mod registry;
pub mod session;

pub use bus::MqttBus;
pub use error::MqttError;
pub use registry::{DEFAULT_RETAINED_WAIT, MqttRegistry, decode_state, encode_state};
pub use session::{BrokerConfig, Credentials, MqttSession, ReconnectConfig};
