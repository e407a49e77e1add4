//! Reactive synchronization engine between a Tasmota device and a state
//! registry.
//!
//! The engine keeps a small dataflow graph of live values in step with one
//! device on a publish/subscribe bus, and publishes the result as named
//! states and events for other consumers:
//!
//! - **[`Cell`]**: A named value with synchronous, ordered change
//!   listeners and optional deduplication. Every node of the graph is a cell.
//!
//! - **[`Bridge`]**: The wired graph for one device: connectivity
//!   tracking, the settings push on connect, bidirectional power sync with
//!   optional re-sending on an interval, telemetry relays and button events.
//!   Purely synchronous; side effects are queued as [`Action`]s.
//!
//! - **[`Engine`]**: Sets the bridge up with its collaborators and runs
//!   the single sequential dispatch loop that feeds it.
//!
//! - **[`DeviceBus`] / [`Registry`]**: The collaborator interfaces. The
//!   `tasmota-sync-mqtt` crate implements both over MQTT.

pub mod bridge;
pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod router;
pub mod sync;
pub mod topic;
pub mod transport;
pub mod value;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, CellInfo, SetupPlan};
pub use cell::Cell;
pub use config::{BridgeConfig, DEFAULT_SETTINGS, DeviceConfig, TelemetryBinding};
pub use engine::Engine;
pub use error::{CoreError, ProtocolViolation, TransportError};
pub use outbox::{Action, Outbox};
pub use topic::{Prefix, TopicPattern};
pub use transport::{DeviceBus, DeviceMessage, Registry, StateObserver};
pub use value::StateValue;
