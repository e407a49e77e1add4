// ── Synchronization components ──
//
// Each component owns a few cells and the listeners combining them. They
// are wired together by `Bridge`.

pub mod config_sync;
pub mod connectivity;
pub mod event;
pub mod power;
pub mod repeat;
pub mod telemetry;

pub use config_sync::push_on_connect;
pub use connectivity::{Connectivity, parse_liveness};
pub use event::EventTranslator;
pub use power::{PowerSync, parse_power, power_payload};
pub use repeat::RepeatOnInterval;
pub use telemetry::TelemetryRelay;
