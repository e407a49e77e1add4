// ── Device settings push ──

use tracing::debug;

use crate::cell::Cell;
use crate::config::DeviceConfig;
use crate::outbox::Outbox;
use crate::topic::{Prefix, TopicPattern};

/// Publish every device setting whenever the device comes online.
///
/// One `cmnd/{key}` message per setting, in the config's order. Failed
/// publishes are not retried: the next connection resends the full set.
pub fn push_on_connect(
    online: &Cell<bool>,
    settings: DeviceConfig,
    topics: TopicPattern,
    outbox: Outbox,
) {
    online.on_change(move |online| {
        if !*online {
            return;
        }
        debug!(count = settings.len(), "pushing device settings");
        for (key, value) in settings.iter() {
            outbox.publish(topics.topic(Prefix::Cmnd, key), value.to_string());
        }
    });
}
