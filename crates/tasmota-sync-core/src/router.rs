// ── Topic routing ──
//
// Exact-topic dispatch of device messages to component handlers. Handler
// errors are protocol violations: logged here, at the component boundary,
// and never propagated into the dispatch loop.

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::ProtocolViolation;
use crate::transport::DeviceMessage;

type Handler = Box<dyn Fn(&[u8]) -> Result<(), ProtocolViolation> + Send + Sync>;

/// Per-topic handler table, in subscription order.
#[derive(Default)]
pub struct Router {
    routes: IndexMap<String, Vec<Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `topic`. Handlers for one topic run in order.
    pub fn on(
        &mut self,
        topic: String,
        handler: impl Fn(&[u8]) -> Result<(), ProtocolViolation> + Send + Sync + 'static,
    ) {
        self.routes.entry(topic).or_default().push(Box::new(handler));
    }

    /// Topics with at least one handler, in first-registration order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    /// Run every handler for the message's topic. Returns how many ran.
    pub fn dispatch(&self, message: &DeviceMessage) -> usize {
        let Some(handlers) = self.routes.get(&message.topic) else {
            debug!(topic = %message.topic, "no handler for topic, ignoring");
            return 0;
        };
        for handler in handlers {
            if let Err(e) = handler(&message.payload) {
                warn!(topic = %message.topic, error = %e, "protocol violation, message dropped");
            }
        }
        handlers.len()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("topics", &self.routes.keys().collect::<Vec<_>>())
            .finish()
    }
}
