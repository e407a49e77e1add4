// ── Engine ──
//
// Owns one `Bridge` and its collaborators. `start` performs the setup plan
// and applies the current value of every observed state; `run` is the
// single sequential dispatch loop: device messages, registry observations
// and repeat deadlines are serialized through one `select!`, so no two
// events ever mutate the graph concurrently. Queued actions go to one
// issuer task that awaits each in turn, so they reach the collaborators in
// queue order.

use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_stream::{StreamExt, StreamMap};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{CoreError, TransportError};
use crate::outbox::{Action, Outbox};
use crate::transport::{DeviceBus, DeviceMessage, Registry};
use crate::value::StateValue;

/// Runs the synchronization graph for one device.
pub struct Engine<B: DeviceBus, R: Registry> {
    bridge: Bridge,
    bus: B,
    registry: R,
    actions: mpsc::UnboundedReceiver<Action>,
    observations: StreamMap<String, ReceiverStream<StateValue<Json>>>,
}

impl<B: DeviceBus, R: Registry> Engine<B, R> {
    /// Build the graph and set it up with the collaborators.
    ///
    /// Registers states and events, starts observing inputs, then
    /// subscribes to device topics. Any failure is fatal.
    ///
    /// The first item of each observation is the state's current value; it
    /// is applied before any device message can be dispatched.
    pub async fn start(config: &BridgeConfig, bus: B, registry: R) -> Result<Self, CoreError> {
        let (outbox, actions) = Outbox::channel();
        let bridge = Bridge::new(config, &outbox);

        for cell in bridge.describe() {
            let inputs: Vec<&str> = cell.dependencies.iter().map(|d| &*d.name).collect();
            debug!(cell = %cell.name, no_repeat = cell.no_repeat, ?inputs, "graph node");
        }

        let plan = bridge.plan().clone();
        for (name, initial) in plan.states {
            registry
                .register_state(&name, initial)
                .await
                .map_err(|source| setup(format!("registering state '{name}'"), source))?;
        }
        for name in plan.events {
            registry
                .register_event(&name)
                .await
                .map_err(|source| setup(format!("registering event '{name}'"), source))?;
        }
        let mut observations = StreamMap::new();
        for name in plan.observations {
            let mut observer = registry
                .observe_state(&name)
                .await
                .map_err(|source| setup(format!("observing state '{name}'"), source))?;
            let current = observer.recv().await.ok_or_else(|| {
                setup(
                    format!("reading current value of '{name}'"),
                    TransportError::Closed,
                )
            })?;
            debug!(state = %name, ?current, "current value");
            bridge.observe(&name, current);
            observations.insert(name, ReceiverStream::new(observer));
        }
        for topic in plan.subscriptions {
            bus.subscribe(&topic)
                .await
                .map_err(|source| setup(format!("subscribing to '{topic}'"), source))?;
        }

        info!(topics = %config.topics, "bridge set up");
        Ok(Self {
            bridge,
            bus,
            registry,
            actions,
            observations,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Dispatch events until `cancel` fires or the device stream ends.
    ///
    /// Repeat deadlines and registry observations take precedence over
    /// device messages, so a busy device cannot starve them. Actions not
    /// yet issued, and the one in flight, are aborted on return.
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<DeviceMessage>,
        cancel: CancellationToken,
    ) {
        let Self {
            bridge,
            bus,
            registry,
            actions,
            mut observations,
        } = self;
        let issuer = tokio::spawn(issue_in_order(bus, registry, actions));

        loop {
            let deadline = bridge.next_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("engine cancelled");
                    break;
                }
                () = sleep_until(deadline) => {
                    bridge.fire_due(Instant::now());
                }
                Some((name, value)) = observations.next() => {
                    bridge.observe(&name, value);
                }
                message = messages.recv() => {
                    let Some(message) = message else {
                        info!("device message stream closed");
                        break;
                    };
                    bridge.dispatch(&message);
                }
            }
        }

        issuer.abort();
        if let Some(e) = issuer.await.err().filter(JoinError::is_panic) {
            warn!(error = %e, "action issuer panicked");
        }
    }
}

impl<B: DeviceBus, R: Registry> std::fmt::Debug for Engine<B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("bridge", &self.bridge)
            .field("observations", &self.observations.len())
            .finish_non_exhaustive()
    }
}

/// Issue actions one at a time, in queue order.
async fn issue_in_order<B: DeviceBus, R: Registry>(
    bus: B,
    registry: R,
    mut actions: mpsc::UnboundedReceiver<Action>,
) {
    while let Some(action) = actions.recv().await {
        if let Err(e) = issue(&bus, &registry, action).await {
            warn!(error = %e, "action failed");
        }
    }
}

async fn issue<B: DeviceBus, R: Registry>(
    bus: &B,
    registry: &R,
    action: Action,
) -> Result<(), TransportError> {
    match action {
        Action::Publish { topic, payload } => bus.publish(&topic, payload).await,
        Action::SetState { name, value } => registry.set_state(&name, value).await,
        Action::EmitEvent { name, value } => registry.emit_event(&name, value).await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn setup(step: String, source: TransportError) -> CoreError {
    CoreError::Setup { step, source }
}
