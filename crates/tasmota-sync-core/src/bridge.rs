// ── Bridge: the wired dataflow graph ──
//
// Builds every synchronization component for one device, connects them
// to the topic router and the outbox, and records what the engine has to
// set up with its collaborators before dispatch starts.
//
// Listener order on the connectivity cell is significant and follows
// construction order: settings push, power command, power invalidation,
// power query, telemetry invalidation.

use std::sync::Arc;

use serde_json::Value as Json;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cell::{Cell, CellValue, Dependency};
use crate::config::{BridgeConfig, POWER_IN_STATE};
use crate::outbox::Outbox;
use crate::router::Router;
use crate::sync::{Connectivity, EventTranslator, PowerSync, TelemetryRelay, push_on_connect};
use crate::topic::{Prefix, command};
use crate::transport::DeviceMessage;
use crate::value::StateValue;

/// Everything the engine registers with its collaborators, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupPlan {
    /// Registry states produced by the bridge, with their initial values.
    pub states: Vec<(String, StateValue<Json>)>,
    /// Registry events fired by the bridge.
    pub events: Vec<String>,
    /// Registry states the bridge observes.
    pub observations: Vec<String>,
    /// Device topics to subscribe to.
    pub subscriptions: Vec<String>,
}

/// Static description of one cell, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellInfo {
    pub name: Arc<str>,
    pub no_repeat: bool,
    pub dependencies: Vec<Dependency>,
}

impl CellInfo {
    fn of<T: CellValue>(cell: &Cell<T>) -> Self {
        Self {
            name: Arc::from(cell.name()),
            no_repeat: cell.is_no_repeat(),
            dependencies: cell.dependencies(),
        }
    }
}

/// The synchronous synchronization graph for one device.
///
/// Every method runs to completion, including all listener chains it
/// triggers. Side effects are only ever queued on the outbox.
#[derive(Debug)]
pub struct Bridge {
    router: Router,
    connectivity: Connectivity,
    power: PowerSync,
    telemetry: Vec<TelemetryRelay>,
    plan: SetupPlan,
    graph: Vec<CellInfo>,
}

impl Bridge {
    pub fn new(config: &BridgeConfig, outbox: &Outbox) -> Self {
        let topics = &config.topics;
        let mut router = Router::new();
        let mut plan = SetupPlan::default();
        let mut graph = Vec::new();

        // ── Connectivity ──
        let connectivity = Connectivity::new();
        let online = connectivity.online().clone();
        register_state(&mut plan, outbox, &online, |online| {
            StateValue::Known(Json::Bool(*online))
        });
        {
            let connectivity = connectivity.clone();
            router.on(topics.topic(Prefix::Tele, command::LWT), move |payload| {
                connectivity.handle_liveness(payload)
            });
        }
        graph.push(CellInfo::of(&online));

        // ── Device settings ──
        push_on_connect(&online, config.device.clone(), topics.clone(), outbox.clone());

        // ── Power ──
        let repeat = config.repeat.filter(|period| {
            let usable = !period.is_zero();
            if !usable {
                warn!("zero repeat period, sending power on change only");
            }
            usable
        });
        let power = PowerSync::new(&online, topics, config.default_power, repeat, outbox);
        plan.observations.push(POWER_IN_STATE.to_string());
        register_state(&mut plan, outbox, power.published(), |value| {
            value.clone().into_json()
        });
        {
            let power = power.clone();
            router.on(topics.topic(Prefix::Stat, command::POWER_STATUS), move |payload| {
                power.handle_status(payload)
            });
        }
        graph.push(CellInfo::of(power.desired()));
        if let Some(repeat) = power.repeat() {
            graph.push(CellInfo::of(repeat.output()));
        }
        graph.push(CellInfo::of(power.reported()));
        graph.push(CellInfo::of(power.published()));

        // ── Telemetry ──
        let mut telemetry = Vec::with_capacity(config.telemetry.len());
        for binding in &config.telemetry {
            let relay = TelemetryRelay::new(&binding.state, &online);
            register_state(&mut plan, outbox, relay.value(), StateValue::clone);
            {
                let relay = relay.clone();
                router.on(topics.topic(Prefix::Tele, &binding.command), move |payload| {
                    relay.handle(payload)
                });
            }
            graph.push(CellInfo::of(relay.value()));
            telemetry.push(relay);
        }

        // ── Button events ──
        if config.button_event {
            let translator = EventTranslator::button(outbox.clone());
            plan.events.push(translator.event().to_string());
            router.on(topics.topic(Prefix::Stat, command::RESULT), move |payload| {
                translator.handle(payload)
            });
        }

        plan.subscriptions = router.topics().map(String::from).collect();

        Self {
            router,
            connectivity,
            power,
            telemetry,
            plan,
            graph,
        }
    }

    pub fn plan(&self) -> &SetupPlan {
        &self.plan
    }

    /// Cells of the graph with their declared inputs.
    pub fn describe(&self) -> &[CellInfo] {
        &self.graph
    }

    /// Handle one device message.
    pub fn dispatch(&self, message: &DeviceMessage) {
        self.router.dispatch(message);
    }

    /// Handle a value of an observed registry state.
    pub fn observe(&self, name: &str, value: StateValue<Json>) {
        if name != POWER_IN_STATE {
            debug!(state = name, "observation for unexpected state, ignoring");
            return;
        }
        if let Err(e) = self.power.observe_desired(value) {
            warn!(state = name, error = %e, "protocol violation, observation dropped");
        }
    }

    /// When the next timer-driven event is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.power.repeat().and_then(|r| r.next_deadline())
    }

    /// Run timer-driven events due at `now`.
    pub fn fire_due(&self, now: Instant) {
        if let Some(repeat) = self.power.repeat() {
            repeat.fire_due(now);
        }
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connectivity.online().subscribe()
    }

    pub fn power_out(&self) -> watch::Receiver<StateValue<bool>> {
        self.power.published().subscribe()
    }

    pub fn desired_power(&self) -> Option<bool> {
        self.power.desired().get()
    }

    /// Current value of a relayed telemetry state.
    pub fn telemetry(&self, state: &str) -> Option<StateValue<Json>> {
        self.telemetry
            .iter()
            .find(|relay| relay.value().name() == state)
            .map(|relay| relay.value().get())
    }
}

/// Record a registry state and forward every change of `cell` to it.
fn register_state<T: CellValue>(
    plan: &mut SetupPlan,
    outbox: &Outbox,
    cell: &Cell<T>,
    to_json: impl Fn(&T) -> StateValue<Json> + Send + Sync + 'static,
) {
    let name = cell.name().to_string();
    plan.states.push((name.clone(), to_json(&cell.get())));
    let outbox = outbox.clone();
    cell.on_change(move |value| outbox.set_state(&name, to_json(value)));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::config::DeviceConfig;
    use crate::outbox::Action;
    use crate::topic::TopicPattern;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::new(TopicPattern::new("{prefix}/plug/{command}").unwrap());
        config.device = DeviceConfig::empty();
        config.device.set("TelePeriod", 10).unwrap();
        config
    }

    fn drain(rx: &mut UnboundedReceiver<Action>) -> Vec<Action> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn publish(topic: &str, payload: &'static str) -> Action {
        Action::Publish {
            topic: topic.into(),
            payload: Bytes::from_static(payload.as_bytes()),
        }
    }

    fn set_state(name: &str, value: StateValue<Json>) -> Action {
        Action::SetState {
            name: name.into(),
            value,
        }
    }

    #[test]
    fn plan_lists_states_observations_and_topics() {
        let (outbox, _rx) = Outbox::channel();
        let mut config = config();
        config.button_event = true;

        let bridge = Bridge::new(&config, &outbox);

        assert_eq!(
            bridge.plan(),
            &SetupPlan {
                states: vec![
                    ("connected".into(), StateValue::Known(json!(false))),
                    ("power_out".into(), StateValue::Unknown),
                    ("state_raw".into(), StateValue::Unknown),
                    ("sensor_raw".into(), StateValue::Unknown),
                ],
                events: vec!["on_button".into()],
                observations: vec!["power_in".into()],
                subscriptions: vec![
                    "tele/plug/LWT".into(),
                    "stat/plug/POWER".into(),
                    "tele/plug/STATE".into(),
                    "tele/plug/SENSOR".into(),
                    "stat/plug/RESULT".into(),
                ],
            }
        );
    }

    #[test]
    fn button_topic_only_with_button_event() {
        let (outbox, _rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);

        assert!(bridge.plan().events.is_empty());
        assert!(!bridge.plan().subscriptions.iter().any(|t| t.ends_with("RESULT")));
    }

    #[test]
    fn coming_online_pushes_settings_then_queries_power() {
        let (outbox, mut rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);

        bridge.dispatch(&DeviceMessage::new("tele/plug/LWT", "Online"));

        assert_eq!(
            drain(&mut rx),
            vec![
                set_state("connected", StateValue::Known(json!(true))),
                publish("cmnd/plug/TelePeriod", "10"),
                publish("cmnd/plug/Power", ""),
            ]
        );
    }

    #[test]
    fn known_desired_power_is_sent_instead_of_query() {
        let (outbox, mut rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);
        bridge.observe("power_in", StateValue::Known(json!(true)));

        bridge.dispatch(&DeviceMessage::new("tele/plug/LWT", "Online"));

        let actions = drain(&mut rx);
        assert!(actions.contains(&publish("cmnd/plug/Power", "1")));
        assert!(!actions.contains(&publish("cmnd/plug/Power", "")));
    }

    #[test]
    fn going_offline_invalidates_published_states() {
        let (outbox, mut rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);
        bridge.dispatch(&DeviceMessage::new("tele/plug/LWT", "Online"));
        bridge.dispatch(&DeviceMessage::new("stat/plug/POWER", "ON"));
        bridge.dispatch(&DeviceMessage::new("tele/plug/STATE", r#"{"POWER":"ON"}"#));
        drain(&mut rx);

        bridge.dispatch(&DeviceMessage::new("tele/plug/LWT", "Offline"));

        assert_eq!(
            drain(&mut rx),
            vec![
                set_state("connected", StateValue::Known(json!(false))),
                set_state("power_out", StateValue::Unknown),
                set_state("state_raw", StateValue::Unknown),
                set_state("sensor_raw", StateValue::Unknown),
            ]
        );
        assert_eq!(*bridge.power_out().borrow(), StateValue::Unknown);
        assert_eq!(bridge.telemetry("state_raw"), Some(StateValue::Unknown));
    }

    #[test]
    fn unrecognized_liveness_changes_nothing() {
        let (outbox, mut rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);

        bridge.dispatch(&DeviceMessage::new("tele/plug/LWT", "Maybe"));

        assert!(!bridge.is_online());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn unexpected_observations_are_ignored() {
        let (outbox, mut rx) = Outbox::channel();
        let bridge = Bridge::new(&config(), &outbox);

        bridge.observe("power_in", StateValue::Known(json!(42)));
        bridge.observe("brightness", StateValue::Known(json!(true)));

        assert_eq!(bridge.desired_power(), None);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_repeat_period_is_ignored() {
        let (outbox, _rx) = Outbox::channel();
        let mut config = config();
        config.repeat = Some(Duration::ZERO);

        let bridge = Bridge::new(&config, &outbox);
        bridge.observe("power_in", StateValue::Known(json!(true)));

        assert!(bridge.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_deadline_follows_desired_power() {
        let (outbox, _rx) = Outbox::channel();
        let mut config = config();
        config.repeat = Some(Duration::from_secs(5));
        let bridge = Bridge::new(&config, &outbox);
        let start = Instant::now();

        assert!(bridge.next_deadline().is_none());
        bridge.observe("power_in", StateValue::Known(json!(true)));

        assert_eq!(bridge.next_deadline(), Some(start + Duration::from_secs(5)));
        assert!(bridge.describe().iter().any(|c| &*c.name == "power_in_repeat"));
    }
}
