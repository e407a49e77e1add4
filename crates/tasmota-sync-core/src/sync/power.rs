// ── Bidirectional power synchronization ──
//
// Two sources of truth meet here:
// - desired power, observed from the registry (`power_in`), optionally
//   defaulted and optionally re-sent on an interval;
// - reported power, from the device's `stat/POWER` messages, published
//   back to the registry as `power_out`.
//
// A known desired value always wins and is pushed to the device. An unset
// desired value lets the device decide: on connection its state is queried
// instead, and the answer flows into `power_out`.

use std::time::Duration;

use bytes::Bytes;
use serde_json::Value as Json;
use tracing::{debug, trace};

use crate::cell::Cell;
use crate::config::{POWER_IN_STATE, POWER_OUT_STATE};
use crate::error::ProtocolViolation;
use crate::outbox::Outbox;
use crate::sync::repeat::RepeatOnInterval;
use crate::topic::{Prefix, TopicPattern, command};
use crate::value::StateValue;

/// Map a `stat/POWER` payload to on/off.
pub fn parse_power(payload: &[u8]) -> Result<bool, ProtocolViolation> {
    match payload {
        b"ON" => Ok(true),
        b"OFF" => Ok(false),
        other => Err(ProtocolViolation::unrecognized(other)),
    }
}

/// Payload of a power command.
pub fn power_payload(on: bool) -> Bytes {
    if on {
        Bytes::from_static(b"1")
    } else {
        Bytes::from_static(b"0")
    }
}

/// Bidirectional power state between the registry and the device.
#[derive(Debug, Clone)]
pub struct PowerSync {
    online: Cell<bool>,
    default: Option<bool>,
    /// Desired power; `None` means unset.
    desired: Cell<Option<bool>>,
    /// What drives commands: `desired`, or its repeating wrapper.
    commanded: Cell<Option<bool>>,
    repeat: Option<RepeatOnInterval<Option<bool>>>,
    /// Last status from the device, invalidated while offline.
    reported: Cell<StateValue<bool>>,
    /// The registered `power_out` state.
    published: Cell<StateValue<bool>>,
}

impl PowerSync {
    pub fn new(
        online: &Cell<bool>,
        topics: &TopicPattern,
        default: Option<bool>,
        repeat: Option<Duration>,
        outbox: &Outbox,
    ) -> Self {
        let desired = Cell::no_repeat(POWER_IN_STATE, None);
        let repeat = repeat.map(|period| RepeatOnInterval::new(&desired, period));
        let commanded = repeat
            .as_ref()
            .map_or_else(|| desired.clone(), |r| r.output().clone());
        let power_topic = topics.topic(Prefix::Cmnd, command::POWER);

        // ── Outbound: send-on-change of (online, commanded) ──
        {
            let online = online.clone();
            let outbox = outbox.clone();
            let topic = power_topic.clone();
            commanded.on_change(move |desired| {
                send_power(online.get(), *desired, &topic, &outbox);
            });
        }
        {
            let commanded = commanded.clone();
            let outbox = outbox.clone();
            let topic = power_topic.clone();
            online.on_change(move |online| {
                send_power(*online, commanded.get(), &topic, &outbox);
            });
        }

        // ── Inbound: reported -> published, invalidated on disconnect ──
        let reported = Cell::new("power_reported", StateValue::Unknown);
        reported.add_dependency(online);
        let published = Cell::no_repeat(POWER_OUT_STATE, StateValue::Unknown);
        published.add_dependency(&reported);
        published.add_dependency(online);
        {
            let published = published.clone();
            reported.on_change(move |value| published.set(value.clone()));
        }
        {
            let reported = reported.clone();
            online.on_change(move |online| {
                if !*online {
                    reported.set(StateValue::Unknown);
                }
            });
        }

        // ── Unset desired power: ask the device instead ──
        {
            let commanded = commanded.clone();
            let outbox = outbox.clone();
            online.on_change(move |online| {
                // A known desired power was already sent above; its status
                // reply updates `power_out` anyway.
                if *online && commanded.get().is_none() {
                    debug!("desired power unset, querying device");
                    outbox.publish(power_topic.clone(), Bytes::new());
                }
            });
        }

        Self {
            online: online.clone(),
            default,
            desired,
            commanded,
            repeat,
            reported,
            published,
        }
    }

    /// Apply a `power_in` observation from the registry.
    ///
    /// `Unknown` becomes the configured default, or is ignored (the previous
    /// desired value is held) when there is none. JSON `null` clears the
    /// desired value.
    pub fn observe_desired(&self, observed: StateValue<Json>) -> Result<(), ProtocolViolation> {
        match observed {
            StateValue::Known(Json::Bool(on)) => self.desired.set(Some(on)),
            StateValue::Known(Json::Null) => self.desired.set(None),
            StateValue::Known(value) => {
                return Err(ProtocolViolation::UnexpectedState {
                    state: POWER_IN_STATE.to_string(),
                    value,
                });
            }
            StateValue::Unknown => match self.default {
                Some(default) => self.desired.set(Some(default)),
                None => trace!("power_in unknown and no default, holding desired power"),
            },
        }
        Ok(())
    }

    /// Apply a `stat/POWER` message.
    pub fn handle_status(&self, payload: &[u8]) -> Result<(), ProtocolViolation> {
        let on = parse_power(payload)?;
        if !self.online.get() {
            // Stays unknown until a status arrives after reconnection.
            debug!(on, "ignoring power status while offline");
            return Ok(());
        }
        self.reported.set(StateValue::Known(on));
        Ok(())
    }

    pub fn desired(&self) -> &Cell<Option<bool>> {
        &self.desired
    }

    pub fn commanded(&self) -> &Cell<Option<bool>> {
        &self.commanded
    }

    pub fn repeat(&self) -> Option<&RepeatOnInterval<Option<bool>>> {
        self.repeat.as_ref()
    }

    pub fn reported(&self) -> &Cell<StateValue<bool>> {
        &self.reported
    }

    pub fn published(&self) -> &Cell<StateValue<bool>> {
        &self.published
    }
}

fn send_power(online: bool, desired: Option<bool>, topic: &str, outbox: &Outbox) {
    if let (true, Some(on)) = (online, desired) {
        debug!(on, "sending power command");
        outbox.publish(topic.to_string(), power_payload(on));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::Instant;

    use super::*;
    use crate::outbox::Action;

    struct Harness {
        online: Cell<bool>,
        power: PowerSync,
        rx: UnboundedReceiver<Action>,
    }

    impl Harness {
        fn new(default: Option<bool>, repeat: Option<Duration>) -> Self {
            let (outbox, rx) = Outbox::channel();
            let online = Cell::no_repeat("connected", false);
            let topics = TopicPattern::new("{prefix}/plug/{command}").unwrap();
            let power = PowerSync::new(&online, &topics, default, repeat, &outbox);
            Self { online, power, rx }
        }

        fn drain(&mut self) -> Vec<Action> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn power_cmd(payload: &'static [u8]) -> Action {
        Action::Publish {
            topic: "cmnd/plug/Power".into(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn parses_status_tokens() {
        assert!(parse_power(b"ON").unwrap());
        assert!(!parse_power(b"OFF").unwrap());
        assert!(parse_power(b"on").is_err());
        assert!(parse_power(b"").is_err());
    }

    #[test]
    fn desired_power_sent_once_while_online() {
        let mut h = Harness::new(None, None);
        h.online.set(true);
        h.drain();

        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();
        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();

        assert_eq!(h.drain(), vec![power_cmd(b"1")]);
    }

    #[test]
    fn desired_power_waits_for_connection() {
        let mut h = Harness::new(None, None);

        h.power.observe_desired(StateValue::Known(Json::Bool(false))).unwrap();
        assert!(h.drain().is_empty());

        h.online.set(true);
        assert_eq!(h.drain(), vec![power_cmd(b"0")]);
    }

    #[test]
    fn unset_desired_power_queries_on_connect() {
        let mut h = Harness::new(None, None);

        h.online.set(true);

        assert_eq!(h.drain(), vec![power_cmd(b"")]);
    }

    #[test]
    fn unknown_observation_holds_previous_value_without_default() {
        let h = Harness::new(None, None);
        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();

        h.power.observe_desired(StateValue::Unknown).unwrap();

        assert_eq!(h.power.desired().get(), Some(true));
    }

    #[test]
    fn unknown_observation_uses_default() {
        let h = Harness::new(Some(false), None);
        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();

        h.power.observe_desired(StateValue::Unknown).unwrap();

        assert_eq!(h.power.desired().get(), Some(false));
    }

    #[test]
    fn null_observation_clears_desired_power() {
        let h = Harness::new(None, None);
        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();

        h.power.observe_desired(StateValue::Known(Json::Null)).unwrap();

        assert_eq!(h.power.desired().get(), None);
    }

    #[test]
    fn non_boolean_observation_is_rejected() {
        let h = Harness::new(None, None);

        let err = h
            .power
            .observe_desired(StateValue::Known(Json::from("on")))
            .unwrap_err();

        assert!(matches!(err, ProtocolViolation::UnexpectedState { .. }));
        assert_eq!(h.power.desired().get(), None);
    }

    #[test]
    fn published_follows_reported_and_invalidates_on_disconnect() {
        let h = Harness::new(None, None);
        h.online.set(true);

        h.power.handle_status(b"ON").unwrap();
        assert_eq!(h.power.published().get(), StateValue::Known(true));

        h.online.set(false);
        assert_eq!(h.power.published().get(), StateValue::Unknown);

        // Stale status while offline does not resurrect the value.
        h.power.handle_status(b"OFF").unwrap();
        assert_eq!(h.power.published().get(), StateValue::Unknown);

        h.online.set(true);
        assert_eq!(h.power.published().get(), StateValue::Unknown);
        h.power.handle_status(b"OFF").unwrap();
        assert_eq!(h.power.published().get(), StateValue::Known(false));
    }

    #[test]
    fn unrecognized_status_leaves_state_unchanged() {
        let h = Harness::new(None, None);
        h.online.set(true);
        h.power.handle_status(b"ON").unwrap();

        assert!(h.power.handle_status(b"TOGGLE").is_err());

        assert_eq!(h.power.reported().get(), StateValue::Known(true));
        assert_eq!(h.power.published().get(), StateValue::Known(true));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_resends_desired_power() {
        let mut h = Harness::new(None, Some(Duration::from_secs(5)));
        let start = Instant::now();
        h.online.set(true);
        h.power.observe_desired(StateValue::Known(Json::Bool(true))).unwrap();
        h.drain();

        let repeat = h.power.repeat().unwrap();
        assert!(repeat.fire_due(start + Duration::from_secs(5)));
        assert!(repeat.fire_due(start + Duration::from_secs(10)));

        assert_eq!(h.drain(), vec![power_cmd(b"1"), power_cmd(b"1")]);
    }

    #[test]
    fn dependency_graph_is_declared() {
        let h = Harness::new(None, None);
        let names: Vec<_> = h
            .power
            .published()
            .dependencies()
            .into_iter()
            .map(|d| d.name.to_string())
            .collect();
        assert_eq!(names, vec!["power_reported", "connected"]);
    }
}
