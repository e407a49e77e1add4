// ── Repeat-on-interval ──
//
// The device can miss a command during a short disconnect. Re-asserting the
// last value periodically heals that without tracking acknowledgements.
//
// The schedule is passive: the engine asks for `next_deadline` and calls
// `fire_due` from its dispatch loop, so repeats are serialized with device
// messages like any other event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::cell::{Cell, CellValue, lock};

#[derive(Debug)]
struct Scheduled<T> {
    at: Instant,
    value: T,
}

/// Derived cell re-emitting its source's latest value every `period`.
///
/// A source change emits immediately and reschedules to `now + period`.
/// Each repeat reschedules from its nominal fire time, so the cadence does
/// not drift with dispatch latency. A deadline past the clock's range is
/// never scheduled.
#[derive(Debug, Clone)]
pub struct RepeatOnInterval<T: CellValue> {
    output: Cell<T>,
    period: Duration,
    schedule: Arc<Mutex<Option<Scheduled<T>>>>,
}

impl<T: CellValue> RepeatOnInterval<T> {
    /// `period` must be non-zero.
    pub fn new(source: &Cell<T>, period: Duration) -> Self {
        let output = Cell::new(format!("{}_repeat", source.name()), source.get());
        output.add_dependency(source);
        let schedule = Arc::new(Mutex::new(None));

        {
            let output = output.clone();
            let schedule = Arc::clone(&schedule);
            source.on_change(move |value: &T| {
                *lock(&schedule) = Instant::now().checked_add(period).map(|at| Scheduled {
                    at,
                    value: value.clone(),
                });
                output.set(value.clone());
            });
        }

        Self {
            output,
            period,
            schedule,
        }
    }

    /// The repeating cell. Not deduplicating: every repeat notifies.
    pub fn output(&self) -> &Cell<T> {
        &self.output
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// When the next repeat is due; `None` until the source first changes.
    pub fn next_deadline(&self) -> Option<Instant> {
        lock(&self.schedule).as_ref().map(|s| s.at)
    }

    /// Emit the repeat if it is due at `now`. Returns whether it fired.
    pub fn fire_due(&self, now: Instant) -> bool {
        let value = {
            let mut schedule = lock(&self.schedule);
            let Some(due) = schedule.take_if(|s| s.at <= now) else {
                return false;
            };
            let value = due.value.clone();
            *schedule = due.at.checked_add(self.period).map(|at| Scheduled {
                at,
                value: due.value,
            });
            value
        };
        // Lock released: listeners may change the source and reschedule.
        self.output.set(value);
        true
    }
}
