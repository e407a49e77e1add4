// ── Reactive cells ──
//
// A `Cell` is one node of the bridge's dataflow graph. Writers call `set`;
// listeners run synchronously, in registration order, before `set` returns.
// The current value is stored in a `watch` channel so async consumers can
// await changes without hooking into the listener chain.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a cell, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

/// An upstream edge recorded with [`Cell::add_dependency`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: CellId,
    pub name: Arc<str>,
}

/// Bound shared by every value a cell can hold.
pub trait CellValue: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> CellValue for T {}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A mutable value with change notification.
///
/// Cheaply cloneable; clones share the same value and listeners. Cells never
/// compute their own value from dependencies -- combination logic lives in
/// the listeners the owning component installs. Dependencies are recorded
/// so the graph can be inspected.
#[derive(Clone)]
pub struct Cell<T: CellValue> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    id: CellId,
    name: Arc<str>,
    /// Suppress notifications when the new value equals the current one.
    no_repeat: bool,
    value: watch::Sender<T>,
    listeners: Mutex<Vec<Listener<T>>>,
    dependencies: Mutex<Vec<Dependency>>,
}

impl<T: CellValue> Cell<T> {
    /// Create a cell that notifies on every `set`, even with an equal value.
    pub fn new(name: impl Into<Arc<str>>, initial: T) -> Self {
        Self::build(name.into(), initial, false)
    }

    /// Create a deduplicating cell: consecutive equal values notify once.
    pub fn no_repeat(name: impl Into<Arc<str>>, initial: T) -> Self {
        Self::build(name.into(), initial, true)
    }

    fn build(name: Arc<str>, initial: T, no_repeat: bool) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            inner: Arc::new(CellInner {
                id: CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed)),
                name,
                no_repeat,
                value,
                listeners: Mutex::new(Vec::new()),
                dependencies: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_no_repeat(&self) -> bool {
        self.inner.no_repeat
    }

    /// Current value (cloned).
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Store `value` and notify listeners if it counts as a change.
    ///
    /// Listeners see the value passed here even if one of them writes the
    /// cell again before the chain completes.
    pub fn set(&self, value: T) {
        let no_repeat = self.inner.no_repeat;
        // `send_if_modified` updates the stored value even with zero receivers.
        let changed = self.inner.value.send_if_modified(|current| {
            if no_repeat && *current == value {
                return false;
            }
            *current = value.clone();
            true
        });
        if !changed {
            return;
        }

        // Snapshot so listeners may register further listeners or re-enter.
        let listeners = lock(&self.inner.listeners).clone();
        for listener in &listeners {
            listener(&value);
        }
    }

    /// Register a listener, invoked after every change.
    pub fn on_change(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        lock(&self.inner.listeners).push(Arc::new(listener));
    }

    /// Declare that this cell's value may change when `upstream` changes.
    pub fn add_dependency<U: CellValue>(&self, upstream: &Cell<U>) {
        lock(&self.inner.dependencies).push(Dependency {
            id: upstream.id(),
            name: Arc::clone(&upstream.inner.name),
        });
    }

    /// Declared upstream cells, in declaration order.
    pub fn dependencies(&self) -> Vec<Dependency> {
        lock(&self.inner.dependencies).clone()
    }

    /// Subscribe to value changes via a `watch::Receiver`.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.value.subscribe()
    }
}

impl<T: CellValue + fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.borrow())
            .field("no_repeat", &self.inner.no_repeat)
            .finish_non_exhaustive()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn recorder<T: CellValue>(cell: &Cell<T>) -> Arc<Mutex<Vec<T>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cell.on_change(move |v| sink.lock().unwrap().push(v.clone()));
        seen
    }

    #[test]
    fn set_updates_value_and_notifies() {
        let cell = Cell::new("n", 0);
        let seen = recorder(&cell);

        cell.set(1);
        cell.set(2);

        assert_eq!(cell.get(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn plain_cell_notifies_on_equal_values() {
        let cell = Cell::new("n", 0);
        let seen = recorder(&cell);

        cell.set(5);
        cell.set(5);

        assert_eq!(*seen.lock().unwrap(), vec![5, 5]);
    }

    #[test]
    fn no_repeat_cell_suppresses_equal_values() {
        let cell = Cell::no_repeat("flag", false);
        let seen = recorder(&cell);

        cell.set(false);
        cell.set(true);
        cell.set(true);
        cell.set(false);

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let cell = Cell::new("n", 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            cell.on_change(move |_| order.lock().unwrap().push(tag));
        }

        cell.set(1);

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn listener_chains_complete_before_set_returns() {
        let source = Cell::new("source", 0);
        let doubled = Cell::new("doubled", 0);
        doubled.add_dependency(&source);
        {
            let doubled = doubled.clone();
            source.on_change(move |v| doubled.set(v * 2));
        }

        source.set(21);

        assert_eq!(doubled.get(), 42);
    }

    #[test]
    fn listener_may_write_its_own_cell() {
        let cell = Cell::new("clamped", 0);
        {
            let again = cell.clone();
            cell.on_change(move |v| {
                if *v > 10 {
                    again.set(10);
                }
            });
        }

        cell.set(50);

        assert_eq!(cell.get(), 10);
    }

    #[test]
    fn dependencies_are_recorded_in_order() {
        let a = Cell::new("a", 0);
        let b = Cell::new("b", false);
        let out = Cell::new("out", ());
        out.add_dependency(&a);
        out.add_dependency(&b);

        let names: Vec<_> = out.dependencies().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![Arc::from("a"), Arc::from("b")]);
        assert_eq!(out.dependencies()[0].id, a.id());
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let cell = Cell::no_repeat("n", 0);
        let mut rx = cell.subscribe();

        cell.set(7);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 7);
    }
}
