//! Single-flight execution.
//!
//! A `FlightGroup` guarantees that for any key, at most one caller runs the
//! work while every concurrent caller for the same key blocks and receives a
//! clone of the leader's result. Results are not memoized here; callers that
//! want memoization record the settled value themselves.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

/// A cell holding either in-progress work or its settled result.
struct FlightCell<T> {
    state: Mutex<Option<T>>,
    settled: Condvar,
}

impl<T: Clone> FlightCell<T> {
    fn new() -> Arc<Self> {
        Arc::new(FlightCell {
            state: Mutex::new(None),
            settled: Condvar::new(),
        })
    }

    fn settle(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        *state = Some(value);
        self.settled.notify_all();
    }

    fn wait(&self) -> T {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(value) = state.as_ref() {
                return value.clone();
            }
            state = self.settled.wait(state).unwrap();
        }
    }
}

/// Deduplicates concurrent work by key.
pub struct FlightGroup<K, T> {
    cells: Mutex<HashMap<K, Arc<FlightCell<T>>>>,
}

impl<K, T> Default for FlightGroup<K, T> {
    fn default() -> Self {
        FlightGroup {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> FlightGroup<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        FlightGroup::default()
    }

    /// Run `work` for `key`, or attach to an in-flight run of the same key
    /// and return its result.
    ///
    /// The leader's cell is removed once settled, so a later call with the
    /// same key runs fresh.
    pub fn run(&self, key: K, work: impl FnOnce() -> T) -> T {
        let cell = {
            let mut cells = self.cells.lock().unwrap();
            if let Some(existing) = cells.get(&key) {
                let cell = Arc::clone(existing);
                drop(cells);
                return cell.wait();
            }
            let cell = FlightCell::new();
            cells.insert(key.clone(), Arc::clone(&cell));
            cell
        };

        let value = work();
        cell.settle(value.clone());
        self.cells.lock().unwrap().remove(&key);
        value
    }
}
