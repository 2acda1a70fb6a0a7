//! Per-key single-flight execution
//!
//! The first caller for a key runs the work; callers arriving while it runs
//! block until it finishes and receive a clone of its result. If the leader
//! unwinds without producing a value, one of the waiters takes over.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// How a caller obtained its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<V> {
    /// This caller ran the work
    Led(V),
    /// Another caller ran the work and this one waited for it
    Joined(V),
}

enum State<V> {
    Running,
    Done(V),
    Abandoned,
}

struct Slot<V> {
    state: Mutex<State<V>>,
    ready: Condvar,
}

enum Claim<'a, K: Eq + Hash + Clone, V: Clone> {
    Leader(LeaderGuard<'a, K, V>),
    Joined(V),
}

/// Registry of in-progress work keyed by `K`
pub struct InFlight<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Default for InFlight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> InFlight<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless another caller already is, in which case
    /// wait for that caller's result
    pub fn run<F>(&self, key: K, work: F) -> Flight<V>
    where
        F: FnOnce() -> V,
    {
        match self.claim(key) {
            Claim::Leader(guard) => {
                let value = work();
                guard.complete(value.clone());
                Flight::Led(value)
            }
            Claim::Joined(value) => Flight::Joined(value),
        }
    }

    /// Number of keys currently being worked on
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, key: K) -> Claim<'_, K, V> {
        loop {
            let slot = {
                let mut slots = self.slots.lock();
                match slots.get(&key) {
                    Some(slot) => Arc::clone(slot),
                    None => {
                        let slot = Arc::new(Slot {
                            state: Mutex::new(State::Running),
                            ready: Condvar::new(),
                        });
                        slots.insert(key.clone(), Arc::clone(&slot));
                        return Claim::Leader(LeaderGuard {
                            registry: self,
                            key,
                            slot,
                            settled: false,
                        });
                    }
                }
            };

            let mut state = slot.state.lock();
            while matches!(*state, State::Running) {
                slot.ready.wait(&mut state);
            }
            if let State::Done(value) = &*state {
                return Claim::Joined(value.clone());
            }
            // Leader went away without a result, try to take over
        }
    }
}

struct LeaderGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    registry: &'a InFlight<K, V>,
    key: K,
    slot: Arc<Slot<V>>,
    settled: bool,
}

impl<K: Eq + Hash + Clone, V: Clone> LeaderGuard<'_, K, V> {
    fn complete(mut self, value: V) {
        self.settle(State::Done(value));
    }

    fn settle(&mut self, outcome: State<V>) {
        self.settled = true;
        *self.slot.state.lock() = outcome;
        self.slot.ready.notify_all();

        let mut slots = self.registry.slots.lock();
        if slots.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.slot)) {
            slots.remove(&self.key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(State::Abandoned);
        }
    }
}
