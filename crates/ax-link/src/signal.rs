//! One-to-many synchronous callback lists
//!
//! A [`Signal`] is a small pub/sub primitive: subscribers connect callbacks,
//! and `emit` invokes every connected callback in connection order.
//! Emission snapshots the subscriber list first, so a callback is free to
//! connect, disconnect or emit again without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Signal::connect`], used to disconnect later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: SlotId,
    oneshot: bool,
    callback: Callback<T>,
}

/// A list of callbacks fired in connection order
pub struct Signal<T> {
    slots: Mutex<Vec<Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect a callback; it stays connected until disconnected
    pub fn connect(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SlotId {
        self.add(false, Arc::new(callback))
    }

    /// Connect a callback that is dropped after its first invocation
    pub fn connect_oneshot(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SlotId {
        self.add(true, Arc::new(callback))
    }

    fn add(&self, oneshot: bool, callback: Callback<T>) -> SlotId {
        let id = SlotId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().unwrap().push(Slot {
            id,
            oneshot,
            callback,
        });
        id
    }

    /// Disconnect a previously connected callback; returns whether it was
    /// still connected
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    /// Invoke every connected callback with `arg`
    pub fn emit(&self, arg: &T) {
        let callbacks: Vec<Callback<T>> = {
            let mut slots = self.slots.lock().unwrap();
            let callbacks = slots.iter().map(|s| s.callback.clone()).collect();
            slots.retain(|s| !s.oneshot);
            callbacks
        };

        for callback in callbacks {
            callback(arg);
        }
    }

    /// Number of connected callbacks
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}
