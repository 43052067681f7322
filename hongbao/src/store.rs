use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    state: Mutex<T>,
    listeners: Mutex<Listeners<T>>,
    outbox: Mutex<Outbox<T>>,
}

/// Snapshots waiting for delivery, in write order
struct Outbox<T> {
    queue: VecDeque<T>,
    dispatching: bool,
}

struct Listeners<T> {
    next_id: u64,
    by_id: BTreeMap<u64, Listener<T>>,
}

/// Observable state container
///
/// Every write goes through [Store::update] (or [Store::set]) and every registered
/// listener sees the new value, in registration order, after the write lands.
/// Snapshots are delivered one at a time in the order the writes happened, even when
/// several threads write at once. A write that lands while another thread is delivering is
/// handed to that thread, so `set` can return before its own listeners ran.
/// Listeners are called without any lock held, so they may read or write the store.
pub struct Store<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Clone + Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(initial),
                listeners: Mutex::new(Listeners { next_id: 0, by_id: BTreeMap::new() }),
                outbox: Mutex::new(Outbox { queue: VecDeque::new(), dispatching: false }),
            }),
        }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.state().clone()
    }

    pub fn set(&self, value: T) {
        self.update(|state| *state = value);
    }

    /// Mutate the state in place and notify every listener with the result
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let ret = {
            let mut state = self.state();
            let ret = f(&mut state);
            self.outbox().queue.push_back(state.clone());
            ret
        };
        self.dispatch();
        ret
    }

    /// Like [Store::update] but listeners only hear about it when `f` reports a change
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        {
            let mut state = self.state();
            if !f(&mut state) {
                return false;
            }
            self.outbox().queue.push_back(state.clone());
        }
        self.dispatch();
        true
    }

    /// Register a listener, it stays registered until the returned handle is dropped
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> StoreSubscription<T> {
        let mut listeners = self.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.by_id.insert(id, Arc::new(listener));
        StoreSubscription { id, shared: Arc::downgrade(&self.shared) }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().by_id.len()
    }

    /// Drain the outbox unless another caller already is
    fn dispatch(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.dispatching {
                return;
            }
            outbox.dispatching = true;
        }
        let mut guard = DispatchGuard { outbox: &self.shared.outbox, armed: true };

        loop {
            let snapshot = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(snapshot) => snapshot,
                    None => {
                        outbox.dispatching = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            let listeners: Vec<Listener<T>> = self.listeners().by_id.values().cloned().collect();
            for listener in listeners {
                listener(&snapshot);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, T> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners<T>> {
        self.shared.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<T>> {
        self.shared.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the dispatcher role if a listener panics mid-delivery
struct DispatchGuard<'a, T> {
    outbox: &'a Mutex<Outbox<T>>,
    armed: bool,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let mut outbox = self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            outbox.dispatching = false;
        }
    }
}

/// Handle returned by [Store::subscribe], removes its listener on drop
pub struct StoreSubscription<T> {
    id: u64,
    shared: Weak<Shared<T>>,
}

impl<T> Drop for StoreSubscription<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut listeners = shared.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.by_id.remove(&self.id);
        }
    }
}
