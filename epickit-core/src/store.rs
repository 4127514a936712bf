//! State store with latest-value replay

use std::sync::{Arc, Mutex};

use crate::broadcast::{lock, Broadcaster};
use crate::subscription::Subscription;

/// Holds the current state and broadcasts every change.
///
/// A new subscriber is handed the current value immediately, then every
/// later [`set`](Self::set). All subscribers observe the same sequence of
/// values: `set` calls are queued in the order they were made and each
/// value reaches every subscriber before the next one is delivered.
///
/// # Example
///
/// ```
/// use epickit_core::StateStore;
/// use std::sync::{Arc, Mutex};
///
/// let store = StateStore::new(1);
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let s = seen.clone();
/// let _sub = store.subscribe(move |v: &i32| s.lock().unwrap().push(*v));
///
/// store.set(2);
/// assert_eq!(store.current(), 2);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct StateStore<S> {
    value: Arc<Mutex<S>>,
    broadcaster: Broadcaster<S>,
}

impl<S> Clone for StateStore<S> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            broadcaster: self.broadcaster.clone(),
        }
    }
}

impl<S> StateStore<S>
where
    S: Clone + Send + 'static,
{
    /// Create a store holding `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
            broadcaster: Broadcaster::new(),
        }
    }

    /// Snapshot of the current value.
    pub fn current(&self) -> S {
        lock(&self.value).clone()
    }

    /// Borrow the current value without cloning it.
    ///
    /// The store is locked while `f` runs; `f` must not call back into it.
    pub fn with_current<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.value))
    }

    /// Replace the value and notify subscribers.
    pub fn set(&self, value: S) {
        {
            let mut current = lock(&self.value);
            *current = value.clone();
            self.broadcaster.enqueue(value);
        }
        self.broadcaster.drain();
    }

    /// Attach an observer; it receives the current value first.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = {
            let current = lock(&self.value);
            let id = self.broadcaster.register(observer);
            self.broadcaster.enqueue_to(id, current.clone());
            id
        };
        self.broadcaster.drain();
        self.broadcaster.subscription(id)
    }

    /// Detach every subscriber. The value stays readable.
    pub fn close(&self) {
        self.broadcaster.close();
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.observer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        count: i32,
    }

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&Counter) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (seen, move |c: &Counter| s.lock().unwrap().push(c.count))
    }

    #[test]
    fn test_replays_current_on_subscribe() {
        let store = StateStore::new(Counter { count: 1 });
        store.set(Counter { count: 5 });

        let (seen, obs) = recorder();
        let _sub = store.subscribe(obs);

        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_subscribers_see_same_sequence() {
        let store = StateStore::new(Counter { count: 0 });
        let (a_seen, a) = recorder();
        let (b_seen, b) = recorder();
        let _sa = store.subscribe(a);
        let _sb = store.subscribe(b);

        for n in 1..=3 {
            store.set(Counter { count: n });
        }

        assert_eq!(*a_seen.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(*b_seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_late_subscriber_starts_from_latest() {
        let store = StateStore::new(Counter { count: 0 });
        let (early, a) = recorder();
        let _sa = store.subscribe(a);
        store.set(Counter { count: 1 });

        let (late, b) = recorder();
        let _sb = store.subscribe(b);
        store.set(Counter { count: 2 });

        assert_eq!(*early.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*late.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_set_from_observer_keeps_order() {
        let store = StateStore::new(Counter { count: 0 });
        let writer = store.clone();
        let _w = store.subscribe(move |c: &Counter| {
            if c.count == 1 {
                writer.set(Counter { count: 10 });
            }
        });
        let (seen, obs) = recorder();
        let _r = store.subscribe(obs);

        store.set(Counter { count: 1 });

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 10]);
        assert_eq!(store.current().count, 10);
    }

    #[test]
    fn test_unsubscribe_and_close() {
        let store = StateStore::new(Counter { count: 0 });
        let (seen, obs) = recorder();
        let mut sub = store.subscribe(obs);
        sub.unsubscribe();
        store.set(Counter { count: 1 });
        assert_eq!(*seen.lock().unwrap(), vec![0]);

        let (_other, obs2) = recorder();
        let _s2 = store.subscribe(obs2);
        store.close();
        assert_eq!(store.subscriber_count(), 0);
        assert_eq!(store.with_current(|c| c.count), 1);
    }

    #[test]
    fn test_subscriber_added_by_observer_gets_only_replay() {
        let store = StateStore::new(Counter { count: 0 });
        let (late_seen, late) = recorder();
        let late = Arc::new(Mutex::new(Some(late)));
        let subs = Arc::new(Mutex::new(Vec::new()));

        let inner = store.clone();
        let s = subs.clone();
        let _writer = store.subscribe(move |c: &Counter| {
            if c.count == 1 {
                inner.set(Counter { count: 2 });
                if let Some(obs) = late.lock().unwrap().take() {
                    s.lock().unwrap().push(inner.subscribe(obs));
                }
            }
        });

        store.set(Counter { count: 1 });
        assert_eq!(*late_seen.lock().unwrap(), vec![2]);

        store.set(Counter { count: 3 });
        assert_eq!(*late_seen.lock().unwrap(), vec![2, 3]);
    }
}

