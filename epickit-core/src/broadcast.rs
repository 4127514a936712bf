//! Multicast observer lists
//!
//! [`Broadcaster`] is the delivery engine shared by the queueing channel,
//! the state store and the kernel's transition stream. Emissions go through
//! one FIFO queue per broadcaster and are delivered by whichever caller
//! finds the broadcaster idle. An observer that emits again while being
//! notified only enqueues; the outer delivery loop picks the value up once
//! the current one has reached every observer. Re-entrant dispatch therefore
//! runs as a loop, not as a growing call stack, and every observer sees the
//! same order.
//!
//! A caller on another thread that finds a delivery in progress waits for
//! it to finish, so its own value has been delivered when `drain` returns.
//! A value reaches only the observers registered when it was queued.
//!
//! No lock is held while an observer runs.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use crate::subscription::Subscription;

/// Lock a mutex, recovering the data if a panicking observer poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

thread_local! {
    // delivery loops running on this thread, across all broadcasters
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn in_delivery() -> bool {
    DELIVERY_DEPTH.with(|depth| depth.get() > 0)
}

/// Handle identifying a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: ObserverId,
    active: Arc<AtomicBool>,
    observer: ObserverFn<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            observer: Arc::clone(&self.observer),
        }
    }
}

enum Audience {
    One(ObserverId),
    /// Observers whose id is below this bound, i.e. those registered
    /// before the value was queued.
    RegisteredBefore(u64),
}

struct Delivery<T> {
    value: T,
    audience: Audience,
}

struct Inner<T> {
    observers: Vec<Slot<T>>,
    queue: VecDeque<Delivery<T>>,
    delivering: bool,
    closed: bool,
    next_id: u64,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    idle: Condvar,
}

/// Marks this thread as delivering; on drop (including when an observer
/// panics) releases the broadcaster for waiting threads.
struct DeliveryGuard<'a, T> {
    shared: &'a Shared<T>,
    armed: bool,
}

impl<'a, T> DeliveryGuard<'a, T> {
    fn enter(shared: &'a Shared<T>) -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            shared,
            armed: true,
        }
    }
}

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        if self.armed {
            lock(&self.shared.inner).delivering = false;
            self.shared.idle.notify_all();
        }
    }
}

/// An observer list with ordered, re-entrancy-safe delivery.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    observers: Vec::new(),
                    queue: VecDeque::new(),
                    delivering: false,
                    closed: false,
                    next_id: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }
}

impl<T: Send + 'static> Broadcaster<T> {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer without delivering anything.
    ///
    /// The observer receives values queued from now on, not ones already
    /// waiting in the queue.
    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.shared.inner);
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        if !inner.closed {
            inner.observers.push(Slot {
                id,
                active: Arc::new(AtomicBool::new(true)),
                observer: Arc::new(observer),
            });
        }
        id
    }

    /// Register an observer and return a handle that removes it.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.register(observer);
        self.subscription(id)
    }

    /// Handle that unregisters `id` when dropped or unsubscribed.
    pub fn subscription(&self, id: ObserverId) -> Subscription {
        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = weak.upgrade() {
                Broadcaster { shared }.unsubscribe(id);
            }
        })
    }

    /// Remove an observer. Returns `false` if it was not registered.
    ///
    /// An observer removed mid-delivery is not called again, not even for
    /// the value currently being delivered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = {
            let mut inner = lock(&self.shared.inner);
            inner
                .observers
                .iter()
                .position(|s| s.id == id)
                .map(|index| inner.observers.remove(index))
        };
        // observer closures are dropped outside the lock
        match removed {
            Some(slot) => {
                slot.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Queue a value for every current observer without delivering it yet.
    pub fn enqueue(&self, value: T) {
        let mut inner = lock(&self.shared.inner);
        if !inner.closed {
            let bound = inner.next_id;
            inner.queue.push_back(Delivery {
                value,
                audience: Audience::RegisteredBefore(bound),
            });
        }
    }

    /// Queue a value for a single observer without delivering it yet.
    pub fn enqueue_to(&self, id: ObserverId, value: T) {
        let mut inner = lock(&self.shared.inner);
        if !inner.closed {
            inner.queue.push_back(Delivery {
                value,
                audience: Audience::One(id),
            });
        }
    }

    /// Deliver queued values.
    ///
    /// Called from inside an observer (of this or any other broadcaster)
    /// while a delivery is running, this only leaves the value to the
    /// running loop. Called from another thread, it blocks until that loop
    /// finishes, then delivers whatever is still queued.
    pub fn drain(&self) {
        {
            let mut inner = lock(&self.shared.inner);
            while inner.delivering {
                if in_delivery() {
                    return;
                }
                inner = self
                    .shared
                    .idle
                    .wait(inner)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if inner.queue.is_empty() {
                return;
            }
            inner.delivering = true;
        }

        let mut guard = DeliveryGuard::enter(&self.shared);

        loop {
            let (delivery, slots) = {
                let mut inner = lock(&self.shared.inner);
                match inner.queue.pop_front() {
                    Some(delivery) => {
                        let slots: Vec<Slot<T>> = match delivery.audience {
                            Audience::One(id) => inner
                                .observers
                                .iter()
                                .filter(|s| s.id == id)
                                .cloned()
                                .collect(),
                            Audience::RegisteredBefore(bound) => inner
                                .observers
                                .iter()
                                .filter(|s| s.id.0 < bound)
                                .cloned()
                                .collect(),
                        };
                        (delivery, slots)
                    }
                    None => {
                        // cleared under the same lock that saw the queue empty
                        inner.delivering = false;
                        guard.armed = false;
                        break;
                    }
                }
            };

            for slot in slots {
                if slot.active.load(Ordering::Acquire) {
                    (slot.observer)(&delivery.value);
                }
            }
        }

        drop(guard);
        self.shared.idle.notify_all();
    }

    /// Queue a value for every observer and deliver it.
    pub fn emit(&self, value: T) {
        self.enqueue(value);
        self.drain();
    }

    /// Drop every observer and pending value. Later emissions are ignored.
    pub fn close(&self) {
        let (slots, pending) = {
            let mut inner = lock(&self.shared.inner);
            inner.closed = true;
            let pending = std::mem::take(&mut inner.queue);
            (std::mem::take(&mut inner.observers), pending)
        };
        for slot in &slots {
            slot.active.store(false, Ordering::Release);
        }
        drop(pending);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared.inner).closed
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.shared.inner).observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&i32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (seen, move |v: &i32| s.lock().unwrap().push(*v))
    }

    #[test]
    fn test_emit_reaches_all_observers() {
        let b = Broadcaster::new();
        let (a_seen, a) = recorder();
        let (b_seen, bb) = recorder();
        let _s1 = b.subscribe(a);
        let _s2 = b.subscribe(bb);

        b.emit(1);
        b.emit(2);

        assert_eq!(*a_seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(*b_seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let b = Broadcaster::new();
        let (seen, obs) = recorder();
        let mut sub = b.subscribe(obs);

        b.emit(1);
        sub.unsubscribe();
        b.emit(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(b.observer_count(), 0);
    }

    #[test]
    fn test_targeted_delivery() {
        let b = Broadcaster::new();
        let (a_seen, a) = recorder();
        let (b_seen, bb) = recorder();
        let id = b.register(a);
        let _s2 = b.subscribe(bb);

        b.enqueue_to(id, 7);
        b.drain();

        assert_eq!(*a_seen.lock().unwrap(), vec![7]);
        assert!(b_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reentrant_emit_is_queued_not_recursive() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_b = b.clone();
        let o1 = order.clone();
        let _s1 = b.subscribe(move |v| {
            o1.lock().unwrap().push(format!("first:{v}"));
            if *v < 3 {
                inner_b.emit(v + 1);
            }
        });
        let o2 = order.clone();
        let _s2 = b.subscribe(move |v| {
            o2.lock().unwrap().push(format!("second:{v}"));
        });

        b.emit(1);

        // each value reaches both observers before the next starts
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "first:1", "second:1", "first:2", "second:2", "first:3", "second:3"
            ]
        );
    }

    #[test]
    fn test_unsubscribe_during_delivery_skips_observer() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let (seen, obs) = recorder();
        let target: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));

        let inner_b = b.clone();
        let t = target.clone();
        let _first = b.subscribe(move |v| {
            if *v == 2 {
                if let Some(id) = *t.lock().unwrap() {
                    inner_b.unsubscribe(id);
                }
            }
        });
        let second = b.register(obs);
        *target.lock().unwrap() = Some(second);

        b.emit(1);
        b.emit(2);
        b.emit(3);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_close_drops_everything() {
        let b = Broadcaster::new();
        let (seen, obs) = recorder();
        let _sub = b.subscribe(obs);

        b.close();
        b.emit(1);

        assert!(b.is_closed());
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(b.observer_count(), 0);
    }

    #[test]
    fn test_panicking_observer_does_not_wedge_delivery() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let (seen, obs) = recorder();
        let _s1 = b.subscribe(|v| {
            if *v == 1 {
                panic!("observer failed");
            }
        });
        let _s2 = b.subscribe(obs);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| b.emit(1)));
        assert!(result.is_err());

        b.emit(2);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_observer_added_mid_delivery_misses_queued_values() {
        let b: Broadcaster<i32> = Broadcaster::new();
        let (late_seen, late) = recorder();
        let late = Arc::new(Mutex::new(Some(late)));
        let subs = Arc::new(Mutex::new(Vec::new()));

        let inner_b = b.clone();
        let s = subs.clone();
        let _first = b.subscribe(move |v| {
            if *v == 1 {
                inner_b.enqueue(2);
                if let Some(obs) = late.lock().unwrap().take() {
                    s.lock().unwrap().push(inner_b.subscribe(obs));
                }
            }
        });

        b.emit(1);
        assert!(late_seen.lock().unwrap().is_empty());

        b.emit(3);
        assert_eq!(*late_seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn test_emit_from_other_thread_waits_for_running_delivery() {
        use std::sync::mpsc;
        use std::sync::Barrier;
        use std::thread;
        use std::time::Duration;

        let b: Broadcaster<i32> = Broadcaster::new();
        let (seen, obs) = recorder();
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let (en, re) = (entered.clone(), release.clone());
        let _blocker = b.subscribe(move |v| {
            if *v == 1 {
                en.wait();
                re.wait();
            }
        });
        let _rec = b.subscribe(obs);

        let first = {
            let b = b.clone();
            thread::spawn(move || b.emit(1))
        };
        entered.wait();

        let (done_tx, done_rx) = mpsc::channel();
        let second = {
            let b = b.clone();
            let seen = seen.clone();
            thread::spawn(move || {
                b.emit(2);
                done_tx.send(seen.lock().unwrap().clone()).unwrap();
            })
        };

        // still blocked behind the delivery of 1
        thread::sleep(Duration::from_millis(50));
        assert!(done_rx.try_recv().is_err());

        release.wait();
        assert_eq!(done_rx.recv().unwrap(), vec![1, 2]);
        first.join().unwrap();
        second.join().unwrap();
    }
}

