//! Queueing channel for actions
//!
//! Actions may be dispatched before anything listens (for example from a
//! view's setup code, before the kernel's output has been subscribed to).
//! The channel buffers those and hands them to its first subscriber, then
//! becomes a plain multicast pass-through.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::broadcast::{lock, Broadcaster};
use crate::subscription::Subscription;

enum Mode<T> {
    /// No subscriber has attached yet.
    Buffering(VecDeque<T>),
    /// Pushes go straight to the current subscribers.
    Forwarding,
}

/// Ordered channel that buffers until its first subscriber attaches.
///
/// - Before the first [`subscribe`](Self::subscribe), pushed values are kept
///   in order.
/// - The first subscriber receives the buffer, in order, exactly once.
/// - Afterwards every push is delivered to all current subscribers before
///   `push` returns. Later subscribers see only later pushes.
///
/// A push made from inside a subscriber's callback is queued and delivered
/// once the value currently in flight has reached every subscriber.
pub struct QueueingChannel<T> {
    mode: Arc<Mutex<Mode<T>>>,
    broadcaster: Broadcaster<T>,
}

impl<T> Clone for QueueingChannel<T> {
    fn clone(&self) -> Self {
        Self {
            mode: Arc::clone(&self.mode),
            broadcaster: self.broadcaster.clone(),
        }
    }
}

impl<T: Send + 'static> Default for QueueingChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> QueueingChannel<T> {
    /// Create a channel in buffering mode.
    pub fn new() -> Self {
        Self {
            mode: Arc::new(Mutex::new(Mode::Buffering(VecDeque::new()))),
            broadcaster: Broadcaster::new(),
        }
    }

    /// Push a value.
    ///
    /// Returns `false` if the channel is closed and the value was dropped.
    pub fn push(&self, value: T) -> bool {
        {
            let mut mode = lock(&self.mode);
            if let Mode::Buffering(buffer) = &mut *mode {
                buffer.push_back(value);
                trace!(buffered = buffer.len(), "channel buffered value");
                return true;
            }
            if self.broadcaster.is_closed() {
                trace!("channel closed, dropping value");
                return false;
            }
            self.broadcaster.enqueue(value);
        }
        self.broadcaster.drain();
        true
    }

    /// Attach an observer.
    ///
    /// The first observer ever attached receives the buffered values before
    /// this call returns.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut mode = lock(&self.mode);
            let id = self.broadcaster.register(observer);
            if let Mode::Buffering(buffer) = std::mem::replace(&mut *mode, Mode::Forwarding) {
                debug!(flushed = buffer.len(), "channel switched to forwarding");
                for value in buffer {
                    self.broadcaster.enqueue_to(id, value);
                }
            }
            id
        };
        self.broadcaster.drain();
        self.broadcaster.subscription(id)
    }

    /// Close the channel, dropping buffered values and subscribers.
    pub fn close(&self) {
        let mut mode = lock(&self.mode);
        *mode = Mode::Forwarding;
        self.broadcaster.close();
    }

    /// Whether the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.broadcaster.is_closed()
    }

    /// Whether no subscriber has attached yet.
    pub fn is_buffering(&self) -> bool {
        matches!(*lock(&self.mode), Mode::Buffering(_))
    }

    /// Number of values waiting for the first subscriber.
    pub fn buffered_len(&self) -> usize {
        match &*lock(&self.mode) {
            Mode::Buffering(buffer) => buffer.len(),
            Mode::Forwarding => 0,
        }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.observer_count()
    }
}
