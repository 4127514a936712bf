//! Subscription handles

use std::fmt;

/// A live relationship between an observer and a broadcaster.
///
/// Dropping the handle unsubscribes. [`Subscription::unsubscribe`] does the
/// same explicitly and is idempotent.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a teardown callback, run exactly once on unsubscribe or drop.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Tear down the subscription. Later calls do nothing.
    pub fn unsubscribe(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }

    /// Whether the subscription has already been torn down.
    pub fn is_closed(&self) -> bool {
        self.teardown.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unsubscribe_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!sub.is_closed());
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        {
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty() {
        let sub = Subscription::empty();
        assert!(sub.is_closed());
    }
}
