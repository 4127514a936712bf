//! Test utilities for epickit kernels
//!
//! - [`TransitionRecorder`]: collects the `(state, action)` transitions a
//!   kernel emits
//! - Assertion macros over recorded action names
//! - Time control for timer-driven epics (requires the `testing-time` feature)
//!
//! # Example
//!
//! ```
//! use epickit_core::testing::TransitionRecorder;
//! use epickit_core::{assert_emitted, assert_not_emitted, create_action, ActionType, Kernel};
//!
//! const INCREMENT: ActionType = ActionType::new("increment");
//! let increment = create_action::<i32>(INCREMENT).reducer(|n| n + 1);
//!
//! let kernel = Kernel::new(0);
//! let recorder = TransitionRecorder::new();
//! let _sub = recorder.attach(&kernel).unwrap();
//!
//! kernel.dispatch(increment.create()).unwrap();
//!
//! let names = recorder.action_names();
//! assert_emitted!(names, "increment");
//! assert_not_emitted!(names, "decrement");
//! assert_eq!(recorder.states(), vec![1]);
//! ```

use std::sync::{Arc, Mutex};

use crate::action::Action;
use crate::broadcast::lock;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::subscription::Subscription;

/// Records the transitions a kernel emits.
///
/// Clones share the same recording.
pub struct TransitionRecorder<S> {
    records: Arc<Mutex<Vec<(S, Action<S>)>>>,
}

impl<S> Clone for TransitionRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<S> Default for TransitionRecorder<S> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<S> TransitionRecorder<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that appends to this recorder, for use with
    /// [`Kernel::subscribe`].
    pub fn observer(&self) -> impl Fn(&S, &Action<S>) + Send + Sync + 'static {
        let records = Arc::clone(&self.records);
        move |state: &S, action: &Action<S>| {
            lock(&records).push((state.clone(), action.clone()));
        }
    }

    /// Subscribe to `kernel` and record every transition.
    pub fn attach(&self, kernel: &Kernel<S>) -> Result<Subscription> {
        kernel.subscribe(self.observer())
    }

    /// Recorded states, oldest first.
    pub fn states(&self) -> Vec<S> {
        lock(&self.records).iter().map(|(s, _)| s.clone()).collect()
    }

    /// Recorded action names, oldest first.
    pub fn action_names(&self) -> Vec<&'static str> {
        lock(&self.records).iter().map(|(_, a)| a.name()).collect()
    }

    /// Most recently recorded state.
    pub fn last_state(&self) -> Option<S> {
        lock(&self.records).last().map(|(s, _)| s.clone())
    }

    /// Take every recorded transition, leaving the recorder empty.
    pub fn drain(&self) -> Vec<(S, Action<S>)> {
        std::mem::take(&mut *lock(&self.records))
    }

    /// Number of recorded transitions.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

/// Assert that an action with the given name was recorded.
///
/// # Example
///
/// ```ignore
/// let names = recorder.action_names();
/// assert_emitted!(names, "increment");
/// ```
#[macro_export]
macro_rules! assert_emitted {
    ($names:expr, $name:expr) => {
        assert!(
            $names.iter().any(|n| *n == $name),
            "Expected action `{}` to be emitted, but got: {:?}",
            $name,
            $names
        );
    };
}

/// Assert that no action with the given name was recorded.
///
/// # Example
///
/// ```ignore
/// let names = recorder.action_names();
/// assert_not_emitted!(names, "increment");
/// ```
#[macro_export]
macro_rules! assert_not_emitted {
    ($names:expr, $name:expr) => {
        assert!(
            !$names.iter().any(|n| *n == $name),
            "Expected action `{}` NOT to be emitted, but got: {:?}",
            $name,
            $names
        );
    };
}

/// Count how many recorded actions have the given name.
///
/// # Example
///
/// ```ignore
/// assert_eq!(count_emitted!(recorder.action_names(), "tick"), 3);
/// ```
#[macro_export]
macro_rules! count_emitted {
    ($names:expr, $name:expr) => {
        $names.iter().filter(|n| **n == $name).count()
    };
}

// ============================================================================
// Time control
// ============================================================================

/// Pause tokio's clock. Timers only advance through [`advance_time`] or
/// when the runtime is otherwise idle.
///
/// Must be called from a current-thread runtime.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume tokio's clock after [`pause_time`].
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Advance the paused clock by `duration`, firing every timer due in that
/// window, then let woken tasks run.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
    tokio::task::yield_now().await;
}
