//! Reducer stage: applies each action's transition function to the store

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tracing::{error, trace};

use crate::action::Action;
use crate::broadcast::{lock, Broadcaster};
use crate::config::ReducerPanicPolicy;
use crate::error::{panic_message, KernelError};
use crate::middleware::Middleware;
use crate::store::StateStore;

/// The canonical record of one processed action: the state after the
/// action was reduced, and the action itself.
pub struct Transition<S> {
    /// State after reduction (unchanged if the action had no reducer).
    pub state: S,
    /// The processed action.
    pub action: Action<S>,
}

impl<S: Clone> Clone for Transition<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            action: self.action.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Transition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("state", &self.state)
            .field("action", &self.action)
            .finish()
    }
}

/// Panic payload of a transition function under [`ReducerPanicPolicy::Propagate`].
pub(crate) type ReducerPanic = Box<dyn Any + Send>;

/// Applies transition functions and emits a [`Transition`] per action.
///
/// The stage is the only writer of the state store.
pub(crate) struct ReducerStage<S> {
    store: StateStore<S>,
    transitions: Broadcaster<Transition<S>>,
    errors: Broadcaster<KernelError>,
    middleware: Mutex<Box<dyn Middleware<S>>>,
    policy: ReducerPanicPolicy,
    kernel: String,
}

impl<S> ReducerStage<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        store: StateStore<S>,
        transitions: Broadcaster<Transition<S>>,
        errors: Broadcaster<KernelError>,
        middleware: Box<dyn Middleware<S>>,
        policy: ReducerPanicPolicy,
        kernel: String,
    ) -> Self {
        Self {
            store,
            transitions,
            errors,
            middleware: Mutex::new(middleware),
            policy,
            kernel,
        }
    }

    /// Process one action.
    ///
    /// Returns whether the state changed. Under the propagate policy a
    /// panicking transition function yields its payload instead; nothing is
    /// emitted for that action.
    pub(crate) fn process(&self, action: &Action<S>) -> Result<bool, ReducerPanic> {
        lock(&self.middleware).before(action);

        let current = self.store.current();
        let changed = match catch_unwind(AssertUnwindSafe(|| action.reduce(&current))) {
            Ok(Some(next)) => {
                self.store.set(next);
                true
            }
            Ok(None) => false,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    kernel = %self.kernel,
                    action = %action.name(),
                    %message,
                    "reducer panicked"
                );
                match self.policy {
                    ReducerPanicPolicy::Propagate => return Err(payload),
                    ReducerPanicPolicy::Isolate => {
                        self.errors.emit(KernelError::ReducerPanicked {
                            action: action.name(),
                            message,
                        });
                        false
                    }
                }
            }
        };

        lock(&self.middleware).after(action, changed);
        trace!(
            kernel = %self.kernel,
            action = %action.name(),
            state_changed = changed,
            "action reduced"
        );

        self.transitions.emit(Transition {
            state: self.store.current(),
            action: action.clone(),
        });
        Ok(changed)
    }
}
