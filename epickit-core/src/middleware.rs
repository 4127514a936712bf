//! Middleware hooks around the reducer stage

use crate::action::Action;

/// Middleware trait for intercepting actions
///
/// Implement this trait to add logging, metrics, or other cross-cutting
/// concerns to a kernel. Hooks run on the reducer stage for every action,
/// including actions without a transition function.
pub trait Middleware<S>: Send {
    /// Called before the action's transition function runs
    fn before(&mut self, action: &Action<S>);

    /// Called after the action was processed
    fn after(&mut self, action: &Action<S>, state_changed: bool);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl<S> Middleware<S> for NoopMiddleware {
    fn before(&mut self, _action: &Action<S>) {}
    fn after(&mut self, _action: &Action<S>, _state_changed: bool) {}
}

/// Middleware that logs actions (for debugging)
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Whether to log before reduction
    pub log_before: bool,
    /// Whether to log after reduction
    pub log_after: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware with default settings (log after only)
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

    /// Create a logging middleware that logs both before and after
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_after: true,
        }
    }
}

impl<S> Middleware<S> for LoggingMiddleware {
    fn before(&mut self, action: &Action<S>) {
        if self.log_before {
            tracing::debug!(
                action = %action.name(),
                has_reducer = action.has_reducer(),
                "Reducing action"
            );
        }
    }

    fn after(&mut self, action: &Action<S>, state_changed: bool) {
        if self.log_after {
            tracing::debug!(
                action = %action.name(),
                state_changed = state_changed,
                "Action processed"
            );
        }
    }
}

/// Compose multiple middleware into a single middleware
pub struct ComposedMiddleware<S> {
    middlewares: Vec<Box<dyn Middleware<S>>>,
}

impl<S> std::fmt::Debug for ComposedMiddleware<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl<S> Default for ComposedMiddleware<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ComposedMiddleware<S> {
    /// Create a new composed middleware
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware<S> + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Add an already boxed middleware
    pub fn add_boxed(&mut self, middleware: Box<dyn Middleware<S>>) {
        self.middlewares.push(middleware);
    }

    /// Number of composed middlewares
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether nothing has been added
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl<S> Middleware<S> for ComposedMiddleware<S> {
    fn before(&mut self, action: &Action<S>) {
        for middleware in &mut self.middlewares {
            middleware.before(action);
        }
    }

    fn after(&mut self, action: &Action<S>, state_changed: bool) {
        // Call in reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(action, state_changed);
        }
    }
}
