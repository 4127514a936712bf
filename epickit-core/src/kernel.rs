//! The kernel: store, channel, reducer stage and epics behind one handle

use std::fmt;
use std::panic::resume_unwind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, trace};

use crate::action::Action;
use crate::broadcast::{lock, Broadcaster, ObserverId};
use crate::channel::QueueingChannel;
use crate::config::KernelConfig;
use crate::epic::{Epic, EpicRunner, RunningEpics};
use crate::error::{KernelError, Result};
use crate::logger::ActionLoggerMiddleware;
use crate::middleware::{ComposedMiddleware, Middleware};
use crate::reducer::{ReducerStage, Transition};
use crate::store::StateStore;
use crate::subscription::Subscription;

/// The shared execution started by the first subscriber.
struct Execution {
    subscribers: usize,
    epics: RunningEpics,
    reducer: Option<Subscription>,
}

enum Lifecycle {
    Idle,
    Running(Execution),
    TornDown,
}

struct KernelInner<S> {
    name: String,
    store: StateStore<S>,
    channel: QueueingChannel<Action<S>>,
    transitions: Broadcaster<Transition<S>>,
    errors: Broadcaster<KernelError>,
    stage: Arc<ReducerStage<S>>,
    epics: EpicRunner<S>,
    torn_down: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

/// A state container driven by actions and epics.
///
/// - [`dispatch`](Self::dispatch) pushes an action into the kernel's
///   queueing channel. Actions dispatched before anyone subscribed are
///   buffered and processed when the first subscriber attaches.
/// - [`subscribe`](Self::subscribe) attaches to the stream of
///   `(state, action)` transitions. The first subscriber starts the shared
///   execution (reducer stage and epics); later subscribers join it. When
///   the last subscriber leaves, the execution is torn down for good.
/// - [`state`](Self::state) reads the current state at any time, including
///   after teardown.
///
/// Once running, each dispatched action is reduced and delivered to every
/// subscriber before `dispatch` returns. Epic output is fed back into the
/// channel from a tokio task.
///
/// # Example
///
/// ```
/// use epickit_core::{create_action, ActionType, Kernel};
/// use std::sync::{Arc, Mutex};
///
/// const INCREMENT: ActionType = ActionType::new("increment");
/// let increment = create_action::<i32>(INCREMENT).reducer(|n| n + 1);
///
/// let kernel = Kernel::new(0);
/// kernel.dispatch(increment.create()).unwrap();
/// assert_eq!(kernel.state(), 0); // buffered until someone subscribes
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let s = seen.clone();
/// let _sub = kernel
///     .subscribe(move |state: &i32, _action| s.lock().unwrap().push(*state))
///     .unwrap();
/// kernel.dispatch(increment.create()).unwrap();
///
/// assert_eq!(kernel.state(), 2);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct Kernel<S> {
    inner: Arc<KernelInner<S>>,
}

impl<S> Clone for Kernel<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Kernel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.inner.name)
            .field("epics", &self.inner.epics)
            .field("torn_down", &self.inner.torn_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S> Kernel<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// A kernel with no epics and default configuration.
    pub fn new(initial: S) -> Self {
        Self::assemble(
            initial,
            EpicRunner::new(),
            Box::new(ComposedMiddleware::new()),
            KernelConfig::default(),
        )
    }

    /// A kernel running `epics`, named `epic-0`, `epic-1`, ... in order.
    pub fn create<I>(initial: S, epics: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn Epic<S>>>,
    {
        Self::assemble(
            initial,
            EpicRunner::numbered(epics),
            Box::new(ComposedMiddleware::new()),
            KernelConfig::default(),
        )
    }

    /// Start building a kernel.
    pub fn builder() -> KernelBuilder<S> {
        KernelBuilder::new()
    }

    fn assemble(
        initial: S,
        epics: EpicRunner<S>,
        middleware: Box<dyn Middleware<S>>,
        config: KernelConfig,
    ) -> Self {
        let store = StateStore::new(initial);
        let transitions = Broadcaster::new();
        let errors = Broadcaster::new();
        let stage = ReducerStage::new(
            store.clone(),
            transitions.clone(),
            errors.clone(),
            middleware,
            config.reducer_panics,
            config.name.clone(),
        );
        debug!(kernel = %config.name, epics = epics.len(), "kernel created");

        Self {
            inner: Arc::new(KernelInner {
                name: config.name,
                store,
                channel: QueueingChannel::new(),
                transitions,
                errors,
                stage: Arc::new(stage),
                epics,
                torn_down: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    /// Name used in tracing output.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        self.inner.store.current()
    }

    /// Submit an action.
    ///
    /// While the kernel is running the action is reduced, and every
    /// subscriber has seen the resulting transition, before this returns.
    /// A dispatch made from inside a subscriber or middleware is queued
    /// behind the action currently being processed.
    pub fn dispatch(&self, action: Action<S>) -> Result<()> {
        if self.is_torn_down() {
            return Err(KernelError::TornDown);
        }
        trace!(kernel = %self.inner.name, action = %action.name(), "dispatch");
        if self.inner.channel.push(action) {
            Ok(())
        } else {
            Err(KernelError::TornDown)
        }
    }

    /// Attach to the `(state, action)` transition stream.
    ///
    /// The first subscriber starts the reducer stage and epics, and receives
    /// every action dispatched so far. Fails with [`KernelError::NoRuntime`]
    /// if epics are configured and no tokio runtime is current (the kernel
    /// stays idle and a later attempt may succeed), or with
    /// [`KernelError::TornDown`] once the kernel has been torn down.
    pub fn subscribe<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&S, &Action<S>) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let observer = move |t: &Transition<S>| observer(&t.state, &t.action);

        let (id, first) = {
            let mut lifecycle = lock(&inner.lifecycle);
            match &mut *lifecycle {
                Lifecycle::TornDown => return Err(KernelError::TornDown),
                Lifecycle::Running(execution) => {
                    execution.subscribers += 1;
                    (inner.transitions.register(observer), false)
                }
                Lifecycle::Idle => {
                    let epics = inner.epics.start(
                        &inner.transitions,
                        &inner.store,
                        &inner.channel,
                        &inner.name,
                    )?;
                    let id = inner.transitions.register(observer);
                    *lifecycle = Lifecycle::Running(Execution {
                        subscribers: 1,
                        epics,
                        reducer: None,
                    });
                    (id, true)
                }
            }
        };
        let subscription = self.observer_subscription(id);

        if first {
            info!(kernel = %inner.name, "kernel started");
            // Attaching flushes buffered actions through the reducer, so it
            // happens outside the lifecycle lock.
            let reducer = self.attach_reducer();
            let orphaned = match &mut *lock(&inner.lifecycle) {
                Lifecycle::Running(execution) => {
                    execution.reducer = Some(reducer);
                    None
                }
                _ => Some(reducer),
            };
            drop(orphaned);
        } else {
            debug!(kernel = %inner.name, "subscriber joined running kernel");
        }

        Ok(subscription)
    }

    /// Observe the state: the current value immediately, then every change.
    ///
    /// Does not start the kernel.
    pub fn subscribe_state<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        if self.is_torn_down() {
            return Err(KernelError::TornDown);
        }
        Ok(self.inner.store.subscribe(observer))
    }

    /// Observe errors reported by the kernel, such as isolated reducer panics.
    pub fn subscribe_errors<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(&KernelError) + Send + Sync + 'static,
    {
        if self.is_torn_down() {
            return Err(KernelError::TornDown);
        }
        Ok(self.inner.errors.subscribe(observer))
    }

    /// Tear the kernel down regardless of how many subscribers remain.
    ///
    /// Idempotent. Epics and their timers are cancelled, pending actions
    /// are dropped and later `dispatch`/`subscribe` calls fail.
    pub fn shutdown(&self) {
        let lifecycle = lock(&self.inner.lifecycle);
        self.teardown(lifecycle, "shutdown");
    }

    /// Whether a shared execution is live.
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.inner.lifecycle), Lifecycle::Running(_))
    }

    /// Whether the kernel has been torn down.
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// Number of live [`subscribe`](Self::subscribe) subscriptions.
    pub fn subscriber_count(&self) -> usize {
        match &*lock(&self.inner.lifecycle) {
            Lifecycle::Running(execution) => execution.subscribers,
            _ => 0,
        }
    }

    fn attach_reducer(&self) -> Subscription {
        let stage = Arc::clone(&self.inner.stage);
        let kernel = Arc::downgrade(&self.inner);
        self.inner.channel.subscribe(move |action: &Action<S>| {
            if let Err(panic) = stage.process(action) {
                if let Some(inner) = kernel.upgrade() {
                    let this = Kernel { inner };
                    let lifecycle = lock(&this.inner.lifecycle);
                    this.teardown(lifecycle, "reducer panicked");
                }
                resume_unwind(panic);
            }
        })
    }

    fn observer_subscription(&self, id: ObserverId) -> Subscription {
        let kernel: Weak<KernelInner<S>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = kernel.upgrade() {
                inner.transitions.unsubscribe(id);
                Kernel { inner }.release();
            }
        })
    }

    fn release(&self) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        let Lifecycle::Running(execution) = &mut *lifecycle else {
            return;
        };
        execution.subscribers = execution.subscribers.saturating_sub(1);
        if execution.subscribers == 0 {
            self.teardown(lifecycle, "last subscriber left");
        }
    }

    /// Move to `TornDown` under the given lock, then release everything
    /// outside it.
    fn teardown(&self, mut lifecycle: MutexGuard<'_, Lifecycle>, reason: &str) {
        if matches!(*lifecycle, Lifecycle::TornDown) {
            return;
        }
        self.inner.torn_down.store(true, Ordering::Release);
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::TornDown);
        drop(lifecycle);

        info!(kernel = %self.inner.name, reason, "kernel torn down");
        if let Lifecycle::Running(mut execution) = previous {
            execution.epics.stop();
            if let Some(mut reducer) = execution.reducer.take() {
                reducer.unsubscribe();
            }
        }
        self.inner.channel.close();
        self.inner.transitions.close();
        self.inner.errors.close();
        self.inner.store.close();
    }
}

/// Builder for a [`Kernel`].
///
/// ```
/// use epickit_core::{Kernel, KernelConfig, KernelError};
///
/// let kernel = Kernel::<u32>::builder()
///     .initial_state(0)
///     .config(KernelConfig::default().with_name("counter"))
///     .build()
///     .unwrap();
/// assert_eq!(kernel.name(), "counter");
///
/// let missing = Kernel::<u32>::builder().build();
/// assert_eq!(missing.unwrap_err(), KernelError::MissingInitialState);
/// ```
pub struct KernelBuilder<S> {
    initial: Option<S>,
    epics: EpicRunner<S>,
    middleware: ComposedMiddleware<S>,
    config: KernelConfig,
    error: Option<KernelError>,
}

impl<S> fmt::Debug for KernelBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBuilder")
            .field("has_initial_state", &self.initial.is_some())
            .field("epics", &self.epics)
            .field("middleware", &self.middleware)
            .field("config", &self.config)
            .finish()
    }
}

impl<S> Default for KernelBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> KernelBuilder<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// An empty builder with default configuration.
    pub fn new() -> Self {
        Self {
            initial: None,
            epics: EpicRunner::new(),
            middleware: ComposedMiddleware::new(),
            config: KernelConfig::default(),
            error: None,
        }
    }

    /// Set the initial state. Required.
    pub fn initial_state(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Add an epic named after its position (`epic-0`, `epic-1`, ...).
    pub fn epic<E>(self, epic: E) -> Self
    where
        E: Epic<S> + 'static,
    {
        let name = format!("epic-{}", self.epics.len());
        self.named_epic(name, epic)
    }

    /// Add an epic under a unique name.
    pub fn named_epic<E>(mut self, name: impl Into<String>, epic: E) -> Self
    where
        E: Epic<S> + 'static,
    {
        if let Err(err) = self.epics.add(name, epic) {
            self.error.get_or_insert(err);
        }
        self
    }

    /// Add a middleware. Middleware runs in the order added.
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<S> + 'static,
    {
        self.middleware.add(middleware);
        self
    }

    /// Replace the configuration.
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the kernel.
    ///
    /// Fails with the first registration error, or with
    /// [`KernelError::MissingInitialState`].
    pub fn build(self) -> Result<Kernel<S>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let initial = self.initial.ok_or(KernelError::MissingInitialState)?;

        let middleware: Box<dyn Middleware<S>> = if self.config.log_actions {
            let mut composed = ComposedMiddleware::new();
            composed.add(ActionLoggerMiddleware::new(self.config.logger.clone()));
            composed.add(self.middleware);
            Box::new(composed)
        } else {
            Box::new(self.middleware)
        };

        Ok(Kernel::assemble(initial, self.epics, middleware, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{create_action, ActionType};
    use crate::config::ReducerPanicPolicy;
    use crate::epic::{ActionStream, EpicOutput, StateStream};
    use crate::operators::EpicStreamExt;
    use futures::StreamExt;

    const INC: ActionType = ActionType::new("inc");
    const PING: ActionType = ActionType::new("ping");
    const PONG: ActionType = ActionType::new("pong");
    const BOOM: ActionType = ActionType::new("boom");

    fn recorder() -> (
        Arc<Mutex<Vec<(i32, &'static str)>>>,
        impl Fn(&i32, &Action<i32>) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        (seen, move |state: &i32, action: &Action<i32>| {
            s.lock().unwrap().push((*state, action.name()))
        })
    }

    fn ping_pong(actions: ActionStream<i32>, _states: StateStream<i32>) -> EpicOutput<i32> {
        actions.of_type(PING).map(|_| Action::new(PONG)).boxed()
    }

    #[test]
    fn test_dispatch_before_subscribe_is_buffered() {
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(0);

        kernel.dispatch(inc.create()).unwrap();
        kernel.dispatch(inc.create()).unwrap();
        assert_eq!(kernel.state(), 0);
        assert!(!kernel.is_running());

        let (seen, obs) = recorder();
        let _sub = kernel.subscribe(obs).unwrap();

        assert_eq!(kernel.state(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![(1, "inc"), (2, "inc")]);
    }

    #[test]
    fn test_second_subscriber_sees_only_new_transitions() {
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(0);
        kernel.dispatch(inc.create()).unwrap();

        let (first, obs1) = recorder();
        let _s1 = kernel.subscribe(obs1).unwrap();
        let (second, obs2) = recorder();
        let _s2 = kernel.subscribe(obs2).unwrap();
        kernel.dispatch(inc.create()).unwrap();

        assert_eq!(*first.lock().unwrap(), vec![(1, "inc"), (2, "inc")]);
        assert_eq!(*second.lock().unwrap(), vec![(2, "inc")]);
        assert_eq!(kernel.subscriber_count(), 2);
    }

    #[test]
    fn test_last_unsubscribe_tears_down() {
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(0);
        let (_, obs1) = recorder();
        let (_, obs2) = recorder();
        let mut s1 = kernel.subscribe(obs1).unwrap();
        let mut s2 = kernel.subscribe(obs2).unwrap();

        s1.unsubscribe();
        assert!(kernel.is_running());
        s2.unsubscribe();

        assert!(kernel.is_torn_down());
        assert_eq!(kernel.dispatch(inc.create()), Err(KernelError::TornDown));
        assert!(matches!(kernel.subscribe(|_, _| {}), Err(KernelError::TornDown)));
        assert_eq!(kernel.state(), 0);
    }

    #[test]
    fn test_dispatch_from_observer_is_queued() {
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(0);
        let (seen, obs) = recorder();

        let feedback = kernel.clone();
        let again = inc.clone();
        let _loop = kernel
            .subscribe(move |state, _| {
                if *state < 3 {
                    let _ = feedback.dispatch(again.create());
                }
            })
            .unwrap();
        let _rec = kernel.subscribe(obs).unwrap();

        kernel.dispatch(inc.create()).unwrap();

        assert_eq!(kernel.state(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, "inc"), (2, "inc"), (3, "inc")]
        );
    }

    #[test]
    fn test_epics_without_runtime_keep_kernel_idle() {
        let kernel = Kernel::builder()
            .initial_state(0)
            .named_epic("ping", ping_pong)
            .build()
            .unwrap();

        assert!(matches!(
            kernel.subscribe(|_, _| {}),
            Err(KernelError::NoRuntime)
        ));
        assert!(!kernel.is_running());
        assert!(!kernel.is_torn_down());
    }

    #[tokio::test]
    async fn test_epic_feedback_reaches_subscribers() {
        let kernel = Kernel::create(0, vec![Box::new(ping_pong) as Box<dyn Epic<i32>>]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _sub = kernel
            .subscribe(move |_, action| {
                let _ = tx.send(action.name());
            })
            .unwrap();

        kernel.dispatch(Action::new(PING)).unwrap();

        assert_eq!(rx.recv().await, Some("ping"));
        assert_eq!(rx.recv().await, Some("pong"));
    }

    #[test]
    fn test_builder_rejects_duplicate_epic() {
        let result = Kernel::builder()
            .initial_state(0)
            .named_epic("ping", ping_pong)
            .named_epic("ping", ping_pong)
            .build();
        assert_eq!(
            result.unwrap_err(),
            KernelError::DuplicateEpic("ping".into())
        );
    }

    #[test]
    fn test_isolated_reducer_panic_is_reported() {
        let boom = create_action::<i32>(BOOM).reducer(|_| panic!("bad transition"));
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(0);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        let _errs = kernel
            .subscribe_errors(move |err| e.lock().unwrap().push(err.clone()))
            .unwrap();
        let (seen, obs) = recorder();
        let _sub = kernel.subscribe(obs).unwrap();

        kernel.dispatch(boom.create()).unwrap();
        kernel.dispatch(inc.create()).unwrap();

        assert_eq!(kernel.state(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(0, "boom"), (1, "inc")]);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_propagated_reducer_panic_tears_down() {
        let boom = create_action::<i32>(BOOM).reducer(|_| panic!("bad transition"));
        let kernel = Kernel::builder()
            .initial_state(0)
            .config(KernelConfig::default().with_reducer_panics(ReducerPanicPolicy::Propagate))
            .build()
            .unwrap();
        let _sub = kernel.subscribe(|_, _| {}).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            kernel.dispatch(boom.create())
        }));

        assert!(result.is_err());
        assert!(kernel.is_torn_down());
        assert_eq!(kernel.state(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let kernel = Kernel::new(5);
        let (_, obs) = recorder();
        let _sub = kernel.subscribe(obs).unwrap();

        kernel.shutdown();
        kernel.shutdown();

        assert!(kernel.is_torn_down());
        assert_eq!(kernel.subscriber_count(), 0);
        assert_eq!(kernel.state(), 5);
        assert!(kernel.subscribe_state(|_| {}).is_err());
    }

    #[test]
    fn test_subscribe_state_replays_current() {
        let inc = create_action::<i32>(INC).reducer(|n| n + 1);
        let kernel = Kernel::new(10);
        let states = Arc::new(Mutex::new(Vec::new()));
        let s = states.clone();
        let _state_sub = kernel
            .subscribe_state(move |v| s.lock().unwrap().push(*v))
            .unwrap();
        assert!(!kernel.is_running());

        let _sub = kernel.subscribe(|_, _| {}).unwrap();
        kernel.dispatch(inc.create()).unwrap();

        assert_eq!(*states.lock().unwrap(), vec![10, 11]);
    }
}
