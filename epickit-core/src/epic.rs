//! Epics: long-lived action processors
//!
//! An epic receives the stream of processed actions and the stream of
//! states, and returns a stream of new actions that are fed back into the
//! kernel. Epics are started once per kernel execution and share it: every
//! subscriber of the kernel observes the same epic outputs.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::action::Action;
use crate::broadcast::Broadcaster;
use crate::channel::QueueingChannel;
use crate::error::{KernelError, Result};
use crate::reducer::Transition;
use crate::store::StateStore;
use crate::subscription::Subscription;

/// The stream an epic returns.
pub type EpicOutput<S> = BoxStream<'static, Action<S>>;

/// Actions as seen by an epic, after the reducer has processed them.
///
/// Ends when the kernel's execution stops.
pub struct ActionStream<S> {
    inner: UnboundedReceiverStream<Action<S>>,
}

impl<S> ActionStream<S> {
    /// Wrap a receiver. Useful for driving an epic directly in tests.
    pub fn new(rx: mpsc::UnboundedReceiver<Action<S>>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

impl<S> Stream for ActionStream<S> {
    type Item = Action<S>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// States as seen by an epic: the state current when the epic started,
/// then every state the reducer produces.
pub struct StateStream<S> {
    inner: UnboundedReceiverStream<S>,
}

impl<S> StateStream<S> {
    /// Wrap a receiver. Useful for driving an epic directly in tests.
    pub fn new(rx: mpsc::UnboundedReceiver<S>) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(rx),
        }
    }
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// A function from (actions, states) to new actions.
///
/// Implemented for any `Fn(ActionStream<S>, StateStream<S>) -> impl Stream`:
///
/// ```ignore
/// let echo = |actions: ActionStream<State>, _states: StateStream<State>| {
///     actions.of_type(PING).map(|_| pong.create())
/// };
/// ```
pub trait Epic<S>: Send + Sync {
    /// Build the epic's output stream.
    fn run(&self, actions: ActionStream<S>, states: StateStream<S>) -> EpicOutput<S>;
}

impl<S, F, O> Epic<S> for F
where
    S: 'static,
    F: Fn(ActionStream<S>, StateStream<S>) -> O + Send + Sync,
    O: Stream<Item = Action<S>> + Send + 'static,
{
    fn run(&self, actions: ActionStream<S>, states: StateStream<S>) -> EpicOutput<S> {
        self(actions, states).boxed()
    }
}

struct NamedEpic<S> {
    name: String,
    epic: Box<dyn Epic<S>>,
}

/// The set of epics of a kernel, in registration order.
pub struct EpicRunner<S> {
    epics: Vec<NamedEpic<S>>,
}

impl<S> Default for EpicRunner<S> {
    fn default() -> Self {
        Self { epics: Vec::new() }
    }
}

impl<S> fmt::Debug for EpicRunner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpicRunner")
            .field("epics", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl<S> EpicRunner<S> {
    /// Create an empty runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner holding `epics`, named `epic-0`, `epic-1`, ... in order.
    pub fn numbered(epics: impl IntoIterator<Item = Box<dyn Epic<S>>>) -> Self {
        let epics = epics
            .into_iter()
            .enumerate()
            .map(|(index, epic)| NamedEpic {
                name: format!("epic-{index}"),
                epic,
            })
            .collect();
        Self { epics }
    }

    /// Register an epic under `name`.
    pub fn add<E>(&mut self, name: impl Into<String>, epic: E) -> Result<()>
    where
        E: Epic<S> + 'static,
    {
        self.add_boxed(name, Box::new(epic))
    }

    /// Register an already boxed epic under `name`.
    pub fn add_boxed(&mut self, name: impl Into<String>, epic: Box<dyn Epic<S>>) -> Result<()> {
        let name = name.into();
        if self.epics.iter().any(|e| e.name == name) {
            return Err(KernelError::DuplicateEpic(name));
        }
        self.epics.push(NamedEpic { name, epic });
        Ok(())
    }

    /// Number of registered epics.
    pub fn len(&self) -> usize {
        self.epics.len()
    }

    /// Whether no epic is registered.
    pub fn is_empty(&self) -> bool {
        self.epics.is_empty()
    }

    /// Epic names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.epics.iter().map(|e| e.name.as_str())
    }
}

impl<S> EpicRunner<S>
where
    S: Clone + Send + 'static,
{
    /// Start every epic.
    ///
    /// Each epic gets its own feed of `transitions` and `store`; their
    /// outputs are merged and pushed into `channel` by a single driver task.
    /// Fails with [`KernelError::NoRuntime`] before touching anything if
    /// there are epics but no current tokio runtime.
    pub(crate) fn start(
        &self,
        transitions: &Broadcaster<Transition<S>>,
        store: &StateStore<S>,
        channel: &QueueingChannel<Action<S>>,
        kernel: &str,
    ) -> Result<RunningEpics> {
        if self.epics.is_empty() {
            return Ok(RunningEpics::idle());
        }
        let handle = Handle::try_current().map_err(|_| KernelError::NoRuntime)?;

        let mut feeds = Vec::with_capacity(self.epics.len() * 2);
        let mut outputs = Vec::with_capacity(self.epics.len());
        for entry in &self.epics {
            let (action_tx, action_rx) = mpsc::unbounded_channel();
            feeds.push(transitions.subscribe(move |t: &Transition<S>| {
                let _ = action_tx.send(t.action.clone());
            }));
            let (state_tx, state_rx) = mpsc::unbounded_channel();
            feeds.push(store.subscribe(move |state: &S| {
                let _ = state_tx.send(state.clone());
            }));

            let kernel = kernel.to_string();
            let epic = entry.name.clone();
            let output = entry
                .epic
                .run(ActionStream::new(action_rx), StateStream::new(state_rx))
                .inspect(move |action| {
                    debug!(%kernel, %epic, action = %action.name(), "epic emitted action");
                });
            outputs.push(output.boxed());
        }

        let cancel = CancellationToken::new();
        let driver = handle.spawn(drive(
            futures::stream::select_all(outputs),
            channel.clone(),
            cancel.clone(),
            kernel.to_string(),
        ));
        info!(kernel, epics = self.epics.len(), "epics started");

        Ok(RunningEpics {
            feeds,
            driver: Some(driver),
            cancel,
        })
    }
}

/// Feed merged epic output back into the channel until cancelled or every
/// epic has completed.
async fn drive<S>(
    mut merged: futures::stream::SelectAll<EpicOutput<S>>,
    channel: QueueingChannel<Action<S>>,
    cancel: CancellationToken,
    kernel: String,
) where
    S: 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%kernel, "epic driver cancelled");
                break;
            }
            next = merged.next() => match next {
                Some(action) => {
                    if cancel.is_cancelled() || !channel.push(action) {
                        break;
                    }
                }
                None => {
                    debug!(%kernel, "all epics completed");
                    break;
                }
            }
        }
    }
}

/// Handle to the epics of a running execution. Stops them when dropped.
pub(crate) struct RunningEpics {
    feeds: Vec<Subscription>,
    driver: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RunningEpics {
    fn idle() -> Self {
        Self {
            feeds: Vec::new(),
            driver: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel the driver and close every epic's input streams.
    ///
    /// Dropping the driver drops the epic output streams, and with them any
    /// timers they own.
    pub(crate) fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.feeds.clear();
    }
}

impl Drop for RunningEpics {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;
    use crate::operators::EpicStreamExt;

    const PING: ActionType = ActionType::new("ping");
    const PONG: ActionType = ActionType::new("pong");

    fn ping_pong(actions: ActionStream<i32>, _states: StateStream<i32>) -> EpicOutput<i32> {
        actions.of_type(PING).map(|_| Action::new(PONG)).boxed()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut runner = EpicRunner::<i32>::new();
        runner.add("ping", ping_pong).unwrap();

        assert_eq!(
            runner.add("ping", ping_pong),
            Err(KernelError::DuplicateEpic("ping".into()))
        );
        assert_eq!(runner.len(), 1);
        assert_eq!(runner.names().collect::<Vec<_>>(), vec!["ping"]);
    }

    #[test]
    fn test_numbered_names_and_debug() {
        // Debug and the accessors need no bounds on the state type
        struct Opaque;
        let never = |_: ActionStream<Opaque>, _: StateStream<Opaque>| futures::stream::empty::<Action<Opaque>>();
        let epics: Vec<Box<dyn Epic<Opaque>>> = vec![Box::new(never), Box::new(never)];
        let runner = EpicRunner::numbered(epics);

        assert_eq!(runner.names().collect::<Vec<_>>(), vec!["epic-0", "epic-1"]);
        assert_eq!(format!("{runner:?}"), r#"EpicRunner { epics: ["epic-0", "epic-1"] }"#);
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let mut runner = EpicRunner::<i32>::new();
        runner.add("ping", ping_pong).unwrap();
        let transitions = Broadcaster::new();
        let store = StateStore::new(0);
        let channel = QueueingChannel::new();

        let result = runner.start(&transitions, &store, &channel, "test");

        assert!(matches!(result, Err(KernelError::NoRuntime)));
        assert_eq!(transitions.observer_count(), 0);
    }

    #[test]
    fn test_empty_runner_needs_no_runtime() {
        let runner = EpicRunner::<i32>::new();
        let result = runner.start(
            &Broadcaster::new(),
            &StateStore::new(0),
            &QueueingChannel::new(),
            "test",
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_epic_output_is_pushed_into_channel() {
        let mut runner = EpicRunner::<i32>::new();
        runner.add("ping", ping_pong).unwrap();
        let transitions = Broadcaster::new();
        let store = StateStore::new(0);
        let channel = QueueingChannel::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sink = channel.subscribe(move |a: &Action<i32>| {
            let _ = tx.send(a.name());
        });

        let _running = runner.start(&transitions, &store, &channel, "test").unwrap();
        transitions.emit(Transition {
            state: 0,
            action: Action::new(PING),
        });

        assert_eq!(rx.recv().await, Some("pong"));
    }

    #[tokio::test]
    async fn test_stop_closes_epic_inputs() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let mut runner = EpicRunner::<i32>::new();
        runner
            .add("watch", move |actions: ActionStream<i32>, _: StateStream<i32>| {
                let done = done_tx.clone();
                actions
                    .filter(|_| futures::future::ready(false))
                    .chain(futures::stream::once(async move {
                        let _ = done.send(());
                        Action::new(PONG)
                    }))
            })
            .unwrap();
        let transitions = Broadcaster::new();
        let store = StateStore::new(0);
        let channel = QueueingChannel::new();

        let mut running = runner.start(&transitions, &store, &channel, "test").unwrap();
        assert_eq!(transitions.observer_count(), 1);
        assert_eq!(store.subscriber_count(), 1);

        running.stop();

        assert_eq!(transitions.observer_count(), 0);
        assert_eq!(store.subscriber_count(), 0);
        // the driver is gone, so the epic never reaches its tail
        tokio::task::yield_now().await;
        assert!(done_rx.try_recv().is_err());
    }
}
