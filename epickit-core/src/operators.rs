//! Stream operators for writing epics
//!
//! - [`EpicStreamExt::of_type`]: keep actions whose tag matches a filter
//! - [`EpicStreamExt::switch_map`]: derive a stream per item, cancelling
//!   the previous derived stream when the next item arrives
//! - [`EpicStreamExt::with_latest_state`]: pair actions with the latest state
//! - [`interval`]: periodic ticks driven by tokio's timer
//!
//! # Example
//!
//! ```ignore
//! use epickit::prelude::*;
//! use std::time::Duration;
//!
//! // On every `start`, tick every 100ms; a new `start` restarts the ticker.
//! let epic = |actions: ActionStream<State>, _states: StateStream<State>| {
//!     actions
//!         .of_type(START)
//!         .switch_map_to(|| interval(Duration::from_millis(100)))
//!         .map(|_| increment.create())
//! };
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::time::{interval_at, Instant, Interval};
use tracing::trace;

use crate::action::Action;
use crate::epic::StateStream;
use crate::filter::ActionFilter;

type Project<T, U> = Box<dyn FnMut(T) -> BoxStream<'static, U> + Send>;

/// Stream returned by [`EpicStreamExt::switch_map`].
///
/// Holds at most one inner stream. When the outer stream yields, the current
/// inner stream is dropped (cancelling any timers or waits it owns) before
/// the next one is created. Ends when the outer stream has ended and the
/// last inner stream has finished.
#[must_use = "streams do nothing unless polled"]
pub struct SwitchMap<T, U> {
    outer: Option<BoxStream<'static, T>>,
    project: Project<T, U>,
    inner: Option<BoxStream<'static, U>>,
}

impl<T, U> SwitchMap<T, U> {
    fn new(outer: BoxStream<'static, T>, project: Project<T, U>) -> Self {
        Self {
            outer: Some(outer),
            project,
            inner: None,
        }
    }

    /// Whether an inner stream is currently active.
    pub fn has_active_inner(&self) -> bool {
        self.inner.is_some()
    }
}

impl<T, U> Stream for SwitchMap<T, U> {
    type Item = U;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<U>> {
        let this = self.get_mut();

        // Drain the outer stream first so only the latest trigger survives.
        while let Some(outer) = this.outer.as_mut() {
            match outer.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    if this.inner.take().is_some() {
                        trace!("switch_map cancelled previous inner stream");
                    }
                    this.inner = Some((this.project)(item));
                }
                Poll::Ready(None) => this.outer = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.outer.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Stream returned by [`EpicStreamExt::with_latest_state`].
///
/// Actions that arrive before any state has been seen are dropped.
#[must_use = "streams do nothing unless polled"]
pub struct WithLatestState<S> {
    actions: BoxStream<'static, Action<S>>,
    states: StateStream<S>,
    latest: Option<S>,
    states_done: bool,
}

// Never pinned structurally; states are only moved in and cloned out.
impl<S> Unpin for WithLatestState<S> {}

impl<S: Clone> Stream for WithLatestState<S> {
    type Item = (Action<S>, S);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            while !this.states_done {
                match Pin::new(&mut this.states).poll_next(cx) {
                    Poll::Ready(Some(state)) => this.latest = Some(state),
                    Poll::Ready(None) => this.states_done = true,
                    Poll::Pending => break,
                }
            }

            match this.actions.as_mut().poll_next(cx) {
                Poll::Ready(Some(action)) => {
                    if let Some(state) = &this.latest {
                        return Poll::Ready(Some((action, state.clone())));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Operators available on every stream used inside an epic.
pub trait EpicStreamExt: Stream + Sized {
    /// Map each item to a new stream, cancelling the previous one.
    ///
    /// At most one derived stream is active at a time.
    fn switch_map<U, F, Inner>(self, mut project: F) -> SwitchMap<Self::Item, U>
    where
        Self: Send + 'static,
        F: FnMut(Self::Item) -> Inner + Send + 'static,
        Inner: Stream<Item = U> + Send + 'static,
    {
        SwitchMap::new(self.boxed(), Box::new(move |item| project(item).boxed()))
    }

    /// Like [`switch_map`](Self::switch_map), ignoring the triggering item.
    fn switch_map_to<U, F, Inner>(self, mut factory: F) -> SwitchMap<Self::Item, U>
    where
        Self: Send + 'static,
        F: FnMut() -> Inner + Send + 'static,
        Inner: Stream<Item = U> + Send + 'static,
    {
        self.switch_map(move |_| factory())
    }

    /// Keep only actions whose tag matches `filter`.
    fn of_type<S>(self, filter: impl Into<ActionFilter>) -> BoxStream<'static, Action<S>>
    where
        Self: Stream<Item = Action<S>> + Send + 'static,
        S: 'static,
    {
        let filter = filter.into();
        self.filter(move |action| futures::future::ready(filter.matches(action)))
            .boxed()
    }

    /// Pair each action with the most recent state from `states`.
    fn with_latest_state<S>(self, states: StateStream<S>) -> WithLatestState<S>
    where
        Self: Stream<Item = Action<S>> + Send + 'static,
        S: Clone + Send + 'static,
    {
        WithLatestState {
            actions: self.boxed(),
            states,
            latest: None,
            states_done: false,
        }
    }
}

impl<T: Stream> EpicStreamExt for T {}

/// Emit `0, 1, 2, ...` every `period`, the first one `period` after the
/// stream is first polled.
///
/// The timer is created lazily, so the stream can be built outside a
/// runtime. Dropping the stream stops the timer.
///
/// # Panics
///
/// Polling panics if `period` is zero.
pub fn interval(period: Duration) -> impl Stream<Item = u64> + Send + 'static {
    stream::unfold(
        (None::<Interval>, 0u64),
        move |(ticker, count)| async move {
            let mut ticker = ticker.unwrap_or_else(|| interval_at(Instant::now() + period, period));
            ticker.tick().await;
            Some((count, (Some(ticker), count + 1)))
        },
    )
}
