//! Core kernel for epickit
//!
//! This crate provides the building blocks of a reactive state container:
//! actions that carry their own transition functions, a queueing channel
//! that buffers actions until the first listener attaches, a replaying
//! state store, and epics that turn observed actions into new actions.
//!
//! # Core Concepts
//!
//! - **Action**: an optionally tagged intent, optionally carrying a payload
//!   and a transition function `S -> S`
//! - **Kernel**: owns the state; reduces dispatched actions in order and
//!   emits a `(state, action)` transition for each
//! - **Epic**: a function from (actions, states) to a stream of new actions,
//!   fed back into the kernel
//! - **Middleware**: hooks around every reduction (logging, metrics)
//!
//! # Basic Example
//!
//! ```
//! use epickit_core::prelude::*;
//!
//! const INCREMENT: ActionType = ActionType::new("increment");
//! const ADD: ActionType = ActionType::new("add");
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Counter {
//!     count: i32,
//! }
//!
//! let increment = create_action::<Counter>(INCREMENT).reducer(|s| Counter { count: s.count + 1 });
//! let add = create_action_with_payload::<Counter, i32>(ADD)
//!     .reducer(|s, n| Counter { count: s.count + n });
//!
//! let kernel = Kernel::new(Counter { count: 0 });
//! let _sub = kernel.subscribe(|state, action| {
//!     println!("{} -> {:?}", action.name(), state);
//! })?;
//!
//! kernel.dispatch(increment.create())?;
//! kernel.dispatch(add.create(10))?;
//! assert_eq!(kernel.state(), Counter { count: 11 });
//! # Ok::<(), KernelError>(())
//! ```
//!
//! # Epics
//!
//! Epics run on tokio. Their output re-enters the kernel like any other
//! dispatch, so one action can trigger a chain of further actions.
//!
//! ```ignore
//! use epickit_core::prelude::*;
//! use std::time::Duration;
//!
//! // On `start_counting`, increment every 100ms. A second `start_counting`
//! // restarts the timer instead of adding another one.
//! let counting = move |actions: ActionStream<Counter>, _: StateStream<Counter>| {
//!     let increment = increment.clone();
//!     actions
//!         .of_type(START_COUNTING)
//!         .switch_map_to(|| interval(Duration::from_millis(100)))
//!         .map(move |_| increment.create())
//! };
//!
//! let kernel = Kernel::builder()
//!     .initial_state(Counter { count: 1 })
//!     .named_epic("counting", counting)
//!     .build()?;
//! ```

pub mod action;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod epic;
pub mod error;
pub mod filter;
pub mod kernel;
pub mod logger;
pub mod middleware;
pub mod operators;
pub mod reducer;
pub mod store;
pub mod subscription;
pub mod testing;

// Actions
pub use action::{
    create_action, create_action_with_payload, create_anonymous_action,
    create_anonymous_action_with_payload, Action, ActionCreator, ActionKind, ActionType, Payload,
    PayloadActionCreator, ReduceFn, ANONYMOUS,
};
pub use filter::{filter_action, ActionFilter};

// Primitives
pub use broadcast::{Broadcaster, ObserverId};
pub use channel::QueueingChannel;
pub use store::StateStore;
pub use subscription::Subscription;

// Kernel
pub use config::{KernelConfig, ReducerPanicPolicy};
pub use epic::{ActionStream, Epic, EpicOutput, EpicRunner, StateStream};
pub use error::{KernelError, Result};
pub use kernel::{Kernel, KernelBuilder};
pub use reducer::Transition;

// Middleware
pub use logger::{
    ActionLog, ActionLogEntry, ActionLogHandle, ActionLoggerConfig, ActionLoggerMiddleware,
};
pub use middleware::{ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware};

// Epic operators
pub use operators::{interval, EpicStreamExt, SwitchMap, WithLatestState};

// Testing exports
pub use testing::TransitionRecorder;

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{
        create_action, create_action_with_payload, create_anonymous_action,
        create_anonymous_action_with_payload, Action, ActionCreator, ActionKind, ActionType,
        PayloadActionCreator,
    };
    pub use crate::epic::{ActionStream, Epic, EpicOutput, StateStream};
    pub use crate::error::KernelError;
    pub use crate::filter::{filter_action, ActionFilter};
    pub use crate::kernel::{Kernel, KernelBuilder};
    pub use crate::middleware::{ComposedMiddleware, LoggingMiddleware, Middleware, NoopMiddleware};
    pub use crate::operators::{interval, EpicStreamExt};
    pub use crate::subscription::Subscription;
    pub use crate::{KernelConfig, ReducerPanicPolicy, Transition};

    // Stream combinators used by nearly every epic
    pub use futures::stream::{Stream, StreamExt};
}
