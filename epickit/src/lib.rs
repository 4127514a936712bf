//! epickit: reactive state management with serialized actions and epics
//!
//! Actions are reduced one at a time, in the order they were dispatched.
//! Epics watch the processed actions and states and answer with new actions,
//! which re-enter the same ordered queue.
//!
//! # Example
//! ```ignore
//! use epickit::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(ActionKind, Clone, Copy, Debug, PartialEq, Eq)]
//! enum CounterAction {
//!     StartCounting,
//!     Increment,
//! }
//!
//! #[derive(Clone, Debug)]
//! struct Counter {
//!     count: u32,
//! }
//!
//! let increment = create_action::<Counter>(CounterAction::Increment)
//!     .reducer(|s| Counter { count: s.count + 1 });
//!
//! let kernel = Kernel::builder()
//!     .initial_state(Counter { count: 1 })
//!     .named_epic("counting", move |actions: ActionStream<Counter>, _: StateStream<Counter>| {
//!         let increment = increment.clone();
//!         actions
//!             .of_type(CounterAction::StartCounting)
//!             .switch_map_to(|| interval(Duration::from_millis(100)))
//!             .map(move |_| increment.create())
//!     })
//!     .build()?;
//! ```

// Re-export everything from core
pub use epickit_core::*;

// Re-export derive macros
pub use epickit_macros::ActionKind;

/// Prelude for convenient imports
pub mod prelude {
    pub use epickit_core::prelude::*;

    // Derive macros
    pub use epickit_macros::ActionKind;
}
