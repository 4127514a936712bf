//! Actions and action creators
//!
//! An [`Action`] is an immutable value with an optional type tag, an optional
//! payload and an optional transition function. The transition function
//! travels with the action, so the reducer stage never looks anything up:
//! an action either carries the function that reduces it, or it never
//! changes state.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Identifier for a kind of action.
///
/// Compared by value. Names must be unique within an application; two
/// `ActionType`s with the same name are the same type.
///
/// ```
/// use epickit_core::ActionType;
///
/// const START: ActionType = ActionType::new("start");
/// assert_eq!(START, ActionType::new("start"));
/// assert_eq!(START.name(), "start");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct ActionType(&'static str);

impl ActionType {
    /// Create an action type from a unique name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The type's name.
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A closed set of action kinds, usually an enum.
///
/// Use `#[derive(ActionKind)]` from `epickit-macros` to implement this for a
/// fieldless enum.
pub trait ActionKind: Copy {
    /// The identifier for this kind.
    fn action_type(&self) -> ActionType;
}

impl ActionKind for ActionType {
    fn action_type(&self) -> ActionType {
        *self
    }
}

/// Name reported for actions without a type tag.
pub const ANONYMOUS: &str = "<anonymous>";

/// Type-erased transition function, with any payload already bound.
pub type ReduceFn<S> = Arc<dyn Fn(&S) -> S + Send + Sync>;

/// Type-erased payload attached to an action.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    fn new<P: Send + Sync + 'static>(value: Arc<P>) -> Self {
        Self {
            value,
            type_name: std::any::type_name::<P>(),
        }
    }

    /// Borrow the payload as `P`, if that is its type.
    pub fn downcast_ref<P: 'static>(&self) -> Option<&P> {
        self.value.downcast_ref::<P>()
    }

    /// Name of the payload's concrete type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload<{}>", self.type_name)
    }
}

/// An intent to change state.
///
/// Cloning is cheap: the payload and transition function are shared.
pub struct Action<S> {
    kind: Option<ActionType>,
    payload: Option<Payload>,
    reducer: Option<ReduceFn<S>>,
}

impl<S> Action<S> {
    /// A tagged action with no payload and no transition function.
    pub fn new(kind: impl Into<ActionType>) -> Self {
        Self {
            kind: Some(kind.into()),
            payload: None,
            reducer: None,
        }
    }

    /// An untagged action that only carries a transition function.
    pub fn anonymous<F>(reducer: F) -> Self
    where
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        Self {
            kind: None,
            payload: None,
            reducer: Some(Arc::new(reducer)),
        }
    }

    /// The action's type tag, if any.
    pub fn kind(&self) -> Option<ActionType> {
        self.kind
    }

    /// Name for logging: the tag name, or `<anonymous>`.
    pub fn name(&self) -> &'static str {
        self.kind.map(|k| k.name()).unwrap_or(ANONYMOUS)
    }

    /// Whether the action is tagged with `kind`.
    pub fn is(&self, kind: impl Into<ActionType>) -> bool {
        self.kind == Some(kind.into())
    }

    /// The raw payload, if any.
    pub fn raw_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Borrow the payload as `P`.
    ///
    /// Returns `None` if there is no payload or it has a different type.
    pub fn payload<P: 'static>(&self) -> Option<&P> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<P>())
    }

    /// Whether the action carries a transition function.
    pub fn has_reducer(&self) -> bool {
        self.reducer.is_some()
    }

    /// Apply the transition function to `state`.
    ///
    /// Returns `None` when the action has no transition function.
    pub fn reduce(&self, state: &S) -> Option<S> {
        self.reducer.as_ref().map(|r| r(state))
    }
}

impl<S> Clone for Action<S> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            payload: self.payload.clone(),
            reducer: self.reducer.clone(),
        }
    }
}

impl<S> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .field("has_reducer", &self.reducer.is_some())
            .finish()
    }
}

/// Factory for actions without a payload.
///
/// Covers three shapes: tag only, tag with transition function, and
/// transition function only (anonymous).
///
/// ```
/// use epickit_core::{create_action, ActionType};
///
/// const INC: ActionType = ActionType::new("inc");
/// let inc = create_action::<i32>(INC).reducer(|n| n + 1);
///
/// let action = inc.create();
/// assert!(action.is(INC));
/// assert_eq!(action.reduce(&1), Some(2));
/// ```
pub struct ActionCreator<S> {
    kind: Option<ActionType>,
    reducer: Option<ReduceFn<S>>,
}

impl<S> ActionCreator<S> {
    /// Creator for tagged actions.
    pub fn new(kind: impl Into<ActionType>) -> Self {
        Self {
            kind: Some(kind.into()),
            reducer: None,
        }
    }

    /// Creator for untagged actions carrying `reducer`.
    pub fn anonymous<F>(reducer: F) -> Self
    where
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        Self {
            kind: None,
            reducer: Some(Arc::new(reducer)),
        }
    }

    /// Attach a transition function.
    pub fn reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&S) -> S + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    /// The tag stamped on created actions.
    pub fn kind(&self) -> Option<ActionType> {
        self.kind
    }

    /// Build an action.
    pub fn create(&self) -> Action<S> {
        Action {
            kind: self.kind,
            payload: None,
            reducer: self.reducer.clone(),
        }
    }
}

impl<S> Clone for ActionCreator<S> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            reducer: self.reducer.clone(),
        }
    }
}

impl<S> fmt::Debug for ActionCreator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCreator")
            .field("kind", &self.kind)
            .field("has_reducer", &self.reducer.is_some())
            .finish()
    }
}

type PayloadReduceFn<S, P> = Arc<dyn Fn(&S, &P) -> S + Send + Sync>;

/// Factory for actions carrying a payload of type `P`.
///
/// The transition function, if any, receives the payload; it is bound into
/// the created action so the reducer stage only ever sees `Fn(&S) -> S`.
pub struct PayloadActionCreator<S, P> {
    kind: Option<ActionType>,
    reducer: Option<PayloadReduceFn<S, P>>,
    _marker: PhantomData<fn(P)>,
}

impl<S, P> PayloadActionCreator<S, P>
where
    S: 'static,
    P: Send + Sync + 'static,
{
    /// Creator for tagged payload actions.
    pub fn new(kind: impl Into<ActionType>) -> Self {
        Self {
            kind: Some(kind.into()),
            reducer: None,
            _marker: PhantomData,
        }
    }

    /// Creator for untagged payload actions carrying `reducer`.
    pub fn anonymous<F>(reducer: F) -> Self
    where
        F: Fn(&S, &P) -> S + Send + Sync + 'static,
    {
        Self {
            kind: None,
            reducer: Some(Arc::new(reducer)),
            _marker: PhantomData,
        }
    }

    /// Attach a transition function.
    pub fn reducer<F>(mut self, reducer: F) -> Self
    where
        F: Fn(&S, &P) -> S + Send + Sync + 'static,
    {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    /// The tag stamped on created actions.
    pub fn kind(&self) -> Option<ActionType> {
        self.kind
    }

    /// Build an action carrying `payload`.
    pub fn create(&self, payload: P) -> Action<S> {
        let payload = Arc::new(payload);
        let reducer = self.reducer.clone().map(|r| {
            let bound = Arc::clone(&payload);
            Arc::new(move |state: &S| r(state, &bound)) as ReduceFn<S>
        });
        Action {
            kind: self.kind,
            payload: Some(Payload::new(payload)),
            reducer,
        }
    }
}

impl<S, P> Clone for PayloadActionCreator<S, P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            reducer: self.reducer.clone(),
            _marker: PhantomData,
        }
    }
}

impl<S, P> fmt::Debug for PayloadActionCreator<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadActionCreator")
            .field("kind", &self.kind)
            .field("payload", &std::any::type_name::<P>())
            .field("has_reducer", &self.reducer.is_some())
            .finish()
    }
}

/// Creator for tagged actions. Chain `.reducer(..)` to attach a transition.
pub fn create_action<S>(kind: impl Into<ActionType>) -> ActionCreator<S> {
    ActionCreator::new(kind)
}

/// Creator for untagged actions that only carry a transition function.
pub fn create_anonymous_action<S, F>(reducer: F) -> ActionCreator<S>
where
    F: Fn(&S) -> S + Send + Sync + 'static,
{
    ActionCreator::anonymous(reducer)
}

/// Creator for tagged actions carrying a payload.
pub fn create_action_with_payload<S, P>(kind: impl Into<ActionType>) -> PayloadActionCreator<S, P>
where
    S: 'static,
    P: Send + Sync + 'static,
{
    PayloadActionCreator::new(kind)
}

/// Creator for untagged actions whose transition function takes a payload.
pub fn create_anonymous_action_with_payload<S, P, F>(reducer: F) -> PayloadActionCreator<S, P>
where
    S: 'static,
    P: Send + Sync + 'static,
    F: Fn(&S, &P) -> S + Send + Sync + 'static,
{
    PayloadActionCreator::anonymous(reducer)
}
