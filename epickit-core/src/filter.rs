//! Action filtering by type tag

use crate::action::{Action, ActionKind, ActionType};

/// Selects actions by tag: either one tag, or membership in a set of tags.
///
/// Untagged actions never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFilter {
    /// Match a single tag.
    One(ActionType),
    /// Match any tag in the set.
    Any(Vec<ActionType>),
}

impl ActionFilter {
    /// Check an action against the filter.
    pub fn matches<S>(&self, action: &Action<S>) -> bool {
        match action.kind() {
            Some(kind) => self.matches_type(kind),
            None => false,
        }
    }

    /// Check a bare tag against the filter.
    pub fn matches_type(&self, kind: ActionType) -> bool {
        match self {
            ActionFilter::One(expected) => *expected == kind,
            ActionFilter::Any(set) => set.contains(&kind),
        }
    }
}

// Any ActionKind converts, so derived enums and bare tags are interchangeable.
impl<K: ActionKind> From<K> for ActionFilter {
    fn from(kind: K) -> Self {
        ActionFilter::One(kind.action_type())
    }
}

impl<K: ActionKind> From<Vec<K>> for ActionFilter {
    fn from(kinds: Vec<K>) -> Self {
        ActionFilter::Any(kinds.iter().map(ActionKind::action_type).collect())
    }
}

impl<K: ActionKind> From<&[K]> for ActionFilter {
    fn from(kinds: &[K]) -> Self {
        ActionFilter::Any(kinds.iter().map(ActionKind::action_type).collect())
    }
}

impl<K: ActionKind, const N: usize> From<[K; N]> for ActionFilter {
    fn from(kinds: [K; N]) -> Self {
        ActionFilter::Any(kinds.iter().map(ActionKind::action_type).collect())
    }
}

/// Build a reusable predicate selecting actions by tag or tag set.
///
/// ```
/// use epickit_core::{filter_action, Action, ActionType};
///
/// const A: ActionType = ActionType::new("a");
/// const B: ActionType = ActionType::new("b");
/// const C: ActionType = ActionType::new("c");
///
/// let only_a = filter_action(A);
/// let a_or_b = filter_action([A, B]);
///
/// assert!(only_a(&Action::<()>::new(A)));
/// assert!(!only_a(&Action::<()>::new(B)));
/// assert!(a_or_b(&Action::<()>::new(B)));
/// assert!(!a_or_b(&Action::<()>::new(C)));
/// ```
pub fn filter_action<S: 'static>(
    filter: impl Into<ActionFilter>,
) -> impl Fn(&Action<S>) -> bool + Clone + Send + Sync + 'static {
    let filter = filter.into();
    move |action| filter.matches(action)
}
