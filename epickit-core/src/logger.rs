//! Action logging middleware
//!
//! [`ActionLoggerMiddleware`] reports every reduced action through
//! `tracing` and can keep the most recent ones in an [`ActionLog`], which
//! tests and tools read back through an [`ActionLogHandle`].
//!
//! ```
//! use epickit_core::prelude::*;
//! use epickit_core::{ActionLoggerConfig, ActionLoggerMiddleware};
//!
//! const ADD: ActionType = ActionType::new("add");
//!
//! let logger = ActionLoggerMiddleware::with_log(ActionLoggerConfig::default(), 32);
//! let log = logger.log_handle().expect("storage enabled");
//!
//! let kernel = Kernel::builder().initial_state(0).middleware(logger).build()?;
//! let _sub = kernel.subscribe(|_, _| {})?;
//! kernel.dispatch(create_action(ADD).reducer(|n: &i32| n + 2).create())?;
//!
//! assert_eq!(log.entries()[0].name, "add");
//! assert_eq!(log.entries()[0].state_changed, Some(true));
//! # Ok::<(), KernelError>(())
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::action::Action;
use crate::broadcast::lock;
use crate::middleware::Middleware;

/// Which action names get logged.
///
/// Both lists hold glob patterns where `*` matches any run of characters
/// and `?` matches one. An empty `include` admits every name; `exclude` is
/// applied afterwards. Untagged actions are matched as `<anonymous>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionLoggerConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ActionLoggerConfig {
    /// Build from comma-separated pattern lists.
    ///
    /// ```
    /// use epickit_core::ActionLoggerConfig;
    ///
    /// let config = ActionLoggerConfig::new(Some("did_*, start_counting"), Some("did_fail*"));
    /// assert!(config.should_log("did_load"));
    /// assert!(config.should_log("start_counting"));
    /// assert!(!config.should_log("did_fail_load"));
    /// assert!(!config.should_log("increment"));
    /// ```
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: include.map(split_patterns).unwrap_or_default(),
            exclude: exclude.map(split_patterns).unwrap_or_default(),
        }
    }

    /// Whether an action called `name` passes the filter.
    pub fn should_log(&self, name: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| glob_match(p, name));
        included && !self.exclude.iter().any(|p| glob_match(p, name))
    }
}

fn split_patterns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn glob_match(pattern: &str, name: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let segments: Vec<Vec<char>> = pattern.split('*').map(|s| s.chars().collect()).collect();

    let Some((first, rest)) = segments.split_first() else {
        return name.is_empty();
    };
    let Some((last, middle)) = rest.split_last() else {
        // no `*` at all
        return segment_fits(&name, first);
    };

    if name.len() < first.len() || !segment_fits(&name[..first.len()], first) {
        return false;
    }
    let mut pos = first.len();
    // segments are fixed width, so the leftmost fit is always safe
    for segment in middle {
        let width = segment.len();
        let found = (pos..=name.len())
            .take_while(|at| at + width <= name.len())
            .find(|&at| segment_fits(&name[at..at + width], segment));
        match found {
            Some(at) => pos = at + width,
            None => return false,
        }
    }
    name.len() >= pos + last.len() && segment_fits(&name[name.len() - last.len()..], last)
}

fn segment_fits(text: &[char], segment: &[char]) -> bool {
    text.len() == segment.len() && text.iter().zip(segment).all(|(t, s)| *s == '?' || s == t)
}

/// One reduced action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionLogEntry {
    /// Monotonic across the log's lifetime, including evicted entries.
    pub sequence: u64,
    pub name: &'static str,
    pub payload_type: Option<&'static str>,
    pub has_reducer: bool,
    /// `None` until the reducer stage has run for this action.
    pub state_changed: Option<bool>,
    #[serde(skip)]
    pub recorded_at: Instant,
}

impl ActionLogEntry {
    fn new<S>(action: &Action<S>, sequence: u64) -> Self {
        Self {
            sequence,
            name: action.name(),
            payload_type: action.raw_payload().map(|p| p.type_name()),
            has_reducer: action.has_reducer(),
            state_changed: None,
            recorded_at: Instant::now(),
        }
    }

    /// Time since the entry was recorded.
    pub fn age(&self) -> Duration {
        self.recorded_at.elapsed()
    }
}

/// Bounded history of reduced actions; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct ActionLog {
    entries: VecDeque<ActionLogEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl ActionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 0,
        }
    }

    /// Append an entry for `action` and return its sequence number.
    pub fn record<S>(&mut self, action: &Action<S>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if self.capacity == 0 {
            return sequence;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(ActionLogEntry::new(action, sequence));
        sequence
    }

    /// Fill in the reduction outcome of entry `sequence`, if still held.
    pub fn set_state_changed(&mut self, sequence: u64, changed: bool) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.sequence == sequence) {
            entry.state_changed = Some(changed);
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter()
    }

    /// Newest first, at most `count`.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionLogEntry> {
        self.entries.iter().rev().take(count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, oldest first, as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }
}

/// Shared access to the log of an [`ActionLoggerMiddleware`] that has
/// already moved into a kernel.
#[derive(Debug, Clone)]
pub struct ActionLogHandle {
    log: Arc<Mutex<ActionLog>>,
}

impl ActionLogHandle {
    pub fn entries(&self) -> Vec<ActionLogEntry> {
        lock(&self.log).entries().cloned().collect()
    }

    pub fn recent(&self, count: usize) -> Vec<ActionLogEntry> {
        lock(&self.log).recent(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.log).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.log).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.log).clear();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        lock(&self.log).to_json()
    }
}

/// Logs actions that pass its [`ActionLoggerConfig`] at `debug` level, and
/// optionally stores them.
#[derive(Debug, Clone)]
pub struct ActionLoggerMiddleware {
    filter: ActionLoggerConfig,
    log: Option<ActionLogHandle>,
    // sequence of the stored entry awaiting its `after` hook
    pending: Option<u64>,
}

impl ActionLoggerMiddleware {
    /// Tracing output only.
    pub fn new(filter: ActionLoggerConfig) -> Self {
        Self {
            filter,
            log: None,
            pending: None,
        }
    }

    /// Tracing output plus an [`ActionLog`] holding the last `capacity`
    /// logged actions.
    pub fn with_log(filter: ActionLoggerConfig, capacity: usize) -> Self {
        Self {
            filter,
            log: Some(ActionLogHandle {
                log: Arc::new(Mutex::new(ActionLog::with_capacity(capacity))),
            }),
            pending: None,
        }
    }

    /// Handle to the stored log, if storage is enabled.
    pub fn log_handle(&self) -> Option<ActionLogHandle> {
        self.log.clone()
    }

    pub fn filter(&self) -> &ActionLoggerConfig {
        &self.filter
    }
}

impl<S> Middleware<S> for ActionLoggerMiddleware {
    fn before(&mut self, action: &Action<S>) {
        self.pending = None;
        let name = action.name();
        if !self.filter.should_log(name) {
            return;
        }
        debug!(action = %name, has_reducer = action.has_reducer(), "action");
        if let Some(handle) = &self.log {
            self.pending = Some(lock(&handle.log).record(action));
        }
    }

    fn after(&mut self, action: &Action<S>, state_changed: bool) {
        let Some(sequence) = self.pending.take() else {
            return;
        };
        trace!(action = %action.name(), state_changed, "action reduced");
        if let Some(handle) = &self.log {
            lock(&handle.log).set_state_changed(sequence, state_changed);
        }
    }
}
