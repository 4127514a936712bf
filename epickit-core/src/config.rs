//! Kernel configuration

use serde::{Deserialize, Serialize};

use crate::logger::ActionLoggerConfig;

/// What the reducer stage does when a transition function panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducerPanicPolicy {
    /// Keep the previous state, forward the action, and report
    /// [`KernelError::ReducerPanicked`](crate::KernelError::ReducerPanicked)
    /// to error observers. The kernel keeps running.
    #[default]
    Isolate,
    /// Tear the kernel down and resume the panic in the dispatching caller.
    Propagate,
}

/// Configuration for a [`Kernel`](crate::Kernel).
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```
/// use epickit_core::{KernelConfig, ReducerPanicPolicy};
///
/// let config = KernelConfig::from_json_str(r#"{ "name": "counter", "log_actions": true }"#)
///     .unwrap();
/// assert_eq!(config.name, "counter");
/// assert!(config.log_actions);
/// assert_eq!(config.reducer_panics, ReducerPanicPolicy::Isolate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Name reported in tracing output.
    pub name: String,
    /// Reducer failure policy.
    pub reducer_panics: ReducerPanicPolicy,
    /// Install a tracing-only action logger ahead of user middleware.
    pub log_actions: bool,
    /// Filter for the action logger.
    pub logger: ActionLoggerConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "epickit".to_string(),
            reducer_panics: ReducerPanicPolicy::default(),
            log_actions: false,
            logger: ActionLoggerConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Set the name reported in tracing output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the reducer failure policy.
    pub fn with_reducer_panics(mut self, policy: ReducerPanicPolicy) -> Self {
        self.reducer_panics = policy;
        self
    }
}
