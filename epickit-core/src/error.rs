//! Error types for the kernel

use thiserror::Error;

/// Errors raised while building or driving a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// The builder was finished without an initial state.
    #[error("kernel requires an initial state")]
    MissingInitialState,

    /// Two epics were registered under the same name.
    #[error("epic `{0}` is registered more than once")]
    DuplicateEpic(String),

    /// Epics need a tokio runtime to be driven, and none was current.
    #[error("epics require a running tokio runtime")]
    NoRuntime,

    /// The kernel's shared execution has ended.
    #[error("kernel has been torn down")]
    TornDown,

    /// A transition function panicked while computing the next state.
    #[error("reducer for action `{action}` panicked: {message}")]
    ReducerPanicked {
        /// Name of the action whose reducer failed.
        action: &'static str,
        /// Panic message, if one could be extracted.
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            KernelError::DuplicateEpic("ticker".into()).to_string(),
            "epic `ticker` is registered more than once"
        );
        let err = KernelError::ReducerPanicked {
            action: "increment",
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "reducer for action `increment` panicked: boom"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
