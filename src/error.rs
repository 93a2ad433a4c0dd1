//! Error types carried by computation outcomes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Errors recorded as diagnostics on an [`Outcome`](crate::Outcome).
///
/// User errors can be propagated from node logic with the `?` operator, which
/// converts any `Into<anyhow::Error>` type into `ComputeError::User`.
///
/// These never escape as panics: the engine catches failures at the boundary
/// of node execution and future chaining and records them here.
#[derive(Debug, Clone)]
pub enum ComputeError {
    /// The computation was cancelled before it produced a value.
    Cancelled,

    /// The computation was cancelled because its deadline elapsed.
    TimedOut(Duration),

    /// Node logic or a continuation panicked.
    Panicked {
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A required value was absent.
    Missing {
        /// Description of what was missing.
        description: String,
    },

    /// User-defined error.
    User(Arc<anyhow::Error>),
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::Cancelled => write!(f, "computation cancelled"),
            ComputeError::TimedOut(after) => {
                write!(f, "computation timed out after {:?}", after)
            }
            ComputeError::Panicked { message } => {
                write!(f, "computation panicked: {}", message)
            }
            ComputeError::Missing { description } => {
                write!(f, "missing value: {}", description)
            }
            ComputeError::User(e) => write!(f, "{}", e),
        }
    }
}

impl<T: Into<anyhow::Error>> From<T> for ComputeError {
    fn from(err: T) -> Self {
        ComputeError::User(Arc::new(err.into()))
    }
}

impl ComputeError {
    /// Returns `true` for `Cancelled` and `TimedOut`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ComputeError::Cancelled | ComputeError::TimedOut(_))
    }

    /// Returns a reference to the inner user error if this is a `User` variant.
    pub fn user_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            ComputeError::User(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the user error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.user_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Builds a `Panicked` error from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ComputeError::Panicked { message }
    }
}

/// Failure to start an [`Executor`](crate::Executor).
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The underlying thread pool could not be built.
    #[error("failed to start executor: {0}")]
    Build(#[from] std::io::Error),

    /// The configuration asks for zero worker threads.
    #[error("executor needs at least one worker thread")]
    NoWorkers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Custom(u32);

    impl fmt::Display for Custom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "custom {}", self.0)
        }
    }

    impl std::error::Error for Custom {}

    #[test]
    fn test_user_error_from_anyhow() {
        let err: ComputeError = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(err, ComputeError::User(_)));
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_downcast_user_error() {
        let err: ComputeError = Custom(7).into();
        assert_eq!(err.downcast_ref::<Custom>().map(|c| c.0), Some(7));
        assert!(err.downcast_ref::<std::io::Error>().is_none());
    }

    #[test]
    fn test_cancellation_kinds() {
        assert!(ComputeError::Cancelled.is_cancellation());
        assert!(ComputeError::TimedOut(Duration::from_millis(5)).is_cancellation());
        assert!(!ComputeError::Missing {
            description: "x".into()
        }
        .is_cancellation());
    }

    #[test]
    fn test_panic_payload_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        match ComputeError::from_panic(payload) {
            ComputeError::Panicked { message } => assert_eq!(message, "boom 1"),
            other => panic!("expected Panicked, got {:?}", other),
        }
    }
}
