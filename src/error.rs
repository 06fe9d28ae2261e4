//! Error taxonomy for test action execution.
//!
//! Every container and leaf action reports failure through [`ActionError`].
//! The variants mirror the failure classes the engine distinguishes:
//!
//! | Variant | Raised by |
//! |---------|-----------|
//! | `Configuration` | Plan building, container setup, unsupported policy values |
//! | `Failed` | Leaf actions (opaque to the engine) |
//! | `Timeout` | Wait, correlation receive, end-of-test join barrier |
//! | `Aggregate` | Parallel, after all children finished |
//! | `RetryExhausted` | RepeatOnErrorUntilTrue when attempts run out |
//! | `Evaluation` | Conditions and expressions that cannot be evaluated |
//!
//! Catch and Assert filter on [`ActionError::kind`], which plays the role of
//! an exception type name. Leaf failures carry an arbitrary kind (for example
//! `NullPointerException`), while engine errors use fixed kinds such as
//! `TimeoutError`.

use std::fmt;
use std::time::Duration;

/// Result type for action execution.
pub type ActionResult<T> = Result<T, ActionError>;

/// Kind reported for leaf failures that don't name a more specific one.
pub const DEFAULT_FAILURE_KIND: &str = "ActionError";

/// Errors that can occur while executing test actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Malformed container, condition or endpoint setup.
    ///
    /// Detected eagerly when a plan is built, or when a policy value
    /// cannot be interpreted.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A leaf action failed on its own terms.
    #[error("{message}")]
    Failed {
        /// Exception-type name used for Catch/Assert matching.
        kind: String,
        message: String,
        #[source]
        cause: Option<Box<ActionError>>,
    },

    /// A polling deadline was exceeded.
    #[error("Timed out after {}ms waiting for {what}", .elapsed.as_millis())]
    Timeout { what: String, elapsed: Duration },

    /// One or more children of a Parallel container failed.
    #[error("{0}")]
    Aggregate(AggregateError),

    /// RepeatOnErrorUntilTrue gave up; wraps the last observed failure.
    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        last: Box<ActionError>,
    },

    /// A condition or expression could not be evaluated.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A `${name}` reference named a variable that is not set.
    #[error("Unknown variable '{0}'")]
    UnknownVariable(String),

    /// A second reply arrived for a correlation key that is still occupied.
    #[error("Duplicate reply for correlation key '{0}'")]
    DuplicateReply(String),
}

impl ActionError {
    /// Creates a leaf failure with the default kind.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: DEFAULT_FAILURE_KIND.to_string(),
            message: message.into(),
            cause: None,
        }
    }

    /// Creates a leaf failure with an explicit kind.
    pub fn failed_with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps this error as the cause of a new leaf failure.
    pub fn wrap(self, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: DEFAULT_FAILURE_KIND.to_string(),
            message: message.into(),
            cause: Some(Box::new(self)),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns the exception-type name of this error.
    pub fn kind(&self) -> &str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Failed { kind, .. } => kind,
            Self::Timeout { .. } => "TimeoutError",
            Self::Aggregate(_) => "AggregateError",
            Self::RetryExhausted { .. } => "RetryExhaustedError",
            Self::Evaluation(_) => "EvaluationError",
            Self::UnknownVariable(_) => "UnknownVariableError",
            Self::DuplicateReply(_) => "DuplicateReplyError",
        }
    }

    /// Returns the wrapped error one level down, if any.
    ///
    /// For aggregates this is the first failed child in declaration order.
    pub fn inner(&self) -> Option<&ActionError> {
        match self {
            Self::Failed { cause, .. } => cause.as_deref(),
            Self::RetryExhausted { last, .. } => Some(last),
            Self::Aggregate(aggregate) => aggregate.failures.first().map(|f| &f.error),
            _ => None,
        }
    }

    /// Returns the deepest error in the cause chain.
    pub fn root_cause(&self) -> &ActionError {
        let mut current = self;
        while let Some(next) = current.inner() {
            current = next;
        }
        current
    }

    /// Messages from this error down to its root cause.
    pub fn cause_chain(&self) -> Vec<String> {
        let mut chain = vec![self.to_string()];
        let mut current = self;
        while let Some(next) = current.inner() {
            chain.push(next.to_string());
            current = next;
        }
        chain
    }

    /// Returns `true` for errors that originate from plan or policy setup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// A single failed child of a Parallel container.
#[derive(Debug)]
pub struct ChildFailure {
    /// Declaration index of the child within its container.
    pub index: usize,
    /// Name of the failed child action.
    pub action: String,
    pub error: ActionError,
}

/// All child failures of a Parallel container, in declaration order.
#[derive(Debug)]
pub struct AggregateError {
    pub total: usize,
    pub failures: Vec<ChildFailure>,
}

impl AggregateError {
    /// Number of failed children.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} parallel actions failed",
            self.failures.len(),
            self.total
        )?;
        for failure in &self.failures {
            write!(
                f,
                "; [{}] {}: {}",
                failure.index, failure.action, failure.error
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_leaf_failure() {
        let err = ActionError::failed_with_kind("NullPointerException", "boom");
        assert_eq!(err.kind(), "NullPointerException");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_root_cause_follows_retry_and_wrap() {
        let deepest = ActionError::failed_with_kind("IoError", "connection refused");
        let err = ActionError::RetryExhausted {
            attempts: 3,
            last: Box::new(deepest.wrap("send failed")),
        };

        assert_eq!(err.root_cause().kind(), "IoError");
        let chain = err.cause_chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[2], "connection refused");
    }

    #[test]
    fn test_aggregate_display_lists_failures_in_order() {
        let err = ActionError::Aggregate(AggregateError {
            total: 3,
            failures: vec![
                ChildFailure {
                    index: 0,
                    action: "first".into(),
                    error: ActionError::failed("a"),
                },
                ChildFailure {
                    index: 2,
                    action: "third".into(),
                    error: ActionError::failed("c"),
                },
            ],
        });

        assert_eq!(
            err.to_string(),
            "2 of 3 parallel actions failed; [0] first: a; [2] third: c"
        );
        assert_eq!(err.root_cause().to_string(), "a");
    }

    #[test]
    fn test_timeout_message() {
        let err = ActionError::Timeout {
            what: "file 'x' exists".into(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Timed out after 1500ms waiting for file 'x' exists");
        assert_eq!(err.kind(), "TimeoutError");
    }
}
