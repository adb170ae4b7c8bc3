//! Error types for state machine construction and execution.

use crate::state::StateName;
use thiserror::Error;

/// Symbolic name of the error raised when a task attempt times out.
///
/// Retry and catch rules can match on this name like on any
/// caller-defined error name.
pub const TIMEOUT_ERROR: &str = "TIMEOUT";

/// Error returned by a unit of work.
///
/// A *named* error carries a symbolic name that retry and catch rules
/// match against. A *plain* error is always fatal: it never matches a
/// rule and terminates the run.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Failure carrying a symbolic name for retry/catch matching.
    #[error("{name}: {message}")]
    Named {
        /// The symbolic name matched by retry and catch rules.
        name: String,
        /// Details about the underlying cause.
        message: String,
    },

    /// Unnamed failure. Never retried, never caught.
    #[error("{0}")]
    Plain(String),
}

impl TaskError {
    /// Creates a named error.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        TaskError::Named {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a plain, non-matchable error.
    pub fn plain(message: impl Into<String>) -> Self {
        TaskError::Plain(message.into())
    }

    /// Creates the named error raised when a task attempt times out.
    pub fn timeout() -> Self {
        Self::named(TIMEOUT_ERROR, "task timed out")
    }

    /// Returns the symbolic name of a named error.
    pub fn error_name(&self) -> Option<&str> {
        match self {
            TaskError::Named { name, .. } => Some(name),
            TaskError::Plain(_) => None,
        }
    }
}

/// Errors that can occur while building, loading, or running a state
/// machine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StateMachineError {
    /// A state failed during a run.
    ///
    /// The run loop wraps every error with the name of the state where
    /// it originated before returning it as the run's outcome.
    #[error("state '{state}' failed: {source}")]
    StateFailed {
        /// The name of the state that failed.
        state: StateName,
        /// The underlying failure.
        #[source]
        source: Box<StateMachineError>,
    },

    /// A task's unit of work failed after exhausting its retry rules
    /// with no catch rule matching.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// A Map state's input key was absent or not an array.
    #[error("input '{key}' is not an array")]
    InvalidInput {
        /// The context key the Map state read.
        key: String,
    },

    /// A transition referenced a state missing from the graph.
    #[error("state '{0}' not found")]
    StateNotFound(StateName),

    /// A Fail state was reached.
    #[error("failure in state '{0}'")]
    ExplicitFail(StateName),

    /// A Map or Parallel branch failed.
    ///
    /// The index identifies the failing branch by its position in the
    /// input array (Map) or branch list (Parallel).
    #[error("branch {index} failed: {source}")]
    Branch {
        /// Zero-based index of the failing branch.
        index: usize,
        /// The branch run's failure.
        #[source]
        source: Box<StateMachineError>,
    },

    /// A concurrent branch could not be joined (it panicked or was
    /// aborted by the runtime).
    #[error("branch join failed: {0}")]
    Join(String),

    /// The run's cancellation token was triggered.
    #[error("run cancelled")]
    Cancelled,

    /// The state machine configuration is invalid.
    ///
    /// Returned by the builder when the start state is missing or a
    /// transition references an unknown state.
    #[error("invalid state machine configuration: {0}")]
    Configuration(String),

    /// A state machine definition document could not be loaded.
    #[error("invalid state machine definition: {0}")]
    Definition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let error = TaskError::named("API_BAD_GATEWAY", "api service is unavailable");
        assert_eq!(error.to_string(), "API_BAD_GATEWAY: api service is unavailable");

        let error = TaskError::plain("disk on fire");
        assert_eq!(error.to_string(), "disk on fire");
    }

    #[test]
    fn test_error_name_classification() {
        assert_eq!(
            TaskError::named("HTTP_500", "boom").error_name(),
            Some("HTTP_500")
        );
        assert_eq!(TaskError::timeout().error_name(), Some(TIMEOUT_ERROR));
        assert_eq!(TaskError::plain("boom").error_name(), None);
    }

    #[test]
    fn test_state_failed_display() {
        let error = StateMachineError::StateFailed {
            state: StateName::new("Charge"),
            source: Box::new(StateMachineError::Task(TaskError::timeout())),
        };
        assert_eq!(
            error.to_string(),
            "state 'Charge' failed: TIMEOUT: task timed out"
        );
    }

    #[test]
    fn test_branch_display() {
        let error = StateMachineError::Branch {
            index: 2,
            source: Box::new(StateMachineError::ExplicitFail(StateName::new("Abort"))),
        };
        assert_eq!(error.to_string(), "branch 2 failed: failure in state 'Abort'");
    }
}
