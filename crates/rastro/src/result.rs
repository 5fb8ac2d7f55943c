//! Result and error types for Rastro.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for Rastro operations
pub type RastroResult<T> = Result<T, RastroError>;

/// Errors that can occur in Rastro
#[derive(Debug, Error)]
pub enum RastroError {
    /// Requested id has no resolvable live counterpart
    #[error("Element not found")]
    NodeNotFound {
        /// Logical node id that failed to resolve
        id: String,
    },

    /// Action invoked against an incompatible node type
    #[error("Element is not a {expected}")]
    WrongKind {
        /// Logical node id
        id: String,
        /// What the action required (e.g. "checkbox")
        expected: &'static str,
    },

    /// The underlying tree operation itself failed
    #[error("Action failed: {message}")]
    ActionFailed {
        /// Captured failure message
        message: String,
    },

    /// Unexpected failure during background batch processing
    #[error("Tracker fault: {message}")]
    TrackerFault {
        /// Captured failure message
        message: String,
    },

    /// Tracker method called before `start` or after `stop`
    #[error("Tracker is not running")]
    NotTracking,

    /// Session persistence failure
    #[error("Session store error: {message}")]
    SessionStore {
        /// Captured failure message
        message: String,
    },
}

/// Outcome of an action-API call.
///
/// Expected failure modes (not found, wrong kind, action failed) are values
/// in this shape, never panics or propagated errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action completed
    pub success: bool,
    /// Failure message when `success` is false
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Successful outcome
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed outcome with a message
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

impl From<RastroError> for ActionOutcome {
    fn from(err: RastroError) -> Self {
        Self::fail(err.to_string())
    }
}
