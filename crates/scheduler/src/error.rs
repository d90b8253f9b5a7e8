//! Error type shared by every task that flows through the scheduler.

use std::time::Duration;

/// Outcome of a scheduled render task that did not produce data.
///
/// `Aborted` is a cancellation signal rather than a failure: callers should
/// drop it silently instead of logging or surfacing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The requester lost interest before the work was dispatched.
    #[error("Aborted")]
    Aborted,

    /// The rendering backend reported a failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The work did not settle within the configured task timeout.
    #[error("render task timed out after {0:?}")]
    TimedOut(Duration),
}

impl RenderError {
    /// Returns true if this error is a cancellation that must be ignored.
    pub fn is_aborted(&self) -> bool {
        matches!(self, RenderError::Aborted)
    }

    /// Create a backend error from any displayable message.
    pub fn backend(message: impl std::fmt::Display) -> Self {
        RenderError::Backend(message.to_string())
    }
}

/// Result alias for scheduled work.
pub type RenderResult<T> = Result<T, RenderError>;
