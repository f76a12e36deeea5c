//! Stage error taxonomy
//!
//! Every failure a stage can report is classified here. The executor decides
//! retries from the classification alone; the orchestrator decides aborts.

use rollout_core::domain::result::{ErrorDetail, ErrorKind};
use rollout_tools::ToolError;
use thiserror::Error;

use crate::cache::CacheError;

/// Classified stage failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// An upstream stage did not succeed; the stage is skipped, not failed
    #[error("dependency not met: {0}")]
    DependencyUnmet(String),

    /// Network hiccups, tool crashes, unavailable endpoints
    #[error("transient failure: {0}")]
    Transient(String),

    /// Authorization, malformed configuration, irrecoverable conflicts
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// A readiness wait or attempt exceeded its window
    #[error("timed out: {0}")]
    TimedOut(String),

    /// An external cancellation request stopped the stage
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl StageError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::DependencyUnmet(_) => ErrorKind::DependencyUnmet,
            StageError::Transient(_) => ErrorKind::Transient,
            StageError::Fatal(_) => ErrorKind::Fatal,
            StageError::TimedOut(_) => ErrorKind::TimedOut,
            StageError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Transient and timed-out errors may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_) | StageError::TimedOut(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::DependencyUnmet(m)
            | StageError::Transient(m)
            | StageError::Fatal(m)
            | StageError::TimedOut(m)
            | StageError::Cancelled(m) => m,
        }
    }

    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail::new(self.kind(), self.message())
    }
}

impl From<ToolError> for StageError {
    fn from(err: ToolError) -> Self {
        if err.is_fatal() {
            StageError::Fatal(err.to_string())
        } else {
            StageError::Transient(err.to_string())
        }
    }
}

impl From<CacheError> for StageError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Store(_) => StageError::Transient(err.to_string()),
            CacheError::DuplicateInput(_) | CacheError::EmptyInputs(_) => {
                StageError::Fatal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_errors_are_classified() {
        let fatal: StageError = ToolError::Unauthorized("expired token".into()).into();
        assert_eq!(fatal.kind(), ErrorKind::Fatal);
        assert!(!fatal.is_retryable());

        let transient: StageError = ToolError::Unavailable("connection refused".into()).into();
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_timeouts_are_retryable() {
        let err = StageError::TimedOut("0/1 replicas available".into());
        assert!(err.is_retryable());
        assert_eq!(err.to_detail().message, "0/1 replicas available");
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        assert!(!StageError::Cancelled("shutdown".into()).is_retryable());
        assert!(!StageError::DependencyUnmet("deploy".into()).is_retryable());
    }
}
