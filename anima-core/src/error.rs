//! The `AnimaError` taxonomy and the `RetryClassifiable` trait used by the
//! quota policy and the dispatch wrapper to decide retry/fallback behaviour
//! without re-parsing error strings at each call site.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnimaError>;

#[derive(Debug, Error)]
pub enum AnimaError {
    #[error("tool unavailable: {tool}")]
    ToolUnavailable { tool: String },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("agent execution failed: {message}")]
    AgentFailure { message: String },

    #[error("quota limited: {status} (retry after {retry_after_seconds:?}s)")]
    QuotaLimited {
        status: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("protected path violated: {path}")]
    ProtectedViolation { path: String },

    #[error("verification failed: {summary}")]
    VerificationFailure { summary: String },

    #[error("dispatched stage {step} raised: {source}")]
    DispatchFailure {
        step: String,
        #[source]
        source: Box<AnimaError>,
    },

    #[error("failed to persist {what} at {path:?}: {source}")]
    PersistenceFailure {
        what: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lock held: another anima process is already running at {path:?}")]
    LockHeld { path: PathBuf },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<String> for AnimaError {
    fn from(s: String) -> Self {
        AnimaError::Other(s)
    }
}

impl From<&str> for AnimaError {
    fn from(s: &str) -> Self {
        AnimaError::Other(s.to_string())
    }
}

/// Classification used to decide whether a failure should be retried, and
/// if so, after how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient — a bounded retry may succeed.
    Retryable,
    /// Won't fix itself; don't retry.
    Permanent,
    /// Partial success / degraded result; caller decides whether to retry.
    Degraded,
}

pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable)
    }

    /// Suggested sleep before a retry, if the error carries one (e.g. a
    /// quota `retry_after_seconds`). `None` means "use the caller's default".
    fn suggested_backoff(&self) -> Option<Duration>;
}

impl RetryClassifiable for AnimaError {
    fn classify(&self) -> ErrorClass {
        match self {
            AnimaError::ToolUnavailable { .. } => ErrorClass::Degraded,
            AnimaError::Timeout { .. } => ErrorClass::Retryable,
            AnimaError::AgentFailure { .. } => ErrorClass::Retryable,
            AnimaError::QuotaLimited { .. } => ErrorClass::Retryable,
            AnimaError::ProtectedViolation { .. } => ErrorClass::Permanent,
            AnimaError::VerificationFailure { .. } => ErrorClass::Permanent,
            AnimaError::DispatchFailure { source, .. } => source.classify(),
            AnimaError::PersistenceFailure { .. } => ErrorClass::Permanent,
            AnimaError::LockHeld { .. } => ErrorClass::Permanent,
            AnimaError::Json(_) => ErrorClass::Permanent,
            AnimaError::Other(_) => ErrorClass::Degraded,
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        match self {
            AnimaError::QuotaLimited {
                retry_after_seconds: Some(s),
                ..
            } => Some(Duration::from_secs(*s)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_limited_is_retryable_with_its_own_backoff() {
        let err = AnimaError::QuotaLimited {
            status: "rate_limited".to_string(),
            retry_after_seconds: Some(42),
        };
        assert!(err.is_retryable());
        assert_eq!(err.suggested_backoff(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn protected_violation_is_permanent() {
        let err = AnimaError::ProtectedViolation {
            path: "VISION.md".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.classify(), ErrorClass::Permanent);
    }

    #[test]
    fn dispatch_failure_delegates_classification_to_its_source() {
        let err = AnimaError::DispatchFailure {
            step: "plan".to_string(),
            source: Box::new(AnimaError::Timeout {
                operation: "agent".to_string(),
                elapsed: Duration::from_secs(600),
            }),
        };
        assert!(err.is_retryable());
    }
}
