//! Error taxonomy shared by every Vera component.

use thiserror::Error;

/// Result type alias for core operations
pub type VeraResult<T> = Result<T, VeraError>;

/// Sub-kind of an Answer Engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// The engine did not answer within the configured deadline.
    Timeout,
    /// The engine answered with an error or an unusable payload.
    Failure,
}

/// Errors surfaced by the identity store, authenticator, ledger and orchestrator.
#[derive(Error, Debug)]
pub enum VeraError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream error ({kind:?}): {message}")]
    Upstream { kind: UpstreamKind, message: String },

    #[error("store unavailable: {0}")]
    TransientStore(String),
}

impl VeraError {
    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        VeraError::Upstream {
            kind: UpstreamKind::Timeout,
            message: message.into(),
        }
    }

    pub fn upstream_failure(message: impl Into<String>) -> Self {
        VeraError::Upstream {
            kind: UpstreamKind::Failure,
            message: message.into(),
        }
    }

    /// Stable snake_case label used in API error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VeraError::NotFound(_) => "not_found",
            VeraError::Unauthorized(_) => "unauthorized",
            VeraError::Forbidden(_) => "forbidden",
            VeraError::InvalidArgument(_) => "invalid_argument",
            VeraError::Conflict(_) => "conflict",
            VeraError::Upstream {
                kind: UpstreamKind::Timeout,
                ..
            } => "upstream_timeout",
            VeraError::Upstream { .. } => "upstream_error",
            VeraError::TransientStore(_) => "transient_store_error",
        }
    }

    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            VeraError::NotFound(m)
            | VeraError::Unauthorized(m)
            | VeraError::Forbidden(m)
            | VeraError::InvalidArgument(m)
            | VeraError::Conflict(m)
            | VeraError::TransientStore(m) => m,
            VeraError::Upstream { message, .. } => message,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            VeraError::Upstream {
                kind: UpstreamKind::Timeout,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for VeraError {
    fn from(err: rusqlite::Error) -> Self {
        VeraError::TransientStore(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinct_upstream_kind() {
        let err = VeraError::upstream_timeout("engine took too long");
        assert!(err.is_timeout());
        assert_eq!(err.kind(), "upstream_timeout");
        assert_eq!(err.message(), "engine took too long");

        let err = VeraError::upstream_failure("HTTP 500");
        assert!(!err.is_timeout());
        assert_eq!(err.kind(), "upstream_error");
    }

    #[test]
    fn sqlite_errors_are_transient() {
        let err: VeraError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), "transient_store_error");
    }
}
