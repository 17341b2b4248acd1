//! Backend error taxonomy shared across drone-fleet.
//!
//! Site and batch-system adapters translate their native failures into
//! [`BackendError`]; the lifecycle states decide how to react based on the kind.

use thiserror::Error;

/// A result type using `BackendError`.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors reported by site and batch-system backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Authentication against the backend failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The backend did not answer in time.
    #[error("backend timed out: {0}")]
    Timeout(String),

    /// The backend refused the request because a quota or rate limit was hit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The backend could not report the resource status.
    #[error("resource status update failed: {0}")]
    ResourceStatusUpdateFailed(String),

    /// The backend confirms the resource vanished unexpectedly.
    #[error("drone crashed: {0}")]
    DroneCrashed(String),

    /// The adapter is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other backend failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Check if this error is transient, i.e. the same call may succeed on a later tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Auth(_) | Self::Timeout(_) | Self::QuotaExceeded(_) | Self::ResourceStatusUpdateFailed(_)
        )
    }

    /// Check if this error reports a crashed drone.
    #[must_use]
    pub const fn is_crash(&self) -> bool {
        matches!(self, Self::DroneCrashed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Auth("token".into()).is_transient());
        assert!(BackendError::Timeout("deploy".into()).is_transient());
        assert!(BackendError::QuotaExceeded("cores".into()).is_transient());
        assert!(BackendError::ResourceStatusUpdateFailed("status".into()).is_transient());

        assert!(!BackendError::DroneCrashed("gone".into()).is_transient());
        assert!(!BackendError::Config("missing".into()).is_transient());
        assert!(!BackendError::Internal("bug".into()).is_transient());
    }

    #[test]
    fn crash_classification() {
        assert!(BackendError::DroneCrashed("gone".into()).is_crash());
        assert!(!BackendError::Timeout("slow".into()).is_crash());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            BackendError::QuotaExceeded("10 cores".into()).to_string(),
            "quota exceeded: 10 cores"
        );
        assert_eq!(
            BackendError::DroneCrashed("vm-1".into()).to_string(),
            "drone crashed: vm-1"
        );
    }
}
