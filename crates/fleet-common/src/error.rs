//! Error taxonomy for the fleet observability service.

use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type. Each variant corresponds to one of the error kinds
/// the monitoring cycle and HTTP boundary are built around: transient
/// upstream failures are retried/skipped, circuit-open is distinct from a
/// plain transient failure so callers don't double-count failures, and
/// `Fatal` is reserved for conditions that should abort a cycle phase.
#[derive(Error, Debug)]
pub enum Error {
    #[error("upstream inventory API error: {0}")]
    TransientUpstream(String),

    #[error("circuit breaker open for endpoint {endpoint_id}")]
    CircuitOpen { endpoint_id: i64 },

    #[error("validation failed: {0:?}")]
    ValidationRejected(Vec<String>),

    #[error("conflict: {message} (current status: {current_status})")]
    Conflict {
        message: String,
        current_status: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether the failing operation should be retried by a caller's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientUpstream(_))
    }

    /// Stable category string, used in structured log fields and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Error::TransientUpstream(_) => "transient_upstream",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::ValidationRejected(_) => "validation_rejected",
            Error::Conflict { .. } => "conflict",
            Error::NotFound(_) => "not_found",
            Error::DependencyUnavailable(_) => "dependency_unavailable",
            Error::Fatal(_) => "fatal",
            Error::Configuration(_) => "configuration",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }

    /// The HTTP status code this error maps to at the gateway boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::TransientUpstream(_) => 504,
            Error::CircuitOpen { .. } => 504,
            Error::ValidationRejected(_) => 400,
            Error::Conflict { .. } => 409,
            Error::NotFound(_) => 404,
            Error::DependencyUnavailable(_) => 502,
            Error::Fatal(_) => 500,
            Error::Configuration(_) => 500,
            Error::Serialization(_) => 422,
            Error::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_upstream_is_retryable() {
        assert!(Error::TransientUpstream("timeout".into()).is_retryable());
        assert!(!Error::CircuitOpen { endpoint_id: 1 }.is_retryable());
        assert!(!Error::Fatal("boom".into()).is_retryable());
    }

    #[test]
    fn http_status_mapping_matches_documented_codes() {
        assert_eq!(Error::ValidationRejected(vec![]).http_status(), 400);
        assert_eq!(
            Error::Conflict {
                message: "x".into(),
                current_status: "pending".into()
            }
            .http_status(),
            409
        );
        assert_eq!(Error::NotFound("x".into()).http_status(), 404);
        assert_eq!(Error::DependencyUnavailable("x".into()).http_status(), 502);
    }
}
