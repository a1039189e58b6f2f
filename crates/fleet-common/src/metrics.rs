//! Health aggregation for the `/health/ready` family of endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health level of a single dependency check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthLevel {
    pub fn as_score(&self) -> u8 {
        match self {
            HealthLevel::Healthy => 100,
            HealthLevel::Degraded => 50,
            HealthLevel::Unhealthy => 0,
        }
    }
}

/// Result of a single dependency check (app DB, metrics DB, portainer, ollama, redis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub url: Option<String>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy(checked_at: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Healthy,
            url: None,
            error: None,
            checked_at,
        }
    }

    pub fn unhealthy(url: impl Into<String>, error: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Unhealthy,
            url: Some(url.into()),
            error: Some(error.into()),
            checked_at,
        }
    }

    /// For optional dependencies (the LM backend): absence is a
    /// `DependencyUnavailable`, which §7 says must downgrade rather than
    /// fail, so it never drags the aggregate below `degraded`.
    pub fn degraded(url: impl Into<String>, error: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: HealthLevel::Degraded,
            url: Some(url.into()),
            error: Some(error.into()),
            checked_at,
        }
    }

    /// The redacted projection served by the unauthenticated `/health/ready`
    /// route: status only, no URL and no error string.
    pub fn redacted(&self) -> RedactedComponentHealth {
        RedactedComponentHealth {
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedactedComponentHealth {
    pub status: HealthLevel,
}

/// Aggregate readiness, computed from the set of dependency checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall: HealthLevel,
    pub checks: HashMap<String, ComponentHealth>,
}

impl HealthStatus {
    pub fn from_checks(checks: HashMap<String, ComponentHealth>) -> Self {
        let overall = Self::aggregate(&checks);
        Self { overall, checks }
    }

    /// Healthy iff every check is healthy; unhealthy if any check is
    /// unhealthy; otherwise degraded. Note this priority order differs
    /// from a naive "worst wins" reduction only in that `Degraded` never
    /// overrides an `Unhealthy` check.
    fn aggregate(checks: &HashMap<String, ComponentHealth>) -> HealthLevel {
        if checks.values().any(|c| c.status == HealthLevel::Unhealthy) {
            HealthLevel::Unhealthy
        } else if checks.values().all(|c| c.status == HealthLevel::Healthy) {
            HealthLevel::Healthy
        } else {
            HealthLevel::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: HealthLevel) -> ComponentHealth {
        ComponentHealth {
            status,
            url: None,
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn healthy_iff_all_checks_healthy() {
        let mut checks = HashMap::new();
        checks.insert("db".to_string(), check(HealthLevel::Healthy));
        checks.insert("portainer".to_string(), check(HealthLevel::Healthy));
        let status = HealthStatus::from_checks(checks);
        assert_eq!(status.overall, HealthLevel::Healthy);
    }

    #[test]
    fn unhealthy_if_any_dependency_unhealthy() {
        let mut checks = HashMap::new();
        checks.insert("db".to_string(), check(HealthLevel::Healthy));
        checks.insert("portainer".to_string(), check(HealthLevel::Unhealthy));
        let status = HealthStatus::from_checks(checks);
        assert_eq!(status.overall, HealthLevel::Unhealthy);
    }

    #[test]
    fn degraded_otherwise() {
        let mut checks = HashMap::new();
        checks.insert("db".to_string(), check(HealthLevel::Healthy));
        checks.insert("ollama".to_string(), check(HealthLevel::Degraded));
        let status = HealthStatus::from_checks(checks);
        assert_eq!(status.overall, HealthLevel::Degraded);
    }

    #[test]
    fn redacted_check_drops_url_and_error() {
        let c = ComponentHealth::unhealthy("http://x", "timeout", Utc::now());
        let r = c.redacted();
        assert_eq!(r.status, HealthLevel::Unhealthy);
    }
}
