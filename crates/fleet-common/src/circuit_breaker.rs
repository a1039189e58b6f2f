//! Per-endpoint circuit breaker with a separate "degraded" soft-state.
//!
//! A breaker opens after consecutive failures and rejects calls with a
//! distinct error for a cooldown window before allowing one half-open
//! probe through. "Degraded" is tracked independently: it never rejects
//! direct calls, it only tells the monitoring cycle to skip the endpoint
//! during fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::types::EndpointId;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_cooldown: Duration,
    pub degraded_latency: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_cooldown: Duration::from_secs(60),
            degraded_latency: Duration::from_secs(2),
        }
    }
}

impl From<crate::config::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(c: crate::config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: c.failure_threshold,
            open_cooldown: Duration::from_secs(c.open_cooldown_seconds),
            degraded_latency: Duration::from_millis(c.degraded_latency_ms),
        }
    }
}

struct EndpointCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    degraded: bool,
    /// Set when a half-open circuit has admitted its one probe call, so
    /// concurrent callers are rejected until `record_result` clears it.
    probe_in_flight: bool,
}

impl EndpointCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            degraded: false,
            probe_in_flight: false,
        }
    }
}

/// Tracks circuit state for every endpoint the inventory client talks to.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<EndpointId, EndpointCircuit>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        })
    }

    /// Whether the circuit for `endpoint_id` currently rejects calls.
    /// A half-open circuit allows exactly one probe through: the first
    /// caller sets `probe_in_flight` and is admitted, every concurrent
    /// caller after it is rejected until `record_result` clears the flag.
    pub fn is_open(&self, endpoint_id: EndpointId) -> bool {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(endpoint_id).or_insert_with(EndpointCircuit::new);
        match circuit.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    true
                } else {
                    circuit.probe_in_flight = true;
                    false
                }
            }
            CircuitState::Open => {
                let opened_at = circuit.opened_at.unwrap_or_else(Instant::now);
                if Instant::now().duration_since(opened_at) >= self.config.open_cooldown {
                    info!(endpoint_id, "circuit breaker transitioning to half-open");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.consecutive_successes = 0;
                    circuit.probe_in_flight = true;
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Softer than `is_open`: true if the endpoint has been flagged as
    /// slow/unreliable without tripping the hard breaker. The cycle skips
    /// degraded endpoints during fan-out but direct calls still go through.
    pub fn is_degraded(&self, endpoint_id: EndpointId) -> bool {
        self.circuits
            .read()
            .get(&endpoint_id)
            .map(|c| c.degraded)
            .unwrap_or(false)
    }

    pub fn mark_degraded(&self, endpoint_id: EndpointId, degraded: bool) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(endpoint_id).or_insert_with(EndpointCircuit::new);
        circuit.degraded = degraded;
    }

    pub fn record_latency(&self, endpoint_id: EndpointId, latency: Duration) {
        self.mark_degraded(endpoint_id, latency >= self.config.degraded_latency);
    }

    /// Records the outcome of a call and transitions the circuit if needed.
    pub fn record_result(&self, endpoint_id: EndpointId, success: bool) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(endpoint_id).or_insert_with(EndpointCircuit::new);

        match circuit.state {
            CircuitState::Closed => {
                if success {
                    circuit.consecutive_failures = 0;
                } else {
                    circuit.consecutive_failures += 1;
                    if circuit.consecutive_failures >= self.config.failure_threshold {
                        warn!(
                            endpoint_id,
                            failures = circuit.consecutive_failures,
                            "circuit breaker opening"
                        );
                        circuit.state = CircuitState::Open;
                        circuit.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::HalfOpen => {
                circuit.probe_in_flight = false;
                if success {
                    info!(endpoint_id, "circuit breaker closing after probe success");
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.consecutive_successes = 0;
                } else {
                    warn!(endpoint_id, "circuit breaker reopening after probe failure");
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    circuit.consecutive_failures += 1;
                }
            }
            CircuitState::Open => {
                debug!(endpoint_id, "recording result while circuit is open");
            }
        }
    }

    pub fn state(&self, endpoint_id: EndpointId) -> CircuitState {
        self.circuits
            .read()
            .get(&endpoint_id)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn reset(&self, endpoint_id: EndpointId) {
        self.circuits.write().insert(endpoint_id, EndpointCircuit::new());
    }
}

/// Executes `operation` under circuit-breaker protection for `endpoint_id`,
/// returning a distinct `Error::CircuitOpen` without invoking `operation`
/// when the breaker is tripped.
pub async fn with_circuit_breaker<F, Fut, T>(
    registry: &CircuitBreakerRegistry,
    endpoint_id: EndpointId,
    operation: F,
) -> Result<T, Error>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    if registry.is_open(endpoint_id) {
        return Err(Error::CircuitOpen { endpoint_id });
    }

    let result = operation().await;
    registry.record_result(endpoint_id, result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(failure_threshold: u32) -> Arc<CircuitBreakerRegistry> {
        CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold,
            open_cooldown: Duration::from_millis(50),
            degraded_latency: Duration::from_millis(200),
        })
    }

    #[test]
    fn closed_by_default_and_allows_calls() {
        let reg = registry(3);
        assert!(!reg.is_open(1));
        assert_eq!(reg.state(1), CircuitState::Closed);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let reg = registry(2);
        reg.record_result(1, false);
        reg.record_result(1, false);
        assert_eq!(reg.state(1), CircuitState::Open);
        assert!(reg.is_open(1));
    }

    #[test]
    fn success_resets_failure_count_in_closed_state() {
        let reg = registry(2);
        reg.record_result(1, false);
        reg.record_result(1, true);
        reg.record_result(1, false);
        assert_eq!(reg.state(1), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_success() {
        let reg = registry(1);
        reg.record_result(1, false);
        assert_eq!(reg.state(1), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(60));
        assert!(!reg.is_open(1));
        assert_eq!(reg.state(1), CircuitState::HalfOpen);
        reg.record_result(1, true);
        assert_eq!(reg.state(1), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe_until_result_is_recorded() {
        let reg = registry(1);
        reg.record_result(1, false);
        std::thread::sleep(Duration::from_millis(60));
        assert!(!reg.is_open(1));
        assert_eq!(reg.state(1), CircuitState::HalfOpen);
        assert!(reg.is_open(1));
        assert!(reg.is_open(1));
        reg.record_result(1, true);
        assert_eq!(reg.state(1), CircuitState::Closed);
        assert!(!reg.is_open(1));
    }

    #[test]
    fn degraded_is_independent_of_circuit_state() {
        let reg = registry(5);
        reg.record_latency(2, Duration::from_millis(500));
        assert!(reg.is_degraded(2));
        assert!(!reg.is_open(2));
    }

    #[tokio::test]
    async fn with_circuit_breaker_rejects_without_calling_when_open() {
        let reg = registry(1);
        reg.record_result(7, false);
        let mut called = false;
        let result: Result<(), Error> = with_circuit_breaker(&reg, 7, || {
            called = true;
            async { Ok(()) }
        })
        .await;
        assert!(!called);
        assert!(matches!(result, Err(Error::CircuitOpen { endpoint_id: 7 })));
    }
}
