//! Retry mechanisms with exponential backoff and jitter, used around the
//! upstream inventory API and metrics store calls.

use crate::{Error, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub max_jitter: f64,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            max_jitter: 0.1,
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Retry strategy for different error kinds.
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    NoRetry,
    FixedDelay(Duration),
    ExponentialBackoff { config: RetryConfig },
    Custom { delays: Vec<Duration> },
}

impl RetryStrategy {
    pub fn exponential_backoff() -> Self {
        Self::ExponentialBackoff {
            config: RetryConfig::default(),
        }
    }

    pub fn exponential_backoff_with_config(config: RetryConfig) -> Self {
        Self::ExponentialBackoff { config }
    }

    pub fn fixed_delay(delay: Duration) -> Self {
        Self::FixedDelay(delay)
    }

    pub fn custom_delays(delays: Vec<Duration>) -> Self {
        Self::Custom { delays }
    }

    /// Only `TransientUpstream` and `DependencyUnavailable` are worth
    /// retrying automatically; everything else (validation, conflict,
    /// circuit-open, fatal) should surface immediately to the caller.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::TransientUpstream(_) => Self::ExponentialBackoff {
                config: RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(1000),
                    max_delay: Duration::from_secs(10),
                    backoff_multiplier: 2.0,
                    use_jitter: true,
                    max_jitter: 0.2,
                    attempt_timeout: Some(Duration::from_secs(30)),
                },
            },
            Error::DependencyUnavailable(_) => Self::ExponentialBackoff {
                config: RetryConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(2000),
                    max_delay: Duration::from_secs(15),
                    backoff_multiplier: 1.5,
                    use_jitter: true,
                    max_jitter: 0.1,
                    attempt_timeout: Some(Duration::from_secs(45)),
                },
            },
            _ => Self::NoRetry,
        }
    }
}

/// Executes an operation under a given retry strategy.
pub struct RetryExecutor {
    strategy: RetryStrategy,
    operation_name: String,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy, operation_name: String) -> Self {
        Self {
            strategy,
            operation_name,
        }
    }

    pub async fn execute<F, T, E>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug + Clone,
    {
        match &self.strategy {
            RetryStrategy::NoRetry => {
                debug!("executing {} without retry", self.operation_name);
                operation().await.map_err(|e| e.into())
            }
            RetryStrategy::FixedDelay(delay) => self.execute_with_fixed_delay(*delay, operation).await,
            RetryStrategy::ExponentialBackoff { config } => {
                self.execute_with_exponential_backoff(config, operation).await
            }
            RetryStrategy::Custom { delays } => self.execute_with_custom_delays(delays, operation).await,
        }
    }

    async fn execute_with_fixed_delay<F, T, E>(&self, delay: Duration, operation: F) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug + Clone,
    {
        let mut last_error = None;

        for attempt in 1..=3 {
            debug!("executing {} (attempt {}/3)", self.operation_name, attempt);

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", self.operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let error = e.into();
                    warn!("{} failed on attempt {}: {:?}", self.operation_name, attempt, error);
                    last_error = Some(error);

                    if attempt < 3 {
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Fatal("no error recorded".to_string())))
    }

    async fn execute_with_exponential_backoff<F, T, E>(
        &self,
        config: &RetryConfig,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug + Clone,
    {
        let mut last_error = None;
        let mut current_delay = config.base_delay;

        for attempt in 1..=config.max_attempts {
            debug!(
                "executing {} (attempt {}/{})",
                self.operation_name, attempt, config.max_attempts
            );

            let result = if let Some(timeout) = config.attempt_timeout {
                tokio::time::timeout(timeout, operation()).await
            } else {
                Ok(operation().await)
            };

            match result {
                Ok(Ok(result)) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", self.operation_name, attempt);
                    }
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    let error = e.into();
                    warn!(
                        "{} failed on attempt {}: {:?}",
                        self.operation_name, attempt, error
                    );
                    last_error = Some(error);
                }
                Err(_) => {
                    let error = Error::TransientUpstream(format!(
                        "{} timed out on attempt {}",
                        self.operation_name, attempt
                    ));
                    warn!("{:?}", error);
                    last_error = Some(error);
                }
            }

            if attempt < config.max_attempts {
                let delay_with_jitter = if config.use_jitter {
                    add_jitter(current_delay, config.max_jitter)
                } else {
                    current_delay
                };

                sleep(delay_with_jitter).await;

                current_delay = Duration::from_millis(
                    ((current_delay.as_millis() as f64) * config.backoff_multiplier) as u64,
                );
                current_delay = current_delay.min(config.max_delay);
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Fatal("no error recorded".to_string())))
    }

    async fn execute_with_custom_delays<F, T, E>(
        &self,
        delays: &[Duration],
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
        E: Into<Error> + std::fmt::Debug + Clone,
    {
        let max_attempts = delays.len() + 1;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", self.operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let error = e.into();
                    warn!(
                        "{} failed on attempt {}: {:?}",
                        self.operation_name, attempt, error
                    );
                    last_error = Some(error);

                    if attempt <= delays.len() {
                        sleep(delays[attempt - 1]).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Fatal("no error recorded".to_string())))
    }
}

/// Adds jitter to a delay to avoid thundering-herd retries across replicas.
fn add_jitter(delay: Duration, max_jitter: f64) -> Duration {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    let seed = hasher.finish();

    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) >> 16) & 0x7fff;
    let jitter_factor = (random as f64 / 32767.0) * max_jitter;

    let delay_ms = delay.as_millis() as f64;
    let jitter_ms = delay_ms * jitter_factor;

    Duration::from_millis((delay_ms + jitter_ms) as u64)
}

pub async fn retry_operation<F, T, E>(
    operation_name: &str,
    strategy: RetryStrategy,
    operation: F,
) -> Result<T>
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
    E: Into<Error> + std::fmt::Debug + Clone,
{
    RetryExecutor::new(strategy, operation_name.to_string())
        .execute(operation)
        .await
}

pub async fn retry_for_error<F, T, E>(
    operation_name: &str,
    sample_error: &Error,
    operation: F,
) -> Result<T>
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send + 'static>>,
    E: Into<Error> + std::fmt::Debug + Clone,
{
    retry_operation(operation_name, RetryStrategy::for_error(sample_error), operation).await
}

/// Per-category retry policy for the service's external dependencies.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub inventory_requests: RetryStrategy,
    pub metrics_store_operations: RetryStrategy,
    pub insight_store_operations: RetryStrategy,
    pub notification_deliveries: RetryStrategy,
    pub llm_requests: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            inventory_requests: RetryStrategy::exponential_backoff_with_config(RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1000),
                max_delay: Duration::from_secs(10),
                backoff_multiplier: 2.0,
                use_jitter: true,
                max_jitter: 0.2,
                attempt_timeout: Some(Duration::from_secs(30)),
            }),
            metrics_store_operations: RetryStrategy::exponential_backoff_with_config(RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 2.0,
                use_jitter: true,
                max_jitter: 0.15,
                attempt_timeout: Some(Duration::from_secs(10)),
            }),
            insight_store_operations: RetryStrategy::exponential_backoff_with_config(RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 1.5,
                use_jitter: true,
                max_jitter: 0.1,
                attempt_timeout: Some(Duration::from_secs(10)),
            }),
            notification_deliveries: RetryStrategy::NoRetry,
            llm_requests: RetryStrategy::exponential_backoff_with_config(RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(3000),
                max_delay: Duration::from_secs(20),
                backoff_multiplier: 2.0,
                use_jitter: true,
                max_jitter: 0.15,
                attempt_timeout: Some(Duration::from_secs(60)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn successful_operation_returns_immediately() {
        let executor = RetryExecutor::new(RetryStrategy::exponential_backoff(), "test_op".to_string());
        let result = executor.execute(|| Box::pin(async { Ok::<i32, Error>(42) })).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let executor = RetryExecutor::new(
            RetryStrategy::fixed_delay(Duration::from_millis(10)),
            "test_op".to_string(),
        );
        let counter = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute(|| {
                let counter = counter.clone();
                Box::pin(async move {
                    let count = counter.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(Error::TransientUpstream("temporary failure".to_string()))
                    } else {
                        Ok(42)
                    }
                })
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let executor = RetryExecutor::new(
            RetryStrategy::fixed_delay(Duration::from_millis(1)),
            "test_op".to_string(),
        );

        let result = executor
            .execute(|| Box::pin(async { Err::<i32, Error>(Error::TransientUpstream("persistent".to_string())) }))
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn jitter_stays_within_bound() {
        let delay = Duration::from_millis(1000);
        let jittered = add_jitter(delay, 0.1);
        let diff_percent = (jittered.as_millis() as f64 - 1000.0).abs() / 1000.0;
        assert!(diff_percent <= 0.1);
    }

    #[test]
    fn validation_and_conflict_errors_are_not_retried() {
        assert!(matches!(
            RetryStrategy::for_error(&Error::ValidationRejected(vec![])),
            RetryStrategy::NoRetry
        ));
        assert!(matches!(
            RetryStrategy::for_error(&Error::TransientUpstream("x".into())),
            RetryStrategy::ExponentialBackoff { .. }
        ));
    }
}
