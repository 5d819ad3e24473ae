//! Circuit breaker + retry wrapper for fallible async operations.

use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
use crate::resilience::retry::{retry_with_backoff, RetryConfig, RetryError, Retryable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Operation class for spawning agents.
pub const SPAWN_AGENT: &str = "spawn-agent";
/// Operation class for dispatching tasks to agents.
pub const DISPATCH_TASK: &str = "dispatch-task";

#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker rejected the call; the operation never ran.
    #[error("circuit open for operation '{operation}'")]
    CircuitOpen { operation: String },

    #[error("operation '{operation}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    /// A non-retryable error from the operation itself.
    #[error(transparent)]
    Operation(E),
}

/// Runs operations through a per-class circuit breaker and a retry loop.
///
/// The retry loop runs inside a single breaker admission, so one exhausted
/// (or aborted) retry sequence counts as one breaker failure.
#[derive(Debug)]
pub struct ResilientOperationExecutor {
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl ResilientOperationExecutor {
    pub fn new(breaker_config: CircuitBreakerConfig, retry_config: RetryConfig) -> Self {
        Self {
            breaker_config,
            retry_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// The breaker for an operation class, created on first use.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(operation.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(operation, self.breaker_config.clone()))
        }))
    }

    pub fn breaker_state(&self, operation: &str) -> Option<CircuitBreakerState> {
        self.breakers.lock().get(operation).map(|b| b.snapshot())
    }

    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        op: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let breaker = self.breaker(operation);
        let Some(permit) = breaker.try_acquire() else {
            debug!(operation, "call rejected by open circuit");
            return Err(ResilienceError::CircuitOpen {
                operation: operation.to_string(),
            });
        };

        match retry_with_backoff(&self.retry_config, op).await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(RetryError::Exhausted {
                last_error,
                attempts,
            }) => {
                permit.failure();
                Err(ResilienceError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last_error,
                })
            }
            Err(RetryError::Aborted { error, .. }) => {
                permit.failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }
}

impl Default for ResilientOperationExecutor {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default(), RetryConfig::default())
    }
}
