//! Fault tolerance for agent operations.
//!
//! - circuit_breaker: per-operation-class fail-fast guard
//! - retry: exponential backoff with jitter
//! - executor: the two combined around any fallible async operation

mod circuit_breaker;
mod executor;
mod retry;

pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState,
    PermitKind,
};
pub use executor::{ResilienceError, ResilientOperationExecutor, DISPATCH_TASK, SPAWN_AGENT};
pub use retry::{retry_with_backoff, RetryConfig, RetryError, Retryable};
