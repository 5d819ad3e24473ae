//! Circuit breaker.
//!
//! One breaker guards one operation class (e.g. "spawn-agent"), not one
//! target, so a run of failures against any agent trips it for all of them.
//!
//! - Closed: calls pass through; a success resets the failure count, and
//!   reaching `failure_threshold` consecutive failures opens the circuit.
//! - Open: calls are rejected without running until more than
//!   `reset_timeout` has passed since the last failure.
//! - HalfOpen: exactly one trial call is let through. Success closes the
//!   circuit, failure reopens it and restarts the timeout.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a trial call is allowed.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitKind {
    /// Normal call while closed.
    Normal,
    /// The single half-open trial.
    Trial,
}

/// Admission ticket for one call. Report the outcome with
/// [`BreakerPermit::success`] or [`BreakerPermit::failure`]; a permit dropped
/// without an outcome gives the half-open trial slot back.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    kind: PermitKind,
    settled: bool,
}

impl BreakerPermit {
    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.kind);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.kind);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.kind == PermitKind::Trial {
            self.breaker.abandon_trial();
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
            }),
        }
    }

    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Does not perform the open -> half-open transition;
    /// that only happens when a call arrives.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Ask to run one call. `None` means the circuit is open (or a half-open
    /// trial is already in flight) and the call must not run.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut inner = self.inner.lock();
        let kind = match inner.state {
            CircuitState::Closed => PermitKind::Normal,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure_time
                    .map_or(true, |at| at.elapsed() > self.config.reset_timeout());
                if !cooled {
                    return None;
                }
                info!(name = %self.name, "circuit breaker entering half-open state");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                PermitKind::Trial
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                PermitKind::Trial
            }
        };
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            kind,
            settled: false,
        })
    }

    fn on_success(&self, kind: PermitKind) {
        let mut inner = self.inner.lock();
        match kind {
            PermitKind::Trial => {
                info!(name = %self.name, "circuit breaker closed after successful trial");
                inner.state = CircuitState::Closed;
                inner.trial_in_flight = false;
                inner.failure_count = 0;
            }
            PermitKind::Normal => {
                if inner.state == CircuitState::Closed {
                    inner.failure_count = 0;
                }
            }
        }
    }

    fn on_failure(&self, kind: PermitKind) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match kind {
            PermitKind::Trial => {
                warn!(name = %self.name, "half-open trial failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(now);
            }
            PermitKind::Normal => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.last_failure_time = Some(now);
                debug!(
                    name = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker failure recorded"
                );
                if inner.state == CircuitState::Closed
                    && inner.failure_count >= self.config.failure_threshold
                {
                    warn!(
                        name = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
        }
    }

    fn abandon_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            debug!(name = %self.name, "half-open trial abandoned");
            inner.trial_in_flight = false;
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.trial_in_flight = false;
    }
}
