//! Circuit breaker to prevent cascade failures.
//!
//! When AI calls fail repeatedly, the circuit opens and subsequent calls
//! fail fast until the reset timeout elapses. After that a limited number
//! of probe calls decide whether it closes again. Calls are raced against
//! a deadline; a call that overruns is dropped (cancelling it) and counted
//! as a failure.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::humantime_duration;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes needed to close it
    pub success_threshold: u32,

    /// Deadline for a single call
    #[serde(with = "humantime_duration")]
    pub call_timeout: Duration,

    /// Time to stay open before probing
    #[serde(with = "humantime_duration")]
    pub reset_timeout: Duration,

    /// Probe calls allowed in flight while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            call_timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// All calls fail fast
    Open { opened_at: Instant },

    /// Probe calls decide whether to close
    HalfOpen { successes: u32, in_flight: u32 },
}

/// Serializable name of a [`CircuitState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Why a guarded call did not produce a value.
#[derive(Error, Debug)]
pub enum CircuitError<E> {
    #[error("circuit '{name}' is open")]
    Open { name: String },

    #[error("call through '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error(transparent)]
    Inner(E),
}

impl<E> CircuitError<E> {
    /// True when the wrapped operation was never invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open { .. })
    }
}

/// How a call got through the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Holds a half-open probe slot until the call finishes or is dropped.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.breaker.state.write();
        if let CircuitState::HalfOpen { successes, in_flight } = *state {
            *state = CircuitState::HalfOpen {
                successes,
                in_flight: in_flight.saturating_sub(1),
            };
        }
    }
}

/// Breaker guarding one named remote dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
}

impl CircuitBreaker {
    /// Create a closed circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed { failures: 0 }),
        }
    }

    /// Name used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` if the circuit admits it.
    ///
    /// The closure is only called when the call is admitted. While
    /// half-open, calls beyond `half_open_max_calls` are rejected as open.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(admission) = self.try_acquire() else {
            tracing::debug!(breaker = %self.name, "Call rejected, circuit open");
            return Err(CircuitError::Open {
                name: self.name.clone(),
            });
        };
        let _slot = (admission == Admission::Probe).then_some(ProbeSlot { breaker: self });

        match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
            Err(_) => {
                tracing::warn!(
                    breaker = %self.name,
                    timeout_ms = self.config.call_timeout.as_millis() as u64,
                    "Call timed out"
                );
                self.record_failure();
                Err(CircuitError::Timeout {
                    name: self.name.clone(),
                    after: self.config.call_timeout,
                })
            }
        }
    }

    /// Whether a call may proceed now. Moves an expired open circuit to
    /// half-open and takes a probe slot there.
    fn try_acquire(&self) -> Option<Admission> {
        let mut state = self.state.write();
        match *state {
            CircuitState::Closed { .. } => Some(Admission::Normal),
            CircuitState::HalfOpen { successes, in_flight } => {
                if in_flight < self.config.half_open_max_calls {
                    *state = CircuitState::HalfOpen {
                        successes,
                        in_flight: in_flight + 1,
                    };
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    *state = CircuitState::HalfOpen {
                        successes: 0,
                        in_flight: 1,
                    };
                    tracing::info!(breaker = %self.name, "Circuit half-open, probing recovery");
                    Some(Admission::Probe)
                } else {
                    None
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.write();
        match *state {
            CircuitState::HalfOpen { successes, in_flight } => {
                if successes + 1 >= self.config.success_threshold {
                    *state = CircuitState::Closed { failures: 0 };
                    tracing::info!(breaker = %self.name, "Circuit closed after successful recovery");
                } else {
                    *state = CircuitState::HalfOpen {
                        successes: successes + 1,
                        in_flight,
                    };
                }
            }
            CircuitState::Closed { .. } => {
                *state = CircuitState::Closed { failures: 0 };
            }
            // A slow call admitted before the circuit opened
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.write();
        match *state {
            CircuitState::Closed { failures } => {
                if failures + 1 >= self.config.failure_threshold {
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    tracing::warn!(
                        breaker = %self.name,
                        failures = failures + 1,
                        "Circuit opened after repeated failures"
                    );
                } else {
                    *state = CircuitState::Closed {
                        failures: failures + 1,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                tracing::warn!(breaker = %self.name, "Circuit reopened after failed recovery attempt");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Get current state of the circuit.
    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Serialisable view for metrics.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let (status, consecutive_failures, consecutive_successes) = match self.state() {
            CircuitState::Closed { failures } => (CircuitStatus::Closed, failures, 0),
            CircuitState::Open { .. } => (CircuitStatus::Open, self.config.failure_threshold, 0),
            CircuitState::HalfOpen { successes, .. } => (CircuitStatus::HalfOpen, 0, successes),
        };
        CircuitSnapshot {
            name: self.name.clone(),
            status,
            consecutive_failures,
            consecutive_successes,
        }
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        *self.state.write() = CircuitState::Closed { failures: 0 };
    }
}
