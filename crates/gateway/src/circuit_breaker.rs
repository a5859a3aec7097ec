//! Protective wrapper around downstream calls.
//!
//! State is process-local and resets on restart; that is acceptable because
//! the breaker is a protective heuristic, not a correctness guarantee.

use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation — calls flow through.
    Closed,
    /// Downstream is failing — calls are rejected immediately.
    Open,
    /// Recovery probe — one call is allowed through to test downstream
    /// health.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long to stay open before allowing a recovery probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E>
where
    E: std::error::Error + 'static,
{
    /// The circuit is open; the operation was not invoked.
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Name of the protected call site.
    pub name: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failures recorded in the closed state.
    pub consecutive_failures: u32,
}

/// Internal mutable state.
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    /// Whether a probe is in flight during `HalfOpen`. Only one probe is
    /// admitted at a time.
    probe_in_flight: bool,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker decorating one downstream call site.
///
/// Transitions:
/// - `Closed` -> `Open` when consecutive failures reach the threshold
/// - `Open` -> `HalfOpen` after the reset timeout elapses
/// - `HalfOpen` -> `Closed` on probe success (failure counter zeroed)
/// - `HalfOpen` -> `Open` on probe failure
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    data: RwLock<CircuitData>,
}

impl CircuitBreaker {
    /// Create a breaker named after the call site it protects.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            data: RwLock::new(CircuitData::new()),
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Rejects immediately with [`CircuitError::Open`] while the circuit is
    /// open; otherwise invokes the operation and records its outcome.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open(self.name.clone()));
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning `Open` -> `HalfOpen`
    /// when the reset timeout has elapsed.
    fn try_acquire(&self) -> bool {
        let mut data = self.data.write();

        if data.state == CircuitState::Open
            && let Some(last_failure) = data.last_failure_time
            && last_failure.elapsed() >= self.config.reset_timeout
        {
            debug!(breaker = %self.name, "circuit breaker transitioning from open to half-open");
            data.state = CircuitState::HalfOpen;
            data.probe_in_flight = true;
            return true;
        }

        match data.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if data.probe_in_flight {
                    false
                } else {
                    data.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful execution. Any success zeroes the
    /// consecutive-failure counter; a half-open probe success closes the
    /// circuit.
    fn record_success(&self) {
        let mut data = self.data.write();
        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker closing after successful probe");
                data.state = CircuitState::Closed;
                data.consecutive_failures = 0;
                data.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed execution.
    fn record_failure(&self) {
        let mut data = self.data.write();
        match data.state {
            CircuitState::Closed => {
                data.consecutive_failures += 1;
                data.last_failure_time = Some(Instant::now());
                if data.consecutive_failures >= self.config.failure_threshold {
                    info!(
                        breaker = %self.name,
                        failures = data.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker opening"
                    );
                    data.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker re-opening after half-open probe failure");
                data.state = CircuitState::Open;
                data.last_failure_time = Some(Instant::now());
                data.probe_in_flight = false;
            }
            CircuitState::Open => {
                data.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Current state without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.data.read().state
    }

    /// Name of the protected call site.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reset to `Closed` (operator override).
    pub fn reset(&self) {
        let mut data = self.data.write();
        data.state = CircuitState::Closed;
        data.consecutive_failures = 0;
        data.last_failure_time = None;
        data.probe_in_flight = false;
    }

    /// Point-in-time status snapshot.
    pub fn snapshot(&self) -> CircuitBreakerStatus {
        let data = self.data.read();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: data.state,
            consecutive_failures: data.consecutive_failures,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &data.state)
            .field("consecutive_failures", &data.consecutive_failures)
            .finish_non_exhaustive()
    }
}
