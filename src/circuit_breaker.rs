//! Circuit breaker guarding calls to the remote store.
//!
//! ```text
//!   Closed --(threshold consecutive failures)--> Open
//!   Open --(cool-down elapsed, next attempt)--> HalfOpen
//!   HalfOpen --(trial succeeds)--> Closed
//!   HalfOpen --(trial fails)--> Open
//! ```
//!
//! Only transient failures count. A rejection proves the backend is up, so
//! it resets the counter like a success.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask permission for one call.
    ///
    /// Returns the remaining cool-down when the call must not be made.
    /// An open circuit whose cool-down has elapsed moves to half-open here
    /// and admits exactly one trial.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = self.remaining_cool_down(now);
                if remaining.is_zero() {
                    info!("Circuit breaker half-open, allowing trial call");
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(remaining)
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(Duration::ZERO)
                } else {
                    self.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("Circuit breaker closed after successful trial");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.trial_in_flight = false;

        match self.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker trial failed, reopening");
                self.state = CircuitState::Open;
            }
            CircuitState::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    "Circuit breaker opened after {} consecutive failures",
                    self.consecutive_failures
                );
                self.state = CircuitState::Open;
            }
            _ => {
                debug!(
                    "Circuit breaker failure {}/{}",
                    self.consecutive_failures, self.config.failure_threshold
                );
            }
        }
    }

    /// Record the outcome of a call made after a successful acquire.
    pub fn record_result<T>(&mut self, result: &Result<T, RemoteError>, now: Instant) {
        match result {
            Err(err) if err.is_transient() => self.record_failure_at(now),
            Err(err) if err.is_circuit_open() => {}
            _ => self.record_success(),
        }
    }

    /// Run `f` under the breaker, failing fast while open.
    pub async fn call<T, F, Fut>(&mut self, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.try_acquire().map_err(|remaining| RemoteError::CircuitOpen {
            retry_in_ms: remaining.as_millis() as u64,
        })?;
        let result = f().await;
        self.record_result(&result, Instant::now());
        result
    }

    fn remaining_cool_down(&self, now: Instant) -> Duration {
        match self.last_failure {
            Some(at) => self
                .config
                .cool_down
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}
