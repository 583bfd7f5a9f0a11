//! # Circuit Breaker
//!
//! Wraps synchronous inter-service calls (e.g. gateway → service) with
//! failure isolation. States: `CLOSED`, `OPEN`, `HALF_OPEN`.
//!
//! - `CLOSED → OPEN` when the rolling error percentage exceeds
//!   `error_threshold_percentage` over `rolling_count_timeout`, with at
//!   least `volume_threshold` calls observed in that window.
//! - `OPEN → HALF_OPEN` after `reset_timeout`.
//! - `HALF_OPEN → CLOSED` on first success; `HALF_OPEN → OPEN` on first
//!   failure.
//!
//! While `OPEN`, calls are rejected immediately with [`CircuitError::Open`]
//! without invoking the wrapped action; callers should treat this as a
//! retryable failure upstream.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub error_threshold_percentage: u32,
    pub volume_threshold: u32,
    pub rolling_count_timeout: Duration,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50,
            volume_threshold: 5,
            rolling_count_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

struct Window {
    started_at: Instant,
    total: u32,
    failed: u32,
}

impl Window {
    fn fresh() -> Self {
        Self {
            started_at: Instant::now(),
            total: 0,
            failed: 0,
        }
    }
}

struct Inner {
    state: CircuitState,
    window: Window,
    opened_at: Option<Instant>,
}

/// A named circuit breaker guarding one downstream dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: Window::fresh(),
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Run `action` through the breaker. Returns `CircuitError::Open`
    /// without invoking `action` if the circuit is currently open.
    pub async fn call<T, E, F, Fut>(&self, action: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            tracing::warn!(breaker = %self.name, "circuit open, rejecting call");
            return Err(CircuitError::Open);
        }

        match action().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Decide whether a call may proceed, transitioning OPEN -> HALF_OPEN
    /// when the reset timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if inner.window.started_at.elapsed() >= self.config.rolling_count_timeout
            && inner.state == CircuitState::Closed
        {
            inner.window = Window::fresh();
        }

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(breaker = %self.name, "transitioning OPEN -> HALF_OPEN");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.window.total += 1;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.window = Window::fresh();
                inner.opened_at = None;
                tracing::info!(breaker = %self.name, "transitioning HALF_OPEN -> CLOSED");
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.window.total += 1;
                inner.window.failed += 1;

                let error_pct = (inner.window.failed * 100) / inner.window.total;
                if inner.window.total >= self.config.volume_threshold
                    && error_pct >= self.config.error_threshold_percentage
                {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        breaker = %self.name,
                        error_pct,
                        total = inner.window.total,
                        "transitioning CLOSED -> OPEN"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(breaker = %self.name, "transitioning HALF_OPEN -> OPEN");
            }
            CircuitState::Open => {}
        }
    }
}
