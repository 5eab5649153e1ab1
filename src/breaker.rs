//! Circuit breaker guarding calls to external dependencies
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ──────────────────────────────────────────► OPEN
//!     ▲                                                 │
//!     │ trial succeeds                 cooldown elapsed │
//!     │                                                 ▼
//!     └──────────────────────────────────────────── HALF_OPEN
//!                     trial fails: back to OPEN, clock restarts
//! ```
//!
//! While half-open exactly one trial call is in flight; concurrent callers
//! are rejected as if the circuit were still open. Every dependency gets its
//! own breaker, handed out by the [`BreakerRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::{BreakerError, CircuitOpenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Serializable view of one breaker for health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerReport {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Milliseconds since the circuit last opened, if it is not closed
    pub open_for_ms: Option<u64>,
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `None` when `call_timeout_ms` is 0
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: CircuitBreakerState,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    call_timeout: Option<Duration>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            call_timeout: config.call_timeout(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state.state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        self.lock().state.clone()
    }

    pub fn report(&self) -> BreakerReport {
        let state = self.snapshot();
        BreakerReport {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            open_for_ms: state
                .opened_at
                .map(|at| at.elapsed().as_millis().min(u64::MAX as u128) as u64),
        }
    }

    /// Runs `operation` unless the circuit rejects it
    ///
    /// Rejections return [`BreakerError::Open`] without calling `operation`.
    /// A call exceeding the configured call timeout counts as a failure and
    /// returns [`BreakerError::Timeout`].
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: permit == Permit::Trial,
        };

        let result = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(BreakerError::Inner),
                Err(_) => Err(BreakerError::Timeout(limit)),
            },
            None => operation().await.map_err(BreakerError::Inner),
        };

        guard.armed = false;
        match &result {
            Ok(_) => self.on_success(permit),
            Err(_) => self.on_failure(permit),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rejected(&self) -> CircuitOpenError {
        CircuitOpenError {
            dependency: self.name.clone(),
        }
    }

    fn acquire<E>(&self) -> Result<Permit, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let cooled_down = inner
                    .state
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.cooldown);
                if !cooled_down {
                    debug!("circuit '{}' open, rejecting call", self.name);
                    return Err(BreakerError::Open(self.rejected()));
                }
                info!("circuit '{}' half-open, letting one trial call through", self.name);
                inner.state.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                Ok(Permit::Trial)
            }
            CircuitState::HalfOpen if inner.trial_in_flight => {
                debug!("circuit '{}' trial in flight, rejecting call", self.name);
                Err(BreakerError::Open(self.rejected()))
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(Permit::Trial)
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.lock();
        match (permit, inner.state.state) {
            (Permit::Trial, _) => {
                info!("circuit '{}' trial call succeeded, closing", self.name);
                inner.state = CircuitBreakerState::default();
                inner.trial_in_flight = false;
            }
            (Permit::Normal, CircuitState::Closed) => inner.state.consecutive_failures = 0,
            // admitted before the circuit opened; only a trial may close it
            (Permit::Normal, _) => {
                debug!("circuit '{}' ignoring late success while not closed", self.name)
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        let mut inner = self.lock();
        inner.state.consecutive_failures = inner.state.consecutive_failures.saturating_add(1);

        match (permit, inner.state.state) {
            (Permit::Trial, _) => {
                warn!("circuit '{}' trial call failed, reopening", self.name);
                inner.state.state = CircuitState::Open;
                inner.state.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
            }
            (Permit::Normal, CircuitState::Closed)
                if inner.state.consecutive_failures >= self.failure_threshold =>
            {
                warn!(
                    "circuit '{}' opened after {} consecutive failures",
                    self.name, inner.state.consecutive_failures
                );
                inner.state.state = CircuitState::Open;
                inner.state.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

/// Frees the half-open trial slot if the trial call is dropped before finishing
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

/// One breaker per dependency name
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, &self.config)))
            .clone()
    }

    /// Reports of all breakers, sorted by name
    pub fn reports(&self) -> Vec<BreakerReport> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut reports: Vec<_> = breakers.values().map(|b| b.report()).collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }
}
