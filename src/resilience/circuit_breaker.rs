// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-target circuit breaker.
//!
//! Protects a partition that keeps refusing work (full queue, unhealthy
//! consumer group) from being hammered. Callers take a [`CircuitPermit`]
//! before dispatching and report the outcome against it.
//!
//! States:
//! - Closed: Normal operation, attempts pass through
//! - Open: Target unhealthy, attempts fail fast without touching it
//! - HalfOpen: Recovery probe, a limited number of trial attempts allowed
//!
//! All transitions happen under a per-breaker lock, so concurrent callers
//! never see a half-applied transition or double-count a trial.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// The breaker rejected the attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit breaker for '{target}' open, request rejected")]
pub struct CircuitOpen {
    pub target: String,
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// How long to stay open before probing (half-open)
    pub recovery_timeout: Duration,
    /// Trial attempts allowed in half-open; all must succeed to close
    pub half_open_trial_budget: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_trial_budget: 2,
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            half_open_trial_budget: 1,
        }
    }
}

/// Proof that an attempt was admitted. Report it back exactly once.
#[derive(Debug)]
#[must_use = "report the outcome with record_success or record_failure"]
pub struct CircuitPermit {
    generation: u64,
    trial: bool,
}

impl CircuitPermit {
    /// Whether this attempt is a half-open trial
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Point-in-time copy of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition_at: Instant,
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_trial_budget: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition_at: Instant,
    /// Bumped on every transition so stale permits can be recognised
    generation: u64,
    trials_in_flight: u32,
    trial_successes: u32,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let name = name.into();
        crate::metrics::set_circuit_state(&name, CircuitState::Closed as u8);
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition_at: Instant::now(),
                generation: 0,
                trials_in_flight: 0,
                trial_successes: 0,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Current state, without advancing Open -> HalfOpen.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            target: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_transition_at: inner.last_transition_at,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            half_open_trial_budget: self.config.half_open_trial_budget,
        }
    }

    /// Ask to dispatch now.
    pub fn try_acquire(&self) -> Result<CircuitPermit, CircuitOpen> {
        self.try_acquire_at(Instant::now())
    }

    /// Ask to dispatch at `now`.
    pub fn try_acquire_at(&self, now: Instant) -> Result<CircuitPermit, CircuitOpen> {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let waited = now.saturating_duration_since(inner.last_transition_at);
            if waited >= self.config.recovery_timeout {
                self.transition(&mut inner, CircuitState::HalfOpen, now);
            }
        }

        let state = inner.state;
        match state {
            CircuitState::Closed => Ok(CircuitPermit {
                generation: inner.generation,
                trial: false,
            }),
            CircuitState::HalfOpen
                if inner.trials_in_flight + inner.trial_successes
                    < self.config.half_open_trial_budget =>
            {
                inner.trials_in_flight += 1;
                debug!(circuit = %self.name, in_flight = inner.trials_in_flight, "Half-open trial admitted");
                Ok(CircuitPermit {
                    generation: inner.generation,
                    trial: true,
                })
            }
            _ => {
                drop(inner);
                self.rejections.fetch_add(1, Ordering::Relaxed);
                debug!(circuit = %self.name, "Circuit breaker rejected attempt");
                crate::metrics::record_circuit_call(&self.name, "rejected");
                Err(CircuitOpen {
                    target: self.name.clone(),
                })
            }
        }
    }

    pub fn record_success(&self, permit: CircuitPermit) {
        self.record_success_at(permit, Instant::now());
    }

    pub fn record_success_at(&self, permit: CircuitPermit, now: Instant) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "success");

        let mut inner = self.inner.lock();
        if permit.generation != inner.generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if permit.trial => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_trial_budget {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, permit: CircuitPermit) {
        self.record_failure_at(permit, Instant::now());
    }

    pub fn record_failure_at(&self, permit: CircuitPermit, now: Instant) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, "failure");

        let mut inner = self.inner.lock();
        if permit.generation != inner.generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition_at = now;
        inner.generation += 1;
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }

        crate::metrics::set_circuit_state(&self.name, to as u8);
        match to {
            CircuitState::Open => warn!(
                circuit = %self.name,
                %from,
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            ),
            _ => info!(circuit = %self.name, %from, %to, "Circuit breaker transition"),
        }
    }

    /// Get total number of attempts
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Get number of rejected attempts (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get failure rate (0.0 - 1.0) over reported outcomes
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let reported = self.successes() + self.failures();
        if reported == 0 {
            return 0.0;
        }
        self.failures() as f64 / reported as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fail(cb: &CircuitBreaker, at: Instant) {
        let permit = cb.try_acquire_at(at).unwrap();
        cb.record_failure_at(permit, at);
    }

    #[test]
    fn test_three_failures_open_the_circuit() {
        let config = CircuitConfig {
            failure_threshold: 3,
            ..CircuitConfig::default()
        };
        let cb = CircuitBreaker::new("test", config);
        let t0 = Instant::now();

        fail(&cb, t0);
        fail(&cb, t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb, t0);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire_at(t0).is_err());
        assert_eq!(cb.rejections(), 1);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        let t0 = Instant::now();

        fail(&cb, t0);
        let permit = cb.try_acquire_at(t0).unwrap();
        cb.record_success_at(permit, t0);
        fail(&cb, t0);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_recovery_scenario() {
        // threshold=2, recovery=100ms, budget=1
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        let t0 = Instant::now();

        fail(&cb, t0);
        fail(&cb, t0);
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.try_acquire_at(t0 + ms(50)).unwrap_err();
        assert_eq!(err.target, "test");
        assert_eq!(cb.state(), CircuitState::Open);

        let permit = cb.try_acquire_at(t0 + ms(150)).unwrap();
        assert!(permit.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success_at(permit, t0 + ms(151));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        let t0 = Instant::now();
        fail(&cb, t0);
        fail(&cb, t0);

        let probe_at = t0 + ms(120);
        let permit = cb.try_acquire_at(probe_at).unwrap();
        cb.record_failure_at(permit, probe_at);
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted at the probe failure
        assert!(cb.try_acquire_at(probe_at + ms(50)).is_err());
        assert!(cb.try_acquire_at(probe_at + ms(100)).is_ok());
    }

    #[test]
    fn test_half_open_trial_budget_limits_concurrency() {
        let config = CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: ms(10),
            half_open_trial_budget: 2,
        };
        let cb = CircuitBreaker::new("test", config);
        let t0 = Instant::now();
        fail(&cb, t0);

        let t1 = t0 + ms(10);
        let a = cb.try_acquire_at(t1).unwrap();
        let b = cb.try_acquire_at(t1).unwrap();
        assert!(cb.try_acquire_at(t1).is_err(), "budget exhausted");

        cb.record_success_at(a, t1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // one success + one in flight still fills the budget
        assert!(cb.try_acquire_at(t1).is_err());

        cb.record_success_at(b, t1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_stale_permit_does_not_count_as_trial() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        let t0 = Instant::now();

        let stale = cb.try_acquire_at(t0).unwrap();
        fail(&cb, t0);
        fail(&cb, t0);
        assert_eq!(cb.state(), CircuitState::Open);

        let t1 = t0 + ms(100);
        let trial = cb.try_acquire_at(t1).unwrap();
        cb.record_success_at(stale, t1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success_at(trial, t1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_half_open_admits_exactly_budget() {
        let config = CircuitConfig {
            failure_threshold: 1,
            recovery_timeout: ms(1),
            half_open_trial_budget: 3,
        };
        let cb = Arc::new(CircuitBreaker::new("test", config));
        let t0 = Instant::now();
        fail(&cb, t0);
        let t1 = t0 + ms(5);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = cb.clone();
                std::thread::spawn(move || cb.try_acquire_at(t1).ok())
            })
            .collect();
        let admitted: Vec<CircuitPermit> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(admitted.len(), 3);
        for permit in admitted {
            cb.record_success_at(permit, t1);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failure_rate_calculation() {
        let config = CircuitConfig {
            failure_threshold: 100,
            ..CircuitConfig::default()
        };
        let cb = CircuitBreaker::new("test", config);
        let t0 = Instant::now();

        for ok in [true, false, true, false] {
            let permit = cb.try_acquire_at(t0).unwrap();
            if ok {
                cb.record_success_at(permit, t0);
            } else {
                cb.record_failure_at(permit, t0);
            }
        }
        assert!((cb.failure_rate() - 0.5).abs() < 0.01);
        assert_eq!(cb.calls_total(), 4);
    }
}
