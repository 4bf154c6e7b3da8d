//! Circuit Breaker (§4.5): a three-state guard around every external
//! service call made by an activity, plus a process-wide registry keyed
//! by service name.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::voyant_error::VoyantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::seconds(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub at: DateTime<Utc>,
}

const TRANSITION_RING_CAPACITY: usize = 10;

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    transitions: VecDeque<Transition>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            last_failure_at: None,
            transitions: VecDeque::with_capacity(TRANSITION_RING_CAPACITY),
        }
    }

    fn record_transition(&mut self, from: BreakerState, to: BreakerState) {
        if self.transitions.len() == TRANSITION_RING_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.state = to;
    }
}

/// A single named breaker. State transitions are serialized under the
/// internal lock; the lock is never held across the protected call (§5:
/// "the actual call must execute outside the critical section").
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates open→half_open timeout expiry and returns the breaker's
    /// current, possibly-just-transitioned state.
    pub fn state(&self) -> BreakerState {
        let mut guard = self.inner.lock().unwrap();
        if guard.state == BreakerState::Open {
            if let Some(opened_at) = guard.opened_at {
                if Utc::now() - opened_at >= self.config.timeout {
                    guard.success_count = 0;
                    guard.record_transition(BreakerState::Open, BreakerState::HalfOpen);
                }
            }
        }
        guard.state
    }

    /// Gate + record in one step: returns `Err(CircuitOpen)` without
    /// invoking `call` if the breaker is open; otherwise runs `call`
    /// outside the lock and records the outcome. The call's own error is
    /// preserved on failure — only a breaker-denied call is surfaced as
    /// `CircuitOpen` (§7: CircuitOpen is about the breaker's gate, not a
    /// stand-in for whatever the protected call actually failed with).
    pub async fn guard<F, Fut, T, E>(&self, call: F) -> Result<T, VoyantError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<VoyantError>,
    {
        if self.state() == BreakerState::Open {
            return Err(VoyantError::circuit_open(self.name.clone()));
        }
        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err.into())
            }
        }
    }

    pub fn record_success(&self) {
        let mut guard = self.inner.lock().unwrap();
        match guard.state {
            BreakerState::Closed => {
                guard.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    guard.failure_count = 0;
                    guard.success_count = 0;
                    guard.opened_at = None;
                    guard.record_transition(BreakerState::HalfOpen, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.last_failure_at = Some(Utc::now());
        match guard.state {
            BreakerState::Closed => {
                guard.failure_count += 1;
                if guard.failure_count >= self.config.failure_threshold {
                    guard.opened_at = Some(Utc::now());
                    guard.record_transition(BreakerState::Closed, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                guard.opened_at = Some(Utc::now());
                guard.success_count = 0;
                guard.record_transition(BreakerState::HalfOpen, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut guard = self.inner.lock().unwrap();
        let from = guard.state;
        guard.failure_count = 0;
        guard.success_count = 0;
        guard.opened_at = None;
        if from != BreakerState::Closed {
            guard.record_transition(from, BreakerState::Closed);
        }
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.inner.lock().unwrap().transitions.iter().cloned().collect()
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failure_count
    }
}

/// Process-wide registry mapping a service name to its breaker,
/// constructed lazily on first use with a default config, overridable
/// per name before first use.
pub struct CircuitBreakerRegistry {
    default_config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a non-default config for a named breaker. Must be
    /// called before the breaker's first use (per §4.5); calling it
    /// afterward replaces the breaker and loses its history.
    pub fn configure(&self, name: &str, config: BreakerConfig) {
        let mut breakers = self.breakers.lock().unwrap();
        breakers.insert(name.to_string(), Arc::new(CircuitBreaker::new(name, config)));
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config)))
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Boundary behavior (§8): opens on exactly the Nth consecutive failure.
    #[test]
    fn opens_on_exactly_the_nth_failure() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 3,
                timeout: Duration::seconds(30),
                success_threshold: 1,
            },
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_after_timeout_and_recovers_on_successes() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                timeout: Duration::milliseconds(10),
                success_threshold: 2,
            },
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                timeout: Duration::milliseconds(5),
                success_threshold: 2,
            },
        );
        breaker.record_failure();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn transition_ring_is_bounded() {
        let breaker = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                timeout: Duration::milliseconds(1),
                success_threshold: 1,
            },
        );
        for _ in 0..20 {
            breaker.record_failure();
            std::thread::sleep(std::time::Duration::from_millis(2));
            breaker.state();
            breaker.record_success();
        }
        assert!(breaker.transitions().len() <= TRANSITION_RING_CAPACITY);
    }

    #[test]
    fn registry_reuses_breaker_per_name() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("svc-a");
        a.record_failure();
        let a_again = registry.get_or_create("svc-a");
        assert_eq!(a_again.failure_count(), 1);
    }
}
