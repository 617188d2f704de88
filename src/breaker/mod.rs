//! Circuit breaker with per-upstream registry
//!
//! One breaker per named upstream dependency. Breakers are created lazily on
//! first use, and closed breakers are evicted after an idle TTL. Open and
//! half-open breakers are never evicted so that a failing upstream stays
//! protected.

use crate::config::BreakerConfig;
use crate::error::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,

    /// Requests are rejected until the cool-down elapses
    Open,

    /// A bounded number of probe requests test recovery
    HalfOpen,
}

/// Errors raised by a circuit breaker
#[derive(Error, Debug)]
pub enum BreakerError {
    #[error("Circuit open for '{name}', retry in {retry_after_ms}ms")]
    Open {
        name: String,
        retry_after_ms: u64,
    },

    #[error("Call to '{name}' timed out after {elapsed_ms}ms")]
    Timeout { name: String, elapsed_ms: u64 },
}

/// Point-in-time view of one breaker, exposed via stats and rejections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_attempts: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// Mutable bookkeeping, guarded by one mutex. The lock is held only around
/// in-memory transitions, never across the wrapped call.
struct Core {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_attempts: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_used: Instant,
}

impl Core {
    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            half_open_attempts: self.half_open_attempts,
            last_failure_time: self.last_failure_at,
            last_success_time: self.last_success_at,
            next_attempt_time: self.next_attempt_at,
        }
    }
}

/// Circuit breaker for one named upstream dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    core: Mutex<Core>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            core: Mutex::new(Core {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_attempts: 0,
                last_failure: None,
                last_failure_at: None,
                last_success_at: None,
                next_attempt: None,
                next_attempt_at: None,
                last_used: Instant::now(),
            }),
        }
    }

    /// Execute a call through the breaker.
    ///
    /// Rejects without invoking `f` while the circuit is open and the
    /// cool-down has not elapsed, or when the half-open probe budget is
    /// exhausted. Every invocation is wrapped in a hard timeout; a timeout
    /// counts as a failure.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call()?;

        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(e)
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    elapsed_ms: self.config.call_timeout_ms,
                }
                .into())
            }
        }
    }

    /// Admission check, applying the open -> half-open transition
    fn before_call(&self) -> std::result::Result<(), BreakerError> {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.last_used = Instant::now();

        match core.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match core.next_attempt {
                    Some(next) if now >= next => {
                        core.state = CircuitState::HalfOpen;
                        core.half_open_attempts = 1;
                        debug!(breaker = %self.name, "Circuit transitioning to half-open");
                        Ok(())
                    }
                    Some(next) => Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after_ms: next.saturating_duration_since(now).as_millis() as u64,
                    }),
                    None => {
                        // Should not happen: next_attempt is set on entering open
                        core.state = CircuitState::HalfOpen;
                        core.half_open_attempts = 1;
                        Ok(())
                    }
                }
            }
            CircuitState::HalfOpen => {
                if core.half_open_attempts >= self.config.half_open_max_attempts {
                    self.trip(&mut core);
                    warn!(breaker = %self.name, "Half-open probe budget exhausted, reopening");
                    Err(BreakerError::Open {
                        name: self.name.clone(),
                        retry_after_ms: self.config.reset_timeout_ms,
                    })
                } else {
                    core.half_open_attempts += 1;
                    Ok(())
                }
            }
        }
    }

    fn record_success(&self) {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.success_count += 1;
        core.last_success_at = Some(Utc::now());

        match core.state {
            CircuitState::Closed => {
                // Full reset on success, not decay
                core.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                core.state = CircuitState::Closed;
                core.failure_count = 0;
                core.half_open_attempts = 0;
                core.next_attempt = None;
                core.next_attempt_at = None;
                debug!(breaker = %self.name, "Circuit closed after successful probe");
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.last_failure = Some(Instant::now());
        core.last_failure_at = Some(Utc::now());

        match core.state {
            CircuitState::Closed => {
                core.failure_count += 1;
                if core.failure_count >= self.config.failure_threshold {
                    self.trip(&mut core);
                    warn!(
                        breaker = %self.name,
                        failures = core.failure_count,
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.trip(&mut core);
                warn!(breaker = %self.name, "Circuit reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Enter the open state and schedule the next probe
    fn trip(&self, core: &mut Core) {
        core.state = CircuitState::Open;
        core.half_open_attempts = 0;
        let reset = Duration::from_millis(self.config.reset_timeout_ms);
        core.next_attempt = Some(Instant::now() + reset);
        core.next_attempt_at = Some(Utc::now() + chrono::Duration::milliseconds(self.config.reset_timeout_ms as i64));
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.core.lock().expect("breaker lock poisoned").state
    }

    /// Point-in-time statistics
    pub fn snapshot(&self) -> BreakerSnapshot {
        self.core.lock().expect("breaker lock poisoned").snapshot()
    }

    /// Force back to closed, clearing all counters
    pub fn reset(&self) {
        let mut core = self.core.lock().expect("breaker lock poisoned");
        core.state = CircuitState::Closed;
        core.failure_count = 0;
        core.success_count = 0;
        core.half_open_attempts = 0;
        core.next_attempt = None;
        core.next_attempt_at = None;
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    fn idle_for(&self) -> Duration {
        let core = self.core.lock().expect("breaker lock poisoned");
        core.last_used.elapsed()
    }
}

/// Process-wide registry of breakers, keyed by upstream dependency name
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Get or lazily create the breaker for a dependency
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.config.clone()))
            })
            .clone()
    }

    /// Snapshot every registered breaker
    pub fn get_stats(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Reset every registered breaker to closed
    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Evict closed breakers idle past the configured TTL.
    ///
    /// Open and half-open breakers are kept regardless of idleness.
    pub fn evict_idle(&self) -> usize {
        let idle_ttl = Duration::from_secs(self.config.idle_ttl_secs);
        // Counted inside the closure: lazy creation can race the sweep,
        // so a before/after length delta is unreliable
        let mut evicted = 0usize;
        self.breakers.retain(|_, breaker| {
            let keep =
                breaker.state() != CircuitState::Closed || breaker.idle_for() < idle_ttl;
            if !keep {
                evicted += 1;
            }
            keep
        });
        if evicted > 0 {
            debug!(evicted, "Evicted idle circuit breakers");
        }
        evicted
    }

    /// Whether the named upstream is currently admitting calls
    pub fn is_healthy(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => breaker.state() != CircuitState::Open,
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
