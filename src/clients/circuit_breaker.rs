use std::sync::{Mutex, MutexGuard};

use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    error::DeliveryError,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
};

/// Process-local breaker guarding one downstream dependency. A single
/// instance is constructed at startup and shared by everything that calls
/// the gateway; opening slightly early or late relative to other instances
/// is acceptable, the point is to shed load from a failing dependency.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    next_attempt_at: Option<Instant>,
    probe_in_flight: bool,
}

enum Admission {
    Allowed,
    Rejected { retry_in: Duration },
}

impl CircuitBreaker {
    pub fn new(service_name: String, config: CircuitBreakerConfig) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                next_attempt_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, DeliveryError>>,
    {
        if let Admission::Rejected { retry_in } = self.admit() {
            warn!(
                service = %self.service_name,
                retry_in_ms = retry_in.as_millis() as u64,
                "Circuit breaker is open, rejecting request"
            );
            return Err(DeliveryError::CircuitOpen { retry_in });
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            // A permanent rejection means the dependency answered
            // authoritatively, so it counts as dependency health.
            Err(e) if e.is_permanent() => {
                self.record_success();
                Err(e)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let now = Instant::now();
                let next_attempt_at = inner.next_attempt_at.unwrap_or(now);

                if now < next_attempt_at {
                    return Admission::Rejected {
                        retry_in: next_attempt_at - now,
                    };
                }

                info!(service = %self.service_name, "Circuit breaker attempting reset");
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.probe_in_flight = true;
                Admission::Allowed
            }
            CircuitState::HalfOpen => {
                // One trial call at a time while recovering.
                if inner.probe_in_flight {
                    return Admission::Rejected {
                        retry_in: Duration::from_secs(self.config.timeout_seconds),
                    };
                }

                inner.probe_in_flight = true;
                Admission::Allowed
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    service = %self.service_name,
                    successes = inner.success_count,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.next_attempt_at = None;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.next_attempt_at = Some(self.reopen_deadline());
                warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                debug!(
                    service = %self.service_name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at = Some(self.reopen_deadline());
                    warn!(
                        service = %self.service_name,
                        failures = inner.failure_count,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn reopen_deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.timeout_seconds)
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
