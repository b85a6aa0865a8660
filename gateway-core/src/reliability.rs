//! Per-capability reliability: retry schedule and circuit breaker.
//!
//! One [`CircuitBreaker`] instance exists per capability ID, held in the
//! gateway context's [`ReliabilityLayer`] and updated atomically so a read
//! during dispatch is never stale by more than one call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

/// Fixed retry delay schedule: first attempt immediate, then backing off.
pub const RETRY_DELAYS: [Duration; 4] = [
    Duration::from_millis(0),
    Duration::from_millis(500),
    Duration::from_millis(1500),
    Duration::from_millis(4500),
];

/// Bounds a single outbound HTTP attempt to a backend.
pub const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

const ROLLING_WINDOW: Duration = Duration::from_secs(5 * 60);
const MIN_VOLUME: usize = 5;
const FAILURE_THRESHOLD: f64 = 0.5;
const HALF_OPEN_AFTER: Duration = Duration::from_secs(30);

/// Whether an outcome should trigger a retry.
///
/// A transport error or a server-side (≥500) status is retryable; any 4xx,
/// including a backend-surfaced 402, is never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The attempt succeeded.
    Success,
    /// The attempt failed at the transport level (no response at all).
    TransportError,
    /// The attempt returned an HTTP status.
    HttpStatus(u16),
}

impl Outcome {
    /// Whether a subsequent retry attempt is permitted for this outcome.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        match self {
            Self::Success => false,
            Self::TransportError => true,
            Self::HttpStatus(status) => status >= 500,
        }
    }

    /// Whether this outcome should count as a circuit-breaker failure.
    #[must_use]
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// The circuit breaker's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are short-circuited without reaching the backend.
    Open,
    /// One probe call is admitted to test recovery.
    HalfOpen,
}

/// A single rolling-window call record: timestamp and whether it failed.
struct WindowEntry {
    at: Instant,
    failed: bool,
}

/// Per-capability circuit breaker and call counters.
///
/// Tracks a 5-minute rolling window, trips after a minimum volume of 5
/// calls crosses a 50% failure rate, and transitions to half-open 30
/// seconds after opening.
pub struct CircuitBreaker {
    window: std::sync::Mutex<VecDeque<WindowEntry>>,
    state: std::sync::Mutex<CircuitState>,
    opened_at: std::sync::Mutex<Option<Instant>>,
    half_open_probe_in_flight: std::sync::atomic::AtomicBool,
    total_calls: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    cumulative_latency_ms: AtomicU64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            window: std::sync::Mutex::new(VecDeque::new()),
            state: std::sync::Mutex::new(CircuitState::Closed),
            opened_at: std::sync::Mutex::new(None),
            half_open_probe_in_flight: std::sync::atomic::AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            cumulative_latency_ms: AtomicU64::new(0),
        }
    }
}

/// Aggregate, point-in-time counters for a capability, exposed via
/// `GET /status`.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    /// Current breaker state.
    pub state: CircuitState,
    /// Total calls observed.
    pub total_calls: u64,
    /// Total successful calls.
    pub total_successes: u64,
    /// Total failed calls.
    pub total_failures: u64,
    /// Cumulative latency across all calls, in milliseconds.
    pub cumulative_latency_ms: u64,
}

impl CircuitBreaker {
    /// Checks whether a call may proceed, transitioning `open` → `half-open`
    /// once the cooldown has elapsed.
    ///
    /// Returns `Ok(())` if the call should proceed (including the single
    /// admitted half-open probe), or `Err(())` if it must be short-circuited.
    pub fn admit(&self, capability_id: &str) -> Result<(), ()> {
        let mut state = self.state.lock().expect("circuit state mutex poisoned");
        match *state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = *self.opened_at.lock().expect("opened_at mutex poisoned");
                let cooldown_elapsed = opened_at.is_some_and(|t| t.elapsed() >= HALF_OPEN_AFTER);
                if cooldown_elapsed {
                    *state = CircuitState::HalfOpen;
                    self.half_open_probe_in_flight
                        .store(true, Ordering::SeqCst);
                    info!(capability_id, "circuit transitioning to half-open");
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                // Only one probe is admitted at a time.
                if self
                    .half_open_probe_in_flight
                    .swap(true, Ordering::SeqCst)
                {
                    Err(())
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Records the outcome of an admitted call, updating counters and
    /// possibly transitioning the circuit state.
    pub fn record(&self, capability_id: &str, outcome: Outcome, latency: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.cumulative_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        if outcome.is_failure() {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        }

        let mut state = self.state.lock().expect("circuit state mutex poisoned");
        if *state == CircuitState::HalfOpen {
            self.half_open_probe_in_flight
                .store(false, Ordering::SeqCst);
            if outcome.is_failure() {
                *state = CircuitState::Open;
                *self.opened_at.lock().expect("opened_at mutex poisoned") = Some(Instant::now());
                warn!(capability_id, "half-open probe failed, re-opening circuit");
            } else {
                *state = CircuitState::Closed;
                self.window.lock().expect("window mutex poisoned").clear();
                info!(capability_id, "half-open probe succeeded, closing circuit");
            }
            return;
        }

        let mut window = self.window.lock().expect("window mutex poisoned");
        let now = Instant::now();
        window.push_back(WindowEntry {
            at: now,
            failed: outcome.is_failure(),
        });
        while window
            .front()
            .is_some_and(|e| now.duration_since(e.at) > ROLLING_WINDOW)
        {
            window.pop_front();
        }

        if *state == CircuitState::Closed && window.len() >= MIN_VOLUME {
            let failures = window.iter().filter(|e| e.failed).count();
            #[allow(clippy::cast_precision_loss)]
            let failure_rate = failures as f64 / window.len() as f64;
            if failure_rate >= FAILURE_THRESHOLD {
                *state = CircuitState::Open;
                *self.opened_at.lock().expect("opened_at mutex poisoned") = Some(now);
                warn!(
                    capability_id,
                    failure_rate, "circuit opened: failure threshold exceeded"
                );
            }
        }
    }

    /// A point-in-time snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: *self.state.lock().expect("circuit state mutex poisoned"),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            cumulative_latency_ms: self.cumulative_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Owns one [`CircuitBreaker`] per capability ID, created on first access.
#[derive(Default)]
pub struct ReliabilityLayer {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
}

impl ReliabilityLayer {
    /// Returns the breaker for `capability_id`, creating it if this is the
    /// first call observed for that capability.
    #[must_use]
    pub fn breaker_for(&self, capability_id: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(capability_id.to_owned())
            .or_default()
            .clone()
    }

    /// Snapshots for every capability seen so far, for `GET /status`.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<(String, CircuitSnapshot)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_on_server_error_not_client_error() {
        assert!(Outcome::HttpStatus(502).is_retryable());
        assert!(!Outcome::HttpStatus(402).is_retryable());
        assert!(!Outcome::HttpStatus(404).is_retryable());
        assert!(Outcome::TransportError.is_retryable());
        assert!(!Outcome::Success.is_retryable());
    }

    #[test]
    fn circuit_opens_after_failure_threshold_with_minimum_volume() {
        let breaker = CircuitBreaker::default();
        for _ in 0..4 {
            breaker.admit("cap").unwrap();
            breaker.record("cap", Outcome::HttpStatus(500), Duration::from_millis(1));
        }
        // Only 4 calls so far: below minimum volume, still closed.
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);

        breaker.admit("cap").unwrap();
        breaker.record("cap", Outcome::HttpStatus(500), Duration::from_millis(1));
        // 5 calls, all failures: threshold exceeded.
        assert_eq!(breaker.snapshot().state, CircuitState::Open);
        assert!(breaker.admit("cap").is_err());
    }

    #[test]
    fn half_open_probe_success_closes_circuit() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.admit("cap").unwrap();
            breaker.record("cap", Outcome::HttpStatus(500), Duration::from_millis(1));
        }
        assert_eq!(breaker.snapshot().state, CircuitState::Open);

        // Force the cooldown to have elapsed.
        *breaker.opened_at.lock().unwrap() = Some(Instant::now() - HALF_OPEN_AFTER - Duration::from_secs(1));

        breaker.admit("cap").unwrap();
        assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);
        breaker.record("cap", Outcome::Success, Duration::from_millis(1));
        assert_eq!(breaker.snapshot().state, CircuitState::Closed);
    }
}
