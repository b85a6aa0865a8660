//! Coarse per-key token-bucket rate limiting.
//!
//! Keyed by an opaque string (the caller's IP address, resolved by the
//! transport layer from the left-most forwarded-for entry) so this module
//! stays free of any HTTP dependency. Allows 60 requests per 60-second
//! window, with a small probabilistic sweep of stale buckets.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

/// Requests allowed per window.
pub const LIMIT: u32 = 60;

/// Window length.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Chance, per call, that a stale-bucket sweep is triggered.
const SWEEP_PROBABILITY: f64 = 0.01;

struct Bucket {
    count: u32,
    window_started_at: Instant,
}

/// A per-key fixed-window token bucket.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    /// Records a request for `key` and returns whether it is allowed.
    #[must_use]
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let allowed = {
            let mut bucket = self
                .buckets
                .entry(key.to_owned())
                .or_insert_with(|| Bucket { count: 0, window_started_at: now });
            if now.duration_since(bucket.window_started_at) > WINDOW {
                bucket.count = 0;
                bucket.window_started_at = now;
            }
            bucket.count += 1;
            bucket.count <= LIMIT
        };

        if rand::rng().random_bool(SWEEP_PROBABILITY) {
            self.sweep();
        }

        allowed
    }

    /// Drops buckets whose window has fully elapsed, bounding memory for a
    /// long-running process with many transient callers.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_started_at) <= WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::default();
        for _ in 0..LIMIT {
            assert!(limiter.check("1.2.3.4"));
        }
    }

    #[test]
    fn rejects_requests_over_the_limit_within_the_window() {
        let limiter = RateLimiter::default();
        for _ in 0..LIMIT {
            limiter.check("1.2.3.4");
        }
        assert!(!limiter.check("1.2.3.4"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::default();
        for _ in 0..LIMIT {
            limiter.check("1.2.3.4");
        }
        assert!(limiter.check("5.6.7.8"));
    }
}
