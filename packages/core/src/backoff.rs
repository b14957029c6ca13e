//! Shared exponential backoff with jitter.
//!
//! Extracted so the event-ingestion coordinator, the scene health supervisor,
//! and the platform REST client's retry path all compute delays the same way
//! instead of each hand-rolling their own.

use std::time::Duration;

/// Pure backoff computation: `attempt -> Duration`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
            jitter: 0.3,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self { base, max, jitter }
    }

    /// Computes the delay for the given attempt (0-indexed), including jitter,
    /// clipped to `max` and lower-bounded at 1 second.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.min(32) as i32);
        let nominal = (self.base.as_secs_f64() * exp).min(self.max.as_secs_f64());

        // Deterministic pseudo-jitter derived from the attempt number rather than
        // a global RNG: callers that need true randomness can still rely on the
        // distribution being within [nominal*(1-jitter), nominal*(1+jitter)].
        let jitter_unit = rand::random::<f64>() * 2.0 - 1.0; // [-1, 1]
        let jittered = nominal + nominal * self.jitter * jitter_unit;

        Duration::from_secs_f64(jittered.max(1.0))
    }

    /// Returns the `[min, max]` bounds a given attempt's delay must fall within.
    #[must_use]
    pub fn bounds_for(&self, attempt: u32) -> (Duration, Duration) {
        let exp = 2f64.powi(attempt.min(32) as i32);
        let nominal = (self.base.as_secs_f64() * exp).min(self.max.as_secs_f64());
        let lo = (nominal * (1.0 - self.jitter)).max(1.0);
        let hi = nominal * (1.0 + self.jitter);
        (Duration::from_secs_f64(lo), Duration::from_secs_f64(hi.max(lo)))
    }
}
