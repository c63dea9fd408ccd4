use std::time::Duration;

use rand::Rng as _;

/// Poll delay that grows while the endpoint keeps failing transiently.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            consecutive_failures: 0,
        }
    }

    #[must_use]
    pub const fn is_backing_off(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// Delay before the next poll, without jitter
    #[must_use]
    pub fn delay(&self) -> Duration {
        let factor = 1u32 << self.consecutive_failures.min(16);
        self.base.saturating_mul(factor).min(self.max.max(self.base))
    }

    /// Record a transient failure and return the delay before the next poll.
    ///
    /// Adds up to 10% jitter. A server supplied `retry_after` is honoured
    /// when it asks for a longer wait.
    pub fn record_failure(&mut self, retry_after: Option<Duration>) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.delay();
        let jitter = delay.mul_f64(rand::rng().random_range(0.0..=0.1));
        let delay = (delay + jitter).max(retry_after.unwrap_or_default());
        tracing::debug!(failures = self.consecutive_failures, ?delay, "Backing off");
        delay
    }

    pub fn reset(&mut self) {
        if self.is_backing_off() {
            tracing::debug!(failures = self.consecutive_failures, "Endpoint recovered");
        }
        self.consecutive_failures = 0;
    }
}
