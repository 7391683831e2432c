//! Exponential backoff with jitter

use std::time::Duration;

/// Retry timing shared by storage, image resolution and readiness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First retry delay (default: 500 milliseconds)
    pub initial: Duration,
    /// Upper bound for any delay, jitter included (default: 30 seconds)
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before retry number `attempt` (zero-based)
    ///
    /// The base delay doubles per attempt; up to a quarter of it is added as
    /// jitter, and the result never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut base = self.initial;
        for _ in 0..attempt {
            base = std::cmp::min(base.saturating_mul(2), self.max);
            if base == self.max {
                break;
            }
        }

        let jitter = rand_jitter(base.as_millis() as u64 / 4);
        std::cmp::min(base + Duration::from_millis(jitter), self.max)
    }

    /// Start a fresh backoff sequence
    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }
}

/// A running backoff sequence
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Generate a random jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}
