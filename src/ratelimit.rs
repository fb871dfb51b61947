//! A small token-bucket limiter for noisy, repeated kernel-error
//! warnings (a flapping interface can otherwise flood the log with the
//! same rejection every scan).

use std::time::{Duration, Instant};

pub struct RateLimiter {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl RateLimiter {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            refill_per_sec,
            last: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Returns `true` (and consumes a token) if the caller may act now.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_blocks() {
        let mut rl = RateLimiter::new(2, 1.0);
        assert!(rl.allow_at(Instant::now()));
        assert!(rl.allow_at(Instant::now()));
        assert!(!rl.allow_at(Instant::now()));
    }

    #[test]
    fn refills_over_time() {
        let mut rl = RateLimiter::new(1, 10.0);
        let t0 = Instant::now();
        assert!(rl.allow_at(t0));
        assert!(!rl.allow_at(t0));
        assert!(rl.allow_at(t0 + Duration::from_millis(150)));
    }
}
