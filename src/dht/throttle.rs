//! Outbound packet rate limiting for one DHT indexer.
use std::time::{Duration, Instant};

/// A token bucket refilled once per tick. `take()` returns `true` (and consumes a
/// token) if a send is currently permitted; callers that get `false` skip the send
/// for this tick rather than queueing it, matching §4.1's "the pool compensates
/// through volume, not retries" policy.
pub struct Throttle {
    capacity: u32,
    tokens: u32,
    refill_interval: Duration,
    last_refill: Instant,
}

impl Throttle {
    #[must_use]
    pub fn new(packets_per_tick: u32, refill_interval: Duration) -> Self {
        Self { capacity: packets_per_tick, tokens: packets_per_tick, refill_interval, last_refill: Instant::now() }
    }

    /// Refills the bucket if a full interval has elapsed since the last refill,
    /// then attempts to take one token.
    pub fn take(&mut self) -> bool {
        if self.last_refill.elapsed() >= self.refill_interval {
            self.tokens = self.capacity;
            self.last_refill = Instant::now();
        }

        if self.tokens == 0 {
            return false;
        }

        self.tokens -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_blocks() {
        let mut throttle = Throttle::new(2, Duration::from_secs(60));
        assert!(throttle.take());
        assert!(throttle.take());
        assert!(!throttle.take());
    }

    #[test]
    fn refills_after_interval_elapses() {
        let mut throttle = Throttle::new(1, Duration::from_millis(1));
        assert!(throttle.take());
        assert!(!throttle.take());
        std::thread::sleep(Duration::from_millis(5));
        assert!(throttle.take());
    }
}
