//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff mechanism for step retries.
//! The delay grows more slowly than exponential backoff, so a step that keeps
//! failing on a flaky provider gets several attempts before the budget runs out
//! without hammering the provider API.
//!
//! Sequence for `min = 1s, max = 10s`: 1s, 1s, 2s, 3s, 5s, 8s, 10s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff
    prev: Duration,
    /// Current backoff
    current: Duration,
    /// Maximum backoff
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given minimum and maximum delays
    ///
    /// # Arguments
    ///
    /// * `min` - Delay for the first two retries
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: min.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(secs(1), secs(10));

        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(1));
        assert_eq!(backoff.next_backoff(), secs(2));
        assert_eq!(backoff.next_backoff(), secs(3));
        assert_eq!(backoff.next_backoff(), secs(5));
        assert_eq!(backoff.next_backoff(), secs(8));
        assert_eq!(backoff.next_backoff(), secs(10)); // max
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(secs(1), secs(10));
        for _ in 0..7 {
            backoff.next_backoff();
        }
        // Next would be 13s (8+5), but is capped
        assert_eq!(backoff.next_backoff(), secs(10));
        assert_eq!(backoff.next_backoff(), secs(10));
    }

    #[test]
    fn test_min_above_max_is_capped() {
        let mut backoff = FibonacciBackoff::new(secs(20), secs(10));
        assert_eq!(backoff.next_backoff(), secs(10));
    }
}
