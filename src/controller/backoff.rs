//! # Fibonacci Backoff
//!
//! Progressive retry delay for failed reconciliations. Grows more slowly than
//! exponential backoff, so a workload stuck on a transient API error is retried
//! often early on without hammering the API server later.
//!
//! ## Usage
//!
//! ```rust
//! use game_statefulset_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(1, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 1);
//! assert_eq!(backoff.next_backoff_seconds(), 1);
//! assert_eq!(backoff.next_backoff_seconds(), 2);
//! assert_eq!(backoff.next_backoff_seconds(), 3);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator, in seconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Floor, restored on reset
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    /// Ceiling the sequence saturates at
    max_seconds: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        let min_seconds = min_seconds.max(1);
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds: max_seconds.max(min_seconds),
        }
    }

    /// Current delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

/// Backoff state for a specific workload
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 300);
        let observed: Vec<u64> = (0..10).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(observed, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55]);
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        for _ in 0..6 {
            backoff.next_backoff_seconds();
        }
        // 13 would be next, capped at 10
        assert_eq!(backoff.next_backoff_seconds(), 10);
        assert_eq!(backoff.next_backoff_seconds(), 10);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(2, 100);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 2);
        assert_eq!(backoff.next_backoff_seconds(), 4);
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_state_is_per_workload() {
        let mut first = BackoffState::new(1, 60);
        let mut second = BackoffState::new(1, 60);
        first.increment_error();
        first.backoff.next_backoff_seconds();
        first.backoff.next_backoff_seconds();
        assert_eq!(first.backoff.next_backoff_seconds(), 2);
        assert_eq!(second.backoff.next_backoff_seconds(), 1);

        first.reset();
        assert_eq!(first.error_count, 0);
        assert_eq!(first.backoff.next_backoff_seconds(), 1);
        assert_eq!(second.error_count, 0);
        second.increment_error();
        assert_eq!(second.error_count, 1);
    }
}
