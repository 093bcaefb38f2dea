//! Reconnect schedule
//!
//! Exponential, no jitter: `base, 2*base, 4*base, ...` capped at `cap`.
//! A single agent talks to a single broker, so there is no thundering herd
//! to spread out and a deterministic schedule is easier to reason about in
//! logs.

use std::time::Duration;

/// Exponential backoff state for one connection
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    /// Start at `base`, never exceed `cap`
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base: base.min(cap), cap, current: None, attempts: 0 }
    }

    /// Delay before the next attempt
    ///
    /// Non-decreasing until [`Backoff::reset`].
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.base,
            Some(previous) => previous.saturating_mul(2).min(self.cap),
        };
        self.current = Some(delay);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Back to `base` after a successful connect
    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60, 60, 60]);
        assert_eq!(backoff.attempts(), 9);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn base_above_cap_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn never_decreases_never_exceeds_cap(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..120_000,
            n in 1usize..40,
        ) {
            let cap = Duration::from_millis(cap_ms);
            let mut backoff = Backoff::new(Duration::from_millis(base_ms), cap);
            let mut last = Duration::ZERO;
            for _ in 0..n {
                let delay = backoff.next_delay();
                prop_assert!(delay >= last);
                prop_assert!(delay <= cap);
                last = delay;
            }
        }
    }
}
