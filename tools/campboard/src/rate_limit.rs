use crate::runtime::Clock;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

pub const DEFAULT_MAX_CALLS: usize = 50;
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter over remote calls.
///
/// Not synchronised: the owner serialises calls to `can_make_call`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_calls: usize,
    time_window: Duration,
    calls: VecDeque<SystemTime>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, time_window: Duration) -> Self {
        Self {
            max_calls,
            time_window,
            calls: VecDeque::new(),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    /// Applies new limits without forgetting calls already admitted.
    pub fn reconfigure(&mut self, max_calls: usize, time_window: Duration) {
        self.max_calls = max_calls;
        self.time_window = time_window;
    }

    pub fn can_make_call(&mut self, clock: &dyn Clock) -> bool {
        self.can_make_call_at(clock.now())
    }

    pub fn can_make_call_at(&mut self, now: SystemTime) -> bool {
        self.prune(now);
        if self.calls.len() < self.max_calls {
            self.calls.push_back(now);
            return true;
        }
        false
    }

    /// Free slots at `now`, without admitting anything.
    pub fn remaining_at(&self, now: SystemTime) -> usize {
        let live = self
            .calls
            .iter()
            .filter(|call| self.is_live(**call, now))
            .count();
        self.max_calls.saturating_sub(live)
    }

    fn prune(&mut self, now: SystemTime) {
        let window = self.time_window;
        self.calls
            .retain(|call| now.duration_since(*call).unwrap_or_default() < window);
    }

    fn is_live(&self, call: SystemTime, now: SystemTime) -> bool {
        now.duration_since(call).unwrap_or_default() < self.time_window
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALLS, DEFAULT_TIME_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::RateLimiter;
    use crate::runtime::{Clock, FakeClock};
    use std::time::Duration;

    #[test]
    fn admits_up_to_max_then_rejects_within_window() {
        let clock = FakeClock::default();
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(limiter.can_make_call(&clock));
            clock.advance(Duration::from_millis(300));
        }
        assert_eq!(results, vec![true, true, false]);

        // 60s after the first call it has aged out of the window.
        clock.advance(Duration::from_millis(60_000 - 900));
        assert!(limiter.can_make_call(&clock));
    }

    #[test]
    fn rejection_does_not_extend_the_ledger() {
        let clock = FakeClock::default();
        let mut limiter = RateLimiter::new(1, Duration::from_secs(10));
        assert!(limiter.can_make_call(&clock));
        clock.advance(Duration::from_secs(5));
        assert!(!limiter.can_make_call(&clock));
        assert_eq!(limiter.remaining_at(clock.now()), 0);
        clock.advance(Duration::from_secs(5));
        assert!(limiter.can_make_call(&clock));
    }

    #[test]
    fn defaults_allow_fifty_calls_per_minute() {
        let clock = FakeClock::default();
        let mut limiter = RateLimiter::default();
        let admitted = (0..60).filter(|_| limiter.can_make_call(&clock)).count();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn reconfigure_keeps_admitted_calls() {
        let clock = FakeClock::default();
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.can_make_call(&clock));
        assert!(limiter.can_make_call(&clock));
        limiter.reconfigure(2, Duration::from_secs(60));
        assert!(!limiter.can_make_call(&clock));
        assert_eq!(limiter.max_calls(), 2);
    }
}
