//! Exponential-backoff state machine for a single remote dependency. See spec.md §4.F.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

/// Tracks failure/retry state for one remote dependency.
///
/// `reset()` only clears the backoff once the current window has elapsed:
/// requests are dispatched from a thread pool and can complete out of order,
/// so a late success for an earlier request must not clobber a fresher failure.
#[derive(Debug, Clone, Copy)]
pub struct BackoffAdjuster {
    last_fail_time_ms: i64,
    backoff_period_ms: i64,
    min_backoff_ms: i64,
    max_backoff_ms: i64,
}

impl BackoffAdjuster {
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        assert!(min_backoff.as_millis() > 0);
        assert!(max_backoff.as_millis() >= 2 * min_backoff.as_millis());
        Self {
            last_fail_time_ms: 0,
            backoff_period_ms: 0,
            min_backoff_ms: min_backoff.as_millis() as i64,
            max_backoff_ms: max_backoff.as_millis() as i64,
        }
    }

    pub fn last_fail_time_ms(&self) -> i64 {
        self.last_fail_time_ms
    }

    pub fn backoff_period(&self) -> Duration {
        Duration::from_millis(self.backoff_period_ms as u64)
    }

    pub fn min_backoff(&self) -> Duration {
        Duration::from_millis(self.min_backoff_ms as u64)
    }

    pub fn set_min_backoff(&mut self, min_backoff: Duration) {
        assert!(min_backoff.as_millis() > 0);
        self.min_backoff_ms = min_backoff.as_millis() as i64;
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms as u64)
    }

    pub fn set_max_backoff(&mut self, max_backoff: Duration) {
        assert!(max_backoff.as_millis() >= 2 * self.min_backoff_ms as u128);
        self.max_backoff_ms = max_backoff.as_millis() as i64;
    }

    /// Whether a fresh request may be dispatched right now.
    pub fn retry_ok(&self) -> bool {
        if self.backoff_period_ms == 0 {
            return true;
        }
        now_ms() > self.last_fail_time_ms + self.backoff_period_ms
    }

    /// Record a temporary failure. Returns `true` if the backoff period changed
    /// (entering backoff, or doubling after the previous window elapsed), `false`
    /// if still inside an unexpired backoff window.
    pub fn adjust_retry_limit(&mut self) -> bool {
        let now = now_ms();
        if self.backoff_period_ms == 0 {
            self.backoff_period_ms = self.min_backoff_ms;
            self.last_fail_time_ms = now;
            return true;
        }
        if now > self.last_fail_time_ms + self.backoff_period_ms {
            self.backoff_period_ms = (self.backoff_period_ms * 2).min(self.max_backoff_ms);
            self.last_fail_time_ms = now;
            return true;
        }
        false
    }

    /// Success signal. Clears backoff only if the current window has elapsed.
    pub fn reset(&mut self) {
        if self.backoff_period_ms != 0 {
            let now = now_ms();
            if now > self.last_fail_time_ms + self.backoff_period_ms {
                self.backoff_period_ms = 0;
                self.last_fail_time_ms = 0;
            }
        }
    }
}

impl Default for BackoffAdjuster {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(2))
    }
}
