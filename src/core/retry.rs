//! Attempt budgets for pipeline stages.
//!
//! Each stage gets its own budget; a download retry never consumes
//! transcribe or persist attempts.

use std::time::Duration;

/// How many attempts a stage may make and how long to wait between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBudget {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Wait after the first failed attempt
    pub first_backoff: Duration,

    /// Upper bound for any single wait
    pub backoff_cap: Duration,

    /// Factor applied to the wait after every further failure
    pub growth: f64,
}

impl StageBudget {
    pub fn new(attempts: u32, first_backoff_ms: u64, backoff_cap_ms: u64, growth: f64) -> Self {
        Self {
            attempts,
            first_backoff: Duration::from_millis(first_backoff_ms),
            backoff_cap: Duration::from_millis(backoff_cap_ms),
            growth,
        }
    }

    /// Budget for a stage that is never retried
    pub fn single_attempt() -> Self {
        Self::new(1, 0, 0, 1.0)
    }

    /// Whether another attempt fits after `attempts_made` failures
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.attempts
    }

    /// Wait before the next attempt, after `attempts_made` failures
    pub fn backoff_after(&self, attempts_made: u32) -> Duration {
        let steps = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.growth.max(1.0).powi(steps);
        let wait = self.first_backoff.as_secs_f64() * factor;

        if !wait.is_finite() || wait >= self.backoff_cap.as_secs_f64() {
            self.backoff_cap
        } else {
            Duration::from_secs_f64(wait)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_cap() {
        let budget = StageBudget::new(5, 1000, 10_000, 2.0);

        assert_eq!(budget.backoff_after(1), Duration::from_millis(1000));
        assert_eq!(budget.backoff_after(2), Duration::from_millis(2000));
        assert_eq!(budget.backoff_after(3), Duration::from_millis(4000));
        assert_eq!(budget.backoff_after(4), Duration::from_millis(8000));
        assert_eq!(budget.backoff_after(5), Duration::from_millis(10_000));
        assert_eq!(budget.backoff_after(200), Duration::from_millis(10_000));
    }

    #[test]
    fn test_first_backoff_respects_cap() {
        let budget = StageBudget::new(3, 5000, 1000, 2.0);
        assert_eq!(budget.backoff_after(1), Duration::from_millis(1000));
    }

    #[test]
    fn test_budget_counts_first_attempt() {
        let budget = StageBudget::new(3, 0, 0, 2.0);

        assert!(budget.allows_another(1));
        assert!(budget.allows_another(2));
        assert!(!budget.allows_another(3));

        assert!(!StageBudget::single_attempt().allows_another(1));
    }

    #[test]
    fn test_zero_backoff() {
        let budget = StageBudget::new(4, 0, 30_000, 2.0);
        assert_eq!(budget.backoff_after(1), Duration::ZERO);
        assert_eq!(budget.backoff_after(4), Duration::ZERO);
    }
}
