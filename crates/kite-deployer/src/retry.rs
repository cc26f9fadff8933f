//! Retry policy shared by every blocking I/O operation.
//!
//! One record replaces per-call option bags: every SSH call and provider
//! probe takes exactly one `RetryPolicy`.

use std::time::Duration;

/// How an operation retries: attempt budget, fixed sleep between attempts,
/// and a hard deadline over the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub interval: Duration,
    /// Hard deadline for the operation across all attempts.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            timeout,
        }
    }

    /// One attempt, no sleeps, bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO, timeout)
    }
}

impl Default for RetryPolicy {
    /// The remote-shell default: 15 attempts, 5 s apart, 5 min overall.
    fn default() -> Self {
        Self::new(15, Duration::from_secs(5), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_remote_shell_budget() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 15);
        assert_eq!(p.interval, Duration::from_secs(5));
        assert_eq!(p.timeout, Duration::from_secs(300));
    }

    #[test]
    fn once_never_sleeps() {
        let p = RetryPolicy::once(Duration::from_secs(30));
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.interval, Duration::ZERO);
    }
}
