use std::time::Duration;

/// How often, and for how long, a failed request is retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between the end of a failed attempt and the start of the next one.
    pub interval: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Total time budget, measured from the first attempt. `None` is unbounded.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_millis(100), max_attempts: None, timeout: None }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval, ..Default::default() }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// A zero duration means no limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// True once no further attempt may be made after `attempts` attempts and `elapsed` time.
    pub fn is_exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
        let out_of_time = self.timeout.is_some_and(|limit| elapsed + self.interval > limit);
        out_of_attempts || out_of_time
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unbounded_by_default() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(u32::MAX, Duration::from_secs(86_400)));
        assert_eq!(RetryPolicy::default().with_timeout(Duration::ZERO).timeout, None);
    }

    #[test]
    fn limits() {
        let policy = RetryPolicy::new(Duration::from_secs(1)).with_max_attempts(3);
        assert!(!policy.is_exhausted(2, Duration::ZERO));
        assert!(policy.is_exhausted(3, Duration::ZERO));

        let policy = RetryPolicy::new(Duration::from_secs(1)).with_timeout(Duration::from_secs(10));
        assert!(!policy.is_exhausted(100, Duration::from_secs(9)));
        assert!(policy.is_exhausted(1, Duration::from_millis(9_500)));
    }
}
