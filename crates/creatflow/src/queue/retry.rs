use std::time::Duration;

/// Exponential backoff: retry `n` (0-based) waits `base^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: u32) -> Self {
        Self {
            max_retries,
            base: base.max(1),
        }
    }

    /// Delay before the next attempt, given how many retries already ran.
    /// `None` once the allowance is spent.
    pub fn delay_for(&self, retries: u32) -> Option<Duration> {
        if retries >= self.max_retries {
            return None;
        }
        let secs = (self.base as u64).checked_pow(retries).unwrap_or(u64::MAX);
        Some(Duration::from_secs(secs))
    }
}
