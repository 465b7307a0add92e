use std::time::Duration;

use crate::error::RenderError;

/// Longest pause between two attempts at the same URL
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff for transient render failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// Whether a job that has made `attempts` attempts and just failed with
    /// `err` gets another one.
    pub fn should_retry(&self, err: &RenderError, attempts: u32) -> bool {
        err.is_transient() && attempts <= self.max_retries
    }

    /// Delay before retry number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`, capped at [`MAX_BACKOFF`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}
