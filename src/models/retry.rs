use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Exponential backoff: `min(cap, base * 2^(attempt - 1))`.
    ///
    /// Deterministic on purpose, so a redelivered message lands back on the
    /// work queue at a predictable offset regardless of which instance
    /// scheduled it.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }
}
