// src/acquisition/backoff.rs
//! Exponential backoff for transport retries

use std::time::Duration;

use crate::config::constants::retry;

/// Doubling delay sequence with a ceiling. One instance covers one
/// retried operation; `reset` re-arms it after success.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl RetryBackoff {
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_millis(retry::BASE_BACKOFF_MS),
            Duration::from_millis(retry::MAX_BACKOFF_MS),
        )
    }

    pub fn with_limits(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Delay to sleep before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new()
    }
}
