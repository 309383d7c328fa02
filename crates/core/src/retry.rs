//! Archival retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff for failed archival uploads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before a job is parked for manual retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per additional failure.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    300_000 // 5 minutes
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have failed so far.
    ///
    /// `failed_attempts` is 1 after the first failure.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(63) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Whether another automatic attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(format!(
                "retry.backoff_factor {} must be a finite value >= 1.0",
                self.backoff_factor
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "retry.initial_delay_ms {} exceeds retry.max_delay_ms {}",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}
