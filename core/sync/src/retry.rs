//! Retry budget and pluggable backoff between whole-sync attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay between attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by `multiplier` per retry, capped at `max_delay`.
    Exponential { multiplier: f64, max_delay: Duration },
}

impl Backoff {
    /// Exponential backoff doubling up to ten minutes.
    pub fn exponential() -> Self {
        Backoff::Exponential {
            multiplier: 2.0,
            max_delay: Duration::from_secs(600),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed
    }
}

/// Retry budget for whole-sync attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = unlimited).
    pub max_retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Backoff shape.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Create a new retry policy with a fixed 30 second delay.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::from_secs(30),
            backoff: Backoff::Fixed,
        }
    }

    /// Set the base delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the backoff shape.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether the budget is unbounded.
    pub fn is_unlimited(&self) -> bool {
        self.max_retries == 0
    }

    /// Whether `attempts` already made use up the whole budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        !self.is_unlimited() && attempts >= self.max_retries
    }

    /// Delay to wait after the given number of failed attempts (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let millis = self.delay.as_millis() as f64 * multiplier.powi(exponent);
                let capped = millis.min(max_delay.as_millis() as f64);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
