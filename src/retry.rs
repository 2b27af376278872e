use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::time::Duration;

use crate::error::ProviderError;

/// Retry policy applied by the market client around every remote call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Wall-clock budget for one call: every attempt plus every sleep
    pub call_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            call_budget: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Fresh backoff schedule for one call: base, base*m, base*m^2 ... capped
    /// at `max_delay`. No jitter, so the schedule is reproducible.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Delay before the next attempt after `error`.
    ///
    /// A rate limit with a retry-after hint sleeps for the hint; everything
    /// else takes the next step of the schedule.
    pub fn delay_for(&self, error: &ProviderError, schedule: &mut ExponentialBackoff) -> Duration {
        match error {
            ProviderError::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => schedule.next_backoff().unwrap_or(self.max_delay),
        }
    }
}
