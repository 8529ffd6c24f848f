//! Backoff strategies for the retrying client
//!
//! A strategy maps a 0-based attempt number to the wait that follows a failed
//! attempt. Strategies are stateless, so one instance can be shared by every
//! concurrent call.

use std::fmt::Debug;
use std::time::Duration;

use crate::config::{BackoffKind, RetryConfig};

/// Wait to apply after a failed attempt
pub trait BackoffStrategy: Send + Sync + Debug {
    /// Wait after the failed attempt `attempt` (0-based)
    fn next_wait_time(&self, attempt: u32) -> Duration;

    /// Wait plan for `attempts` attempts
    fn plan(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts).map(|attempt| self.next_wait_time(attempt)).collect()
    }
}

/// Delay grows by one step per attempt: `(attempt + 1) * step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    step: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BackoffStrategy for LinearBackoff {
    fn next_wait_time(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.saturating_add(1))
    }
}

/// Delay doubles per attempt: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialBackoff {
    /// 2s, 4s, 8s, 16s, 32s, then capped at one minute
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn next_wait_time(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

/// Strategy selected by the `[retry]` configuration
pub fn strategy_from_config(config: &RetryConfig) -> Box<dyn BackoffStrategy> {
    let base = Duration::from_millis(config.base_delay_ms);
    match config.strategy {
        BackoffKind::Linear => Box::new(LinearBackoff::new(base)),
        BackoffKind::Exponential => Box::new(ExponentialBackoff::new(
            base,
            Duration::from_millis(config.max_delay_ms),
        )),
    }
}
