//! Delay between attempts of one bounded connect.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Capped exponential delay applied between failed open attempts.  The number
/// of attempts is not part of the policy; it is passed to every `connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
        }
    }
}

impl ReconnectBackoff {
    /// Delay after the given failed attempt (0-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_factor.max(1.0).powi(exp);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}
