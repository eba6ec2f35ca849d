//! Reconnect delay policy

use std::time::Duration;

use crate::config::ChatSettings;

/// Exponential backoff with a cap and a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Consecutive abnormal closes after which reconnection stops.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether another reconnect may be scheduled after `attempt` failures.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ChatSettings::default())
    }
}

impl From<&ChatSettings> for ReconnectPolicy {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.reconnect_base_delay_ms),
            cap: Duration::from_millis(settings.reconnect_max_delay_ms),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}
