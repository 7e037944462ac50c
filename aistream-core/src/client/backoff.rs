use std::time::Duration;

use crate::config::ClientCfg;

/// Bounded exponential backoff for reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientCfg::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ClientCfg) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }

    /// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// True once `failures` consecutive connects have failed. The first
    /// failure is the initial connect, so the budget is `max_attempts`
    /// retries on top of it.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures > self.max_attempts
    }
}
