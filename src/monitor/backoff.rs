use super::config::MonitorConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Polling,
    Backoff,
}

/// Consecutive-failure bookkeeping for the poll loop.
#[derive(Debug, Default, Clone)]
pub struct Backoff {
    consecutive_errors: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_active(&self) -> bool {
        self.consecutive_errors > 0
    }

    /// Count a failure and return how long to wait before the next poll.
    pub fn record_failure(&mut self, config: &MonitorConfig) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.next_delay(config)
    }

    /// Clear the failure streak. Returns true if we were backing off.
    pub fn record_success(&mut self) -> bool {
        let was_active = self.is_active();
        self.consecutive_errors = 0;
        was_active
    }

    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
    }

    /// `initial * multiplier^(n-1)` for the n-th failure in a row, capped at max.
    /// With no failures this is just the normal polling interval.
    pub fn next_delay(&self, config: &MonitorConfig) -> Duration {
        if self.consecutive_errors == 0 {
            return config.poll_interval();
        }

        let exponent = (self.consecutive_errors - 1).min(64) as i32;
        let delay = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
        let capped = delay.min(config.max_backoff_ms as f64).round() as u64;

        Duration::from_millis(capped)
    }
}
