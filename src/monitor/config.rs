use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("backoff multiplier must be at least 1.0, got {0}")]
    MultiplierTooSmall(f64),

    #[error("max backoff ({max}ms) is below initial backoff ({initial}ms)")]
    BackoffRange { initial: u64, max: u64 },

    #[error("error threshold must be at least 1")]
    ZeroErrorThreshold,
}

/// Timing knobs for the monitor. Mutable at runtime through `Monitor::reconfigure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub polling_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub error_threshold: u32, // failures in a row before the UI hears about it
    pub power_saving_interval_ms: u64,
    pub power_saving: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: 1_000,
            progress_interval_ms: 250,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 15_000,
            backoff_multiplier: 1.5,
            error_threshold: 3,
            power_saving_interval_ms: 5_000,
            power_saving: false,
        }
    }
}

/// Partial config; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfigUpdate {
    pub polling_interval_ms: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub error_threshold: Option<u32>,
    pub power_saving_interval_ms: Option<u64>,
    pub power_saving: Option<bool>,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("polling_interval_ms", self.polling_interval_ms),
            ("progress_interval_ms", self.progress_interval_ms),
            ("initial_backoff_ms", self.initial_backoff_ms),
            ("power_saving_interval_ms", self.power_saving_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(*name));
        }

        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::MultiplierTooSmall(self.backoff_multiplier));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial: self.initial_backoff_ms,
                max: self.max_backoff_ms,
            });
        }

        if self.error_threshold == 0 {
            return Err(ConfigError::ZeroErrorThreshold);
        }

        Ok(())
    }

    /// Apply `update` on top of this config and validate the result.
    pub fn merged(&self, update: &MonitorConfigUpdate) -> Result<Self, ConfigError> {
        let merged = Self {
            polling_interval_ms: update.polling_interval_ms.unwrap_or(self.polling_interval_ms),
            progress_interval_ms: update.progress_interval_ms.unwrap_or(self.progress_interval_ms),
            initial_backoff_ms: update.initial_backoff_ms.unwrap_or(self.initial_backoff_ms),
            max_backoff_ms: update.max_backoff_ms.unwrap_or(self.max_backoff_ms),
            backoff_multiplier: update.backoff_multiplier.unwrap_or(self.backoff_multiplier),
            error_threshold: update.error_threshold.unwrap_or(self.error_threshold),
            power_saving_interval_ms: update
                .power_saving_interval_ms
                .unwrap_or(self.power_saving_interval_ms),
            power_saving: update.power_saving.unwrap_or(self.power_saving),
        };

        merged.validate()?;
        Ok(merged)
    }

    /// Normal delay between polls. Power saving only ever slows polling down.
    pub fn poll_interval(&self) -> Duration {
        let ms = if self.power_saving {
            self.polling_interval_ms.max(self.power_saving_interval_ms)
        } else {
            self.polling_interval_ms
        };
        Duration::from_millis(ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
