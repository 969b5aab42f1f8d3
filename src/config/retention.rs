//! Retention configuration.
//!
//! Configures the background sweep that deletes jobs in terminal states
//! together with their tasks and dependency edges.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! interval_secs = 3600
//! initial_delay_secs = 30
//! clear_completed = true
//! clear_failed = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Longest accepted sweep interval (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Retention scheduler configuration.
///
/// When enabled, the scheduler sweeps shortly after start (after
/// `initial_delay_secs`) and then every `interval_secs`. Manual sweeps are
/// always available, even while disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether scheduled sweeps run.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between scheduled sweeps, at most [`MAX_INTERVAL_SECS`].
    /// Default: 3600 (hourly)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds between `start()` and the first sweep. Must be shorter than
    /// the interval.
    /// Default: 30
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Delete jobs in the `done` state.
    #[serde(default = "default_true")]
    pub clear_completed: bool,

    /// Delete jobs in the `failed` state.
    #[serde(default = "default_true")]
    pub clear_failed: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            clear_completed: true,
            clear_failed: true,
        }
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "retention.interval_secs must be greater than 0".into(),
            ));
        }
        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Validation(format!(
                "retention.interval_secs ({}) must be at most {}",
                self.interval_secs, MAX_INTERVAL_SECS
            )));
        }
        if self.initial_delay_secs >= self.interval_secs {
            return Err(ConfigError::Validation(format!(
                "retention.initial_delay_secs ({}) must be less than interval_secs ({})",
                self.initial_delay_secs, self.interval_secs
            )));
        }
        Ok(())
    }
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_initial_delay_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
