//! Storage access configuration

use crate::error::ConfigResult;
use crate::validation::{Validatable, validate_positive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage access configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Retry behaviour for transient store failures
    #[serde(default)]
    pub retry: StorageRetryConfig,
}

/// Retry settings applied to repository writes and reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageRetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "crate::domains::utils::default_true")]
    pub jitter: bool,
}

impl Default for StorageRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl StorageRetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Validatable for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.retry.validate()
    }

    fn domain_name(&self) -> &'static str {
        "storage"
    }
}

impl Validatable for StorageRetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;

        if self.backoff_multiplier < 1.0 {
            return Err(self.validation_error(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }

        if self.max_delay_ms < self.initial_delay_ms {
            return Err(self.validation_error("max_delay_ms must not be smaller than initial_delay_ms"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "storage.retry"
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
