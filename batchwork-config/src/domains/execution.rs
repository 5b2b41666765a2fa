//! Worker pool and launch configuration

use crate::error::ConfigResult;
use crate::validation::{Validatable, validate_positive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Worker pool and launcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Workers kept alive even when idle (`step.thread.core.pool.size`)
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,

    /// Upper bound on concurrent workers (`step.thread.max.pool.size`)
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Submissions buffered while all core workers are busy
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which workers above the core size exit
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// What happens when the queue is full and the pool is at max size
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,

    /// Whether `run` returns right away or after the job finishes
    #[serde(default)]
    pub launch_mode: LaunchMode,
}

/// Saturation behaviour of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RejectionPolicy {
    /// Caller waits for queue room
    #[default]
    Block,
    /// Submission fails immediately
    Reject,
}

/// Launcher mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[default]
    Async,
    Sync,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
            queue_capacity: default_queue_capacity(),
            keep_alive: default_keep_alive(),
            rejection_policy: RejectionPolicy::default(),
            launch_mode: LaunchMode::default(),
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.core_pool_size, "core_pool_size", self.domain_name())?;
        validate_positive(self.max_pool_size, "max_pool_size", self.domain_name())?;
        validate_positive(self.queue_capacity, "queue_capacity", self.domain_name())?;

        if self.max_pool_size < self.core_pool_size {
            return Err(self.validation_error(format!(
                "max_pool_size ({}) must not be smaller than core_pool_size ({})",
                self.max_pool_size, self.core_pool_size
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

impl FromStr for RejectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(RejectionPolicy::Block),
            "reject" => Ok(RejectionPolicy::Reject),
            _ => Err(format!("Invalid rejection policy: {}", s)),
        }
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "async" => Ok(LaunchMode::Async),
            "sync" => Ok(LaunchMode::Sync),
            _ => Err(format!("Invalid launch mode: {}", s)),
        }
    }
}

impl fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionPolicy::Block => write!(f, "block"),
            RejectionPolicy::Reject => write!(f, "reject"),
        }
    }
}

fn default_core_pool_size() -> usize {
    4
}

fn default_max_pool_size() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.core_pool_size, 4);
        assert_eq!(config.max_pool_size, 8);
        assert_eq!(config.rejection_policy, RejectionPolicy::Block);
        assert_eq!(config.launch_mode, LaunchMode::Async);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_smaller_than_core_is_rejected() {
        let config = ExecutionConfig {
            core_pool_size: 4,
            max_pool_size: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        let config = ExecutionConfig {
            core_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExecutionConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(RejectionPolicy::from_str("REJECT").unwrap(), RejectionPolicy::Reject);
        assert_eq!(LaunchMode::from_str("sync").unwrap(), LaunchMode::Sync);
        assert!(LaunchMode::from_str("later").is_err());
    }

    #[test]
    fn test_yaml_deserialization() {
        let yaml = "core_pool_size: 2\nmax_pool_size: 3\nrejection_policy: reject\nkeep_alive: 5\n";
        let config: ExecutionConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.core_pool_size, 2);
        assert_eq!(config.max_pool_size, 3);
        assert_eq!(config.rejection_policy, RejectionPolicy::Reject);
        assert_eq!(config.keep_alive, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 64);
    }
}
