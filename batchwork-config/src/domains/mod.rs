//! Domain-specific configuration modules

pub mod database;
pub mod execution;
pub mod logging;
pub mod storage;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main batchwork configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BatchConfig {
    /// Application and batch metadata databases
    #[serde(default)]
    pub database: database::DatabaseConfig,

    /// Worker pool and launcher configuration
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Store retry configuration
    #[serde(default)]
    pub storage: storage::StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl BatchConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.execution.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = BatchConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BatchConfig::default().validate_all().is_ok());
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = BatchConfig::generate_sample();
        let parsed: BatchConfig = serde_yaml::from_str(&sample).unwrap();
        assert_eq!(parsed.database.batch_db_name, "batch");
        assert_eq!(parsed.execution.core_pool_size, 4);
    }
}
