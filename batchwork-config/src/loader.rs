//! Configuration loading and environment variable handling

use crate::domains::BatchConfig;
use crate::error::{ConfigError, ConfigResult};
use log::debug;
use std::path::Path;
use std::str::FromStr;

/// Property key naming the application database
pub const APP_DB_NAME: &str = "app.db.name";
/// Property key naming the batch metadata database
pub const BATCH_DB_NAME: &str = "batch.db.name";
/// Property key for the minimum number of workers
pub const CORE_POOL_SIZE: &str = "step.thread.core.pool.size";
/// Property key for the maximum number of workers
pub const MAX_POOL_SIZE: &str = "step.thread.max.pool.size";

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "BATCHWORK".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<BatchConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BatchConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<BatchConfig> {
        let mut config = BatchConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from `.properties` text using the
    /// `app.db.name` style keys, then apply environment overrides
    pub fn from_properties_str(&self, content: &str) -> ConfigResult<BatchConfig> {
        let mut config = BatchConfig::default();

        for (key, value) in parse_properties(content) {
            match key.as_str() {
                APP_DB_NAME => config.database.app_db_name = value,
                BATCH_DB_NAME => config.database.batch_db_name = value,
                CORE_POOL_SIZE => config.execution.core_pool_size = parse_property(&key, &value)?,
                MAX_POOL_SIZE => config.execution.max_pool_size = parse_property(&key, &value)?,
                _ => debug!("Ignoring unrecognised property {}", key),
            }
        }

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from a `.properties` file
    pub fn from_properties_file(&self, path: impl AsRef<Path>) -> ConfigResult<BatchConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_properties_str(&content)
    }

    /// Load configuration with fallback chain, picking the parser from the
    /// file extension
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<BatchConfig> {
        match config_path {
            Some(path) => {
                let is_properties = path
                    .as_ref()
                    .extension()
                    .map(|ext| ext == "properties")
                    .unwrap_or(false);
                if is_properties {
                    self.from_properties_file(path)
                } else {
                    self.from_file(path)
                }
            }
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut BatchConfig) -> ConfigResult<()> {
        self.apply_database_overrides(&mut config.database)?;
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_storage_overrides(&mut config.storage)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_database_overrides(
        &self,
        config: &mut crate::domains::database::DatabaseConfig,
    ) -> ConfigResult<()> {
        if let Ok(name) = self.get_env_var("APP_DB_NAME") {
            config.app_db_name = name;
        }

        if let Ok(name) = self.get_env_var("BATCH_DB_NAME") {
            config.batch_db_name = name;
        }

        if let Ok(uri) = self.get_env_var("DB_URI") {
            config.uri = uri;
        }

        Ok(())
    }

    fn apply_execution_overrides(
        &self,
        config: &mut crate::domains::execution::ExecutionConfig,
    ) -> ConfigResult<()> {
        if let Ok(size) = self.get_env_var("CORE_POOL_SIZE") {
            config.core_pool_size = size
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid CORE_POOL_SIZE: {}", e)))?;
        }

        if let Ok(size) = self.get_env_var("MAX_POOL_SIZE") {
            config.max_pool_size = size
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_POOL_SIZE: {}", e)))?;
        }

        if let Ok(capacity) = self.get_env_var("QUEUE_CAPACITY") {
            config.queue_capacity = capacity
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid QUEUE_CAPACITY: {}", e)))?;
        }

        if let Ok(policy) = self.get_env_var("REJECTION_POLICY") {
            config.rejection_policy = crate::domains::execution::RejectionPolicy::from_str(&policy)
                .map_err(ConfigError::EnvError)?;
        }

        if let Ok(mode) = self.get_env_var("LAUNCH_MODE") {
            config.launch_mode = crate::domains::execution::LaunchMode::from_str(&mode)
                .map_err(ConfigError::EnvError)?;
        }

        Ok(())
    }

    fn apply_storage_overrides(
        &self,
        config: &mut crate::domains::storage::StorageConfig,
    ) -> ConfigResult<()> {
        if let Ok(attempts) = self.get_env_var("STORAGE_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid STORAGE_MAX_ATTEMPTS: {}", e))
            })?;
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `.properties` text into key/value pairs. Blank lines and lines
/// starting with `#` or `!` are skipped; `=` or `:` separate key and value.
fn parse_properties(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

fn parse_property<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::PropertyError {
        key: key.to_string(),
        message: e.to_string(),
    })
}
