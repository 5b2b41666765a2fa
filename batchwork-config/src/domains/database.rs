//! Database configuration

use crate::error::ConfigResult;
use crate::validation::{Validatable, validate_database_name, validate_required_string, validate_positive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which document databases hold domain data and batch metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Target database for domain data (`app.db.name`)
    #[serde(default = "default_app_db_name")]
    pub app_db_name: String,

    /// Target database for batch metadata (`batch.db.name`)
    #[serde(default = "default_batch_db_name")]
    pub batch_db_name: String,

    /// Store location, e.g. "memory://" for the in-process store
    #[serde(default = "default_uri")]
    pub uri: String,

    /// How long to wait for the store to answer a health check
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            app_db_name: default_app_db_name(),
            batch_db_name: default_batch_db_name(),
            uri: default_uri(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Whether domain data and batch metadata share one database
    pub fn is_shared(&self) -> bool {
        self.app_db_name == self.batch_db_name
    }
}

impl Validatable for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_database_name(&self.app_db_name, "app_db_name", self.domain_name())?;
        validate_database_name(&self.batch_db_name, "batch_db_name", self.domain_name())?;
        validate_required_string(&self.uri, "uri", self.domain_name())?;
        validate_positive(
            self.connection_timeout.as_secs(),
            "connection_timeout",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "database"
    }
}

fn default_app_db_name() -> String {
    "app".to_string()
}

fn default_batch_db_name() -> String {
    "batch".to_string()
}

fn default_uri() -> String {
    "memory://".to_string()
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}
