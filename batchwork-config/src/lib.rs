//! Domain-driven configuration management for batchwork
//!
//! Configuration is split by functional domain (databases, execution pool,
//! storage retries, logging), each with defaults and validation. It can be
//! loaded from YAML, from Java-style `.properties` files using the classic
//! `app.db.name` style keys, and overridden from the environment.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    database::DatabaseConfig,
    execution::{ExecutionConfig, LaunchMode, RejectionPolicy},
    logging::{LogFormat, LogLevel, LoggingConfig},
    storage::{StorageConfig, StorageRetryConfig},
    BatchConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
