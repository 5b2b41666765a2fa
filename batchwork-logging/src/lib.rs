//! Logging initialisation for batchwork
//!
//! Installs a global `tracing` subscriber configured from
//! [`LoggingConfig`](batchwork_config::LoggingConfig). Library crates only
//! emit events; binaries and tests decide where they go by calling one of
//! the init functions once at startup.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
