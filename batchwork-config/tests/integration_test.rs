//! Integration tests for batchwork-config

use batchwork_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = BatchConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("BATCHWORK_APP_DB_NAME", Some("orders")),
        ("BATCHWORK_BATCH_DB_NAME", Some("orders_batch")),
        ("BATCHWORK_CORE_POOL_SIZE", Some("3")),
        ("BATCHWORK_MAX_POOL_SIZE", Some("5")),
        ("BATCHWORK_REJECTION_POLICY", Some("reject")),
        ("BATCHWORK_LOG_LEVEL", Some("debug")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.database.app_db_name, "orders");
        assert_eq!(config.database.batch_db_name, "orders_batch");
        assert_eq!(config.execution.core_pool_size, 3);
        assert_eq!(config.execution.max_pool_size, 5);
        assert_eq!(config.execution.rejection_policy, RejectionPolicy::Reject);
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_invalid_env_value() {
    with_vars(vec![("BATCHWORK_CORE_POOL_SIZE", Some("lots"))], || {
        let result = ConfigLoader::new().from_env();
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    });
}

#[test]
fn test_yaml_file_loading() {
    let yaml = r#"
database:
  app_db_name: shop
  batch_db_name: shop_batch
execution:
  core_pool_size: 2
  max_pool_size: 2
  queue_capacity: 10
  keep_alive: 30
  launch_mode: sync
storage:
  retry:
    max_attempts: 5
    initial_delay_ms: 10
logging:
  level: warn
  format: json
"#;
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("BATCHWORK_CORE_POOL_SIZE", None::<&str>)], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.database.app_db_name, "shop");
        assert_eq!(config.execution.core_pool_size, 2);
        assert_eq!(config.execution.keep_alive, Duration::from_secs(30));
        assert_eq!(config.execution.launch_mode, LaunchMode::Sync);
        assert_eq!(config.storage.retry.max_attempts, 5);
        assert_eq!(config.storage.retry.initial_delay(), Duration::from_millis(10));
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_properties_file_with_env_override() {
    let mut file = tempfile::Builder::new().suffix(".properties").tempfile().unwrap();
    writeln!(file, "app.db.name=inventory").unwrap();
    writeln!(file, "batch.db.name=inventory_batch").unwrap();
    writeln!(file, "step.thread.core.pool.size=2").unwrap();
    writeln!(file, "step.thread.max.pool.size=4").unwrap();

    with_vars(vec![("BATCHWORK_MAX_POOL_SIZE", Some("10"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.database.app_db_name, "inventory");
        assert_eq!(config.database.batch_db_name, "inventory_batch");
        assert_eq!(config.execution.core_pool_size, 2);
        assert_eq!(config.execution.max_pool_size, 10);
    });
}

#[test]
fn test_missing_file() {
    let result = ConfigLoader::new().from_file("/nonexistent/batchwork.yaml");
    assert!(matches!(result, Err(ConfigError::FileReadError(_))));
}
