// 配置系统测试

use crate::config::*;

#[test]
fn test_default_config() {
    let config = AppConfig::default();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.runtime.registration_timeout_ms, 5000);
    assert_eq!(config.runtime.poll_interval_ms, 100);
    assert_eq!(config.runtime.slot_mode, SlotModeSetting::PerLoad);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_config_validation() {
    let mut config = AppConfig::default();

    config.server.port = 0;
    assert!(config.validate().is_err());

    config.server.port = 8080;
    config.storage.max_upload_size = 0;
    assert!(config.validate().is_err());

    config.storage.max_upload_size = 1024;
    config.runtime.registration_timeout_ms = 10;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_all_collects_every_error() {
    let mut config = AppConfig::default();
    config.server.port = 0;
    config.logging.level = "verbose".to_string();
    config.environment.name = "qa".to_string();

    let errors = ConfigValidator::validate_all(&config).unwrap_err();
    assert_eq!(errors.len(), 3);
}

#[test]
fn test_logging_file_requires_path() {
    let mut logging = AppConfig::default().logging;
    logging.file_enabled = true;
    assert!(ConfigValidator::validate_logging(&logging).is_err());

    logging.file_path = Some("./logs/plugin-shell.log".to_string());
    assert!(ConfigValidator::validate_logging(&logging).is_ok());
}

#[test]
fn test_data_dir_resolution() {
    let mut storage = AppConfig::default().storage;
    storage.app_root = "/srv/app".to_string();
    assert_eq!(storage.data_dir_path(), std::path::PathBuf::from("/srv/app/data/plugins"));

    storage.data_dir = "/var/lib/plugins".to_string();
    assert_eq!(storage.data_dir_path(), std::path::PathBuf::from("/var/lib/plugins"));
}

#[test]
fn test_environment_methods() {
    let mut config = AppConfig::default();
    assert!(config.is_development());

    config.environment.name = "production".to_string();
    assert!(config.is_production());
    assert!(!config.is_development());
}

#[test]
fn test_slot_mode_deserialization() {
    let mode: SlotModeSetting = serde_json::from_str("\"shared\"").unwrap();
    assert_eq!(mode, SlotModeSetting::Shared);
}
