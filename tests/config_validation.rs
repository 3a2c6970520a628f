//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use rcon_bridge::config::{BridgeConfig, ClientConfig, LoggingConfig, RconConfig};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = RconConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_defaults_match_protocol_conventions() {
    let bridge = BridgeConfig::default();
    assert_eq!(bridge.address, "127.0.0.1:25575");
    assert_eq!(bridge.marker_address, "192.0.2.0");
    assert_eq!(bridge.line_separator, "\n");
    assert!(bridge.prime_console);

    let client = ClientConfig::default();
    assert_eq!(client.connection_timeout, Duration::from_millis(1500));
    assert_eq!(client.response_timeout, Duration::from_millis(1500));
    assert_eq!(client.max_in_flight, 2);
}

#[test]
fn test_invalid_bridge_address() {
    let mut config = RconConfig::default();
    config.bridge.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid bridge address")));
}

#[test]
fn test_empty_bridge_address() {
    let mut config = RconConfig::default();
    config.bridge.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_max_in_flight() {
    let mut config = RconConfig::default();
    config.client.max_in_flight = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max in-flight requests must be greater than 0")));
}

#[test]
fn test_console_timeout_bounds() {
    let mut config = RconConfig::default();
    config.bridge.console_timeout = Duration::from_millis(1);
    assert!(config.validate().iter().any(|e| e.contains("too short")));

    config.bridge.console_timeout = Duration::from_secs(600);
    assert!(config.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_max_response_bytes_floor() {
    let mut config = RconConfig::default();
    assert_eq!(config.bridge.max_response_bytes, 1024 * 1024);

    config.bridge.max_response_bytes = 100;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max response bytes too small")));
}

#[test]
fn test_empty_line_separator() {
    let mut config = RconConfig::default();
    config.bridge.line_separator = String::new();
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Line separator cannot be empty")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = RconConfig::default();
    config.bridge.max_connections = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_empty_app_name() {
    let config = RconConfig {
        logging: LoggingConfig {
            app_name: String::new(),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_validate_strict_collects_every_error() {
    let config = RconConfig::default_with_overrides(|c| {
        c.bridge.address = String::new();
        c.client.max_in_flight = 0;
    });
    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("Bridge address cannot be empty"));
    assert!(err.contains("Max in-flight"));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = RconConfig::from_toml(
        r#"
        [bridge]
        address = "0.0.0.0:27015"
        console_timeout = 750

        [logging]
        log_level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.bridge.address, "0.0.0.0:27015");
    assert_eq!(config.bridge.console_timeout, Duration::from_millis(750));
    assert_eq!(config.bridge.marker_address, "192.0.2.0");
    assert_eq!(config.client.max_in_flight, 2);
    assert_eq!(config.logging.log_level, Level::DEBUG);
}

#[test]
fn test_bad_log_level_is_rejected() {
    let result = RconConfig::from_toml("[logging]\nlog_level = \"loud\"\n");
    assert!(result.is_err());
}

#[test]
fn test_example_config_parses_back() {
    let text = RconConfig::example_config();
    let parsed = RconConfig::from_toml(&text).unwrap();
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.bridge.address, BridgeConfig::default().address);
}

#[test]
fn test_save_and_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rcon.toml");

    let config = RconConfig::default_with_overrides(|c| {
        c.bridge.marker_address = "198.51.100.7".into();
        c.client.response_timeout = Duration::from_millis(4000);
    });
    config.save_to_file(&path).unwrap();

    let loaded = RconConfig::from_file(&path).unwrap();
    assert_eq!(loaded.bridge.marker_address, "198.51.100.7");
    assert_eq!(loaded.client.response_timeout, Duration::from_millis(4000));
}

#[test]
fn test_missing_file_is_config_error() {
    let err = RconConfig::from_file("/definitely/not/here.toml").unwrap_err();
    assert!(err.to_string().contains("Failed to open config file"));
}
