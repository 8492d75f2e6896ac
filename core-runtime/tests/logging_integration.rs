//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig, ENGINE_LOG_TARGET,
};
use core_runtime::Error;

#[test]
fn test_global_init_only_once() {
    // Only this test installs the global subscriber in this binary.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);
    init_logging(config.clone()).unwrap();

    tracing::info!(target: "engine", "engine line after init");

    match init_logging(config) {
        Err(Error::Config(msg)) => assert!(msg.contains("Failed to initialize logging")),
        other => panic!("expected Config error, got {:?}", other),
    }
}

#[test]
fn test_invalid_custom_filter_rejected_before_install() {
    let config = LoggingConfig::default().with_filter("core_playback=loudest");
    assert!(matches!(init_logging(config), Err(Error::Config(msg)) if msg.contains("filter")));
}

#[test]
fn test_token_fields_redacted() {
    assert_eq!(redact_if_sensitive("access_token", "BQDx"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("refresh_token", "AQDx"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
}

#[test]
fn test_account_email_partially_redacted() {
    let redacted = redact_if_sensitive("user", "listener@example.com");
    assert!(redacted.starts_with('l'));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_engine_identifiers_pass_through() {
    assert_eq!(
        redact_if_sensitive("uri", "spotify:track:4uLU6hMCjMI75M1A2tKUQC"),
        "spotify:track:4uLU6hMCjMI75M1A2tKUQC"
    );
    assert_eq!(redact_if_sensitive("device_name", "Desk"), "Desk");
}

#[test]
fn test_cache_dir_stripping() {
    assert_eq!(strip_path("/home/me/.cache/player"), "player");
    assert_eq!(strip_path("C:\\Users\\me\\AppData\\Local\\player\\"), "player");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_engine_target_name() {
    assert_eq!(ENGINE_LOG_TARGET, "engine");
    let config = LoggingConfig::default();
    assert_eq!(config.engine_level, LogLevel::Warn);
}
