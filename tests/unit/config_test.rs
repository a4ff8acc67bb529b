//! Tests for configuration parsing and normalization

use prometheus_retry_pool::config::{PoolConfig, RetryLimit};

#[test]
fn test_pool_config_defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.lobby_size, 0);
    assert_eq!(config.size, 1);
    assert_eq!(config.retries, 0);
    assert_eq!(config.thread_stack_size, None);
}

#[test]
fn test_pool_config_builder() {
    let config = PoolConfig::new()
        .with_lobby_size(10)
        .with_size(4)
        .with_retries(3)
        .with_thread_stack_size(512 * 1024);

    let settings = config.normalize_for(2);
    assert_eq!(settings.lobby_size, 10);
    assert_eq!(settings.workers, 4);
    assert_eq!(settings.retries, RetryLimit::Limited(3));
    assert_eq!(settings.thread_stack_size, Some(512 * 1024));
}

#[test]
fn test_negative_retries_are_unbounded() {
    let settings = PoolConfig::new().with_retries(-42).normalize_for(1);
    assert_eq!(settings.retries, RetryLimit::Unbounded);
}

#[test]
fn test_worker_ceiling_scales_with_parallelism() {
    let config = PoolConfig::new().with_size(10_000);
    assert_eq!(config.normalize_for(1).workers, 32);
    assert_eq!(config.normalize_for(8).workers, 256);
}

#[test]
fn test_pool_config_from_json() {
    let json = r#"{
        "lobby_size": 16,
        "size": 8,
        "retries": -1
    }"#;

    let config = PoolConfig::from_json_str(json).expect("valid config");
    assert_eq!(config.lobby_size, 16);
    assert_eq!(config.size, 8);
    assert_eq!(config.retries, -1);
    assert_eq!(config.thread_stack_size, None);
}

#[test]
fn test_pool_config_from_json_partial() {
    let config = PoolConfig::from_json_str(r#"{"retries": 5}"#).expect("valid config");
    assert_eq!(config, PoolConfig::new().with_retries(5));
}

#[test]
fn test_pool_config_from_json_invalid() {
    let err = PoolConfig::from_json_str(r#"{"size": "lots"}"#).unwrap_err();
    assert!(err.to_string().starts_with("invalid configuration: parse error"));
}

#[test]
fn test_pool_config_json_round_trip() {
    let config = PoolConfig::new().with_lobby_size(3).with_size(2).with_retries(1);
    let json = serde_json::to_string(&config).expect("serializable");
    assert_eq!(PoolConfig::from_json_str(&json).expect("parsable"), config);
}
