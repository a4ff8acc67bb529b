//! Tests for error types

use prometheus_retry_pool::core::PoolError;

#[test]
fn test_already_started_error() {
    let err = PoolError::AlreadyStarted;
    assert_eq!(format!("{err}"), "pool has already been started");
}

#[test]
fn test_invalid_config_error() {
    let err = PoolError::InvalidConfig("POOL_RETRIES: invalid digit found in string".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid configuration: POOL_RETRIES: invalid digit found in string"
    );
}

#[test]
fn test_runtime_error_keeps_source() {
    let err = PoolError::Runtime(std::io::Error::other("no timer"));
    assert_eq!(format!("{err}"), "failed to build worker runtime: no timer");
    assert!(std::error::Error::source(&err).is_some());
}
