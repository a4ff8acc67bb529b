//! Tests for utility functions

use prometheus_retry_pool::util::init_tracing;

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing();
    init_tracing();
    assert!(tracing::dispatcher::has_been_set());
}
