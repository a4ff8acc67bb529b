//! Configuration models for the worker pool.

pub mod pool;

pub use pool::{PoolConfig, PoolSettings, RetryLimit};
