//! Pool configuration and its normalization into runtime settings.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::PoolError;

/// Worker ceiling per unit of available parallelism.
const WORKERS_PER_CPU: usize = 32;

/// Requested pool configuration.
///
/// Every value is accepted as given and normalized into [`PoolSettings`] when
/// the pool is built. Nothing here is ever rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Admission queue ("lobby") capacity. `0` makes `queue` a direct handoff.
    pub lobby_size: usize,
    /// Requested worker count, clamped to `[1, 32 * available parallelism]`.
    pub size: i64,
    /// Retries allowed per task after the first attempt. Any negative value
    /// means retry until the pool is cancelled.
    pub retries: i64,
    /// Stack size for pool threads. `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            lobby_size: 0,
            size: 1,
            retries: 0,
            thread_stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admission queue capacity.
    #[must_use]
    pub const fn with_lobby_size(mut self, lobby_size: usize) -> Self {
        self.lobby_size = lobby_size;
        self
    }

    /// Set the requested worker count.
    #[must_use]
    pub const fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    /// Set the per-task retry ceiling.
    #[must_use]
    pub const fn with_retries(mut self, retries: i64) -> Self {
        self.retries = retries;
        self
    }

    /// Set the stack size for pool threads.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Normalize against the parallelism reported by the host.
    #[must_use]
    pub fn normalize(&self) -> PoolSettings {
        self.normalize_for(num_cpus::get())
    }

    /// Normalize against an explicit parallelism hint.
    #[must_use]
    pub fn normalize_for(&self, parallelism: usize) -> PoolSettings {
        let ceiling = parallelism.max(1).saturating_mul(WORKERS_PER_CPU);
        let workers = usize::try_from(self.size).unwrap_or(0).clamp(1, ceiling);

        PoolSettings {
            lobby_size: self.lobby_size,
            workers,
            retries: RetryLimit::from_raw(self.retries),
            thread_stack_size: self.thread_stack_size,
        }
    }

    /// Parse configuration from a JSON string. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the input is not valid JSON for this shape.
    pub fn from_json_str(input: &str) -> Result<Self, PoolError> {
        serde_json::from_str(input).map_err(|e| PoolError::InvalidConfig(format!("parse error: {e}")))
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Reads `POOL_LOBBY_SIZE`, `POOL_SIZE`, `POOL_RETRIES` and
    /// `POOL_THREAD_STACK_SIZE`; unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, PoolError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PoolError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(&lookup, "POOL_LOBBY_SIZE")? {
            cfg.lobby_size = v;
        }
        if let Some(v) = parse_var(&lookup, "POOL_SIZE")? {
            cfg.size = v;
        }
        if let Some(v) = parse_var(&lookup, "POOL_RETRIES")? {
            cfg.retries = v;
        }
        cfg.thread_stack_size = parse_var(&lookup, "POOL_THREAD_STACK_SIZE")?;
        Ok(cfg)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, PoolError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| PoolError::InvalidConfig(format!("{key}: {e}")))
        })
        .transpose()
}

/// Retry ceiling after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLimit {
    /// Retry until the pool is cancelled.
    Unbounded,
    /// Allow this many retries after the first attempt.
    Limited(u32),
}

impl RetryLimit {
    /// Interpret a raw retry value: negatives mean unbounded.
    #[must_use]
    pub fn from_raw(retries: i64) -> Self {
        u32::try_from(retries).map_or_else(
            |_| if retries < 0 { Self::Unbounded } else { Self::Limited(u32::MAX) },
            Self::Limited,
        )
    }

    /// Whether a task with `error_count` recorded failures has used up its retries.
    #[must_use]
    pub const fn is_exhausted(self, error_count: u32) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Limited(max) => error_count > max,
        }
    }
}

/// Immutable settings snapshot captured when a pool is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Admission queue capacity.
    pub lobby_size: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Retry ceiling per task.
    pub retries: RetryLimit,
    /// Stack size for pool threads.
    pub thread_stack_size: Option<usize>,
}
