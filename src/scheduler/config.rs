//! Configuration for the metadata queue and its worker pool.
//!
//! Both structs are plain values built once (from defaults, the environment
//! or CLI flags) and passed into the queue and pool constructors. Nothing here
//! is read lazily or held globally.

use std::time::Duration;

use thiserror::Error;

/// Default prefix for the queue's Redis keys.
pub const DEFAULT_QUEUE_NAME: &str = "metadata_queue";

/// Default Redis connection URL.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Number of workers used when the requested count is zero or negative.
pub const DEFAULT_WORKERS: usize = 3;

/// Upper bound for a single metadata fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long one reserve call blocks on an empty queue.
pub const DEFAULT_RESERVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Where the queue lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix for the queue's keys.
    pub queue_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration for the given Redis URL and default key prefix.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            ..Default::default()
        }
    }

    /// Sets the key prefix.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Key of the pending list.
    pub fn pending_key(&self) -> String {
        format!("{}:pending", self.queue_name)
    }

    /// Key of the in-flight list.
    pub fn processing_key(&self) -> String {
        format!("{}:processing", self.queue_name)
    }

    /// Reads the configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
    /// - `METADATA_QUEUE_NAME`: key prefix (default: metadata_queue)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("METADATA_QUEUE_NAME") {
            config.queue_name = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.queue_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long each reserve call waits on an empty queue.
    pub reserve_timeout: Duration,
    /// Maximum time allowed for fetching one URL.
    pub fetch_timeout: Duration,
    /// Pause after a store error before reserving again.
    pub error_backoff: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
    /// Move every in-flight job back to pending before starting workers.
    ///
    /// Only safe when no other worker process is running against the same
    /// queue. Off by default.
    pub recover_on_start: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_WORKERS,
            reserve_timeout: DEFAULT_RESERVE_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            error_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
            recover_on_start: false,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a configuration from a requested worker count.
    ///
    /// Zero or negative counts resolve to [`DEFAULT_WORKERS`].
    pub fn new(requested_workers: i64) -> Self {
        Self {
            num_workers: resolve_worker_count(requested_workers),
            ..Default::default()
        }
    }

    /// Sets the reserve timeout.
    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    /// Sets the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the backoff after store errors.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enables or disables recovery of in-flight jobs on start.
    pub fn with_recover_on_start(mut self, recover: bool) -> Self {
        self.recover_on_start = recover;
        self
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `METADATA_WORKERS`: worker count, `<= 0` means default (default: 3)
    /// - `METADATA_RESERVE_TIMEOUT_SECS`: reserve timeout (default: 5)
    /// - `METADATA_FETCH_TIMEOUT_SECS`: fetch timeout (default: 30)
    /// - `METADATA_SHUTDOWN_TIMEOUT_SECS`: shutdown timeout (default: 60)
    /// - `METADATA_RECOVER_ON_START`: requeue in-flight jobs on start (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("METADATA_WORKERS") {
            let requested: i64 = parse_env_value(&val, "METADATA_WORKERS")?;
            config.num_workers = resolve_worker_count(requested);
        }

        if let Ok(val) = std::env::var("METADATA_RESERVE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "METADATA_RESERVE_TIMEOUT_SECS")?;
            config.reserve_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("METADATA_FETCH_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "METADATA_FETCH_TIMEOUT_SECS")?;
            config.fetch_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("METADATA_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "METADATA_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("METADATA_RECOVER_ON_START") {
            config.recover_on_start = parse_env_bool(&val, "METADATA_RECOVER_ON_START")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns this configuration with a zero worker count replaced by
    /// [`DEFAULT_WORKERS`].
    pub fn resolved(mut self) -> Self {
        if self.num_workers == 0 {
            self.num_workers = DEFAULT_WORKERS;
        }
        self
    }

    /// Validates the configuration values.
    ///
    /// A zero worker count is not an error; it means the default.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reserve_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "reserve_timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "shutdown_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Maps a requested worker count to the number of workers to spawn.
pub fn resolve_worker_count(requested: i64) -> usize {
    if requested <= 0 {
        DEFAULT_WORKERS
    } else {
        usize::try_from(requested).unwrap_or(DEFAULT_WORKERS)
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{}'", value),
        }),
    }
}
