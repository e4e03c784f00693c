use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Invalid pipeline settings, reported when typed configs are built
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer (got {value})")]
    NotPositive { name: &'static str, value: i64 },

    #[error("{name} must not be negative (got {value})")]
    Negative { name: &'static str, value: i64 },
}

/// Reads a numeric environment variable, falling back to `default` when unset or unparsable
fn env_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: cogito.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "cogito.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: cogito-ingest.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "cogito-ingest.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Bot API base URL (a local Bot API server can be used instead)
pub static BOT_API_URL: Lazy<String> = Lazy::new(|| {
    env::var("BOT_API_URL")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "https://api.telegram.org".to_string())
});

/// Debounced batch buffer configuration
pub mod buffer {
    use super::{env_number, Lazy};

    /// Items per cycle before a synchronous flush
    /// Read from BUFFER_MAX_ITEMS, default 10
    pub static MAX_ITEMS: Lazy<i64> = Lazy::new(|| env_number("BUFFER_MAX_ITEMS", 10));

    /// Inactivity window after the last add
    /// Read from BUFFER_TIMEOUT_SEC, default 3
    pub static TIMEOUT_SECS: Lazy<i64> = Lazy::new(|| env_number("BUFFER_TIMEOUT_SEC", 3));
}

/// Worker pool and retry configuration
pub mod dispatcher {
    use super::{env_number, Duration, Lazy};

    /// Number of concurrent workers
    /// Read from WORKER_CONCURRENCY, default 2
    pub static WORKER_CONCURRENCY: Lazy<i64> = Lazy::new(|| env_number("WORKER_CONCURRENCY", 2));

    /// Retries per job before it is marked failed
    /// Read from TASK_MAX_RETRIES, default 3
    pub static MAX_RETRIES: Lazy<i64> = Lazy::new(|| env_number("TASK_MAX_RETRIES", 3));

    /// Base backoff before a failed job is requeued
    /// Read from RETRY_INITIAL_DELAY_MS, default 2000
    pub static RETRY_INITIAL_DELAY_MS: Lazy<u64> = Lazy::new(|| env_number("RETRY_INITIAL_DELAY_MS", 2000));

    /// Upper bound for the exponential backoff (in seconds)
    pub const RETRY_MAX_DELAY_SECS: u64 = 60;

    pub fn retry_initial_delay() -> Duration {
        Duration::from_millis(*RETRY_INITIAL_DELAY_MS)
    }

    pub fn retry_max_delay() -> Duration {
        Duration::from_secs(RETRY_MAX_DELAY_SECS)
    }
}

/// Priority queue configuration
pub mod queue {
    use super::{env_number, Lazy};

    /// Maximum number of ready jobs; overflow fails the submission
    /// Read from MAX_QUEUE_SIZE, default 1000
    pub static MAX_QUEUE_SIZE: Lazy<usize> = Lazy::new(|| env_number("MAX_QUEUE_SIZE", 1000));
}

/// Upload validation limits
pub mod validation {
    /// Maximum photo/file size (20 MB, the Bot API download limit)
    pub const MAX_UPLOAD_SIZE_BYTES: u64 = 20 * 1024 * 1024;

    /// Accepted photo extensions
    pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

    /// Accepted document extensions
    pub const FILE_EXTENSIONS: &[&str] = &["txt", "pdf", "docx"];
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Bot API calls (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Checks that a setting is a positive integer and returns it as usize
pub fn positive(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NotPositive { name, value });
    }
    usize::try_from(value).map_err(|_| ConfigError::NotPositive { name, value })
}

/// Checks that a setting is zero or more and returns it as u32
pub fn non_negative(name: &'static str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value).map_err(|_| ConfigError::Negative { name, value })
}
