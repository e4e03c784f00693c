use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::validation::ValidationError;
use crate::ingest::error::{BufferError, DispatchError, QueueError};
use crate::ingest::status::TransitionError;
use crate::processing::ProcessingError;
use crate::storage::StoreError;

/// Centralized error type for the application
///
/// Every component has its own error enum; they all convert into this one so
/// callers at the edges (CLI commands, bot handlers) can use `?` across
/// component boundaries.
///
/// # Example
///
/// ```no_run
/// use cogito_ingest::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid pipeline settings
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected upload or link
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Buffer misuse or a failed batch submission
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// A job could not be submitted
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Database and document store errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Status error: {0}")]
    Transition(#[from] TransitionError),

    /// HTTP errors (Bot API)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
