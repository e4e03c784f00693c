//! Content processors: turn a job payload into extracted text.
//!
//! The real OCR/transcription backends live outside this crate; anything
//! implementing [`ContentProcessor`] can be plugged into the dispatcher.

pub mod text;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::retry::Retryable;
use crate::core::types::ContentType;
use crate::ingest::job::JobPayload;

pub use text::TextFileProcessor;

/// Processor outcome classification drives the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    /// Worth retrying (network hiccup, backend busy)
    #[error("transient processing error: {0}")]
    Transient(String),

    /// Retrying cannot help (corrupt input, unsupported content)
    #[error("permanent processing error: {0}")]
    Permanent(String),
}

impl ProcessingError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ProcessingError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        ProcessingError::Permanent(msg.into())
    }

    /// The message stored on a failed document.
    pub fn message(&self) -> &str {
        match self {
            ProcessingError::Transient(msg) | ProcessingError::Permanent(msg) => msg,
        }
    }
}

impl Retryable for ProcessingError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProcessingError::Transient(_))
    }
}

impl From<std::io::Error> for ProcessingError {
    fn from(err: std::io::Error) -> Self {
        if err.is_retryable() {
            ProcessingError::Transient(err.to_string())
        } else {
            ProcessingError::Permanent(err.to_string())
        }
    }
}

/// Extracts text from one piece of content.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, payload: &JobPayload) -> Result<String, ProcessingError>;
}

/// Dispatches to a processor per content type.
#[derive(Default, Clone)]
pub struct RoutingProcessor {
    routes: HashMap<ContentType, Arc<dyn ContentProcessor>>,
}

impl RoutingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, content_type: ContentType, processor: Arc<dyn ContentProcessor>) -> Self {
        self.routes.insert(content_type, processor);
        self
    }
}

#[async_trait]
impl ContentProcessor for RoutingProcessor {
    async fn process(&self, payload: &JobPayload) -> Result<String, ProcessingError> {
        match self.routes.get(&payload.content_type) {
            Some(processor) => processor.process(payload).await,
            None => Err(ProcessingError::permanent(format!(
                "no processor configured for {} content",
                payload.content_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ContentProcessor for Echo {
        async fn process(&self, payload: &JobPayload) -> Result<String, ProcessingError> {
            Ok(payload.payload_ref.clone())
        }
    }

    fn payload(content_type: ContentType) -> JobPayload {
        JobPayload {
            document_id: 1,
            content_type,
            priority: 3,
            payload_ref: "ref".to_string(),
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn test_routing_processor_dispatches_by_type() {
        let router = RoutingProcessor::new().route(ContentType::File, Arc::new(Echo));
        assert_eq!(router.process(&payload(ContentType::File)).await, Ok("ref".to_string()));

        let err = router.process(&payload(ContentType::Video)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::Permanent(_)));
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(ProcessingError::transient("busy").is_retryable());
        assert!(!ProcessingError::permanent("corrupt").is_retryable());
    }

    #[test]
    fn test_io_errors_are_classified() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(matches!(ProcessingError::from(timed_out), ProcessingError::Transient(_)));

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(ProcessingError::from(missing), ProcessingError::Permanent(_)));
    }
}
