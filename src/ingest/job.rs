use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::types::{ContentType, Priority};

/// Row id of a document in the store
pub type DocumentId = i64;

/// Telegram user id of the uploader
pub type OwnerId = i64;

/// Opaque job identifier, stable for the job's lifetime (across retries)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// One unit of content to ingest, as collected by the buffer.
///
/// `name` is the display name (file name or video title), `payload_ref` the
/// opaque pointer to the data (local path, Telegram file id, video URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub name: String,
    pub payload_ref: String,
}

impl BatchItem {
    pub fn new(name: impl Into<String>, payload_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload_ref: payload_ref.into(),
        }
    }
}

/// A prioritized unit of processing work driving exactly one document.
///
/// Priority is frozen at submission and carried unchanged through retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub document_id: DocumentId,
    pub owner_id: OwnerId,
    pub content_type: ContentType,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub payload_ref: String,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        document_id: DocumentId,
        owner_id: OwnerId,
        content_type: ContentType,
        priority: Priority,
        payload_ref: String,
        max_retries: u32,
    ) -> Self {
        Self {
            id: JobId::new(),
            document_id,
            owner_id,
            content_type,
            priority,
            retry_count: 0,
            max_retries,
            payload_ref,
            created_at: Utc::now(),
        }
    }

    /// Whether another transient failure may be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// The same job with one more retry consumed.
    #[must_use]
    pub fn next_attempt(&self) -> Job {
        Job {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// What the content processor gets to see.
    pub fn payload(&self) -> JobPayload {
        JobPayload {
            document_id: self.document_id,
            content_type: self.content_type,
            priority: self.priority.value(),
            payload_ref: self.payload_ref.clone(),
            retry_count: self.retry_count,
        }
    }
}

/// Job payload handed to a content processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub document_id: DocumentId,
    pub content_type: ContentType,
    pub priority: u8,
    pub payload_ref: String,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(7, 42, ContentType::File, Priority::new(2), "/tmp/a.txt".to_string(), 3)
    }

    #[test]
    fn test_new_job_starts_without_retries() {
        let job = job();
        assert_eq!(job.retry_count, 0);
        assert!(job.can_retry());
    }

    #[test]
    fn test_next_attempt_keeps_identity_and_priority() {
        let first = job();
        let second = first.next_attempt();
        assert_eq!(second.id, first.id);
        assert_eq!(second.priority, first.priority);
        assert_eq!(second.retry_count, 1);

        let last = second.next_attempt().next_attempt();
        assert_eq!(last.retry_count, 3);
        assert!(!last.can_retry());
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let value = serde_json::to_value(job().payload()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "documentId": 7,
                "contentType": "file",
                "priority": 2,
                "payloadRef": "/tmp/a.txt",
                "retryCount": 0
            })
        );
    }

    #[test]
    fn test_job_id_parses_back() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
