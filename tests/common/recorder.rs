//! Notifier that records what the user would have been told

#![allow(dead_code)]

use async_trait::async_trait;
use cogito_ingest::core::ContentType;
use cogito_ingest::ingest::OwnerId;
use cogito_ingest::storage::Document;
use cogito_ingest::telegram::Notifier;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Completed(Document),
    Failed(Document),
    BatchSubmitted {
        owner_id: OwnerId,
        content_type: ContentType,
        count: usize,
    },
    BatchRejected {
        owner_id: OwnerId,
        content_type: ContentType,
        count: usize,
        reason: String,
    },
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }

    pub fn completed(&self) -> Vec<Document> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::Completed(doc) => Some(doc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<Document> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Notification::Failed(doc) => Some(doc.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn document_completed(&self, doc: &Document) {
        self.events.lock().push(Notification::Completed(doc.clone()));
    }

    async fn document_failed(&self, doc: &Document) {
        self.events.lock().push(Notification::Failed(doc.clone()));
    }

    async fn batch_submitted(&self, owner_id: OwnerId, content_type: ContentType, count: usize) {
        self.events.lock().push(Notification::BatchSubmitted {
            owner_id,
            content_type,
            count,
        });
    }

    async fn batch_rejected(&self, owner_id: OwnerId, content_type: ContentType, count: usize, reason: &str) {
        self.events.lock().push(Notification::BatchRejected {
            owner_id,
            content_type,
            count,
            reason: reason.to_string(),
        });
    }
}
