use async_trait::async_trait;
use serde::Serialize;

use crate::core::config;
use crate::core::retry::{retry, RetryConfig};
use crate::core::types::ContentType;
use crate::ingest::job::OwnerId;
use crate::storage::documents::Document;

/// Maximum characters of recognized photo text quoted back to the user
pub const PHOTO_TEXT_PREVIEW_CHARS: usize = 900;

/// Receives pipeline outcomes. A sink: failures are logged, never returned.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn document_completed(&self, doc: &Document);

    async fn document_failed(&self, doc: &Document);

    /// A flushed batch was queued for processing.
    async fn batch_submitted(&self, _owner_id: OwnerId, _content_type: ContentType, _count: usize) {}

    /// A flushed batch could not be queued.
    async fn batch_rejected(&self, _owner_id: OwnerId, _content_type: ContentType, _count: usize, _reason: &str) {}
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

fn plural(content_type: ContentType, count: usize) -> &'static str {
    match (content_type, count == 1) {
        (ContentType::Photo, true) => "photo",
        (ContentType::Photo, false) => "photos",
        (ContentType::File, true) => "file",
        (ContentType::File, false) => "files",
        (ContentType::Video, true) => "video",
        (ContentType::Video, false) => "videos",
    }
}

/// Message sent when a document reaches `completed`
pub fn completed_message(doc: &Document) -> String {
    let result = doc.result.as_deref().unwrap_or_default();
    match doc.content_type {
        ContentType::Photo => format!(
            "✅ Photo \"{}\" processed.\n\nRecognized text:\n{}",
            doc.filename,
            truncate_chars(result, PHOTO_TEXT_PREVIEW_CHARS)
        ),
        ContentType::File => format!("✅ File \"{}\" added to your knowledge base.", doc.filename),
        ContentType::Video => format!("✅ Video \"{}\" transcribed and added to your knowledge base.", doc.filename),
    }
}

/// Message sent when a document reaches `failed`
pub fn failed_message(doc: &Document) -> String {
    format!(
        "❌ Could not process {} \"{}\".\nReason: {}",
        plural(doc.content_type, 1),
        doc.filename,
        doc.error_message.as_deref().unwrap_or("unknown error")
    )
}

pub fn batch_submitted_message(content_type: ContentType, count: usize) -> String {
    format!(
        "📥 Received {} {}. Processing started, you will get a message for each one.",
        count,
        plural(content_type, count)
    )
}

pub fn batch_rejected_message(content_type: ContentType, count: usize, reason: &str) -> String {
    format!(
        "⚠️ Could not queue your {} {}: {}\nPlease try again in a minute.",
        count,
        plural(content_type, count),
        reason
    )
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn document_completed(&self, doc: &Document) {
        log::info!("[notify {}] {}", doc.owner_id, completed_message(doc));
    }

    async fn document_failed(&self, doc: &Document) {
        log::warn!("[notify {}] {}", doc.owner_id, failed_message(doc));
    }

    async fn batch_submitted(&self, owner_id: OwnerId, content_type: ContentType, count: usize) {
        log::info!("[notify {}] {}", owner_id, batch_submitted_message(content_type, count));
    }

    async fn batch_rejected(&self, owner_id: OwnerId, content_type: ContentType, count: usize, reason: &str) {
        log::warn!(
            "[notify {}] {}",
            owner_id,
            batch_rejected_message(content_type, count, reason)
        );
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: OwnerId,
    text: &'a str,
}

/// Sends notifications through the Bot API `sendMessage` method.
///
/// The owner id doubles as the private chat id.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
    retry: RetryConfig,
}

impl TelegramNotifier {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config::network::timeout())
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            retry: RetryConfig::quick(),
        })
    }

    /// Notifier for the configured `BOT_API_URL` / `BOT_TOKEN`.
    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(config::BOT_API_URL.as_str(), config::BOT_TOKEN.as_str())
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }

    async fn send(&self, chat_id: OwnerId, text: &str) {
        let url = self.endpoint();
        let url = url.as_str();
        let client = &self.client;
        let outcome = retry(&self.retry, || async move {
            client
                .post(url)
                .json(&SendMessage { chat_id, text })
                .send()
                .await?
                .error_for_status()
                .map(|_| ())
        })
        .await;

        match outcome.into_result() {
            Ok(()) => log::debug!("Notification delivered to {}", chat_id),
            // Never log the URL: it carries the token
            Err(e) => log::error!("Failed to notify {}: {}", chat_id, e.without_url()),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn document_completed(&self, doc: &Document) {
        self.send(doc.owner_id, &completed_message(doc)).await;
    }

    async fn document_failed(&self, doc: &Document) {
        self.send(doc.owner_id, &failed_message(doc)).await;
    }

    async fn batch_submitted(&self, owner_id: OwnerId, content_type: ContentType, count: usize) {
        self.send(owner_id, &batch_submitted_message(content_type, count)).await;
    }

    async fn batch_rejected(&self, owner_id: OwnerId, content_type: ContentType, count: usize, reason: &str) {
        self.send(owner_id, &batch_rejected_message(content_type, count, reason))
            .await;
    }
}
