use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::core::types::ContentType;
use crate::ingest::job::{DocumentId, OwnerId};
use crate::ingest::status::DocumentStatus;
use crate::storage::db::{get_connection, DbPool};
use crate::storage::StoreError;

/// A knowledge-base document and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub owner_id: OwnerId,
    pub content_type: ContentType,
    /// File name or video title shown to the user
    pub filename: String,
    pub payload_ref: String,
    pub status: DocumentStatus,
    /// Extracted text, set once on `completed`
    pub result: Option<String>,
    /// Failure reason, set once on `failed`
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a document is created; it always starts `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub owner_id: OwnerId,
    pub content_type: ContentType,
    pub filename: String,
    pub payload_ref: String,
}

/// Status change written by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: DocumentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: DocumentStatus::Processing,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: DocumentStatus::Completed,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: DocumentStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Validates the transition and applies it to an in-memory copy.
fn apply_update(doc: &mut Document, update: StatusUpdate) -> Result<(), StoreError> {
    let next = doc
        .status
        .transition(update.status)
        .map_err(|source| StoreError::InvalidTransition { id: doc.id, source })?;

    doc.status = next;
    match next {
        DocumentStatus::Completed => doc.result = Some(update.result.unwrap_or_default()),
        DocumentStatus::Failed => doc.error_message = Some(update.error.unwrap_or_default()),
        DocumentStatus::Pending | DocumentStatus::Processing => {}
    }
    doc.updated_at = Utc::now();
    Ok(())
}

/// Persistence for documents. Only the dispatcher writes status.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a `pending` document.
    async fn create(&self, doc: NewDocument) -> Result<Document, StoreError>;

    async fn get(&self, id: DocumentId) -> Result<Document, StoreError>;

    /// Applies a status change, rejecting anything the state machine forbids.
    async fn update_status(&self, id: DocumentId, update: StatusUpdate) -> Result<Document, StoreError>;
}

/// Process-local store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: DashMap<DocumentId, Document>,
    next_id: AtomicI64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// All documents of one owner, oldest first.
    pub fn documents_for_owner(&self, owner_id: OwnerId) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .docs
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        docs.sort_by_key(|d| d.id);
        docs
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let document = Document {
            id,
            owner_id: doc.owner_id,
            content_type: doc.content_type,
            filename: doc.filename,
            payload_ref: doc.payload_ref,
            status: DocumentStatus::Pending,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.docs.insert(id, document.clone());
        Ok(document)
    }

    async fn get(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.docs
            .get(&id)
            .map(|d| d.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn update_status(&self, id: DocumentId, update: StatusUpdate) -> Result<Document, StoreError> {
        let mut entry = self.docs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_update(entry.value_mut(), update)?;
        Ok(entry.value().clone())
    }
}

/// SQLite-backed store on the `documents` table.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

const DOCUMENT_COLUMNS: &str =
    "id, owner_id, content_type, filename, payload_ref, status, result, error_message, created_at, updated_at";

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        content_type: row.get(2)?,
        filename: row.get(3)?,
        payload_ref: row.get(4)?,
        status: row.get(5)?,
        result: row.get(6)?,
        error_message: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

fn select_document(conn: &rusqlite::Connection, id: DocumentId) -> Result<Document, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS),
        params![id],
        document_from_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound(id))
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs blocking SQLite work off the async worker threads.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("database task failed: {}", e)))?
    }

    /// Documents of one owner, newest first.
    pub async fn documents_for_owner(&self, owner_id: OwnerId, limit: usize) -> Result<Vec<Document>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                DOCUMENT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![owner_id, limit as i64], document_from_row)?;

            let mut docs = Vec::new();
            for row in rows {
                docs.push(row?);
            }
            Ok(docs)
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create(&self, doc: NewDocument) -> Result<Document, StoreError> {
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents (owner_id, content_type, filename, payload_ref, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
                params![doc.owner_id, doc.content_type, doc.filename, doc.payload_ref, now],
            )?;
            select_document(conn, conn.last_insert_rowid())
        })
        .await
    }

    async fn get(&self, id: DocumentId) -> Result<Document, StoreError> {
        self.with_conn(move |conn| select_document(conn, id)).await
    }

    async fn update_status(&self, id: DocumentId, update: StatusUpdate) -> Result<Document, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut doc = select_document(&tx, id)?;
            apply_update(&mut doc, update)?;
            tx.execute(
                "UPDATE documents SET status = ?1, result = ?2, error_message = ?3, updated_at = ?4 WHERE id = ?5",
                params![doc.status, doc.result, doc.error_message, doc.updated_at.to_rfc3339(), id],
            )?;
            tx.commit()?;
            Ok(doc)
        })
        .await
    }
}
