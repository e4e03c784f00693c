//! Document store, durable job journal and the SQLite plumbing behind them

pub mod db;
pub mod documents;
pub mod jobs;
pub mod migrations;

use thiserror::Error;

use crate::ingest::job::DocumentId;
use crate::ingest::status::TransitionError;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use documents::{Document, DocumentStore, MemoryDocumentStore, NewDocument, SqliteDocumentStore, StatusUpdate};
pub use jobs::{JobJournal, SqliteJobJournal};

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {0} not found")]
    NotFound(DocumentId),

    /// The requested status change breaks the document state machine
    #[error("document {id}: {source}")]
    InvalidTransition {
        id: DocumentId,
        #[source]
        source: TransitionError,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
