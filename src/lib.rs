//! Cogito ingest - media-ingestion core of the Cogito knowledge-base bot
//!
//! Users send photos, files and video links to the bot; every upload arrives
//! as a separate message. This crate batches them per user and content type,
//! turns each item into a document plus a prioritized job, and drives the
//! documents through `pending -> processing -> completed | failed`.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, metrics, retry policy, shared types
//! - `ingest`: debounced batch buffer, priority queue, dispatcher, status machine
//! - `processing`: content processors (text extraction backends)
//! - `storage`: SQLite document store and durable job journal
//! - `telegram`: user notifications

pub mod cli;
pub mod core;
pub mod ingest;
pub mod processing;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult, ContentType, Priority, Tier};
pub use ingest::{
    BatchItem, BufferConfig, BufferKey, DebouncedBuffer, Dispatcher, DispatcherConfig, DocumentStatus, JobId,
    JobQueue,
};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
