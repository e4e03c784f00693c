//! Pipeline fixtures: a dispatcher wired to mocks, optionally on SQLite

#![allow(dead_code)]

use cogito_ingest::core::retry::RetryConfig;
use cogito_ingest::ingest::{Dispatcher, DispatcherConfig, JobQueue};
use cogito_ingest::storage::{create_pool, DbPool, DocumentStore, MemoryDocumentStore, SqliteDocumentStore, SqliteJobJournal};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::recorder::RecordingNotifier;
use crate::mocks::MockProcessor;

/// Longest a test waits for the queue to drain
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestPipeline {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn DocumentStore>,
    pub processor: Arc<MockProcessor>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn dispatcher_config(workers: usize, max_retries: u32) -> DispatcherConfig {
    DispatcherConfig {
        workers,
        max_retries,
        retry: RetryConfig::immediate().max_retries(max_retries),
    }
}

/// In-memory pipeline with retries requeued without delay.
pub fn memory_pipeline(workers: usize, max_retries: u32, capacity: usize) -> TestPipeline {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    build(store, Arc::new(JobQueue::new(capacity)), workers, max_retries)
}

/// SQLite pipeline with a job journal; the pool can be reused to simulate a restart.
pub fn sqlite_pipeline(pool: &DbPool, workers: usize, max_retries: u32) -> TestPipeline {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool.clone()));
    let queue = Arc::new(JobQueue::with_journal(1000, Arc::new(SqliteJobJournal::new(pool.clone()))));
    build(store, queue, workers, max_retries)
}

fn build(store: Arc<dyn DocumentStore>, queue: Arc<JobQueue>, workers: usize, max_retries: u32) -> TestPipeline {
    let processor = Arc::new(MockProcessor::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue,
        processor.clone(),
        notifier.clone(),
        dispatcher_config(workers, max_retries),
    ));
    TestPipeline {
        dispatcher,
        store,
        processor,
        notifier,
    }
}

pub fn temp_pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(dir.path().join("cogito-test.sqlite").to_str().unwrap()).unwrap();
    (dir, pool)
}

/// Polls until no job is queued or leased.
pub async fn wait_for_idle(dispatcher: &Dispatcher) {
    tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !dispatcher.queue().is_idle().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not drain in time");
}
