//! Restart recovery from the SQLite job journal
//!
//! Run with: cargo test --test recovery_test

mod common;
mod mocks;

use cogito_ingest::core::ContentType;
use cogito_ingest::ingest::{BatchItem, DocumentStatus};
use cogito_ingest::storage::{DocumentStore, JobJournal, SqliteJobJournal, StatusUpdate};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{sqlite_pipeline, temp_pool, wait_for_idle};
use mocks::Step;

fn file(name: &str) -> BatchItem {
    BatchItem::new(format!("{}.txt", name), name)
}

#[tokio::test]
async fn test_queued_jobs_survive_restart() {
    let (_dir, pool) = temp_pool();

    let before = sqlite_pipeline(&pool, 1, 3);
    let job_ids = before
        .dispatcher
        .submit_batch(3, ContentType::File, vec![file("a"), file("b"), file("c")], "free")
        .await
        .unwrap();
    drop(before);

    let after = sqlite_pipeline(&pool, 1, 3);
    assert_eq!(after.dispatcher.recover().await.unwrap(), 3);

    let workers = after.dispatcher.start(CancellationToken::new());
    wait_for_idle(&after.dispatcher).await;
    workers.shutdown().await;

    assert_eq!(after.processor.processed_refs(), vec!["a", "b", "c"]);
    for job_id in job_ids {
        let status = after.dispatcher.job_status(job_id).await.unwrap().unwrap();
        assert_eq!(status.status, DocumentStatus::Completed);
    }

    let journal = SqliteJobJournal::new(pool.clone());
    assert!(journal.load_unfinished().unwrap().is_empty());
    assert_eq!(after.dispatcher.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn test_job_interrupted_mid_processing_is_resumed() {
    let (_dir, pool) = temp_pool();

    let before = sqlite_pipeline(&pool, 1, 3);
    before
        .dispatcher
        .submit_single(8, ContentType::File, file("report"), "ultra")
        .await
        .unwrap();
    let delivery = before.dispatcher.queue().try_fetch().await.unwrap();
    before
        .store
        .update_status(delivery.job.document_id, StatusUpdate::processing())
        .await
        .unwrap();
    drop(before);

    let after = sqlite_pipeline(&pool, 1, 3);
    assert_eq!(after.dispatcher.recover().await.unwrap(), 1);
    let workers = after.dispatcher.start(CancellationToken::new());
    wait_for_idle(&after.dispatcher).await;
    workers.shutdown().await;

    let doc = after.store.get(delivery.job.document_id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.result.as_deref(), Some("text of report"));
    assert_eq!(after.processor.calls()[0].priority, 1);
}

#[tokio::test]
async fn test_finished_document_is_not_replayed() {
    let (_dir, pool) = temp_pool();

    let before = sqlite_pipeline(&pool, 1, 3);
    before
        .dispatcher
        .submit_single(8, ContentType::File, file("done"), "free")
        .await
        .unwrap();
    let delivery = before.dispatcher.queue().try_fetch().await.unwrap();
    let doc_id = delivery.job.document_id;
    before.store.update_status(doc_id, StatusUpdate::processing()).await.unwrap();
    before
        .store
        .update_status(doc_id, StatusUpdate::completed("already extracted"))
        .await
        .unwrap();
    // Crash before the delivery was acknowledged
    drop(before);

    let after = sqlite_pipeline(&pool, 1, 3);
    assert_eq!(after.dispatcher.recover().await.unwrap(), 0);
    assert!(SqliteJobJournal::new(pool.clone()).load_unfinished().unwrap().is_empty());
    assert!(after.processor.calls().is_empty());
}

#[tokio::test]
async fn test_retry_count_is_journaled() {
    let (_dir, pool) = temp_pool();
    let p = sqlite_pipeline(&pool, 1, 3);
    p.processor.script("flaky", [Step::Transient("busy"), Step::Transient("busy")]);

    let job_id = p
        .dispatcher
        .submit_single(2, ContentType::File, file("flaky"), "premium")
        .await
        .unwrap();
    let workers = p.dispatcher.start(CancellationToken::new());
    wait_for_idle(&p.dispatcher).await;
    workers.shutdown().await;

    let conn = pool.get().unwrap();
    let (status, retry_count): (String, u32) = conn
        .query_row(
            "SELECT status, retry_count FROM job_queue WHERE id = ?1",
            [job_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "completed");
    assert_eq!(retry_count, 2);
}
