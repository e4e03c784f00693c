//! Durable job journal on the `job_queue` table.
//!
//! A job row is written before the job becomes visible in the in-memory
//! queue, updated before a failed delivery is acknowledged, and marked
//! finished on a terminal outcome. Rows that are not finished at startup are
//! replayed by the dispatcher.

use chrono::{DateTime, Utc};
use rusqlite::params;
use std::str::FromStr;

use crate::core::types::Priority;
use crate::ingest::job::{Job, JobId};
use crate::ingest::status::DocumentStatus;
use crate::storage::db::{get_connection, DbPool};
use crate::storage::StoreError;

/// Write-ahead record of queue state changes.
///
/// Calls block; the queue runs them on the blocking thread pool.
pub trait JobJournal: Send + Sync {
    fn record_enqueued(&self, job: &Job) -> Result<(), StoreError>;

    /// Records a whole batch, all or nothing.
    fn record_enqueued_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
        jobs.iter().try_for_each(|job| self.record_enqueued(job))
    }

    fn record_started(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Stores the next attempt (incremented retry count) of a job.
    fn record_retry(&self, job: &Job) -> Result<(), StoreError>;

    fn record_finished(&self, job_id: JobId, outcome: DocumentStatus) -> Result<(), StoreError>;

    /// Jobs that never reached a terminal outcome, in dequeue order.
    fn load_unfinished(&self) -> Result<Vec<Job>, StoreError>;
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let raw_id: String = row.get(0)?;
    let id = JobId::from_str(&raw_id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let created_at: String = row.get(8)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Job {
        id,
        document_id: row.get(1)?,
        owner_id: row.get(2)?,
        content_type: row.get(3)?,
        priority: Priority::new(row.get(4)?),
        payload_ref: row.get(5)?,
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        created_at,
    })
}

pub struct SqliteJobJournal {
    pool: DbPool,
}

impl SqliteJobJournal {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn insert_job(conn: &rusqlite::Connection, job: &Job) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO job_queue (id, document_id, owner_id, content_type, priority, payload_ref, retry_count, max_retries, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
         ON CONFLICT(id) DO UPDATE SET
         status = 'pending',
         retry_count = excluded.retry_count,
         updated_at = CURRENT_TIMESTAMP",
        params![
            job.id.to_string(),
            job.document_id,
            job.owner_id,
            job.content_type,
            job.priority.value(),
            job.payload_ref,
            job.retry_count,
            job.max_retries,
            job.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl JobJournal for SqliteJobJournal {
    fn record_enqueued(&self, job: &Job) -> Result<(), StoreError> {
        let conn = get_connection(&self.pool)?;
        insert_job(&conn, job)
    }

    fn record_enqueued_all(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction()?;
        for job in jobs {
            insert_job(&tx, job)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn record_started(&self, job_id: JobId) -> Result<(), StoreError> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE job_queue SET status = 'processing', updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![job_id.to_string()],
        )?;
        Ok(())
    }

    fn record_retry(&self, job: &Job) -> Result<(), StoreError> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE job_queue
             SET status = 'pending',
                 retry_count = ?1,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![job.retry_count, job.id.to_string()],
        )?;
        Ok(())
    }

    fn record_finished(&self, job_id: JobId, outcome: DocumentStatus) -> Result<(), StoreError> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "UPDATE job_queue SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![outcome, job_id.to_string()],
        )?;
        Ok(())
    }

    fn load_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, owner_id, content_type, priority, payload_ref, retry_count, max_retries, created_at
             FROM job_queue
             WHERE status IN ('pending', 'processing')
             ORDER BY priority ASC, created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], job_from_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            match row {
                Ok(job) => jobs.push(job),
                Err(e) => log::warn!("Skipping unreadable job journal row: {}", e),
            }
        }
        Ok(jobs)
    }
}
