use crate::core::metrics;
use crate::core::types::Priority;
use crate::ingest::error::QueueError;
use crate::ingest::job::{Job, JobId, OwnerId};
use crate::ingest::status::DocumentStatus;
use crate::storage::jobs::JobJournal;
use crate::storage::StoreError;

use log::info;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A job handed to one worker. The job stays leased until the tag is acked,
/// requeued or released.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub job: Job,
}

#[derive(Debug)]
struct Queued {
    job: Job,
    enqueued_at: Instant,
}

#[derive(Default)]
struct QueueState {
    /// Ready jobs, kept sorted by priority (0 first), FIFO within a band.
    ready: VecDeque<Queued>,
    /// Delivered but not yet acknowledged jobs, by delivery tag.
    in_flight: HashMap<u64, Job>,
    next_tag: u64,
}

impl QueueState {
    /// Inserts behind every job of the same or a better band.
    fn insert(&mut self, job: Job) {
        let insert_pos = self
            .ready
            .iter()
            .position(|q| q.job.priority > job.priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(
            insert_pos,
            Queued {
                job,
                enqueued_at: Instant::now(),
            },
        );
    }

    fn counts_by_priority(&self) -> [usize; Priority::BANDS] {
        let mut counts = [0; Priority::BANDS];
        for q in &self.ready {
            counts[q.job.priority.value() as usize] += 1;
        }
        counts
    }

    fn update_metrics(&self) {
        for (band, count) in self.counts_by_priority().iter().enumerate() {
            metrics::update_queue_depth(Priority::new(band as u8), *count);
        }
        metrics::update_queue_depth_total(self.ready.len());
    }
}

/// Priority job queue with leased deliveries.
///
/// Jobs are dequeued lowest priority number first and FIFO within a band.
/// Every delivery stays in flight until it is explicitly acknowledged,
/// requeued (ack-late retry) or released for redelivery. When a journal is
/// attached, every state change is written to it before it becomes visible
/// in memory. Journal writes run on the blocking pool; enqueues and requeues
/// keep the queue lock across them, so a slow disk delays those two and
/// every fetch behind them.
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    journal: Option<Arc<dyn JobJournal>>,
}

impl JobQueue {
    /// Creates an in-memory queue holding at most `capacity` ready jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity,
            journal: None,
        }
    }

    /// Creates a queue that journals enqueues, retries and outcomes.
    pub fn with_journal(capacity: usize, journal: Arc<dyn JobJournal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(capacity)
        }
    }

    pub fn has_journal(&self) -> bool {
        self.journal.is_some()
    }

    /// Runs a journal call on the blocking pool. A queue without a journal
    /// yields `T::default()`.
    async fn journal_write<T, F>(&self, write: F) -> Result<T, StoreError>
    where
        T: Default + Send + 'static,
        F: FnOnce(&dyn JobJournal) -> Result<T, StoreError> + Send + 'static,
    {
        let Some(journal) = self.journal.clone() else {
            return Ok(T::default());
        };
        tokio::task::spawn_blocking(move || write(journal.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("journal task failed: {}", e)))?
    }

    /// Journaled jobs without a terminal outcome, in dequeue order.
    pub async fn unfinished_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.journal_write(|journal| journal.load_unfinished()).await
    }

    /// Marks a journaled job finished without it passing through the queue.
    pub async fn record_outcome(&self, job_id: JobId, outcome: DocumentStatus) -> Result<(), StoreError> {
        self.journal_write(move |journal| journal.record_finished(job_id, outcome))
            .await
    }

    /// Fails with `Full` unless `count` more jobs fit right now.
    pub async fn check_room(&self, count: usize) -> Result<(), QueueError> {
        let ready = self.state.lock().await.ready.len();
        if ready + count > self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Adds a job respecting priority order.
    ///
    /// Fails with `Full` when the ready list is at capacity and with
    /// `Journal` when the durable record could not be written; in both
    /// cases nothing was enqueued.
    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.enqueue_all(vec![job]).await
    }

    /// Adds a batch of jobs, all or nothing.
    pub async fn enqueue_all(&self, jobs: Vec<Job>) -> Result<(), QueueError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().await;

        if state.ready.len() + jobs.len() > self.capacity {
            log::warn!(
                "Queue is full ({}/{} jobs), rejecting {} job(s) for document {}",
                state.ready.len(),
                self.capacity,
                jobs.len(),
                jobs[0].document_id
            );
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        if self.journal.is_some() {
            let batch = jobs.clone();
            self.journal_write(move |journal| journal.record_enqueued_all(&batch))
                .await
                .map_err(QueueError::Journal)?;
        }

        for job in jobs {
            info!(
                "Enqueued job {} (document {}, priority {}, retry {})",
                job.id, job.document_id, job.priority, job.retry_count
            );
            state.insert(job);
        }
        state.update_metrics();
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Waits for the next job. Returns `None` once `shutdown` is cancelled.
    pub async fn fetch(&self, shutdown: &CancellationToken) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.try_fetch().await {
                return Some(delivery);
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Takes the head of the queue without waiting.
    pub async fn try_fetch(&self) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let queued = state.ready.pop_front()?;

        let tag = state.next_tag;
        state.next_tag += 1;
        state.in_flight.insert(tag, queued.job.clone());
        state.update_metrics();
        let more_ready = !state.ready.is_empty();
        drop(state);

        metrics::record_queue_wait(queued.job.priority, queued.enqueued_at.elapsed().as_secs_f64());
        let job_id = queued.job.id;
        if let Err(e) = self.journal_write(move |journal| journal.record_started(job_id)).await {
            log::warn!("Failed to journal start of job {}: {}", job_id, e);
        }
        if more_ready {
            // Pass the wakeup on to the next idle worker
            self.notify.notify_one();
        }

        log::debug!("Delivered job {} with tag {}", queued.job.id, tag);
        Some(Delivery { tag, job: queued.job })
    }

    /// Acknowledges a delivery whose job reached `outcome`, dropping the lease.
    pub async fn ack(&self, tag: u64, outcome: DocumentStatus) -> Option<Job> {
        let job = self.state.lock().await.in_flight.remove(&tag);
        match &job {
            Some(job) => {
                if let Err(e) = self.record_outcome(job.id, outcome).await {
                    log::error!("Failed to journal outcome of job {}: {}", job.id, e);
                }
            }
            None => log::warn!("Ack for unknown delivery tag {}", tag),
        }
        job
    }

    /// Puts `job` (the next attempt of the delivery `tag`) back in the queue,
    /// then acknowledges the failed delivery.
    ///
    /// The requeue bypasses the capacity check: the job was already admitted.
    pub async fn requeue(&self, tag: u64, job: Job) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if !state.in_flight.contains_key(&tag) {
            return Err(QueueError::UnknownDelivery(tag));
        }

        if self.journal.is_some() {
            let next = job.clone();
            self.journal_write(move |journal| journal.record_retry(&next))
                .await
                .map_err(QueueError::Journal)?;
        }

        info!(
            "Requeued job {} (retry {}/{}, priority {})",
            job.id, job.retry_count, job.max_retries, job.priority
        );
        state.insert(job);
        state.in_flight.remove(&tag);
        state.update_metrics();
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Returns an unacknowledged delivery to the back of its band, unchanged.
    ///
    /// Meant for infrastructure failures around a job, not for failures of
    /// the job itself; those go through `requeue` with the next attempt.
    pub async fn release(&self, tag: u64) -> bool {
        let mut state = self.state.lock().await;
        let Some(job) = state.in_flight.remove(&tag) else {
            return false;
        };

        log::warn!("Releasing job {} (tag {}) for redelivery", job.id, tag);
        state.insert(job);
        state.update_metrics();
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Returns the current number of ready jobs.
    pub async fn size(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Ready jobs per priority band, index = priority.
    pub async fn size_by_priority(&self) -> [usize; Priority::BANDS] {
        self.state.lock().await.counts_by_priority()
    }

    /// Returns the 1-based position of a ready job.
    pub async fn position_of(&self, job_id: JobId) -> Option<usize> {
        let state = self.state.lock().await;
        state.ready.iter().position(|q| q.job.id == job_id).map(|pos| pos + 1)
    }

    /// Ready jobs belonging to one owner, in dequeue order.
    pub async fn jobs_for_owner(&self, owner_id: OwnerId) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .filter(|q| q.job.owner_id == owner_id)
            .map(|q| q.job.clone())
            .collect()
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// No ready and no leased jobs.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.in_flight.is_empty()
    }
}
