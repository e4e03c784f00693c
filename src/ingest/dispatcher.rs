//! Priority job dispatcher.
//!
//! Turns flushed batches into `pending` documents plus prioritized jobs, runs
//! a fixed pool of workers over the [`JobQueue`] and drives every document
//! through its status machine. Failures during execution end in the
//! document's `failed` status; only enqueue problems are returned to callers.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::config::{self, ConfigError};
use crate::core::metrics;
use crate::core::retry::RetryConfig;
use crate::core::types::{priority_of, ContentType, Priority, Tier};
use crate::ingest::buffer::{BatchSink, BufferKey};
use crate::ingest::error::DispatchError;
use crate::ingest::job::{BatchItem, DocumentId, Job, JobId, OwnerId};
use crate::ingest::queue::{Delivery, JobQueue};
use crate::ingest::status::DocumentStatus;
use crate::processing::{ContentProcessor, ProcessingError};
use crate::storage::documents::{Document, DocumentStore, NewDocument, StatusUpdate};
use crate::telegram::Notifier;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Number of workers, each holding at most one delivery
    pub workers: usize,
    /// Transient failures retried per job
    pub max_retries: u32,
    /// Backoff before a failed job is requeued
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_retries: 3,
            retry: RetryConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new(workers: i64, max_retries: i64, initial_delay: Duration) -> Result<Self, ConfigError> {
        let max_retries = config::non_negative("TASK_MAX_RETRIES", max_retries)?;
        Ok(Self {
            workers: config::positive("WORKER_CONCURRENCY", workers)?,
            max_retries,
            retry: RetryConfig::new()
                .max_retries(max_retries)
                .initial_delay(initial_delay)
                .max_delay(config::dispatcher::retry_max_delay()),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(
            *config::dispatcher::WORKER_CONCURRENCY,
            *config::dispatcher::MAX_RETRIES,
            config::dispatcher::retry_initial_delay(),
        )
    }
}

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    processor: Arc<dyn ContentProcessor>,
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
    /// job id -> document id, for status polls
    jobs: DashMap<JobId, DocumentId>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        queue: Arc<JobQueue>,
        processor: Arc<dyn ContentProcessor>,
        notifier: Arc<dyn Notifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            queue,
            processor,
            notifier,
            config,
            jobs: DashMap::new(),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Creates a `pending` document and a job for every item, in order.
    ///
    /// Returns once everything is enqueued. The batch is accepted or
    /// rejected as a whole: when the queue cannot take every job, nothing is
    /// enqueued.
    pub async fn submit_batch(
        &self,
        owner_id: OwnerId,
        content_type: ContentType,
        items: Vec<BatchItem>,
        tier: &str,
    ) -> Result<Vec<JobId>, DispatchError> {
        let priority = priority_of(tier);
        self.ensure_room(items.len()).await?;

        let mut jobs = Vec::with_capacity(items.len());
        for item in items {
            jobs.push(self.create_job(owner_id, content_type, item, priority).await?);
        }
        let job_ids = self.enqueue_jobs(jobs).await?;

        log::info!(
            "Submitted {} {} job(s) for owner {} (tier {}, priority {})",
            job_ids.len(),
            content_type,
            owner_id,
            tier,
            priority
        );
        Ok(job_ids)
    }

    /// One-item submission, used for video links.
    pub async fn submit_single(
        &self,
        owner_id: OwnerId,
        content_type: ContentType,
        item: BatchItem,
        tier: &str,
    ) -> Result<JobId, DispatchError> {
        self.submit_one(owner_id, content_type, item, priority_of(tier)).await
    }

    /// Submits a failed document again as a new document/job pair.
    pub async fn resubmit_failed(&self, document_id: DocumentId, tier: &str) -> Result<JobId, DispatchError> {
        let doc = self.store.get(document_id).await?;
        if doc.status != DocumentStatus::Failed {
            return Err(DispatchError::NotFailed(document_id));
        }

        log::info!("Resubmitting failed document {} ({})", doc.id, doc.filename);
        self.submit_one(
            doc.owner_id,
            doc.content_type,
            BatchItem::new(doc.filename, doc.payload_ref),
            priority_of(tier),
        )
        .await
    }

    /// Gives a `pending` document that was left without a job (a rejected
    /// submission) a new job. The document itself is reused.
    pub async fn resubmit_pending(&self, document_id: DocumentId, tier: &str) -> Result<JobId, DispatchError> {
        let doc = self.store.get(document_id).await?;
        if doc.status != DocumentStatus::Pending {
            return Err(DispatchError::NotPending(document_id));
        }
        if self.jobs.iter().any(|entry| *entry.value() == document_id) {
            return Err(DispatchError::AlreadyQueued(document_id));
        }

        log::info!("Resubmitting pending document {} ({})", doc.id, doc.filename);
        let job = Job::new(
            doc.id,
            doc.owner_id,
            doc.content_type,
            priority_of(tier),
            doc.payload_ref,
            self.config.max_retries,
        );
        self.enqueue_job(job).await
    }

    async fn submit_one(
        &self,
        owner_id: OwnerId,
        content_type: ContentType,
        item: BatchItem,
        priority: Priority,
    ) -> Result<JobId, DispatchError> {
        self.ensure_room(1).await?;
        let job = self.create_job(owner_id, content_type, item, priority).await?;
        self.enqueue_job(job).await
    }

    async fn ensure_room(&self, count: usize) -> Result<(), DispatchError> {
        self.queue
            .check_room(count)
            .await
            .map_err(|source| DispatchError::Submission {
                document_ids: Vec::new(),
                source,
            })
    }

    /// Creates the `pending` document behind a new job.
    async fn create_job(
        &self,
        owner_id: OwnerId,
        content_type: ContentType,
        item: BatchItem,
        priority: Priority,
    ) -> Result<Job, DispatchError> {
        let doc = self
            .store
            .create(NewDocument {
                owner_id,
                content_type,
                filename: item.name,
                payload_ref: item.payload_ref,
            })
            .await?;

        Ok(Job::new(
            doc.id,
            owner_id,
            content_type,
            priority,
            doc.payload_ref,
            self.config.max_retries,
        ))
    }

    async fn enqueue_job(&self, job: Job) -> Result<JobId, DispatchError> {
        let job_id = job.id;
        self.enqueue_jobs(vec![job]).await?;
        Ok(job_id)
    }

    async fn enqueue_jobs(&self, jobs: Vec<Job>) -> Result<Vec<JobId>, DispatchError> {
        let ids: Vec<(JobId, DocumentId)> = jobs.iter().map(|job| (job.id, job.document_id)).collect();
        for (job_id, document_id) in &ids {
            self.jobs.insert(*job_id, *document_id);
        }

        if let Err(source) = self.queue.enqueue_all(jobs).await {
            for (job_id, _) in &ids {
                self.jobs.remove(job_id);
            }
            return Err(DispatchError::Submission {
                document_ids: ids.into_iter().map(|(_, document_id)| document_id).collect(),
                source,
            });
        }
        Ok(ids.into_iter().map(|(job_id, _)| job_id).collect())
    }

    /// Current state of a job's document. `None` for unknown job ids.
    pub async fn job_status(&self, job_id: JobId) -> Result<Option<JobStatusView>, DispatchError> {
        let Some(document_id) = self.jobs.get(&job_id).map(|entry| *entry.value()) else {
            return Ok(None);
        };

        let doc = self.store.get(document_id).await?;
        Ok(Some(JobStatusView {
            job_id,
            status: doc.status,
            progress: Some(doc.status.progress()),
            error: doc.error_message,
        }))
    }

    /// Re-enqueues journaled jobs that never reached a terminal outcome.
    ///
    /// Returns the number of jobs put back in the queue.
    pub async fn recover(&self) -> Result<usize, DispatchError> {
        if !self.queue.has_journal() {
            return Ok(0);
        }

        let mut recovered = 0;
        for job in self.queue.unfinished_jobs().await? {
            let doc = match self.store.get(job.document_id).await {
                Ok(doc) => doc,
                Err(e) => {
                    log::warn!("Dropping journaled job {}: {}", job.id, e);
                    self.queue.record_outcome(job.id, DocumentStatus::Failed).await?;
                    continue;
                }
            };
            if doc.status.is_terminal() {
                // Crashed between the document update and the journal write
                self.queue.record_outcome(job.id, doc.status).await?;
                continue;
            }

            let (job_id, document_id) = (job.id, job.document_id);
            self.enqueue_job(job).await?;
            log::info!("Recovered job {} for document {} ({})", job_id, document_id, doc.status);
            recovered += 1;
        }

        if recovered > 0 {
            log::info!("Recovered {} unfinished job(s) from the journal", recovered);
        }
        Ok(recovered)
    }

    /// Spawns the worker pool. Workers stop taking jobs once `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> WorkerPool {
        let handles = (0..self.config.workers)
            .map(|worker_id| {
                let dispatcher = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker_id, shutdown).await })
            })
            .collect();

        log::info!("Started {} worker(s)", self.config.workers);
        WorkerPool { handles, shutdown }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize, shutdown: CancellationToken) {
        log::debug!("Worker {} waiting for jobs", worker_id);
        while let Some(delivery) = self.queue.fetch(&shutdown).await {
            let tag = delivery.tag;
            let job = delivery.job.clone();

            // Run each job in its own task so a panic only costs one attempt
            let dispatcher = Arc::clone(&self);
            let task = tokio::spawn(async move { dispatcher.process(delivery).await });
            if let Err(e) = task.await {
                log::error!("Worker {}: job {} crashed: {}", worker_id, job.id, e);
                Arc::clone(&self)
                    .fail_attempt(tag, job, format!("processing crashed: {}", e))
                    .await;
            }
        }
        log::debug!("Worker {} stopped", worker_id);
    }

    async fn process(self: Arc<Self>, delivery: Delivery) {
        let Delivery { tag, job } = delivery;

        let doc = match self.store.get(job.document_id).await {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("Job {}: cannot load document {}: {}", job.id, job.document_id, e);
                self.queue.ack(tag, DocumentStatus::Failed).await;
                return;
            }
        };

        match doc.status {
            DocumentStatus::Pending => {
                if let Err(e) = self.store.update_status(doc.id, StatusUpdate::processing()).await {
                    log::error!("Job {}: cannot start document {}: {}", job.id, doc.id, e);
                    self.queue.release(tag).await;
                    return;
                }
                log::info!(
                    "Processing document {} ({} \"{}\", priority {}, attempt {})",
                    doc.id,
                    doc.content_type,
                    doc.filename,
                    job.priority,
                    job.retry_count + 1
                );
            }
            DocumentStatus::Processing => {
                log::info!(
                    "Resuming document {} (retry {}/{})",
                    doc.id,
                    job.retry_count,
                    job.max_retries
                );
            }
            DocumentStatus::Completed | DocumentStatus::Failed => {
                log::warn!(
                    "Document {} is already {}, dropping duplicate delivery of job {}",
                    doc.id,
                    doc.status,
                    job.id
                );
                self.queue.ack(tag, doc.status).await;
                return;
            }
        }

        let timer = metrics::start_processing_timer(job.content_type);
        let outcome = self.processor.process(&job.payload()).await;
        timer.observe_duration();

        match outcome {
            Ok(text) => self.finish(tag, &job, StatusUpdate::completed(text)).await,
            Err(ProcessingError::Permanent(msg)) => {
                log::warn!("Document {} failed permanently: {}", job.document_id, msg);
                self.finish(tag, &job, StatusUpdate::failed(msg)).await;
            }
            Err(ProcessingError::Transient(msg)) => self.fail_attempt(tag, job, msg).await,
        }
    }

    /// Retries a transiently failed attempt while budget is left, otherwise
    /// fails the document.
    async fn fail_attempt(self: Arc<Self>, tag: u64, job: Job, reason: String) {
        if job.can_retry() {
            self.schedule_retry(tag, job, reason);
            return;
        }
        log::warn!(
            "Document {} failed after {} retries: {}",
            job.document_id,
            job.retry_count,
            reason
        );
        self.finish(tag, &job, StatusUpdate::failed(reason)).await;
    }

    /// Writes the terminal status, informs the owner, then acknowledges.
    async fn finish(&self, tag: u64, job: &Job, update: StatusUpdate) {
        let outcome = update.status;
        let doc: Document = match self.store.update_status(job.document_id, update).await {
            Ok(doc) => doc,
            Err(e) => {
                log::error!("Job {}: cannot store outcome of document {}: {}", job.id, job.document_id, e);
                self.queue.release(tag).await;
                return;
            }
        };

        match outcome {
            DocumentStatus::Completed => self.notifier.document_completed(&doc).await,
            _ => self.notifier.document_failed(&doc).await,
        }
        self.queue.ack(tag, outcome).await;
        metrics::record_job_outcome(job.content_type, outcome.as_str());
        log::info!("Document {} {}", doc.id, outcome);
    }

    /// Requeues the next attempt after the backoff delay. The failed delivery
    /// keeps its lease until the requeue went through.
    fn schedule_retry(self: Arc<Self>, tag: u64, job: Job, reason: String) {
        let delay = self.config.retry.delay_for_attempt(job.retry_count);
        let next = job.next_attempt();
        metrics::record_retry(next.retry_count);
        log::warn!(
            "Document {} failed transiently ({}), retry {}/{} in {:?}",
            job.document_id,
            reason,
            next.retry_count,
            next.max_retries,
            delay
        );

        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = self.queue.requeue(tag, next).await {
                log::error!("Requeue of job {} failed: {}", job.id, e);
                self.queue.release(tag).await;
            }
        });
    }
}

/// Running workers of a [`Dispatcher`].
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops taking new jobs and waits for the workers to finish their current one.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("Worker task failed: {}", e);
            }
        }
        log::info!("Worker pool stopped");
    }
}

/// Looks up an owner's subscription tier when a batch is flushed.
#[async_trait]
pub trait TierResolver: Send + Sync {
    async fn tier_of(&self, owner_id: OwnerId) -> Tier;
}

/// Same tier for everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTier(pub Tier);

#[async_trait]
impl TierResolver for FixedTier {
    async fn tier_of(&self, _owner_id: OwnerId) -> Tier {
        self.0
    }
}

/// Per-owner tiers with a fallback for unknown owners.
#[derive(Debug, Default)]
pub struct TierDirectory {
    tiers: DashMap<OwnerId, Tier>,
    default: Tier,
}

impl TierDirectory {
    pub fn new(default: Tier) -> Self {
        Self {
            tiers: DashMap::new(),
            default,
        }
    }

    /// Takes effect for batches flushed afterwards; queued jobs keep their priority.
    pub fn set(&self, owner_id: OwnerId, tier: Tier) {
        self.tiers.insert(owner_id, tier);
    }

    pub fn remove(&self, owner_id: OwnerId) {
        self.tiers.remove(&owner_id);
    }
}

#[async_trait]
impl TierResolver for TierDirectory {
    async fn tier_of(&self, owner_id: OwnerId) -> Tier {
        self.tiers.get(&owner_id).map(|t| *t.value()).unwrap_or(self.default)
    }
}

/// Connects a debounced buffer to the dispatcher.
pub struct DispatchSink {
    dispatcher: Arc<Dispatcher>,
    tiers: Arc<dyn TierResolver>,
}

impl DispatchSink {
    pub fn new(dispatcher: Arc<Dispatcher>, tiers: Arc<dyn TierResolver>) -> Self {
        Self { dispatcher, tiers }
    }
}

#[async_trait]
impl BatchSink<BatchItem> for DispatchSink {
    async fn submit_batch(&self, key: BufferKey, items: Vec<BatchItem>) -> Result<(), DispatchError> {
        let count = items.len();
        let tier = self.tiers.tier_of(key.owner_id).await;
        let notifier = self.dispatcher.notifier();

        match self
            .dispatcher
            .submit_batch(key.owner_id, key.content_type, items, tier.as_str())
            .await
        {
            Ok(job_ids) => {
                notifier
                    .batch_submitted(key.owner_id, key.content_type, job_ids.len())
                    .await;
                Ok(())
            }
            Err(e) => {
                log::error!("Batch of {} item(s) for {} rejected: {}", count, key, e);
                notifier
                    .batch_rejected(key.owner_id, key.content_type, count, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }
}
