//! Debounced batch buffer.
//!
//! Telegram has no "upload" event for albums or multi-file sends: every
//! photo or file arrives as its own message. The buffer collects them per
//! `(owner, content type)` and hands the whole batch downstream once the
//! user stops sending for `timeout`, or as soon as `max_items` are in.
//!
//! Each key owns at most one open cycle. All mutations of a key go through
//! that key's async mutex; the map entry is removed when the cycle closes so
//! the next `start_cycle` gets a fresh slot. The debounce timer is a spawned
//! task holding a cancellation token and the id of the cycle it was armed for.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::core::config::{self, ConfigError};
use crate::core::metrics;
use crate::core::types::ContentType;
use crate::ingest::error::{BufferError, DispatchError};
use crate::ingest::job::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub owner_id: OwnerId,
    pub content_type: ContentType,
}

impl BufferKey {
    pub fn new(owner_id: OwnerId, content_type: ContentType) -> Self {
        Self { owner_id, content_type }
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.content_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Items per cycle; reaching it flushes before `add` returns
    pub max_items: usize,
    /// Inactivity window after the last add
    pub timeout: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            timeout: Duration::from_secs(3),
        }
    }
}

impl BufferConfig {
    /// Both values must be positive; `max_items = 1` dispatches every item on its own.
    pub fn new(max_items: i64, timeout_secs: i64) -> Result<Self, ConfigError> {
        Ok(Self {
            max_items: config::positive("BUFFER_MAX_ITEMS", max_items)?,
            timeout: Duration::from_secs(config::positive("BUFFER_TIMEOUT_SEC", timeout_secs)? as u64),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(*config::buffer::MAX_ITEMS, *config::buffer::TIMEOUT_SECS)
    }
}

/// Downstream consumer of flushed batches.
#[async_trait]
pub trait BatchSink<T: Send + 'static>: Send + Sync {
    async fn submit_batch(&self, key: BufferKey, items: Vec<T>) -> Result<(), DispatchError>;
}

struct Cycle<T> {
    id: u64,
    items: Vec<T>,
    /// Arrival of the first item
    created_at: Option<DateTime<Utc>>,
    /// Pending delayed flush, if any
    timer: Option<CancellationToken>,
}

struct Slot<T> {
    cycle: Option<Cycle<T>>,
    /// Set once the slot was removed from the map; waiters must look up a fresh one.
    retired: bool,
}

type SlotRef<T> = Arc<Mutex<Slot<T>>>;

struct Inner<T> {
    slots: DashMap<BufferKey, SlotRef<T>>,
    config: BufferConfig,
    sink: Arc<dyn BatchSink<T>>,
    next_cycle_id: AtomicU64,
}

/// Per-key debounced batching in front of a [`BatchSink`].
pub struct DebouncedBuffer<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for DebouncedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> DebouncedBuffer<T> {
    pub fn new(config: BufferConfig, sink: Arc<dyn BatchSink<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                config,
                sink,
                next_cycle_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> BufferConfig {
        self.inner.config
    }

    /// Locks the key's slot, creating it if needed.
    async fn lock_or_create(&self, key: BufferKey) -> (SlotRef<T>, OwnedMutexGuard<Slot<T>>) {
        loop {
            let slot = self
                .inner
                .slots
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        cycle: None,
                        retired: false,
                    }))
                })
                .clone();
            let guard = Arc::clone(&slot).lock_owned().await;
            if !guard.retired {
                return (slot, guard);
            }
        }
    }

    /// Locks the key's slot if one exists.
    async fn lock_existing(&self, key: BufferKey) -> Option<(SlotRef<T>, OwnedMutexGuard<Slot<T>>)> {
        loop {
            let slot = self.inner.slots.get(&key).map(|entry| Arc::clone(entry.value()))?;
            let guard = Arc::clone(&slot).lock_owned().await;
            if !guard.retired {
                return Some((slot, guard));
            }
        }
    }

    /// Takes the cycle out of a locked slot, cancels its timer and drops the map entry.
    fn close(&self, key: BufferKey, slot: &SlotRef<T>, guard: &mut Slot<T>) -> Option<Cycle<T>> {
        let mut cycle = guard.cycle.take()?;
        if let Some(timer) = cycle.timer.take() {
            timer.cancel();
        }
        guard.retired = true;
        self.inner.slots.remove_if(&key, |_, current| Arc::ptr_eq(current, slot));
        Some(cycle)
    }

    /// Opens a batching cycle for `key`.
    pub async fn start_cycle(&self, key: BufferKey) -> Result<(), BufferError> {
        let (_slot, mut guard) = self.lock_or_create(key).await;
        if guard.cycle.is_some() {
            return Err(BufferError::AlreadyWaiting);
        }

        let id = self.inner.next_cycle_id.fetch_add(1, Ordering::Relaxed);
        guard.cycle = Some(Cycle {
            id,
            items: Vec::new(),
            created_at: None,
            timer: None,
        });
        log::debug!("Buffer {}: cycle {} opened", key, id);
        Ok(())
    }

    /// Whether a cycle is open for `key`.
    pub async fn is_waiting(&self, key: BufferKey) -> bool {
        match self.lock_existing(key).await {
            Some((_slot, guard)) => guard.cycle.is_some(),
            None => false,
        }
    }

    /// Items collected so far in the open cycle.
    pub async fn pending_count(&self, key: BufferKey) -> usize {
        match self.lock_existing(key).await {
            Some((_slot, guard)) => guard.cycle.as_ref().map_or(0, |c| c.items.len()),
            None => 0,
        }
    }

    /// Appends an item and re-arms the debounce timer.
    ///
    /// Returns the cycle's item count after the append. When that count
    /// reaches `max_items` the batch is dispatched before this returns, and a
    /// dispatch failure is returned here.
    pub async fn add(&self, key: BufferKey, item: T) -> Result<usize, BufferError> {
        let (slot, mut guard) = self.lock_existing(key).await.ok_or(BufferError::NoActiveCycle)?;

        let (count, cycle_id) = {
            let cycle = guard.cycle.as_mut().ok_or(BufferError::NoActiveCycle)?;
            cycle.items.push(item);
            cycle.created_at.get_or_insert_with(Utc::now);
            if let Some(timer) = cycle.timer.take() {
                timer.cancel();
            }
            (cycle.items.len(), cycle.id)
        };

        if count >= self.inner.config.max_items {
            let closed = self.close(key, &slot, &mut guard);
            drop(guard);
            if let Some(cycle) = closed {
                self.dispatch(key, cycle, "size").await?;
            }
            return Ok(count);
        }

        let token = CancellationToken::new();
        if let Some(cycle) = guard.cycle.as_mut() {
            cycle.timer = Some(token.clone());
        }
        drop(guard);

        self.arm_timer(key, cycle_id, token);
        log::debug!("Buffer {}: {} item(s) in cycle {}", key, count, cycle_id);
        Ok(count)
    }

    fn arm_timer(&self, key: BufferKey, cycle_id: u64, token: CancellationToken) {
        let buffer = self.clone();
        let timeout = self.inner.config.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Err(e) = buffer.flush_cycle(key, Some((cycle_id, token)), "timeout").await {
                        log::error!("Buffer {}: delayed flush of cycle {} failed: {}", key, cycle_id, e);
                    }
                }
            }
        });
    }

    /// Dispatches the open cycle now. No-op without a cycle or with an empty one.
    pub async fn flush(&self, key: BufferKey) -> Result<(), BufferError> {
        self.flush_cycle(key, None, "manual").await
    }

    /// `armed` is set for timer-driven flushes: the cycle id and token the
    /// timer was armed with. A cancelled token or a different cycle means the
    /// timer is stale.
    async fn flush_cycle(
        &self,
        key: BufferKey,
        armed: Option<(u64, CancellationToken)>,
        trigger: &'static str,
    ) -> Result<(), BufferError> {
        let Some((slot, mut guard)) = self.lock_existing(key).await else {
            return Ok(());
        };
        let Some(cycle) = guard.cycle.as_ref() else {
            return Ok(());
        };
        if let Some((cycle_id, token)) = &armed {
            if cycle.id != *cycle_id || token.is_cancelled() {
                log::debug!("Buffer {}: stale timer for cycle {} ignored", key, cycle_id);
                return Ok(());
            }
        }
        if cycle.items.is_empty() {
            return Ok(());
        }

        let closed = self.close(key, &slot, &mut guard);
        drop(guard);
        match closed {
            Some(cycle) => self.dispatch(key, cycle, trigger).await,
            None => Ok(()),
        }
    }

    /// Hands a closed cycle to the sink. Runs without the key's lock.
    async fn dispatch(&self, key: BufferKey, cycle: Cycle<T>, trigger: &'static str) -> Result<(), BufferError> {
        let count = cycle.items.len();
        let age_ms = cycle
            .created_at
            .map(|t| (Utc::now() - t).num_milliseconds())
            .unwrap_or_default();
        log::info!(
            "Buffer {}: flushing cycle {} with {} item(s) ({} trigger, first item {}ms ago)",
            key,
            cycle.id,
            count,
            trigger,
            age_ms
        );
        metrics::record_flush(key.content_type, trigger, count);

        self.inner
            .sink
            .submit_batch(key, cycle.items)
            .await
            .map_err(BufferError::Submission)
    }

    /// Closes the cycle without dispatching. Returns the number of discarded items.
    pub async fn cancel(&self, key: BufferKey) -> usize {
        let Some((slot, mut guard)) = self.lock_existing(key).await else {
            return 0;
        };
        let discarded = self.close(key, &slot, &mut guard).map_or(0, |c| c.items.len());
        drop(guard);

        if discarded > 0 {
            metrics::record_cancel(key.content_type);
        }
        log::info!("Buffer {}: cycle cancelled, {} item(s) discarded", key, discarded);
        discarded
    }

    /// Number of keys with an open cycle (or one being set up).
    pub fn active_keys(&self) -> usize {
        self.inner.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::error::QueueError;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, Instant};

    #[derive(Default)]
    struct RecordingSink {
        batches: StdMutex<Vec<(BufferKey, Vec<u32>, Instant)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<(BufferKey, Vec<u32>, Instant)> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink<u32> for RecordingSink {
        async fn submit_batch(&self, key: BufferKey, items: Vec<u32>) -> Result<(), DispatchError> {
            self.batches.lock().unwrap().push((key, items, Instant::now()));
            if self.fail {
                return Err(DispatchError::Submission {
                    document_ids: Vec::new(),
                    source: QueueError::Full { capacity: 0 },
                });
            }
            Ok(())
        }
    }

    fn key() -> BufferKey {
        BufferKey::new(42, ContentType::Photo)
    }

    fn buffer(max_items: usize, timeout_secs: u64) -> (DebouncedBuffer<u32>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let config = BufferConfig {
            max_items,
            timeout: Duration::from_secs(timeout_secs),
        };
        (DebouncedBuffer::new(config, sink.clone()), sink)
    }

    #[test]
    fn test_config_requires_positive_values() {
        assert!(BufferConfig::new(0, 3).is_err());
        assert!(BufferConfig::new(10, 0).is_err());
        assert_eq!(BufferConfig::new(1, 1).unwrap().max_items, 1);
        assert_eq!(BufferConfig::default(), BufferConfig::new(10, 3).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_flushes_once_after_last_add() {
        let (buffer, sink) = buffer(10, 3);
        let start = Instant::now();

        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 1).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        buffer.add(key(), 2).await.unwrap();
        sleep(Duration::from_secs(1)).await;
        buffer.add(key(), 3).await.unwrap();

        sleep(Duration::from_millis(2900)).await;
        assert!(sink.batches().is_empty());
        assert!(buffer.is_waiting(key()).await);

        sleep(Duration::from_millis(200)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![1, 2, 3]);
        assert_eq!(batches[0].2 - start, Duration::from_secs(5));
        assert!(!buffer.is_waiting(key()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_flushes_before_add_returns() {
        let (buffer, sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();

        for i in 0..9 {
            assert_eq!(buffer.add(key(), i).await.unwrap(), i as usize + 1);
        }
        assert!(sink.batches().is_empty());

        assert_eq!(buffer.add(key(), 9).await.unwrap(), 10);
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, (0..10).collect::<Vec<_>>());

        // The cancelled timer must not produce a second flush
        sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.batches().len(), 1);
        assert_eq!(buffer.active_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_items_one_dispatches_every_item() {
        let (buffer, sink) = buffer(1, 3);
        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 7).await.unwrap();
        assert_eq!(sink.batches().len(), 1);

        assert!(matches!(buffer.add(key(), 8).await, Err(BufferError::NoActiveCycle)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_flush_submits_once() {
        let (buffer, sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 1).await.unwrap();
        buffer.add(key(), 2).await.unwrap();

        buffer.flush(key()).await.unwrap();
        buffer.flush(key()).await.unwrap();
        sleep(Duration::from_secs(10)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_of_empty_cycle_keeps_it_open() {
        let (buffer, sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();
        buffer.flush(key()).await.unwrap();

        assert!(buffer.is_waiting(key()).await);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_cycle_twice_is_rejected() {
        let (buffer, _sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();
        assert!(matches!(
            buffer.start_cycle(key()).await,
            Err(BufferError::AlreadyWaiting)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_without_cycle_is_rejected() {
        let (buffer, _sink) = buffer(10, 3);
        assert!(matches!(buffer.add(key(), 1).await, Err(BufferError::NoActiveCycle)));
        assert_eq!(buffer.active_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_and_is_idempotent() {
        let (buffer, sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 1).await.unwrap();
        buffer.add(key(), 2).await.unwrap();

        assert_eq!(buffer.cancel(key()).await, 2);
        assert_eq!(buffer.cancel(key()).await, 0);
        assert!(!buffer.is_waiting(key()).await);

        sleep(Duration::from_secs(10)).await;
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_never_flushes_newer_cycle() {
        let (buffer, sink) = buffer(10, 3);
        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 1).await.unwrap();

        sleep(Duration::from_secs(2)).await;
        buffer.flush(key()).await.unwrap();
        buffer.start_cycle(key()).await.unwrap();
        sleep(Duration::from_millis(500)).await;
        buffer.add(key(), 2).await.unwrap();

        // The first cycle's timer would have fired at t=3
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.batches().len(), 1);

        sleep(Duration::from_secs(2)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].1, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (buffer, sink) = buffer(2, 3);
        let photos = BufferKey::new(1, ContentType::Photo);
        let files = BufferKey::new(1, ContentType::File);
        buffer.start_cycle(photos).await.unwrap();
        buffer.start_cycle(files).await.unwrap();

        buffer.add(photos, 1).await.unwrap();
        buffer.add(files, 10).await.unwrap();
        buffer.add(photos, 2).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, photos);
        assert!(buffer.is_waiting(files).await);
        assert_eq!(buffer.pending_count(files).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_lose_nothing() {
        let (buffer, sink) = buffer(1000, 60);
        buffer.start_cycle(key()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50u32 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move { buffer.add(key(), i).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        buffer.flush(key()).await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let mut items = batches[0].1.clone();
        items.sort_unstable();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_across_threshold_never_duplicate() {
        let (buffer, sink) = buffer(5, 60);
        buffer.start_cycle(key()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let buffer = buffer.clone();
            handles.push(tokio::spawn(async move { buffer.add(key(), i).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 5);
        assert!(!buffer.is_waiting(key()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_reaches_caller_and_closes_cycle() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let buffer = DebouncedBuffer::new(
            BufferConfig {
                max_items: 2,
                timeout: Duration::from_secs(3),
            },
            sink.clone(),
        );
        buffer.start_cycle(key()).await.unwrap();
        buffer.add(key(), 1).await.unwrap();

        let result = buffer.add(key(), 2).await;
        assert!(matches!(result, Err(BufferError::Submission(_))));
        assert!(!buffer.is_waiting(key()).await);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.batches().len(), 1);
    }
}
