//! Ingestion pipeline: debounced batching, priority dispatch and the
//! document status machine

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod queue;
pub mod status;

// Re-exports for convenience
pub use buffer::{BatchSink, BufferConfig, BufferKey, DebouncedBuffer};
pub use dispatcher::{
    DispatchSink, Dispatcher, DispatcherConfig, FixedTier, JobStatusView, TierDirectory, TierResolver, WorkerPool,
};
pub use error::{BufferError, DispatchError, QueueError};
pub use job::{BatchItem, DocumentId, Job, JobId, JobPayload, OwnerId};
pub use queue::{Delivery, JobQueue};
pub use status::{DocumentStatus, TransitionError};
