use thiserror::Error;

use crate::ingest::job::DocumentId;
use crate::storage::StoreError;

/// Priority queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is full ({capacity} jobs)")]
    Full { capacity: usize },

    #[error("job journal write failed: {0}")]
    Journal(#[source] StoreError),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

/// Errors returned synchronously by dispatcher submissions.
///
/// Failures inside job execution never surface here; they end in the
/// document's `failed` status.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Nothing of the submission was enqueued. `document_ids` lists the
    /// documents created before the failure; they stay `pending` without a
    /// job and can be picked up again with `resubmit_pending`.
    #[error("jobs could not be enqueued ({} pending document(s) left without a job): {source}", .document_ids.len())]
    Submission {
        document_ids: Vec<DocumentId>,
        #[source]
        source: QueueError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// `resubmit_failed` on a document that is not in `failed`
    #[error("document {0} is not in failed state")]
    NotFailed(DocumentId),

    /// `resubmit_pending` on a document that is not in `pending`
    #[error("document {0} is not in pending state")]
    NotPending(DocumentId),

    #[error("document {0} already has a queued job")]
    AlreadyQueued(DocumentId),
}

/// Debounced buffer errors
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("a batching cycle is already open for this key")]
    AlreadyWaiting,

    #[error("no open batching cycle for this key")]
    NoActiveCycle,

    /// The flushed batch was rejected downstream; the cycle stays closed.
    #[error("batch submission failed: {0}")]
    Submission(#[from] DispatchError),
}
